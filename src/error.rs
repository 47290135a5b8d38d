use thiserror::Error;

/// Errors from the persistent tile store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not obtain a connection from the pool
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Error reported by SQLite
    #[error("sqlite error: {0}")]
    Sqlite(#[from] r2d2_sqlite::rusqlite::Error),

    /// The blocking task running the query was cancelled or panicked
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors that can occur when fetching a tile over the network
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status code
    #[error("unexpected status code: {code}")]
    Status { code: u16 },

    /// Server answered 2xx but sent no body
    #[error("empty response body")]
    EmptyBody,

    /// Response bytes are not a decodable image
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
}

/// Errors raised while building a [`crate::map::Map`] from a definition
#[derive(Debug, Error)]
pub enum MapError {
    /// A layer URL template does not produce a valid URL
    #[error("invalid URL template for layer {layer}: {source}")]
    InvalidUrlTemplate {
        layer: String,
        source: url::ParseError,
    },

    /// A layer declares a zero-sized tile grid or tile size
    #[error("invalid geometry for layer {layer}: {message}")]
    InvalidGeometry { layer: String, message: String },

    /// The map definition contains no layers
    #[error("map {0} has no layers")]
    Empty(String),
}
