use thiserror::Error;

/// Failures surfaced by the dataset, API and decoding layers.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("invalid JSON payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("feature #{index} rejected: {reason}")]
    InvalidFeature { index: usize, reason: String },
    #[error("expected a FeatureCollection")]
    NotACollection,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, MapError>;
