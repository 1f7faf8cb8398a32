use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Error reported by the service. Conflict-class rejections
    /// (already redeemed, refund pending, duplicate reservation) carry
    /// status 409 and are terminal; do not retry them.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}
