use thiserror::Error;

/// Validation errors for natter wire types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid topic: {reason}")]
    InvalidTopic { reason: String },

    #[error("payload too large: {size} > {max_size}")]
    PayloadTooLarge { size: usize, max_size: usize },
}
