/// Errors produced when parsing or constructing object ids.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hex character {byte:#04x} at position {pos}")]
    InvalidHex { byte: u8, pos: usize },

    #[error("invalid raw length: expected {expected}, got {actual}")]
    InvalidRawLength { expected: usize, actual: usize },

    #[error("object id prefix too short: {0} hex digits (minimum 4)")]
    PrefixTooShort(usize),

    #[error("object id prefix too long: {0} hex digits (maximum 40)")]
    PrefixTooLong(usize),
}
