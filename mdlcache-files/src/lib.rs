use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("The file's magic value does not match the expectation {magic}")]
    InvalidMagicValue { magic: u32 },

    #[error("The file is violating the expected format, because: {reason}")]
    FormatError { reason: &'static str },

    #[error("Unsupported version {version}")]
    UnsupportedVersion { version: i32 },

    #[error("Checksum {found} does not match the model checksum {expected}")]
    ChecksumMismatch { expected: i32, found: i32 },

    /// A table or string points outside of the declared data.
    #[error("{what} at offset {offset} exceeds the data length {length}")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        length: usize,
    },

    /// A compressed payload inflated to a different size than it declared.
    #[error("Decoded {actual} bytes, but the payload declared {expected}")]
    DecodeFailure { expected: usize, actual: usize },

    /// Represents an empty source.
    #[error("Source contains no data")]
    EmptySource,

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    StringConversationError(#[from] std::ffi::IntoStringError),

    #[error(transparent)]
    UTF8ConversationError(#[from] std::string::FromUtf8Error),
}

#[cfg(any(test, feature = "builders"))]
pub mod builders;
pub mod common;
pub mod phy;
pub mod studio;
pub mod vtx;
pub mod vvd;
