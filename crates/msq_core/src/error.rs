use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("format error at offset {offset:#x}: {message}")]
    Format { offset: usize, message: String },

    #[error("checksum mismatch at offset {offset:#x}: stored {expected:#06x}, computed {actual:#06x}")]
    Checksum {
        offset: usize,
        expected: u16,
        actual: u16,
    },

    #[error("parts overlap at offset {offset:#x}: {a} and {b}")]
    Overlap { offset: usize, a: String, b: String },

    #[error("truncated data at offset {offset:#x}: {message}")]
    Truncated { offset: usize, message: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn format(offset: usize, message: impl Into<String>) -> Self {
        Error::Format {
            offset,
            message: message.into(),
        }
    }

    pub fn truncated(offset: usize, message: impl Into<String>) -> Self {
        Error::Truncated {
            offset,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
