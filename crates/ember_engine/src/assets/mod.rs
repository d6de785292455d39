//! Asset loading: scene documents, image decoding
//!
//! Load failures are recoverable by design: every loader returns a `Result`
//! and callers may substitute a default asset instead of aborting. Bad input
//! data is never a panic.

pub mod image_loader;
pub mod scene;
pub mod tga;

use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// File could not be read
    #[error("IO error reading asset: {0}")]
    Io(#[from] std::io::Error),

    /// Asset data does not match its declared structure
    #[error("Malformed asset: {0}")]
    Malformed(String),

    /// File format not handled by any decoder
    #[error("Unsupported asset format: {0}")]
    UnsupportedFormat(String),
}

/// Result alias for asset operations
pub type AssetResult<T> = Result<T, AssetError>;
