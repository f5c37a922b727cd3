//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Ironkad crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    /// Indicates that an [Id](crate::Id) was built from a slice of the wrong length.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Indicates that an [Id](crate::Id) string was not 40 hexadecimal characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),
}
