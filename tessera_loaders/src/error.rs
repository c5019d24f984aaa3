use tessera_assets::{LoadError, ResourceKey};

/// Why a file could not be decoded
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Reached end of file unexpectedly")]
    UnexpectedEof,
    #[error("{0}")]
    Io(std::io::Error),
    #[error("Invalid file signature")]
    InvalidSignature,
    #[error("Invalid file header")]
    InvalidHeader,
    #[error("Missing {0} data")]
    MissingSection(&'static str),
    #[error("Invalid file footer")]
    InvalidFooter,
    #[error("Kerning refers to unknown glyph {0}")]
    UnknownGlyph(i32),
    #[error("Unsupported image type: {0}")]
    UnsupportedImage(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("Text is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => DecodeError::UnexpectedEof,
            _ => DecodeError::Io(e),
        }
    }
}

impl DecodeError {
    /// Wrap into the error reported for `key`, `kind` names the file kind, e.g. `Font`
    pub fn into_load_error(self, key: &ResourceKey, kind: &str) -> LoadError {
        LoadError::initialization(key, format!("{kind} file is invalid or corrupt ({self})"))
    }
}
