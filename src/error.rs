use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum FillError {
    MissingTemplate(PathBuf),
    MissingPlacements,
    EmptyRecordSet,
    UnsupportedTemplate(String),
    InvalidConfiguration(String),
    Pdf(String),
    Image(String),
    Font(String),
    Archive(String),
    Io(std::io::Error),
}

impl fmt::Display for FillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillError::MissingTemplate(path) => {
                write!(f, "template file not found: {}", path.display())
            }
            FillError::MissingPlacements => {
                write!(f, "a PDF template cannot be filled without a placement list")
            }
            FillError::EmptyRecordSet => write!(f, "no records supplied for batch fill"),
            FillError::UnsupportedTemplate(ext) => {
                write!(f, "unsupported template type: {}", ext)
            }
            FillError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            FillError::Pdf(message) => write!(f, "pdf error: {}", message),
            FillError::Image(message) => write!(f, "image error: {}", message),
            FillError::Font(message) => write!(f, "font error: {}", message),
            FillError::Archive(message) => write!(f, "archive error: {}", message),
            FillError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for FillError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FillError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FillError {
    fn from(value: std::io::Error) -> Self {
        FillError::Io(value)
    }
}

impl From<zip::result::ZipError> for FillError {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(err) => FillError::Io(err),
            other => FillError::Archive(other.to_string()),
        }
    }
}

pub(crate) fn pdf_err(err: lopdf::Error) -> FillError {
    FillError::Pdf(err.to_string())
}
