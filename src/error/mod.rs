use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type carrying the failure category and, where known,
/// the file the failure relates to.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A specifier could not be resolved to a file
    Resolution,
    /// The transformed source failed to parse
    Syntax,
    /// A module body or mock callback failed while running
    Execution,
    /// Automock metadata could not be derived from a module's exports
    Automock,
    /// Bad configuration (unparsable pattern, unreadable config file)
    Config,
    /// Underlying I/O failure
    Io,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn automock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Automock, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn is_syntax(&self) -> bool {
        self.kind == ErrorKind::Syntax
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::Resolution => "Resolution Error",
            ErrorKind::Syntax => "Syntax Error",
            ErrorKind::Execution => "Execution Error",
            ErrorKind::Automock => "Automock Error",
            ErrorKind::Config => "Configuration Error",
            ErrorKind::Io => "I/O Error",
        };

        write!(f, "{}: {}", label, self.message)?;

        if let Some(file) = &self.file {
            write!(f, "\n    --> {}", file.display())?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let error = Error::resolution("module 'x' not found");
        assert_eq!(error.kind, ErrorKind::Resolution);
        assert!(error.message.contains("'x'"));
        assert!(error.file.is_none());
    }

    #[test]
    fn test_error_with_file() {
        let error = Error::syntax("unexpected token").with_file("/t/a.js");
        assert_eq!(error.file, Some(PathBuf::from("/t/a.js")));
        assert!(error.is_syntax());
        assert!(error.to_string().contains("/t/a.js"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: Error = io.into();
        assert_eq!(error.kind, ErrorKind::Io);
    }
}
