//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A file or directory path was required but empty or absent.
    #[error("A path is required")]
    PathRequired,

    /// The supplied path would resolve outside the sandbox root.
    #[error("Path escapes the sandbox root: {path}")]
    PathEscapesRoot { path: String },

    /// The sandbox, file, or directory does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A sandbox with this id is already registered.
    #[error("Sandbox already exists: {id}")]
    AlreadyExists { id: String },

    /// The path resolves to a directory where a file was expected.
    #[error("Not a file: {path}")]
    NotAFile { path: String },

    /// The path resolves to something that is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    /// The command could not be launched (e.g. binary not found).
    #[error("Failed to execute command: {message}")]
    ExecutionFailed { message: String },

    /// The remote sandbox service rejected or failed the request.
    #[error("Remote request failed: {message}")]
    RemoteRequestFailed { message: String },

    /// A filesystem operation failed outside the typed cases above.
    #[error("Storage operation failed: {message}")]
    Storage { message: String },
}

impl SandboxError {
    /// Creates a `PathEscapesRoot` error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot { path: path.into() }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an `AlreadyExists` error.
    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Creates a `NotAFile` error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile { path: path.into() }
    }

    /// Creates a `NotADirectory` error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates an `ExecutionFailed` error.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    /// Creates a `RemoteRequestFailed` error.
    pub fn remote_request_failed(message: impl Into<String>) -> Self {
        Self::RemoteRequestFailed {
            message: message.into(),
        }
    }

    /// Creates a `Storage` error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this is a path confinement violation.
    pub fn is_path_escape(&self) -> bool {
        matches!(self, Self::PathEscapesRoot { .. })
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is an already-exists conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if the remote service or transport failed.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::RemoteRequestFailed { .. })
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::already_exists(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_escapes_root_error() {
        let err = SandboxError::path_escapes_root("../etc/passwd");
        assert!(err.is_path_escape());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Path escapes the sandbox root: ../etc/passwd"
        );
    }

    #[test]
    fn test_path_required_error() {
        let err = SandboxError::PathRequired;
        assert_eq!(err.to_string(), "A path is required");
    }

    #[test]
    fn test_not_found_error() {
        let err = SandboxError::not_found("sandbox abc123");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: sandbox abc123");
    }

    #[test]
    fn test_already_exists_error() {
        let err = SandboxError::already_exists("box-1");
        assert!(err.is_already_exists());
        assert_eq!(err.to_string(), "Sandbox already exists: box-1");
    }

    #[test]
    fn test_not_a_file_error() {
        let err = SandboxError::not_a_file("src");
        assert_eq!(err.to_string(), "Not a file: src");
    }

    #[test]
    fn test_not_a_directory_error() {
        let err = SandboxError::not_a_directory("hello.txt");
        assert_eq!(err.to_string(), "Not a directory: hello.txt");
    }

    #[test]
    fn test_execution_failed_error() {
        let err = SandboxError::execution_failed("no such binary");
        assert_eq!(err.to_string(), "Failed to execute command: no such binary");
    }

    #[test]
    fn test_remote_request_failed_error() {
        let err = SandboxError::remote_request_failed("HTTP 503");
        assert!(err.is_remote_failure());
        assert_eq!(err.to_string(), "Remote request failed: HTTP 503");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SandboxError = io.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_io_other_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SandboxError = io.into();
        assert!(matches!(err, SandboxError::Storage { .. }));
    }

    #[test]
    fn test_error_variants_are_distinct() {
        let escape = SandboxError::path_escapes_root("..");
        let missing = SandboxError::not_found("x");
        let conflict = SandboxError::already_exists("x");

        assert!(escape.is_path_escape());
        assert!(!escape.is_not_found());
        assert!(!escape.is_already_exists());

        assert!(missing.is_not_found());
        assert!(!missing.is_path_escape());

        assert!(conflict.is_already_exists());
        assert!(!conflict.is_remote_failure());
    }
}
