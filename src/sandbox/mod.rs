//! Sandbox entity model and the dual-backend sandbox handle.
//!
//! A [`Sandbox`] is a live handle bound to one sandbox id. It holds
//! either a local root directory (operations run in-process) or a
//! remote client reference plus a cached [`SandboxInfo`] snapshot
//! (operations are forwarded upstream). The backend is picked at
//! construction and never changes.

pub mod exec;
pub mod files;
pub mod paths;
pub mod registry;
pub mod ttl;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SandboxError;
use crate::remote::RemoteClient;

pub use exec::DEFAULT_TIMEOUT_MS;
pub use registry::{CreateOptions, PruneOutcome, SandboxManager};

/// Content encoding for file transfer across the sandbox boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Plain text, read and written as utf-8.
    #[default]
    Utf8,
    /// Binary content carried as standard base64 text.
    Base64,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "base64" => Ok(Self::Base64),
            _ => anyhow::bail!("Unknown encoding: '{s}'. Supported: utf8, base64"),
        }
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// Identity and lifecycle snapshot of a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Unique id, caller-assigned or generated.
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Monotonically non-decreasing; every successful operation bumps it.
    pub last_used_at: DateTime<Utc>,
    /// Seconds of inactivity before the sandbox expires. None never expires.
    pub ttl_seconds: Option<f64>,
    /// Opaque key-value map, immutable after creation.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Advisory, remote backend only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    /// Advisory, remote backend only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl SandboxInfo {
    /// Returns true when the sandbox has outlived its TTL at `reference`.
    pub fn is_expired(&self, reference: DateTime<Utc>) -> bool {
        ttl::is_expired(self.last_used_at, self.ttl_seconds, reference)
    }
}

/// A command to execute inside a sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    /// Merged over (not replacing) the base process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub use_shell: bool,
    /// Milliseconds; None applies [`DEFAULT_TIMEOUT_MS`], `<= 0` disables.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

/// Captured outcome of an executed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed before exiting normally.
    pub exit_code: Option<i32>,
    /// True iff not timed out and the exit code is exactly 0.
    pub success: bool,
    pub timed_out: bool,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A file's content and metadata, as transferred across the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    /// Sandbox-relative, normalized.
    pub path: String,
    pub encoding: Encoding,
    pub content: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// One child of a listed directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Sandbox-relative path of the entry.
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Files only.
    pub size_bytes: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A directory listing, in whatever order the filesystem/API returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDirectoryResult {
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

/// Backing state of a sandbox handle, selected at construction.
#[derive(Debug)]
enum Backend {
    Local { root: PathBuf },
    Remote { client: Arc<RemoteClient> },
}

/// A live sandbox handle. Obtained from [`SandboxManager`]; destruction
/// is terminal and further operations fail with `NotFound`.
#[derive(Debug)]
pub struct Sandbox {
    id: String,
    info: Mutex<SandboxInfo>,
    backend: Backend,
    destroyed: AtomicBool,
}

impl Sandbox {
    pub(crate) fn local(info: SandboxInfo, root: PathBuf) -> Self {
        Self {
            id: info.id.clone(),
            info: Mutex::new(info),
            backend: Backend::Local { root },
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn remote(info: SandboxInfo, client: Arc<RemoteClient>) -> Self {
        Self {
            id: info.id.clone(),
            info: Mutex::new(info),
            backend: Backend::Remote { client },
            destroyed: AtomicBool::new(false),
        }
    }

    /// The sandbox id this handle is bound to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local root directory, when this is a local-backend sandbox.
    pub fn root(&self) -> Option<&PathBuf> {
        match &self.backend {
            Backend::Local { root } => Some(root),
            Backend::Remote { .. } => None,
        }
    }

    /// A snapshot of the current cached metadata.
    pub async fn info(&self) -> SandboxInfo {
        self.info.lock().await.clone()
    }

    /// Resets the expiration window by bumping `last_used_at` to now.
    pub async fn touch(&self) {
        let mut info = self.info.lock().await;
        info.last_used_at = Utc::now();
    }

    /// Executes a command inside the sandbox.
    ///
    /// `last_used_at` is updated for every exec that reaches the sandbox,
    /// whether or not the command itself succeeded.
    pub async fn exec(&self, request: &ExecRequest) -> Result<ExecResult, SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                let result = exec::run(root, request).await;
                self.touch().await;
                result
            }
            Backend::Remote { client } => {
                let (result, record) = client.exec(&self.id, request).await?;
                self.apply_remote(record).await;
                Ok(result)
            }
        }
    }

    /// Writes file content, returning the read-back description.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Encoding,
        create_directories: bool,
    ) -> Result<FileContent, SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                let written =
                    files::write_file(root, path, content, encoding, create_directories).await?;
                self.touch().await;
                Ok(written)
            }
            Backend::Remote { client } => {
                let (written, record) = client
                    .write_file(&self.id, path, content, encoding, create_directories)
                    .await?;
                self.apply_remote(record).await;
                Ok(written)
            }
        }
    }

    /// Reads file content in the requested encoding.
    pub async fn read_file(
        &self,
        path: &str,
        encoding: Encoding,
    ) -> Result<FileContent, SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                let content = files::read_file(root, path, encoding).await?;
                self.touch().await;
                Ok(content)
            }
            Backend::Remote { client } => {
                let (content, record) = client.read_file(&self.id, path, encoding).await?;
                self.apply_remote(record).await;
                Ok(content)
            }
        }
    }

    /// Removes a file or directory tree. Idempotent.
    pub async fn delete_file(&self, path: &str) -> Result<(), SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                files::delete_path(root, path).await?;
                self.touch().await;
                Ok(())
            }
            Backend::Remote { client } => {
                let record = client.delete_file(&self.id, path).await?;
                self.apply_remote(record).await;
                Ok(())
            }
        }
    }

    /// Ensures a directory exists (recursively, idempotently).
    pub async fn make_directory(&self, path: &str) -> Result<(), SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                files::make_directory(root, path).await?;
                self.touch().await;
                Ok(())
            }
            Backend::Remote { client } => {
                let record = client.make_directory(&self.id, path).await?;
                self.apply_remote(record).await;
                Ok(())
            }
        }
    }

    /// Lists the children of a directory.
    pub async fn list_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<ListDirectoryResult, SandboxError> {
        self.ensure_live()?;
        match &self.backend {
            Backend::Local { root } => {
                let listing = files::list_directory(root, path, recursive).await?;
                self.touch().await;
                Ok(listing)
            }
            Backend::Remote { client } => {
                let (listing, record) = client.list_directory(&self.id, path).await?;
                self.apply_remote(record).await;
                Ok(listing)
            }
        }
    }

    /// Tears down the backing storage. Terminal and idempotent: the
    /// first caller wins, later calls return `Ok(false)`.
    pub(crate) async fn destroy(&self) -> Result<bool, SandboxError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        debug!("Destroying sandbox {}", self.id);
        match &self.backend {
            Backend::Local { root } => match fs::remove_dir_all(root).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            },
            Backend::Remote { client } => {
                client.delete_sandbox(&self.id).await?;
                Ok(true)
            }
        }
    }

    fn ensure_live(&self) -> Result<(), SandboxError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SandboxError::not_found(format!("sandbox {}", self.id)));
        }
        Ok(())
    }

    /// Folds an upstream sandbox record into the cached metadata.
    ///
    /// Last completion wins, except `last_used_at` never moves backwards.
    /// Without a record the operation still counts as use.
    async fn apply_remote(&self, record: Option<SandboxInfo>) {
        let mut info = self.info.lock().await;
        match record {
            Some(fresh) => {
                let floor = info.last_used_at;
                *info = fresh;
                if info.last_used_at < floor {
                    info.last_used_at = floor;
                }
            }
            None => info.last_used_at = Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(id: &str) -> SandboxInfo {
        let now = Utc::now();
        SandboxInfo {
            id: id.to_string(),
            created_at: now,
            last_used_at: now,
            ttl_seconds: None,
            metadata: BTreeMap::new(),
            jurisdiction: None,
            status: None,
        }
    }

    fn local_sandbox(dir: &tempfile::TempDir) -> Sandbox {
        let root = dir.path().join("box-1");
        std::fs::create_dir(&root).unwrap();
        Sandbox::local(info("box-1"), root)
    }

    #[test]
    fn test_encoding_display_and_parse() {
        assert_eq!(format!("{}", Encoding::Utf8), "utf8");
        assert_eq!(format!("{}", Encoding::Base64), "base64");
        assert_eq!("utf-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("Base64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert!("hex".parse::<Encoding>().is_err());
    }

    #[tokio::test]
    async fn test_sandbox_is_debug_formattable() {
        let dir = tempdir().unwrap();
        let sandbox = local_sandbox(&dir);
        let rendered = format!("{sandbox:?}");
        assert!(rendered.contains("box-1"));
    }

    #[test]
    fn test_info_invariant_last_used_not_before_created() {
        let info = info("a");
        assert!(info.last_used_at >= info.created_at);
    }

    #[tokio::test]
    async fn test_exec_updates_last_used() {
        let dir = tempdir().unwrap();
        let sandbox = local_sandbox(&dir);
        let before = sandbox.info().await.last_used_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let request = ExecRequest {
            command: "true".to_string(),
            ..ExecRequest::default()
        };
        sandbox.exec(&request).await.unwrap();

        assert!(sandbox.info().await.last_used_at > before);
    }

    #[tokio::test]
    async fn test_failed_exec_still_updates_last_used() {
        let dir = tempdir().unwrap();
        let sandbox = local_sandbox(&dir);
        let before = sandbox.info().await.last_used_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let request = ExecRequest {
            command: "no-such-binary-qq".to_string(),
            ..ExecRequest::default()
        };
        assert!(sandbox.exec(&request).await.is_err());

        assert!(sandbox.info().await.last_used_at > before);
    }

    #[tokio::test]
    async fn test_file_roundtrip_through_handle() {
        let dir = tempdir().unwrap();
        let sandbox = local_sandbox(&dir);

        sandbox
            .write_file("src/hello.txt", "Hello Sandbox!", Encoding::Utf8, true)
            .await
            .unwrap();
        let read = sandbox
            .read_file("src/hello.txt", Encoding::Utf8)
            .await
            .unwrap();
        assert_eq!(read.content, "Hello Sandbox!");

        let listing = sandbox.list_directory("src", false).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].name, "hello.txt");
    }

    #[tokio::test]
    async fn test_destroy_is_terminal() {
        let dir = tempdir().unwrap();
        let sandbox = local_sandbox(&dir);
        let root = sandbox.root().unwrap().clone();

        assert!(sandbox.destroy().await.unwrap());
        assert!(!root.exists());
        // second destroy is a no-op
        assert!(!sandbox.destroy().await.unwrap());

        let err = sandbox
            .read_file("anything.txt", Encoding::Utf8)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_touch_resets_expiry() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("box-t");
        std::fs::create_dir(&root).unwrap();
        let mut stale = info("box-t");
        stale.ttl_seconds = Some(0.001);
        stale.last_used_at = Utc::now() - chrono::Duration::seconds(60);
        let sandbox = Sandbox::local(stale, root);

        assert!(sandbox.info().await.is_expired(Utc::now()));
        sandbox.touch().await;
        assert!(!sandbox.info().await.is_expired(Utc::now()));
    }

    #[test]
    fn test_exec_request_json_shape() {
        let request: ExecRequest =
            serde_json::from_str(r#"{"command":"echo","args":["hi"],"timeout_ms":500}"#).unwrap();
        assert_eq!(request.command, "echo");
        assert_eq!(request.args, vec!["hi"]);
        assert_eq!(request.timeout_ms, Some(500));
        assert!(!request.use_shell);
        assert!(request.stdin.is_none());
    }

    #[test]
    fn test_directory_entry_type_serializes_lowercase() {
        let entry = DirectoryEntry {
            name: "x".into(),
            path: "x".into(),
            entry_type: EntryType::Directory,
            size_bytes: None,
            modified_at: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "directory");
    }
}
