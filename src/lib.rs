//! Ephemeral sandbox lifecycle and execution engine.
//!
//! A sandbox is a confined filesystem root plus the ability to run
//! commands inside it. The [`sandbox::SandboxManager`] owns the set of
//! live sandboxes, creates and destroys them, and prunes the ones whose
//! TTL has lapsed. Each [`sandbox::Sandbox`] handle executes commands
//! and does file I/O either locally (real directory tree, real
//! processes) or through the remote managed service
//! ([`remote::RemoteClient`]), identically from the caller's point of
//! view.

pub mod config;
pub mod error;
pub mod remote;
pub mod sandbox;

pub use error::SandboxError;
pub use sandbox::{
    CreateOptions, Encoding, ExecRequest, ExecResult, FileContent, ListDirectoryResult,
    PruneOutcome, Sandbox, SandboxInfo, SandboxManager,
};
