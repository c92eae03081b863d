//! Path confinement for sandbox-relative paths.
//!
//! Every caller-supplied path passes through here before touching the
//! filesystem. `..` segments are rejected outright, even when a later
//! segment would bring the path back inside the root.

use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

/// Normalizes a caller-supplied path into a root-relative path.
///
/// - `\` separators are treated as `/`
/// - a leading slash is stripped (paths are root-relative, never absolute)
/// - empty and `.` segments are silently dropped
/// - any `..` segment fails with `PathEscapesRoot`
///
/// An empty result means "the sandbox root itself".
pub fn confine(raw: &str) -> Result<PathBuf, SandboxError> {
    if raw.trim().is_empty() {
        return Err(SandboxError::PathRequired);
    }

    let normalized = raw.replace('\\', "/");
    let mut rel = PathBuf::new();

    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(SandboxError::path_escapes_root(raw)),
            other => rel.push(other),
        }
    }

    Ok(rel)
}

/// Resolves a caller-supplied path against a sandbox root.
///
/// Runs the syntactic check, then verifies the joined path is the root or
/// one of its descendants. Both checks must pass.
pub fn resolve(root: &Path, raw: &str) -> Result<PathBuf, SandboxError> {
    let rel = confine(raw)?;
    let joined = root.join(&rel);

    if !is_within(root, &joined) {
        return Err(SandboxError::path_escapes_root(raw));
    }

    Ok(joined)
}

/// Returns the normalized relative form of a path, for display and for
/// echoing back in results.
pub fn display_relative(raw: &str) -> Result<String, SandboxError> {
    let rel = confine(raw)?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

/// Checks that `candidate` is `root` or a descendant of it, comparing
/// lexical components without touching the filesystem.
fn is_within(root: &Path, candidate: &Path) -> bool {
    let root_parts: Vec<Component> = root.components().collect();
    let cand_parts: Vec<Component> = candidate.components().collect();

    cand_parts.len() >= root_parts.len()
        && root_parts.iter().zip(cand_parts.iter()).all(|(a, b)| a == b)
}
