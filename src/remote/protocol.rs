//! Response normalization for the remote sandbox service.
//!
//! The upstream API answers in two envelope styles and two field-naming
//! conventions. Everything here is deterministic shape-sniffing: unwrap
//! the generic `{success, errors, result}` wrapper if present, then try
//! each known inner shape in a fixed priority order (nested field first,
//! then the flat record), preferring `snake_case` fields over their
//! `camelCase` twins and defaulting timestamps to "now" only when the
//! record omits them entirely.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SandboxError;
use crate::sandbox::{
    DirectoryEntry, Encoding, EntryType, ExecResult, FileContent, ListDirectoryResult, SandboxInfo,
};

/// Unwraps the generic success/error envelope, passing through bespoke
/// payloads untouched. A `success: false` body fails with the first
/// listed error message.
pub fn unwrap_envelope(value: Value) -> Result<Value, SandboxError> {
    let Value::Object(map) = value else {
        return Ok(value);
    };

    if !(map.contains_key("success") && map.contains_key("result")) {
        return Ok(Value::Object(map));
    }

    let success = map.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let message = map
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .map(error_message)
            .unwrap_or_else(|| "remote request failed".to_string());
        return Err(SandboxError::remote_request_failed(message));
    }

    Ok(map.get("result").cloned().unwrap_or(Value::Null))
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Extracts a sandbox record: nested `{"sandbox": {...}}` first, then
/// the flat form (the object itself carries an `id`).
pub fn sniff_sandbox(value: &Value) -> Result<SandboxInfo, SandboxError> {
    if let Some(nested) = value.get("sandbox").filter(|v| v.is_object()) {
        return parse_sandbox(nested);
    }
    if value.get("id").is_some() {
        return parse_sandbox(value);
    }
    Err(SandboxError::remote_request_failed(
        "response contained no sandbox record",
    ))
}

/// Like [`sniff_sandbox`] but tolerant: Some only when the response
/// piggybacked a sandbox record on another payload.
pub fn sniff_sandbox_update(value: &Value) -> Option<SandboxInfo> {
    sniff_sandbox(value).ok()
}

/// Extracts a list of sandbox records: `{"sandboxes": [...]}` first,
/// then a bare array.
pub fn sniff_sandbox_list(value: &Value) -> Result<Vec<SandboxInfo>, SandboxError> {
    let items = value
        .get("sandboxes")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .ok_or_else(|| {
            SandboxError::remote_request_failed("response contained no sandbox list")
        })?;

    items.iter().map(parse_sandbox).collect()
}

fn parse_sandbox(value: &Value) -> Result<SandboxInfo, SandboxError> {
    let id = string_field(value, "id", "id")
        .ok_or_else(|| SandboxError::remote_request_failed("sandbox record missing id"))?;

    let created_at = time_field(value, "created_at", "createdAt").unwrap_or_else(Utc::now);
    let mut last_used_at = time_field(value, "last_used_at", "lastUsedAt").unwrap_or_else(Utc::now);
    if last_used_at < created_at {
        last_used_at = created_at;
    }

    let metadata = value
        .get("metadata")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_else(BTreeMap::new);

    Ok(SandboxInfo {
        id,
        created_at,
        last_used_at,
        ttl_seconds: number_field(value, "ttl_seconds", "ttlSeconds"),
        metadata,
        jurisdiction: string_field(value, "jurisdiction", "jurisdiction"),
        status: string_field(value, "status", "status"),
    })
}

/// Extracts a file record: nested `{"file": {...}}` first, then the flat
/// form (the object itself carries `content` or `path`).
pub fn sniff_file(
    value: &Value,
    requested: Encoding,
    fallback_path: &str,
) -> Result<FileContent, SandboxError> {
    let record = if let Some(nested) = value.get("file").filter(|v| v.is_object()) {
        nested
    } else if value.get("content").is_some() || value.get("path").is_some() {
        value
    } else {
        return Err(SandboxError::remote_request_failed(
            "response contained no file record",
        ));
    };

    let content = string_field(record, "content", "content").unwrap_or_default();
    let encoding = string_field(record, "encoding", "encoding")
        .and_then(|s| s.parse::<Encoding>().ok())
        .unwrap_or(requested);
    let size_bytes = integer_field(record, "size_bytes", "sizeBytes")
        .map(|n| n as u64)
        .unwrap_or(content.len() as u64);

    Ok(FileContent {
        path: string_field(record, "path", "path").unwrap_or_else(|| fallback_path.to_string()),
        encoding,
        content,
        size_bytes,
        modified_at: time_field(record, "modified_at", "modifiedAt"),
    })
}

/// Extracts a directory listing: nested `{"directory": {...}}` first,
/// then the flat form. A record without entries is an empty listing.
pub fn sniff_directory(
    value: &Value,
    fallback_path: &str,
) -> Result<ListDirectoryResult, SandboxError> {
    let record = if let Some(nested) = value.get("directory").filter(|v| v.is_object()) {
        nested
    } else {
        value
    };

    let path = string_field(record, "path", "path").unwrap_or_else(|| fallback_path.to_string());
    let entries = record
        .get("entries")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|item| parse_entry(item, &path)).collect())
        .unwrap_or_default();

    Ok(ListDirectoryResult { path, entries })
}

fn parse_entry(value: &Value, parent: &str) -> DirectoryEntry {
    let name = string_field(value, "name", "name").unwrap_or_default();
    let path = string_field(value, "path", "path").unwrap_or_else(|| {
        if parent.is_empty() {
            name.clone()
        } else {
            format!("{parent}/{name}")
        }
    });

    let entry_type = match string_field(value, "type", "type").as_deref() {
        Some("directory") => EntryType::Directory,
        Some("symlink") => EntryType::Symlink,
        _ => EntryType::File,
    };

    DirectoryEntry {
        name,
        path,
        entry_type,
        size_bytes: match entry_type {
            EntryType::File => integer_field(value, "size_bytes", "sizeBytes").map(|n| n as u64),
            _ => None,
        },
        modified_at: time_field(value, "modified_at", "modifiedAt"),
    }
}

/// Extracts an execution result: the flat form (carries `stdout`) first,
/// then nested under `exec`.
pub fn sniff_exec(value: &Value) -> Result<ExecResult, SandboxError> {
    let record = if value.get("stdout").is_some() {
        value
    } else if let Some(nested) = value.get("exec").filter(|v| v.is_object()) {
        nested
    } else {
        return Err(SandboxError::remote_request_failed(
            "response contained no execution result",
        ));
    };

    let exit_code = integer_field(record, "exit_code", "exitCode").map(|n| n as i32);
    let timed_out = bool_field(record, "timed_out", "timedOut").unwrap_or(false);
    let success = bool_field(record, "success", "success")
        .unwrap_or(!timed_out && exit_code == Some(0));

    let started_at = time_field(record, "started_at", "startedAt").unwrap_or_else(Utc::now);
    let finished_at = time_field(record, "finished_at", "finishedAt").unwrap_or(started_at);
    let duration_ms = integer_field(record, "duration_ms", "durationMs")
        .unwrap_or((finished_at - started_at).num_milliseconds());

    Ok(ExecResult {
        stdout: string_field(record, "stdout", "stdout").unwrap_or_default(),
        stderr: string_field(record, "stderr", "stderr").unwrap_or_default(),
        exit_code,
        success,
        timed_out,
        duration_ms,
        started_at,
        finished_at,
    })
}

fn field<'a>(value: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    value
        .get(snake)
        .filter(|v| !v.is_null())
        .or_else(|| value.get(camel).filter(|v| !v.is_null()))
}

fn string_field(value: &Value, snake: &str, camel: &str) -> Option<String> {
    field(value, snake, camel)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn number_field(value: &Value, snake: &str, camel: &str) -> Option<f64> {
    field(value, snake, camel).and_then(Value::as_f64)
}

fn integer_field(value: &Value, snake: &str, camel: &str) -> Option<i64> {
    field(value, snake, camel).and_then(Value::as_i64)
}

fn bool_field(value: &Value, snake: &str, camel: &str) -> Option<bool> {
    field(value, snake, camel).and_then(Value::as_bool)
}

/// Timestamps arrive as RFC3339 strings or epoch milliseconds.
fn time_field(value: &Value, snake: &str, camel: &str) -> Option<DateTime<Utc>> {
    match field(value, snake, camel)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
