//! Client for the managed remote sandbox service.
//!
//! The service exposes two mutually exclusive addressing modes. With an
//! account id configured, sandboxes live under the account
//! (`.../client/v4/accounts/{account}/workers/sandboxes`) and file
//! operations use PUT/GET/DELETE on a `files` resource plus POST on
//! `directories`. Without one, sandboxes are addressed directly
//! (`.../sandbox/v1/sandboxes`) and file operations are distinct
//! `write-file`/`read-file`/`delete-file`/`mkdir` actions. The mode is
//! picked once at construction; request shapes are never mixed.

mod protocol;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::SandboxError;
use crate::sandbox::registry::CreateOptions;
use crate::sandbox::{Encoding, ExecRequest, ExecResult, FileContent, ListDirectoryResult, SandboxInfo};

/// Base URL used when the configuration does not override it.
pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com";

/// Connection settings for the remote backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Account id; presence selects account-scoped addressing.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Bearer token sent with every request.
    pub api_token: String,
    /// Override for the service base URL.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug)]
enum Addressing {
    Account,
    Token,
}

/// HTTP client for the remote sandbox service.
pub struct RemoteClient {
    http: reqwest::Client,
    /// Fully resolved sandbox collection URL.
    base: String,
    api_token: String,
    addressing: Addressing,
}

impl std::fmt::Debug for RemoteClient {
    // keeps the bearer token out of debug output
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base", &self.base)
            .field("addressing", &self.addressing)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Builds a client, picking the addressing mode from whether an
    /// account id was configured.
    pub fn new(config: RemoteConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let (addressing, base) = match &config.account_id {
            Some(account) => (
                Addressing::Account,
                format!("{base_url}/client/v4/accounts/{account}/workers/sandboxes"),
            ),
            None => (Addressing::Token, format!("{base_url}/sandbox/v1/sandboxes")),
        };

        Self {
            http: reqwest::Client::new(),
            base,
            api_token: config.api_token,
            addressing,
        }
    }

    fn account_scoped(&self) -> bool {
        matches!(self.addressing, Addressing::Account)
    }

    /// Sends a request and normalizes the response body.
    ///
    /// Transport failures (non-2xx, network, unparsable body) and
    /// application-level `success: false` envelopes both surface as
    /// `RemoteRequestFailed` with the underlying message preserved.
    async fn request(
        &self,
        method: Method,
        url: String,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, SandboxError> {
        debug!("Remote request: {method} {url}");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.api_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            SandboxError::remote_request_failed(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            SandboxError::remote_request_failed(format!("failed to read response body: {e}"))
        })?;

        if !status.is_success() {
            let detail = text.trim();
            return Err(SandboxError::remote_request_failed(if detail.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {detail}")
            }));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            SandboxError::remote_request_failed(format!("unparsable response body: {e}"))
        })?;

        protocol::unwrap_envelope(value)
    }

    /// Creates a sandbox record upstream.
    pub async fn create_sandbox(
        &self,
        id: &str,
        options: &CreateOptions,
    ) -> Result<SandboxInfo, SandboxError> {
        let body = json!({
            "id": id,
            "metadata": options.metadata,
            "ttl_seconds": options.ttl_seconds,
        });
        let value = self
            .request(Method::POST, self.base.clone(), &[], Some(body))
            .await?;
        protocol::sniff_sandbox(&value)
    }

    /// Fetches one sandbox record.
    pub async fn get_sandbox(&self, id: &str) -> Result<SandboxInfo, SandboxError> {
        let value = self
            .request(Method::GET, format!("{}/{id}", self.base), &[], None)
            .await?;
        protocol::sniff_sandbox(&value)
    }

    /// Lists sandbox records in server-defined order.
    pub async fn list_sandboxes(&self) -> Result<Vec<SandboxInfo>, SandboxError> {
        let value = self
            .request(Method::GET, self.base.clone(), &[], None)
            .await?;
        protocol::sniff_sandbox_list(&value)
    }

    /// Deletes a sandbox record upstream.
    pub async fn delete_sandbox(&self, id: &str) -> Result<(), SandboxError> {
        self.request(Method::DELETE, format!("{}/{id}", self.base), &[], None)
            .await?;
        Ok(())
    }

    /// Executes a command in a remote sandbox.
    pub async fn exec(
        &self,
        id: &str,
        request: &ExecRequest,
    ) -> Result<(ExecResult, Option<SandboxInfo>), SandboxError> {
        let body = serde_json::to_value(request)
            .map_err(|e| SandboxError::remote_request_failed(e.to_string()))?;
        let value = self
            .request(Method::POST, format!("{}/{id}/exec", self.base), &[], Some(body))
            .await?;
        Ok((
            protocol::sniff_exec(&value)?,
            protocol::sniff_sandbox_update(&value),
        ))
    }

    /// Writes a file in a remote sandbox.
    pub async fn write_file(
        &self,
        id: &str,
        path: &str,
        content: &str,
        encoding: Encoding,
        create_directories: bool,
    ) -> Result<(FileContent, Option<SandboxInfo>), SandboxError> {
        let body = json!({
            "path": path,
            "content": content,
            "encoding": encoding,
            "create_directories": create_directories,
        });
        let (method, url) = if self.account_scoped() {
            (Method::PUT, format!("{}/{id}/files", self.base))
        } else {
            (Method::POST, format!("{}/{id}/write-file", self.base))
        };
        let value = self.request(method, url, &[], Some(body)).await?;
        Ok((
            protocol::sniff_file(&value, encoding, path)?,
            protocol::sniff_sandbox_update(&value),
        ))
    }

    /// Reads a file from a remote sandbox.
    pub async fn read_file(
        &self,
        id: &str,
        path: &str,
        encoding: Encoding,
    ) -> Result<(FileContent, Option<SandboxInfo>), SandboxError> {
        let url = if self.account_scoped() {
            format!("{}/{id}/files", self.base)
        } else {
            format!("{}/{id}/read-file", self.base)
        };
        let encoding_name = encoding.to_string();
        let value = self
            .request(
                Method::GET,
                url,
                &[("path", path), ("encoding", &encoding_name)],
                None,
            )
            .await?;
        Ok((
            protocol::sniff_file(&value, encoding, path)?,
            protocol::sniff_sandbox_update(&value),
        ))
    }

    /// Deletes a file or directory in a remote sandbox.
    pub async fn delete_file(
        &self,
        id: &str,
        path: &str,
    ) -> Result<Option<SandboxInfo>, SandboxError> {
        let value = if self.account_scoped() {
            self.request(
                Method::DELETE,
                format!("{}/{id}/files", self.base),
                &[("path", path)],
                None,
            )
            .await?
        } else {
            self.request(
                Method::POST,
                format!("{}/{id}/delete-file", self.base),
                &[],
                Some(json!({ "path": path })),
            )
            .await?
        };
        Ok(protocol::sniff_sandbox_update(&value))
    }

    /// Creates a directory in a remote sandbox.
    pub async fn make_directory(
        &self,
        id: &str,
        path: &str,
    ) -> Result<Option<SandboxInfo>, SandboxError> {
        let url = if self.account_scoped() {
            format!("{}/{id}/directories", self.base)
        } else {
            format!("{}/{id}/mkdir", self.base)
        };
        let value = self
            .request(Method::POST, url, &[], Some(json!({ "path": path })))
            .await?;
        Ok(protocol::sniff_sandbox_update(&value))
    }

    /// Lists a directory in a remote sandbox.
    pub async fn list_directory(
        &self,
        id: &str,
        path: &str,
    ) -> Result<(ListDirectoryResult, Option<SandboxInfo>), SandboxError> {
        let url = if self.account_scoped() {
            format!("{}/{id}/directories", self.base)
        } else {
            format!("{}/{id}/list-dir", self.base)
        };
        let value = self
            .request(Method::GET, url, &[("path", path)], None)
            .await?;
        Ok((
            protocol::sniff_directory(&value, path)?,
            protocol::sniff_sandbox_update(&value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_client() -> RemoteClient {
        RemoteClient::new(RemoteConfig {
            account_id: Some("acct-1".to_string()),
            api_token: "tok".to_string(),
            base_url: Some("https://api.example.test/".to_string()),
        })
    }

    fn token_client() -> RemoteClient {
        RemoteClient::new(RemoteConfig {
            account_id: None,
            api_token: "tok".to_string(),
            base_url: Some("https://api.example.test".to_string()),
        })
    }

    #[test]
    fn test_account_scoped_base_url() {
        let client = account_client();
        assert!(client.account_scoped());
        assert_eq!(
            client.base,
            "https://api.example.test/client/v4/accounts/acct-1/workers/sandboxes"
        );
    }

    #[test]
    fn test_token_scoped_base_url() {
        let client = token_client();
        assert!(!client.account_scoped());
        assert_eq!(client.base, "https://api.example.test/sandbox/v1/sandboxes");
    }

    #[test]
    fn test_default_base_url_applied() {
        let client = RemoteClient::new(RemoteConfig {
            account_id: None,
            api_token: "tok".to_string(),
            base_url: None,
        });
        assert!(client.base.starts_with(DEFAULT_BASE_URL));
    }
}
