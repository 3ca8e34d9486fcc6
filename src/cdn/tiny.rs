//! Out-of-band fetch of tiny task content from a CDN download port

use reqwest::Client;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::resource::{Host, TINY_FILE_SIZE};

/// Peer id presented to the CDN download endpoint
const SCHEDULER_PEER_ID: &str = "scheduler";

/// HTTP client for the tiny file download endpoint
#[derive(Debug, Clone)]
pub struct TinyFileClient {
    http_client: Client,
}

impl TinyFileClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http_client })
    }

    /// Download URL of a task on a host
    pub fn download_url(task_id: &str, host: &Host) -> String {
        let prefix = task_id.get(..3).unwrap_or(task_id);
        format!(
            "http://{}:{}/download/{}/{}?peerId={}",
            host.ip, host.down_port, prefix, task_id, SCHEDULER_PEER_ID
        )
    }

    /// Fetch the complete content of a task
    ///
    /// Bodies longer than [`TINY_FILE_SIZE`] are rejected without being
    /// buffered.
    pub async fn fetch(&self, task_id: &str, host: &Host) -> Result<Vec<u8>> {
        let url = Self::download_url(task_id, host);
        tracing::debug!(task_id = %task_id, url = %url, "Fetching tiny file content");

        let mut response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {status} from {url}")));
        }

        let limit = TINY_FILE_SIZE as usize;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(Error::Fetch(format!("body from {url} exceeds {limit} bytes")));
        }

        let mut content = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if content.len() + chunk.len() > limit {
                return Err(Error::Fetch(format!("body from {url} exceeds {limit} bytes")));
            }
            content.extend_from_slice(&chunk);
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdnServer;

    fn host() -> Host {
        Host::cdn(
            "cdn-uuid",
            &CdnServer {
                host_name: "cdn-1".to_string(),
                ip: "10.0.0.5".to_string(),
                port: 8003,
                download_port: 8001,
            },
        )
    }

    #[test]
    fn test_download_url() {
        assert_eq!(
            TinyFileClient::download_url("abcdef", &host()),
            "http://10.0.0.5:8001/download/abc/abcdef?peerId=scheduler"
        );
    }

    #[test]
    fn test_download_url_short_task_id() {
        assert_eq!(
            TinyFileClient::download_url("ab", &host()),
            "http://10.0.0.5:8001/download/ab/ab?peerId=scheduler"
        );
    }
}
