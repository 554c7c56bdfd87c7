// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CasClient, CasError};
use crate::anchor::ContentHash;

/// Error messages IPFS uses for a path that is not in MFS
const MISSING_FILE_MESSAGES: &[&str] = &["file does not exist", "no link named"];

#[derive(Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct IpfsErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}

/// CAS transport over an IPFS node's HTTP API.
///
/// Content is addressed by its SHA-256 hex hash inside this crate, not by
/// CID, so every write is also linked into MFS at `/orb/<sha256>` and reads
/// go through that path.
pub struct IpfsCas {
    api_endpoint: String,
    client: reqwest::Client,
}

impl IpfsCas {
    /// Create a new IPFS transport
    pub fn new(api_endpoint: &str, timeout: Duration) -> Result<Self, CasError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;

        Ok(Self {
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn network_error(e: reqwest::Error) -> CasError {
        if e.is_timeout() {
            CasError::Timeout(e.to_string())
        } else {
            CasError::Network(e.to_string())
        }
    }

    /// IPFS answers a missing MFS path with a 500 and an error body, so
    /// the body decides between missing content and a failing daemon
    fn read_error(hash: &ContentHash, status: reqwest::StatusCode, body: &str) -> CasError {
        let message = serde_json::from_str::<IpfsErrorResponse>(body)
            .map(|e| e.message)
            .unwrap_or_else(|_| body.trim().to_string());

        let missing = MISSING_FILE_MESSAGES.iter().any(|m| message.contains(m));
        if missing || status.is_client_error() {
            CasError::NotFound(hash.to_string())
        } else {
            CasError::Unavailable(format!("IPFS API returned {}: {}", status, message))
        }
    }
}

#[async_trait]
impl CasClient for IpfsCas {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn write(&self, content: &[u8]) -> Result<ContentHash, CasError> {
        let hash = ContentHash::compute(content);

        let url = format!("{}/api/v0/add?pin=true", self.api_endpoint);
        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(hash.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(Self::network_error)?;

        if !response.status().is_success() {
            return Err(CasError::Unavailable(format!(
                "IPFS API returned status: {}",
                response.status()
            )));
        }

        let added = response
            .json::<IpfsAddResponse>()
            .await
            .map_err(|e| CasError::Serialization(format!("Failed to parse IPFS response: {}", e)))?;

        // Link the CID under its sha256 name so reads can resolve it
        let cp_url = format!(
            "{}/api/v0/files/cp?arg=/ipfs/{}&arg=/orb/{}&parents=true",
            self.api_endpoint, added.hash, hash
        );
        let response = self
            .client
            .post(&cp_url)
            .send()
            .await
            .map_err(Self::network_error)?;

        // Already linked by an earlier write of the same content
        if !response.status().is_success() {
            debug!("IPFS link for {} not created: {}", hash, response.status());
        }

        debug!("Stored {} in IPFS as {}", hash, added.hash);
        Ok(hash)
    }

    async fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, CasError> {
        let url = format!("{}/api/v0/files/read?arg=/orb/{}", self.api_endpoint, hash);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(Self::network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::read_error(hash, status, &body));
        }

        let bytes = response.bytes().await.map_err(Self::network_error)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const MISSING: &str = r#"{"Message":"file does not exist","Code":0,"Type":"error"}"#;

    /// Reads one request and returns its request line, draining the body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];

        let head_end = loop {
            if let Some(at) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break at + 4;
            }
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return String::new(),
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        };

        let head = String::from_utf8_lossy(&data[..head_end]).to_string();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok());
        let chunked = head.to_ascii_lowercase().contains("transfer-encoding: chunked");

        loop {
            let body = &data[head_end..];
            let complete = match length {
                Some(length) => body.len() >= length,
                None if chunked => body.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                break;
            }
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }

        head.lines().next().unwrap_or_default().to_string()
    }

    /// IPFS API stand-in answering each path with a fixed status and body
    async fn ipfs_api(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let path = request
                        .split_whitespace()
                        .nth(1)
                        .and_then(|target| target.split('?').next())
                        .unwrap_or_default()
                        .to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(route, _, _)| *route == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, "404 page not found"));
                    let reason = match status {
                        200 => "OK",
                        404 => "Not Found",
                        _ => "Internal Server Error",
                    };
                    let response = format!(
                        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        reason,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    fn client(endpoint: &str) -> IpfsCas {
        IpfsCas::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_write_links_content_and_read_returns_it() {
        let endpoint = ipfs_api(vec![
            ("/api/v0/add", 200, r#"{"Name":"doc","Hash":"QmTestCid","Size":"13"}"#),
            ("/api/v0/files/cp", 200, ""),
            ("/api/v0/files/read", 200, "anchor record"),
        ])
        .await;
        let ipfs = client(&endpoint);

        let hash = ipfs.write(b"anchor record").await.unwrap();
        assert_eq!(hash, ContentHash::compute(b"anchor record"));
        assert_eq!(ipfs.read(&hash).await.unwrap(), b"anchor record".to_vec());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let endpoint = ipfs_api(vec![("/api/v0/files/read", 500, MISSING)]).await;
        let hash = ContentHash::compute(b"never written");

        let err = client(&endpoint).read(&hash).await.unwrap_err();
        assert!(matches!(err, CasError::NotFound(ref h) if *h == hash.to_string()));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_daemon_failure_is_transient() {
        let endpoint = ipfs_api(vec![(
            "/api/v0/files/read",
            500,
            r#"{"Message":"context deadline exceeded","Code":0,"Type":"error"}"#,
        )])
        .await;

        let err = client(&endpoint)
            .read(&ContentHash::compute(b"slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::Unavailable(ref m) if m.contains("context deadline exceeded")));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_failed_add_is_reported() {
        let endpoint = ipfs_api(vec![("/api/v0/add", 500, r#"{"Message":"repo is full"}"#)]).await;

        let err = client(&endpoint).write(b"doc").await.unwrap_err();
        assert!(matches!(err, CasError::Unavailable(_)));
    }
}
