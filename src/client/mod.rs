use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::dispatcher::Response;
use crate::kv::Value;
use crate::util::errors::{Result, StoreError};

const MAX_ATTEMPTS: usize = 8;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Line-oriented JSON client for the store.
///
/// Follows `redirect` responses to the current leader and retries
/// `not ready` / transport failures with exponential backoff, up to a
/// bounded number of attempts. Each command uses a fresh connection.
pub struct KvClient {
    target: String,
}

impl KvClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            target: addr.into(),
        }
    }

    /// Current target address (moves to the leader after a redirect).
    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn send_command(&mut self, request: serde_json::Value) -> Result<Response> {
        let line = serde_json::to_string(&request)?;
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = StoreError::NetworkError("no attempts made".to_string());

        for _ in 0..MAX_ATTEMPTS {
            match self.roundtrip(&line).await {
                Ok(response) => {
                    if response.status == "redirect" {
                        if let Some(leader) = &response.leader {
                            tracing::debug!("Redirected to leader {}", leader);
                            self.target = leader.clone();
                            tokio::time::sleep(backoff).await;
                            backoff *= 2;
                            continue;
                        }
                        return Ok(response);
                    }

                    // A fresh leader may still be waiting on its term
                    // barrier, and a leaderless follower cannot redirect
                    // anywhere yet; both clear up on their own.
                    let retryable = response.status == "error"
                        && matches!(response.error.as_deref(), Some("not ready") | Some("not leader"));
                    if retryable {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    last_error = e;
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        Err(last_error)
    }

    async fn roundtrip(&self, line: &str) -> Result<Response> {
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|e| StoreError::NetworkError(format!("connect {}: {}", self.target, e)))?;
        let (read_half, mut write_half) = stream.into_split();

        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        let mut reply = String::new();
        let mut reader = BufReader::new(read_half);
        let n = reader.read_line(&mut reply).await?;
        if n == 0 {
            return Err(StoreError::NetworkError(
                "connection closed by server".to_string(),
            ));
        }
        Ok(serde_json::from_str(reply.trim())?)
    }

    pub async fn set(&mut self, key: &str, value: Value) -> Result<Response> {
        self.send_command(serde_json::json!({
            "command": "SET", "key": key, "value": value,
        }))
        .await
    }

    pub async fn get(&mut self, key: &str) -> Result<Response> {
        self.send_command(serde_json::json!({ "command": "GET", "key": key }))
            .await
    }

    pub async fn delete(&mut self, key: &str) -> Result<Response> {
        self.send_command(serde_json::json!({ "command": "DELETE", "key": key }))
            .await
    }

    pub async fn incr(&mut self, key: &str, amount: i64) -> Result<Response> {
        self.send_command(serde_json::json!({
            "command": "INCR", "key": key, "amount": amount,
        }))
        .await
    }

    pub async fn bulk_set(&mut self, items: Vec<(String, Value)>) -> Result<Response> {
        self.send_command(serde_json::json!({ "command": "BULK_SET", "items": items }))
            .await
    }

    pub async fn search(&mut self, query: &str, top_k: usize) -> Result<Response> {
        self.send_command(serde_json::json!({
            "command": "SEARCH", "query": query, "top_k": top_k,
        }))
        .await
    }

    pub async fn semantic_search(&mut self, query: &str, top_k: usize) -> Result<Response> {
        self.send_command(serde_json::json!({
            "command": "SEMANTIC_SEARCH", "query": query, "top_k": top_k,
        }))
        .await
    }

    pub async fn create_index(&mut self, field: &str) -> Result<Response> {
        self.send_command(serde_json::json!({ "command": "CREATE_INDEX", "field": field }))
            .await
    }

    pub async fn query_index(&mut self, field: &str, value: Value) -> Result<Response> {
        self.send_command(serde_json::json!({
            "command": "QUERY_INDEX", "field": field, "value": value,
        }))
        .await
    }
}
