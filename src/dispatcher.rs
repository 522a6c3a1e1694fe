use actix::prelude::*;
use actix::MailboxError;
use serde::{Deserialize, Serialize};

use crate::kv::{ApplyOutcome, Command, Value};
use crate::raft::actor::{
    CreateIndex, Propose, QueryIndex, RaftActor, ReadKey, Search, SemanticSearch,
};
use crate::util::errors::StoreError;

fn default_amount() -> i64 {
    1
}

fn default_top_k() -> usize {
    10
}

/// One client request, parsed from a JSON line. The `command` field selects
/// the operation; remaining fields are per-command.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    Set {
        key: String,
        value: Value,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    Incr {
        key: String,
        #[serde(default = "default_amount")]
        amount: i64,
    },
    BulkSet {
        items: Vec<(String, Value)>,
    },
    Search {
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    SemanticSearch {
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    CreateIndex {
        field: String,
    },
    QueryIndex {
        field: String,
        value: Value,
    },
}

/// One JSON response line.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl Response {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            status: "success".to_string(),
            result: Some(result),
            error: None,
            leader: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            result: None,
            error: Some(message.into()),
            leader: None,
        }
    }

    pub fn redirect(leader: impl Into<String>) -> Self {
        Self {
            status: "redirect".to_string(),
            result: None,
            error: None,
            leader: Some(leader.into()),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"status":"error","error":"unserializable response"}"#.into())
    }
}

/// Shortcut for connection-level protocol errors.
pub fn error_line(message: &str) -> String {
    Response::error(message).to_line()
}

/// Parses client lines, gates them through the Raft actor, and renders the
/// response envelope. Writes go through the proposal path, reads through
/// the leader read barrier, search and index commands to the local index
/// manager.
pub struct Dispatcher {
    raft: Addr<RaftActor>,
}

impl Dispatcher {
    pub fn new(raft: Addr<RaftActor>) -> Self {
        Self { raft }
    }

    pub async fn dispatch(&self, request: serde_json::Value) -> String {
        let request = match serde_json::from_value::<ClientRequest>(request) {
            Ok(request) => request,
            Err(e) => return Response::error(format!("invalid request: {}", e)).to_line(),
        };
        self.execute(request).await.to_line()
    }

    async fn execute(&self, request: ClientRequest) -> Response {
        match request {
            ClientRequest::Set { key, value } => {
                self.propose(Command::Set { key, value }).await
            }
            ClientRequest::Delete { key } => self.propose(Command::Delete { key }).await,
            ClientRequest::Incr { key, amount } => {
                self.propose(Command::Incr { key, amount }).await
            }
            ClientRequest::BulkSet { items } => self.propose(Command::BulkSet { items }).await,

            ClientRequest::Get { key } => match self.raft.send(ReadKey { key }).await {
                Ok(Ok(Some(value))) => match serde_json::to_value(&value) {
                    Ok(json) => Response::success(json),
                    Err(e) => Response::error(e.to_string()),
                },
                Ok(Ok(None)) => store_error_response(StoreError::KeyNotFound),
                Ok(Err(e)) => store_error_response(e),
                Err(e) => mailbox_error_response(e),
            },

            ClientRequest::Search { query, top_k } => {
                match self.raft.send(Search { query, top_k }).await {
                    Ok(Ok(hits)) => Response::success(hits_to_json(hits)),
                    Ok(Err(e)) => store_error_response(e),
                    Err(e) => mailbox_error_response(e),
                }
            }

            ClientRequest::SemanticSearch { query, top_k } => {
                match self.raft.send(SemanticSearch { query, top_k }).await {
                    Ok(Ok(hits)) => Response::success(hits_to_json(hits)),
                    Ok(Err(e)) => store_error_response(e),
                    Err(e) => mailbox_error_response(e),
                }
            }

            ClientRequest::CreateIndex { field } => {
                match self.raft.send(CreateIndex { field }).await {
                    Ok(()) => Response::success(serde_json::json!("OK")),
                    Err(e) => mailbox_error_response(e),
                }
            }

            ClientRequest::QueryIndex { field, value } => {
                match self.raft.send(QueryIndex { field, value }).await {
                    Ok(Ok(keys)) => Response::success(serde_json::json!(keys)),
                    Ok(Err(e)) => store_error_response(e),
                    Err(e) => mailbox_error_response(e),
                }
            }
        }
    }

    async fn propose(&self, command: Command) -> Response {
        match self.raft.send(Propose { command }).await {
            Ok(Ok(ApplyOutcome::Ok)) => Response::success(serde_json::json!("OK")),
            Ok(Ok(ApplyOutcome::Int(n))) => Response::success(serde_json::json!(n)),
            Ok(Err(e)) => store_error_response(e),
            Err(e) => mailbox_error_response(e),
        }
    }
}

fn hits_to_json(hits: Vec<(String, f64)>) -> serde_json::Value {
    serde_json::json!(hits
        .into_iter()
        .map(|(key, score)| serde_json::json!([key, score]))
        .collect::<Vec<_>>())
}

fn store_error_response(error: StoreError) -> Response {
    match error {
        StoreError::NotLeader {
            leader: Some(leader),
        } => Response::redirect(leader),
        other => Response::error(other.to_string()),
    }
}

fn mailbox_error_response(error: MailboxError) -> Response {
    Response::error(format!("internal error: {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<ClientRequest, serde_json::Error> {
        serde_json::from_str(line)
    }

    #[test]
    fn test_parse_set_command() {
        let request = parse(r#"{"command":"SET","key":"user","value":"Alice"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Set {
                key: "user".to_string(),
                value: Value::from("Alice"),
            }
        );
    }

    #[test]
    fn test_parse_set_with_integer_value() {
        let request = parse(r#"{"command":"SET","key":"score","value":100}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Set {
                key: "score".to_string(),
                value: Value::Int(100),
            }
        );
    }

    #[test]
    fn test_parse_incr_defaults_amount_to_one() {
        let request = parse(r#"{"command":"INCR","key":"n"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Incr {
                key: "n".to_string(),
                amount: 1,
            }
        );
    }

    #[test]
    fn test_parse_bulk_set_items() {
        let request =
            parse(r#"{"command":"BULK_SET","items":[["a",1],["b","two"]]}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::BulkSet {
                items: vec![
                    ("a".to_string(), Value::Int(1)),
                    ("b".to_string(), Value::from("two")),
                ],
            }
        );
    }

    #[test]
    fn test_parse_search_defaults_top_k() {
        let request = parse(r#"{"command":"SEARCH","query":"rust"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Search {
                query: "rust".to_string(),
                top_k: 10,
            }
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(parse(r#"{"command":"EXPLODE","key":"x"}"#).is_err());
        assert!(parse(r#"{"command":"SET"}"#).is_err());
    }

    #[test]
    fn test_response_envelope_shapes() {
        let success: serde_json::Value =
            serde_json::from_str(&Response::success(serde_json::json!("OK")).to_line()).unwrap();
        assert_eq!(success["status"], "success");
        assert_eq!(success["result"], "OK");
        assert!(success.get("error").is_none());

        let error: serde_json::Value =
            serde_json::from_str(&Response::error("not found").to_line()).unwrap();
        assert_eq!(error["status"], "error");
        assert_eq!(error["error"], "not found");
        assert!(error.get("result").is_none());

        let redirect: serde_json::Value =
            serde_json::from_str(&Response::redirect("127.0.0.1:7002").to_line()).unwrap();
        assert_eq!(redirect["status"], "redirect");
        assert_eq!(redirect["leader"], "127.0.0.1:7002");
    }

    #[test]
    fn test_store_errors_map_to_wire_shapes() {
        let redirect = store_error_response(StoreError::NotLeader {
            leader: Some("127.0.0.1:7002".to_string()),
        });
        assert_eq!(redirect.status, "redirect");
        assert_eq!(redirect.leader.as_deref(), Some("127.0.0.1:7002"));

        let not_ready = store_error_response(StoreError::NotReady);
        assert_eq!(not_ready.status, "error");
        assert_eq!(not_ready.error.as_deref(), Some("not ready"));

        let mismatch = store_error_response(StoreError::TypeMismatch {
            key: "k".to_string(),
        });
        assert_eq!(mismatch.error.as_deref(), Some("type mismatch"));
    }
}
