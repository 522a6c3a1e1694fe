//! End-to-end tests for a standalone node over real TCP.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use replikv::client::KvClient;
use replikv::config::Config;
use replikv::kv::Value;
use replikv::node::{spawn_node, SpawnedNode};

fn standalone(data_dir: &Path) -> SpawnedNode {
    let mut config = Config::for_node("test-node", 0, Vec::new(), Some(data_dir.to_path_buf()));
    config.network.listen_addr = "127.0.0.1:0".to_string();
    config.network.advertise_addr = "127.0.0.1:0".to_string();
    spawn_node(config).expect("failed to spawn node")
}

#[actix_rt::test]
async fn test_set_get_delete_roundtrip() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());
    let mut client = KvClient::new(node.addr.to_string());

    let resp = client.set("foo", Value::from("bar")).await.unwrap();
    assert_eq!(resp.status, "success");
    assert_eq!(resp.result, Some(serde_json::json!("OK")));

    let resp = client.get("foo").await.unwrap();
    assert_eq!(resp.status, "success");
    assert_eq!(resp.result, Some(serde_json::json!("bar")));

    let resp = client.delete("foo").await.unwrap();
    assert_eq!(resp.status, "success");

    let resp = client.get("foo").await.unwrap();
    assert_eq!(resp.status, "error");
    assert_eq!(resp.error.as_deref(), Some("not found"));
}

#[actix_rt::test]
async fn test_incr_semantics_over_the_wire() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());
    let mut client = KvClient::new(node.addr.to_string());

    // Absent key starts from zero.
    let resp = client.incr("counter", 5).await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!(5)));
    let resp = client.incr("counter", -2).await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!(3)));

    // INCR on a string fails without disturbing the value.
    client.set("k", Value::from("hello")).await.unwrap();
    let resp = client.incr("k", 1).await.unwrap();
    assert_eq!(resp.status, "error");
    assert_eq!(resp.error.as_deref(), Some("type mismatch"));
    let resp = client.get("k").await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!("hello")));
}

#[actix_rt::test]
async fn test_bulk_set_applies_atomically() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());
    let mut client = KvClient::new(node.addr.to_string());

    let items = vec![
        ("a".to_string(), Value::Int(1)),
        ("b".to_string(), Value::Int(2)),
        ("c".to_string(), Value::Int(3)),
    ];
    let resp = client.bulk_set(items).await.unwrap();
    assert_eq!(resp.status, "success");

    for (key, expected) in [("a", 1), ("b", 2), ("c", 3)] {
        let resp = client.get(key).await.unwrap();
        assert_eq!(resp.result, Some(serde_json::json!(expected)));
    }
}

#[actix_rt::test]
async fn test_search_and_index_commands() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());
    let mut client = KvClient::new(node.addr.to_string());

    client.create_index("lang").await.unwrap();

    let mut doc = std::collections::BTreeMap::new();
    doc.insert("lang".to_string(), Value::from("rust"));
    doc.insert(
        "text".to_string(),
        Value::from("systems programming with raft consensus"),
    );
    client.set("doc1", Value::Map(doc)).await.unwrap();
    client
        .set("doc2", Value::from("gardening for beginners"))
        .await
        .unwrap();

    let resp = client.search("consensus", 5).await.unwrap();
    let hits = resp.result.unwrap();
    assert_eq!(hits[0][0], "doc1");

    let resp = client.semantic_search("programming systems", 5).await.unwrap();
    let hits = resp.result.unwrap();
    assert_eq!(hits[0][0], "doc1");

    let resp = client.query_index("lang", Value::from("rust")).await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!(["doc1"])));

    let resp = client.query_index("missing", Value::from("x")).await.unwrap();
    assert_eq!(resp.status, "error");
}

#[actix_rt::test]
async fn test_restart_preserves_acknowledged_writes() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let node = standalone(dir.path());
        let mut client = KvClient::new(node.addr.to_string());
        client.set("durable", Value::Int(42)).await.unwrap();
        client.incr("durable-counter", 7).await.unwrap();
        node.stop();
    }

    let node = standalone(dir.path());
    let mut client = KvClient::new(node.addr.to_string());

    let resp = client.get("durable").await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!(42)));
    let resp = client.get("durable-counter").await.unwrap();
    assert_eq!(resp.result, Some(serde_json::json!(7)));
}

#[actix_rt::test]
async fn test_protocol_errors_keep_connection_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());

    let stream = TcpStream::connect(node.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Garbage, then an unknown command, then a valid request, all on one
    // connection; responses must come back in order.
    write_half.write_all(b"this is not json\n").await.unwrap();
    write_half
        .write_all(b"{\"command\":\"EXPLODE\",\"key\":\"x\"}\n")
        .await
        .unwrap();
    write_half
        .write_all(b"{\"command\":\"SET\",\"key\":\"ok\",\"value\":1}\n")
        .await
        .unwrap();

    let first: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["status"], "error");

    let second: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(second["status"], "error");

    let third: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(third["status"], "success");
}

#[actix_rt::test]
async fn test_per_connection_response_ordering() {
    let dir = tempfile::TempDir::new().unwrap();
    let node = standalone(dir.path());

    let stream = TcpStream::connect(node.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut batch = String::new();
    for i in 0..10 {
        batch.push_str(&format!(
            "{{\"command\":\"SET\",\"key\":\"k{}\",\"value\":{}}}\n",
            i, i
        ));
    }
    for i in 0..10 {
        batch.push_str(&format!("{{\"command\":\"GET\",\"key\":\"k{}\"}}\n", i));
    }
    write_half.write_all(batch.as_bytes()).await.unwrap();

    for _ in 0..10 {
        let resp: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp["status"], "success");
        assert_eq!(resp["result"], "OK");
    }
    for i in 0..10 {
        let resp: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp["result"], i, "response {} out of order", i);
    }
}
