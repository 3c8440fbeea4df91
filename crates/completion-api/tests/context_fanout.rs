//! Context fan-out against canned search services: merge order, header
//! forwarding, and partial results under the wall-clock budget.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use completion_api::config::CodebaseContextConfig;
use completion_api::context::{ContextClient, ContextInput, ForwardHeaders};

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_http_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = socket.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            return buf;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + content_length {
                return buf;
            }
        }
    }
}

/// Search-service stand-in answering every request with one record; captures
/// the raw requests it received.
async fn spawn_search_service(
    file_path: &str,
    content: &str,
    requests: Arc<Mutex<Vec<String>>>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = serde_json::json!({
        "data": {"list": [{"filePath": file_path, "content": content}]}
    })
    .to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                requests
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&request).to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/search")
}

/// Accepts connections and never answers.
async fn spawn_black_hole() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}/search")
}

fn input() -> ContextInput {
    ContextInput {
        client_id: "c1".to_string(),
        codebase_path: "/repo".to_string(),
        full_file_path: "src/handler.go".to_string(),
        code_snippets: vec!["buildResponse(w, r)".to_string()],
        queries: vec!["func buildResponse".to_string()],
    }
}

#[tokio::test]
async fn test_merge_follows_definition_semantic_relation_order() {
    let sink: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let definition =
        spawn_search_service("def.go", "func FromDefinition() {}", Arc::clone(&sink)).await;
    let semantic =
        spawn_search_service("sem.go", "func FromSemantic() {}", Arc::clone(&sink)).await;
    let relation =
        spawn_search_service("rel.go", "func FromRelation() {}", Arc::clone(&sink)).await;

    let client = ContextClient::new(CodebaseContextConfig {
        definition_url: definition,
        semantic_url: semantic,
        relation_url: relation,
        total_timeout_ms: 2000,
        ..CodebaseContextConfig::default()
    });

    let merged = client
        .fetch(&input(), &ForwardHeaders::default(), "go", &CancellationToken::new())
        .await;

    let def = merged.find("def.go").expect("definition record present");
    let sem = merged.find("sem.go").expect("semantic record present");
    let rel = merged.find("rel.go").expect("relation record present");
    assert!(def < sem && sem < rel, "merge out of order: {merged}");
    // Go context arrives wrapped as block comments.
    assert!(merged.starts_with("/* def.go"));
    assert!(merged.contains("func FromSemantic() {}"));
}

#[tokio::test]
async fn test_forwarded_headers_reach_the_services() {
    let sink: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let definition = spawn_search_service("d.go", "x", Arc::clone(&sink)).await;

    let client = ContextClient::new(CodebaseContextConfig {
        definition_url: definition,
        enable_semantic: false,
        enable_relation: false,
        total_timeout_ms: 2000,
        ..CodebaseContextConfig::default()
    });
    let headers = ForwardHeaders {
        request_id: Some("req-77".to_string()),
        authorization: Some("Bearer ctx-token".to_string()),
        client_version: Some("2.4.0".to_string()),
    };

    let merged = client
        .fetch(&input(), &headers, "go", &CancellationToken::new())
        .await;
    assert!(!merged.is_empty());

    let requests = sink.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let raw = requests[0].to_lowercase();
    assert!(raw.contains("x-request-id: req-77"), "missing request id:\n{raw}");
    assert!(raw.contains("authorization: bearer ctx-token"));
    assert!(raw.contains("x-costrict-version: 2.4.0"));
    // Query parameters carry the search inputs.
    assert!(raw.contains("clientid=c1"));
    assert!(raw.contains("codesnippet=buildresponse"));
}

#[tokio::test]
async fn test_partial_results_when_one_endpoint_stalls() {
    let sink: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let definition = spawn_search_service("fast.go", "quick", Arc::clone(&sink)).await;
    let stalled = spawn_black_hole().await;

    let client = ContextClient::new(CodebaseContextConfig {
        definition_url: definition,
        semantic_url: stalled.clone(),
        relation_url: stalled,
        total_timeout_ms: 300,
        ..CodebaseContextConfig::default()
    });

    let started = Instant::now();
    let merged = client
        .fetch(&input(), &ForwardHeaders::default(), "go", &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert!(merged.contains("fast.go"), "fast endpoint missing: {merged}");
    assert!(!merged.contains("sem"), "stalled endpoints must contribute nothing");
    assert!(
        elapsed < Duration::from_millis(800),
        "fan-out overran its budget: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_request_cancellation_aborts_fanout() {
    let stalled = spawn_black_hole().await;
    let client = ContextClient::new(CodebaseContextConfig {
        definition_url: stalled.clone(),
        semantic_url: stalled.clone(),
        relation_url: stalled,
        total_timeout_ms: 10_000,
        ..CodebaseContextConfig::default()
    });

    let cancel = CancellationToken::new();
    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceler.cancel();
    });

    let started = Instant::now();
    let merged = client
        .fetch(&input(), &ForwardHeaders::default(), "go", &cancel)
        .await;

    assert!(merged.is_empty());
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation must cut the fan-out short"
    );
}
