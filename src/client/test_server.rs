//! Minimal HTTP/1.1 server answering canned JSON responses, for client tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) struct TestServer {
  pub base_url: String,
  hits: Arc<AtomicUsize>,
  requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
  /// Start serving `responses` in order; the last one repeats once exhausted.
  pub async fn start(responses: Vec<(u16, &'static str)>) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let server_hits = Arc::clone(&hits);
    let server_requests = Arc::clone(&requests);
    tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let n = server_hits.fetch_add(1, Ordering::SeqCst);
        let (status, body) = responses[n.min(responses.len() - 1)];
        let requests = Arc::clone(&server_requests);
        tokio::spawn(handle(stream, status, body, requests));
      }
    });

    Self {
      base_url: format!("http://{}/api", addr),
      hits,
      requests,
    }
  }

  pub fn hits(&self) -> usize {
    self.hits.load(Ordering::SeqCst)
  }

  /// Request lines seen so far, e.g. "GET /api/professionals?page=1".
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

async fn handle(
  mut stream: TcpStream,
  status: u16,
  body: &'static str,
  requests: Arc<Mutex<Vec<String>>>,
) -> Option<()> {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];

  let header_end = loop {
    let n = stream.read(&mut chunk).await.ok()?;
    if n == 0 {
      return None;
    }
    buf.extend_from_slice(&chunk[..n]);
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos + 4;
    }
  };

  let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
  let content_length = head
    .lines()
    .filter_map(|line| line.split_once(':'))
    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);

  while buf.len() < header_end + content_length {
    let n = stream.read(&mut chunk).await.ok()?;
    if n == 0 {
      break;
    }
    buf.extend_from_slice(&chunk[..n]);
  }

  // Recorded before answering, so the client never observes a missing entry
  let request_line = head.lines().next()?;
  let mut parts = request_line.split_whitespace();
  let line = format!("{} {}", parts.next()?, parts.next()?);
  requests.lock().unwrap().push(line);

  let reason = reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("Unknown");
  let response = format!(
    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
    status,
    reason,
    body.len(),
    body
  );
  stream.write_all(response.as_bytes()).await.ok()?;
  stream.shutdown().await.ok()
}
