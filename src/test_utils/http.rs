//! Minimal in-process HTTP/1.1 server for exercising the network paths.
//!
//! Each connection serves a single request and is closed afterwards. Routes
//! can omit `Content-Length`, return arbitrary status codes, dribble the body
//! out in small chunks, or stall forever part-way through the body.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A canned response.
#[derive(Debug, Clone)]
pub struct Route {
    status: u16,
    body: Vec<u8>,
    content_length: bool,
    chunk_size: Option<usize>,
    stall_after: Option<usize>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_length: true,
            chunk_size: None,
            stall_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    /// Omit the `Content-Length` header; the body ends when the connection closes.
    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    /// Write the body in `size`-byte pieces with a short pause between them.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Send `bytes` of the body, then hold the connection open forever.
    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }
}

/// Handle to a running test server. The accept loop stops when dropped.
pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|(path, route)| (path.to_string(), route)).collect());
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &routes, &counter).await;
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    counter: &AtomicUsize,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..read]);
    }
    counter.fetch_add(1, Ordering::SeqCst);

    let head = String::from_utf8_lossy(&request);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let route = routes.get(&path).cloned().unwrap_or_else(|| Route::status(404));

    let mut header = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Type: application/octet-stream\r\n",
        route.status,
        reason_phrase(route.status)
    );
    if route.content_length {
        header.push_str(&format!("Content-Length: {}\r\n", route.body.len()));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes()).await?;

    let sendable = route.stall_after.map_or(route.body.len(), |limit| limit.min(route.body.len()));
    let body = &route.body[..sendable];
    match route.chunk_size {
        Some(size) => {
            for chunk in body.chunks(size) {
                stream.write_all(chunk).await?;
                stream.flush().await?;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        None => stream.write_all(body).await?,
    }
    stream.flush().await?;

    if route.stall_after.is_some() {
        std::future::pending::<()>().await;
    }
    stream.shutdown().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
