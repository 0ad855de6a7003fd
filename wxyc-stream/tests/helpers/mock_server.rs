//! Scripted HTTP stream server for integration tests
//!
//! Listens on an ephemeral localhost port. The N-th accepted connection is
//! answered with the N-th scripted `Reply`, or the fallback once the script
//! runs out. Bodies are close-delimited, like a live Icecast-style stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How to answer one connection
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with `body` written in `chunk_size` pieces, `chunk_delay` apart,
    /// then hold the connection open for `linger` before closing
    Stream {
        body: Vec<u8>,
        chunk_size: usize,
        chunk_delay: Duration,
        linger: Duration,
    },
    /// The given status with a short text body
    Status(u16),
    /// Accept, then close without answering
    Refuse,
    /// Read the request and never answer
    Hang,
}

impl Reply {
    /// Whole body in 834-byte chunks, held open for `linger`
    pub fn stream(body: Vec<u8>, linger: Duration) -> Self {
        Reply::Stream {
            body,
            chunk_size: 834,
            chunk_delay: Duration::ZERO,
            linger,
        }
    }
}

pub struct MockServer {
    addr: std::net::SocketAddr,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start serving `script`, then `fallback` for every later connection
    pub async fn start(script: Vec<Reply>, fallback: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Mock server has no address");
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = script.get(n).cloned().unwrap_or_else(|| fallback.clone());
                tokio::spawn(serve(socket, reply));
            }
        });

        Self {
            addr,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/wxyc.mp3", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// URL on localhost where nothing is listening
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let addr = listener.local_addr().expect("Probe listener has no address");
    drop(listener);
    format!("http://{}/wxyc.mp3", addr)
}

async fn serve(mut socket: TcpStream, reply: Reply) {
    if matches!(reply, Reply::Refuse) {
        return;
    }
    if read_request(&mut socket).await.is_err() {
        return;
    }

    match reply {
        Reply::Stream {
            body,
            chunk_size,
            chunk_delay,
            linger,
        } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for chunk in body.chunks(chunk_size.max(1)) {
                if socket.write_all(chunk).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
            tokio::time::sleep(linger).await;
            let _ = socket.shutdown().await;
        }
        Reply::Status(status) => {
            let body = "nope";
            let head = format!(
                "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Reply::Refuse => {}
    }
}

/// Read up to the end of the request headers
async fn read_request(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        request.extend_from_slice(&buf[..n]);
    }
    Ok(())
}
