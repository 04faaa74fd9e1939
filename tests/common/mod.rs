//! A scripted render service for integration tests.
//!
//! Speaks just enough HTTP/1.1 to accept one command per connection and
//! answer it with an event-stream body whose length is delimited by closing
//! the connection, the way a long-running render reply is.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A command as the render service received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// How the service answers one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Writes every frame at once, then closes.
    Frames(Vec<String>),
    /// Writes the frames in pieces of `chunk` bytes, pausing between them.
    Trickle {
        frames: Vec<String>,
        chunk: usize,
        pause: Duration,
    },
    /// Writes the frames, then keeps the connection open for `hold`.
    Hold { frames: Vec<String>, hold: Duration },
    /// Answers with an error status and no body.
    Status(u16),
}

type Script = dyn Fn(&RecordedRequest) -> Reply + Send + Sync;

pub struct RenderService {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RenderService {
    /// Starts the service; `script` picks the reply for each command.
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let script: Arc<Script> = Arc::new(script);

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = serve(socket, script, log).await;
                });
            }
        });

        Self { addr, received }
    }

    /// Starts a service that answers every command the same way.
    pub async fn replying(reply: Reply) -> Self {
        Self::start(move |_| reply.clone()).await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<RecordedRequest> {
        self.received.lock().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    script: Arc<Script>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;
    let reply = script(&request);
    log.lock().push(request);

    match reply {
        Reply::Status(status) => {
            let head = format!(
                "HTTP/1.1 {status} Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await?;
        }
        Reply::Frames(frames) => {
            write_stream_head(&mut socket).await?;
            socket.write_all(frames.concat().as_bytes()).await?;
        }
        Reply::Trickle {
            frames,
            chunk,
            pause,
        } => {
            write_stream_head(&mut socket).await?;
            let raw = frames.concat();
            for piece in raw.as_bytes().chunks(chunk.max(1)) {
                socket.write_all(piece).await?;
                socket.flush().await?;
                tokio::time::sleep(pause).await;
            }
        }
        Reply::Hold { frames, hold } => {
            write_stream_head(&mut socket).await?;
            socket.write_all(frames.concat().as_bytes()).await?;
            socket.flush().await?;
            tokio::time::sleep(hold).await;
        }
    }
    socket.shutdown().await
}

async fn write_stream_head(socket: &mut TcpStream) -> std::io::Result<()> {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
        )
        .await?;
    socket.flush().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let read = socket.read(&mut chunk).await?;
        if read == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[head_end + 4..].to_vec();
    while body.len() < length {
        let read = socket.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// One event-stream frame carrying a rendered page.
pub fn frame(url: &str, html: &str) -> String {
    format!(
        "event: response\ndata: {}\n\n",
        serde_json::json!({
            "url": url,
            "status": 200,
            "headers": {"content-type": "text/html"},
            "body": STANDARD.encode(html),
        })
    )
}

/// `count` frames for pages `page-1` .. `page-<count>`.
pub fn pages(count: usize) -> Vec<String> {
    (1..=count)
        .map(|n| frame(&format!("http://books.example/page-{n}"), &format!("page-{n}")))
        .collect()
}
