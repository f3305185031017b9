//! Loopback daemon used by engine unit tests.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use super::dial::Dialer;
use super::endpoint::{DEFAULT_TIMEOUT, EndpointDescriptor, TlsOptions};
use super::transport::Transport;
use crate::error::EngineError;

/// Maps a request line such as `GET /version HTTP/1.1` to `(status, body)`.
pub(crate) type Responder = fn(&str) -> (u16, &'static str);

/// A request observed by the scripted daemon.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) line: String,
    pub(crate) body: String,
}

/// A loopback daemon that answers each connection with one scripted response
/// and records the requests it saw.
pub(crate) struct ScriptedDaemon {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedDaemon {
    pub(crate) async fn start(responder: Responder) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let log = Arc::clone(&recorded);
                tokio::spawn(async move {
                    if let Err(error) = serve_one(socket, responder, &log).await {
                        tracing::debug!(%error, "scripted daemon connection failed");
                    }
                });
            }
        });

        Ok(Self { port, requests })
    }

    pub(crate) fn transport(&self, api_version: Option<&str>) -> Result<Transport, EngineError> {
        let endpoint = EndpointDescriptor::parse(
            &format!("tcp://127.0.0.1:{}", self.port),
            &TlsOptions::default(),
            DEFAULT_TIMEOUT,
        )?;
        Ok(Transport::new(
            Dialer::new(endpoint)?,
            api_version.map(String::from),
        ))
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub(crate) fn request_lines(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.line)
            .collect()
    }
}

async fn serve_one(
    socket: tokio::net::TcpStream,
    responder: Responder,
    log: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(socket);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut content_length = 0_usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0_u8; content_length];
    reader.read_exact(&mut body).await?;

    let trimmed = request_line.trim_end().to_owned();
    if let Ok(mut requests) = log.lock() {
        requests.push(RecordedRequest {
            line: trimmed.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let (status, payload) = responder(&trimmed);
    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let mut socket = reader.into_inner();
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
