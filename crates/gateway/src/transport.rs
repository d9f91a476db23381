//! Server-sent events transport for the live summary stream.

use crate::sse::SseDecoder;
use async_trait::async_trait;
use campaign_admin_console::live::EventStream;
use campaign_admin_console::SummaryTransport;
use campaign_core::{ConsoleConfig, ConsoleError, ConsoleResult};
use reqwest::header;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use url::Url;

const EVENT_BUFFER: usize = 32;

pub struct SseTransport {
    http: reqwest::Client,
}

impl SseTransport {
    /// The stream stays open indefinitely, so only connecting is bounded by
    /// the request timeout.
    pub fn new(config: &ConsoleConfig) -> ConsoleResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.api.request_timeout_ms))
            .build()
            .map_err(|e| ConsoleError::Config(format!("failed to build stream client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl SummaryTransport for SseTransport {
    async fn connect(&self, url: &Url) -> ConsoleResult<EventStream> {
        let response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| ConsoleError::Stream(format!("connect failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsoleError::Stream(format!(
                "stream endpoint answered {}",
                status.as_u16()
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut body = Box::pin(response.bytes_stream());
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            loop {
                // release the connection as soon as the consumer drops
                let chunk = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Stream consumer gone, closing connection");
                        return;
                    }
                    chunk = body.next() => match chunk {
                        Some(chunk) => chunk,
                        None => return,
                    },
                };
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ConsoleError::Stream(format!("stream read failed: {e}"))))
                            .await;
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("Stream consumer gone, closing connection");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const HEADERS: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\n\r\n";

    async fn accept_request(listener: &TcpListener) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            request.extend_from_slice(&buf[..n]);
        }
        socket
    }

    /// Reads until the peer closes; `true` if that happened in time.
    async fn closed_within(socket: &mut TcpStream, limit: Duration) -> bool {
        let mut buf = [0u8; 256];
        tokio::time::timeout(limit, async {
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        })
        .await
        .is_ok()
    }

    async fn serve() -> (TcpListener, Url, SseTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!(
            "http://{}/api/segments/summary/stream",
            listener.local_addr().unwrap()
        ))
        .unwrap();
        let transport = SseTransport::new(&ConsoleConfig::default()).unwrap();
        (listener, url, transport)
    }

    #[tokio::test]
    async fn test_events_are_decoded_from_the_body() {
        let (listener, url, transport) = serve().await;
        let server = tokio::spawn(async move {
            let mut socket = accept_request(&listener).await;
            socket.write_all(HEADERS).await.unwrap();
            socket
                .write_all(b"event: summary\ndata: {\"segments\":[]}\n\n")
                .await
                .unwrap();
            socket
        });

        let mut stream = transport.connect(&url).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.event, "summary");
        assert_eq!(event.data, "{\"segments\":[]}");
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropping_a_quiet_stream_closes_the_connection() {
        let (listener, url, transport) = serve().await;
        let server = tokio::spawn(async move {
            let mut socket = accept_request(&listener).await;
            socket.write_all(HEADERS).await.unwrap();
            socket
        });

        let stream = transport.connect(&url).await.unwrap();
        let mut socket = server.await.unwrap();
        drop(stream);
        assert!(closed_within(&mut socket, Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let (listener, url, transport) = serve().await;
        tokio::spawn(async move {
            let mut socket = accept_request(&listener).await;
            socket
                .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            socket
        });

        assert!(matches!(
            transport.connect(&url).await,
            Err(ConsoleError::Stream(_))
        ));
    }
}
