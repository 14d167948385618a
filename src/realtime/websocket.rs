//! Realtime WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::protocol::Frame;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ChannelSocket {
    stream: WsStream,
}

impl ChannelSocket {
    /// Connect to the realtime endpoint. The API key travels in the URL; the
    /// user's access token is sent with the channel join.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting WebSocket to {}", redact(url));

        let (stream, response) = connect_async(url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a frame as JSON text.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame).context("Failed to encode frame")?;
        tracing::debug!("WS send: {} {}", frame.topic, frame.event);
        self.stream
            .send(Message::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next frame, answering pings and skipping anything that is
    /// not a JSON frame. Returns `None` when the server closed the socket.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => {
                        tracing::debug!("WS recv: {} {}", frame.topic, frame.event);
                        return Ok(Some(frame));
                    }
                    Err(e) => {
                        tracing::debug!("WS frame not understood ({}): {}", e, text);
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    /// Best-effort close handshake.
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {:#}", e);
        }
    }
}

/// Hide the API key when logging the endpoint.
fn redact(url: &str) -> String {
    match url.find("apikey=") {
        Some(pos) => {
            let start = pos + "apikey=".len();
            let end = url[start..]
                .find('&')
                .map(|i| start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_api_key() {
        assert_eq!(
            redact("wss://h/realtime/v1/websocket?apikey=secret&vsn=1.0.0"),
            "wss://h/realtime/v1/websocket?apikey=***&vsn=1.0.0"
        );
        assert_eq!(redact("wss://h/x?apikey=secret"), "wss://h/x?apikey=***");
        assert_eq!(redact("wss://h/x"), "wss://h/x");
    }
}
