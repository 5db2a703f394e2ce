//! Browser side: an upgraded axum WebSocket split into source and sink halves.

use super::{BrowserSink, BrowserSource, Frame, PongHook, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

/// Split an upgraded socket into the halves a session owns.
pub fn split_websocket(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (
        WsSource {
            stream,
            on_pong: None,
        },
        WsSink { sink },
    )
}

pub struct WsSource {
    stream: SplitStream<WebSocket>,
    on_pong: Option<PongHook>,
}

#[async_trait]
impl BrowserSource for WsSource {
    fn on_pong(&mut self, hook: PongHook) {
        self.on_pong = Some(hook);
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                None => return Err(TransportError::Closed),
            };
            match msg {
                Message::Text(text) => return Ok(text.into_bytes()),
                Message::Binary(data) => return Ok(data),
                Message::Pong(_) => {
                    if let Some(hook) = &self.on_pong {
                        hook();
                    }
                }
                // axum answers pings itself
                Message::Ping(_) => {}
                Message::Close(_) => return Err(TransportError::Closed),
            }
        }
    }
}

pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl BrowserSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(payload) => Message::Ping(payload),
            Frame::Close => Message::Close(None),
        };
        self.sink
            .send(msg)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
