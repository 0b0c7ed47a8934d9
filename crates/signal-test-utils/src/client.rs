//! WebSocket signaling client for end-to-end tests.
//!
//! Correlates responses with requests by id and buffers notifications that
//! arrive while a response is awaited, so tests can assert on both streams
//! independently.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded `notification` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientNotification {
    pub event: String,
    pub data: Value,
}

/// Signaling client connected to a `TestServer`.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: i64,
    notifications: VecDeque<ClientNotification>,
}

impl TestClient {
    /// Connect to a full upgrade URL (`ws://host/?params=...`).
    pub async fn connect(url: &str) -> Self {
        let (ws, _response) = connect_async(url).await.expect("websocket connect");
        Self {
            ws,
            next_id: 1,
            notifications: VecDeque::new(),
        }
    }

    /// Send a request and wait for its response (the full envelope).
    pub async fn request(&mut self, event: &str, data: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send_raw(
            &json!({"id": id, "method": "request", "params": {"event": event, "data": data}})
                .to_string(),
        )
        .await;
        self.response_for(Some(id)).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("websocket send");
    }

    /// Wait for the response carrying `id` (`None` for undecodable requests).
    pub async fn response_for(&mut self, id: Option<i64>) -> Value {
        loop {
            let message = self.receive().await;
            match message["method"].as_str() {
                Some("response") if message["id"].as_i64() == id => return message,
                Some("notification") => self.buffer_notification(&message),
                _ => panic!("unexpected message while waiting for response {id:?}: {message}"),
            }
        }
    }

    /// Next notification, buffered or fresh; panics after 5 seconds.
    pub async fn next_notification(&mut self) -> ClientNotification {
        if let Some(notification) = self.notifications.pop_front() {
            return notification;
        }
        loop {
            let message = self.receive().await;
            if message["method"] == "notification" {
                return to_notification(&message);
            }
            panic!("unexpected message while waiting for a notification: {message}");
        }
    }

    /// Next notification of `event`, skipping (and dropping) others.
    pub async fn next_notification_of(&mut self, event: &str) -> ClientNotification {
        loop {
            let notification = self.next_notification().await;
            if notification.event == event {
                return notification;
            }
        }
    }

    /// Assert no notification arrives within `wait`.
    pub async fn assert_no_notification(&mut self, wait: Duration) {
        if let Some(notification) = self.notifications.pop_front() {
            panic!("unexpected buffered notification: {notification:?}");
        }
        if let Ok(Some(Ok(frame))) = tokio::time::timeout(wait, self.ws.next()).await {
            if let Message::Text(text) = frame {
                panic!("unexpected message: {text}");
            }
        }
    }

    /// Send a close frame and wait for the server to finish the handshake.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        while let Ok(Some(Ok(_))) = tokio::time::timeout(RECEIVE_TIMEOUT, self.ws.next()).await {}
    }

    async fn receive(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECEIVE_TIMEOUT, self.ws.next())
                .await
                .expect("no message within 5s")
                .expect("websocket closed")
                .expect("websocket read");
            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("server sent invalid JSON")
                }
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    fn buffer_notification(&mut self, message: &Value) {
        self.notifications.push_back(to_notification(message));
    }
}

fn to_notification(message: &Value) -> ClientNotification {
    ClientNotification {
        event: message["params"]["event"]
            .as_str()
            .expect("notification without event")
            .to_string(),
        data: message["params"]["data"].clone(),
    }
}
