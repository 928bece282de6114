use crate::source::Source;
use crate::types::Frame;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Sender};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

type Connection = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open,
    Close,
    Ping,
    Pong,
    Connected,
    Disconnected,
    Event { name: String, args: Vec<Value> },
    Other,
}

pub fn parse_packet(s: &str) -> Result<Packet, String> {
    let mut chars = s.chars();
    match chars.next() {
        Some('0') => Ok(Packet::Open),
        Some('1') => Ok(Packet::Close),
        Some('2') => Ok(Packet::Ping),
        Some('3') => Ok(Packet::Pong),
        Some('4') => match chars.next() {
            Some('0') => Ok(Packet::Connected),
            Some('1') => Ok(Packet::Disconnected),
            Some('2') => parse_event(chars.as_str()),
            Some(_) => Ok(Packet::Other),
            None => Err(format!("Empty socket.io message {:?}", s)),
        },
        Some(_) => Ok(Packet::Other),
        None => Err("Empty packet".to_string()),
    }
}

fn parse_event(body: &str) -> Result<Packet, String> {
    // Optional "/namespace," prefix, then an optional ack id.
    let body = if body.starts_with('/') {
        match body.find(',') {
            Some(i) => &body[i + 1..],
            None => return Err(format!("Namespace without payload: {:?}", body)),
        }
    } else {
        body
    };
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut args = match serde_json::from_str(body) {
        Ok(Value::Array(args)) => args,
        Ok(_) => return Err(format!("Event payload is not an array: {}", body)),
        Err(e) => return Err(format!("Failed to parse event payload {:?}: {}", body, e)),
    };
    if args.is_empty() {
        return Err("Event without a name".to_string());
    }
    match args.remove(0) {
        Value::String(name) => Ok(Packet::Event { name, args }),
        other => Err(format!("Event name is not a string: {}", other)),
    }
}

/// The backend's live camera feed: `frame` events pushed over socket.io.
#[derive(Debug, Clone)]
pub struct SocketIoChannel {
    url: Url,
    reconnect_delay: Duration,
}

impl SocketIoChannel {
    pub fn new(url: Url, reconnect_delay: Duration) -> Self {
        SocketIoChannel {
            url,
            reconnect_delay,
        }
    }
}

impl Source<Frame> for SocketIoChannel {
    fn name(&self) -> &str {
        self.url.as_str()
    }

    /// Connects in the background; the connection is dropped once the
    /// returned stream is.
    fn on_push(&self) -> BoxStream<'static, Frame> {
        let (tx, rx) = channel(8);
        tokio::spawn(run(self.url.clone(), self.reconnect_delay, tx));
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (frame, rx)) }).boxed()
    }
}

pub async fn run(url: Url, reconnect_delay: Duration, tx: Sender<Frame>) {
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((connection, _)) => handle_connection(connection, &tx).await,
            Err(e) => error!("Error connecting to frame channel {}: {}", url, e),
        }
        if tx.is_closed() {
            info!("Frame subscriber gone, closing channel");
            return;
        }
        info!("Waiting {:?} and reconnecting to frame channel...", reconnect_delay);
        tokio::select! {
            _ = sleep(reconnect_delay) => {}
            _ = tx.closed() => return,
        }
        info!("Reconnecting to frame channel...");
    }
}

async fn handle_connection(connection: Connection, tx: &Sender<Frame>) {
    info!("Handling frame channel connection");
    let (mut ws_write, mut ws_read) = connection.split();
    loop {
        let message = tokio::select! {
            message = ws_read.next() => message,
            _ = tx.closed() => return,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!("Frame channel error: {}", e);
                return;
            }
            None => {
                info!("Frame channel connection dropped");
                return;
            }
        };
        // Malformed packets are logged and skipped; only the server closes
        // the stream.
        let reply = match message {
            Message::Text(s) => match parse_packet(&s) {
                Ok(packet) => handle_packet(packet, tx).await,
                Err(msg) => {
                    warn!("Error handling frame channel message: {}", msg);
                    None
                }
            },
            Message::Close(close_frame) => {
                warn!("Frame channel close message: {:?}", close_frame);
                return;
            }
            other => {
                debug!("Ignoring frame channel message: {:?}", other);
                None
            }
        };
        if let Some(reply) = reply {
            if let Err(e) = ws_write.send(Message::text(reply)).await {
                error!("Error replying on frame channel: {}", e);
                return;
            }
        }
    }
}

async fn handle_packet(packet: Packet, tx: &Sender<Frame>) -> Option<&'static str> {
    match packet {
        Packet::Open => Some("40"),
        Packet::Ping => Some("3"),
        Packet::Event { name, mut args } if name == "frame" => {
            match args.pop() {
                Some(Value::String(payload)) => {
                    // A send error means the subscriber is gone; the select
                    // in handle_connection ends the loop.
                    let _ = tx.send(Frame::new(payload)).await;
                }
                other => warn!("Frame event without an encoded image: {:?}", other),
            }
            None
        }
        Packet::Event { name, .. } => {
            debug!("Ignoring event {}", name);
            None
        }
        Packet::Connected => {
            info!("Subscribed to frame events");
            None
        }
        other => {
            debug!("Ignoring packet {:?}", other);
            None
        }
    }
}
