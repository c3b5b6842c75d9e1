//! WebSocket bridge transport.
//!
//! The bridge multiplexes a JSON control channel with binary RTCM frames:
//! the client sends `{command: …}` text frames, the bridge answers with
//! `{type: …}` status/info frames and raw binary corrections.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, RtkError};
use crate::ntrip::NtripConfig;

/// Gates the whole connect handshake: socket open, connect command, first
/// status frame.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Wire frames ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Command<'a> {
    Connect { config: BridgeConfig<'a> },
    Gga { data: &'a str },
    Disconnect,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeConfig<'a> {
    caster_host: &'a str,
    caster_port: u16,
    mountpoint:  &'a str,
    username:    &'a str,
    password:    &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    Status {
        connected: bool,
        #[serde(default)]
        message: Option<String>,
    },
    Info {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Ping,
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct WsSession {
    ws: WsStream,
    /// Binary frames that raced ahead of the status acknowledgement.
    pending: VecDeque<Vec<u8>>,
}

/// Connect to the bridge and complete the NTRIP handshake, all under the
/// 10-second open timeout.
pub(super) async fn open(cfg: &NtripConfig) -> Result<WsSession> {
    let ws_base = cfg
        .ws_base
        .as_deref()
        .ok_or_else(|| RtkError::Config("websocket_url not configured".into()))?;

    tokio::time::timeout(OPEN_TIMEOUT, handshake(cfg, ws_base))
        .await
        .map_err(|_| RtkError::Timeout("WebSocket bridge open".into()))?
}

async fn handshake(cfg: &NtripConfig, ws_base: &str) -> Result<WsSession> {
    let (mut ws, _response) = connect_async(ws_base).await?;
    info!("NTRIP WS: connected to bridge {ws_base}");

    let connect = Command::Connect {
        config: BridgeConfig {
            caster_host: &cfg.caster_host,
            caster_port: cfg.caster_port,
            mountpoint:  &cfg.mountpoint,
            username:    &cfg.username,
            password:    &cfg.password,
        },
    };
    ws.send(Message::Text(serde_json::to_string(&connect)?)).await?;

    let mut pending = VecDeque::new();
    loop {
        let frame = match ws.next().await {
            Some(f) => f?,
            None => {
                return Err(RtkError::Transport(
                    "bridge closed during handshake".into(),
                ))
            }
        };
        match frame {
            Message::Binary(b) => pending.push_back(b),
            Message::Text(t) => match serde_json::from_str::<ServerFrame>(&t) {
                Ok(ServerFrame::Status { connected: true, .. }) => {
                    return Ok(WsSession { ws, pending });
                }
                Ok(ServerFrame::Status { connected: false, message }) => {
                    return Err(RtkError::Transport(
                        message.unwrap_or_else(|| "bridge refused connection".into()),
                    ));
                }
                Ok(ServerFrame::Error { message }) => {
                    warn!("NTRIP WS bridge error: {}", message.unwrap_or_default());
                }
                Ok(_) => {}
                Err(e) => debug!("NTRIP WS: unparseable bridge frame: {e}"),
            },
            Message::Ping(p) => ws.send(Message::Pong(p)).await?,
            Message::Close(_) => {
                return Err(RtkError::Transport("bridge closed during handshake".into()))
            }
            _ => {}
        }
    }
}

impl WsSession {
    /// Next binary RTCM chunk.  Control frames are handled in place; a
    /// bridge-reported disconnect surfaces as a transport error so the
    /// client can run its reconnection ladder.
    pub(super) async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        loop {
            let frame = match self.ws.next().await {
                Some(f) => f?,
                None => return Ok(None),
            };
            match frame {
                Message::Binary(b) => return Ok(Some(b)),
                Message::Text(t) => match serde_json::from_str::<ServerFrame>(&t) {
                    Ok(ServerFrame::Status { connected: false, message }) => {
                        return Err(RtkError::Transport(
                            message.unwrap_or_else(|| "bridge reported disconnect".into()),
                        ));
                    }
                    Ok(ServerFrame::Status { connected: true, .. })
                    | Ok(ServerFrame::Ping) => {}
                    Ok(ServerFrame::Info { message }) => {
                        debug!("NTRIP WS bridge: {}", message.unwrap_or_default());
                    }
                    Ok(ServerFrame::Error { message }) => {
                        warn!("NTRIP WS bridge error: {}", message.unwrap_or_default());
                    }
                    Err(e) => debug!("NTRIP WS: unparseable bridge frame: {e}"),
                },
                Message::Ping(p) => self.ws.send(Message::Pong(p)).await?,
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }

    pub(super) async fn send_gga(&mut self, line: &str) -> Result<()> {
        let cmd = Command::Gga { data: line };
        self.ws
            .send(Message::Text(serde_json::to_string(&cmd)?))
            .await?;
        Ok(())
    }

    /// Orderly shutdown: tell the bridge to detach from the caster, then
    /// close the socket.  Best effort on an already-dead connection.
    pub(super) async fn close(mut self) {
        if let Ok(json) = serde_json::to_string(&Command::Disconnect) {
            let _ = self.ws.send(Message::Text(json)).await;
        }
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_command_wire_shape() {
        let cmd = Command::Connect {
            config: BridgeConfig {
                caster_host: "caster.example.com",
                caster_port: 2101,
                mountpoint:  "MOUNT1",
                username:    "user",
                password:    "pass",
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"command":"connect","config":{"casterHost":"caster.example.com","casterPort":2101,"mountpoint":"MOUNT1","username":"user","password":"pass"}}"#
        );
    }

    #[test]
    fn gga_and_disconnect_commands() {
        let gga = Command::Gga { data: "$GPGGA,...*65" };
        assert_eq!(
            serde_json::to_string(&gga).unwrap(),
            r#"{"command":"gga","data":"$GPGGA,...*65"}"#
        );
        assert_eq!(
            serde_json::to_string(&Command::Disconnect).unwrap(),
            r#"{"command":"disconnect"}"#
        );
    }

    #[test]
    fn server_frames_deserialize() {
        match serde_json::from_str::<ServerFrame>(r#"{"type":"status","connected":true}"#) {
            Ok(ServerFrame::Status { connected: true, message: None }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match serde_json::from_str::<ServerFrame>(
            r#"{"type":"status","connected":false,"message":"bad credentials"}"#,
        ) {
            Ok(ServerFrame::Status { connected: false, message: Some(m) }) => {
                assert_eq!(m, "bad credentials")
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            serde_json::from_str::<ServerFrame>(r#"{"type":"ping"}"#),
            Ok(ServerFrame::Ping)
        ));
        assert!(matches!(
            serde_json::from_str::<ServerFrame>(r#"{"type":"error","message":"caster down"}"#),
            Ok(ServerFrame::Error { .. })
        ));
    }
}
