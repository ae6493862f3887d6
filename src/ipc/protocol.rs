//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::events::OverlayEvent;
use crate::state::{CaptureState, CaptureStatus};

/// Largest message body accepted from a peer
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from a control client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current overlay status
    GetStatus,

    /// Press the capture toggle
    Toggle,

    /// Leave fullscreen, as the user pressing Escape would
    ExitFullscreen,

    /// Save the current frame with its overlay as a PNG
    Snapshot { path: PathBuf },

    /// Subscribe to controller event notifications
    Subscribe,
}

/// Responses to a control client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current overlay status
    Status(OverlayStatus),

    /// Capture state after a toggle
    Toggled {
        capture: CaptureState,
        toggle_label: String,
    },

    FullscreenExited,

    SnapshotSaved { path: PathBuf },

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The controller broadcast an event
    Event { event: OverlayEvent },
}

/// Full overlay status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStatus {
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    #[serde(flatten)]
    pub controller: CaptureStatus,
}

impl OverlayStatus {
    pub fn new(controller: CaptureStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            controller,
        }
    }
}

/// Read one length-prefixed message body. Returns `None` on a clean
/// disconnect between messages.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message of {} bytes exceeds limit", len),
        ));
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await
}
