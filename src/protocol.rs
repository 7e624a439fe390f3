//! Wire codec: the client/server frame shapes and the length-prefixed
//! framing used to move them over a byte stream.
//!
//! Grounded on the teacher's `adapters/tcp/protocol.rs` (4-byte big-endian
//! length prefix + UTF-8 JSON payload); the frame *shapes* are new since the
//! command surface here is name-addressed with a request/ack correlation
//! id rather than the teacher's fixed message enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RenderedError;

/// Frames larger than this are rejected before any JSON parsing is attempted.
pub const MAX_FRAME_SIZE: u32 = 1 << 20;

/// A client-originated command envelope. `args` are positional, validated
/// per-command by the command surface (spec §4.5); `request_id` correlates
/// the eventual ack.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub request_id: u64,
}

/// Everything the server can send back: either the ack for a specific
/// request, or a named, un-correlated event (spec §6's server event table).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Ack {
        request_id: u64,
        error: Option<RenderedError>,
        data: Option<Value>,
    },
    Event {
        name: &'static str,
        args: Vec<Value>,
    },
}

impl ServerFrame {
    pub fn ack(request_id: u64, error: Option<RenderedError>, data: Option<Value>) -> Self {
        Self::Ack { request_id, error, data }
    }

    pub fn event(name: &'static str, args: Vec<Value>) -> Self {
        Self::Event { name, args }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,
    #[error("frame of {0} bytes exceeds the {1} byte limit")]
    TooLarge(u32, u32),
    #[error("malformed frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads one length-prefixed frame and deserializes it as `T`. Returns
/// `Err(FrameError::Closed)` on a clean EOF before any bytes of a new frame
/// arrive.
///
/// Unused by the WebSocket reference [`crate::transport::WsTransport`],
/// which gets its framing for free from WS text messages; kept `pub(crate)`
/// for a future raw-stream transport (e.g. length-prefixed TCP) that would
/// need it.
pub(crate) async fn read_frame<T, R>(reader: &mut R) -> Result<T, FrameError>
where
    T: for<'de> Deserialize<'de>,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len, MAX_FRAME_SIZE));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Serializes `value` and writes it as one length-prefixed frame.
pub(crate) async fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len, MAX_FRAME_SIZE));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_client_frame() {
        let frame = ClientFrame {
            command: "roomJoin".into(),
            args: vec![json!("room1")],
            request_id: 7,
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &serde_json::json!({
            "command": frame.command,
            "args": frame.args,
            "requestId": frame.request_id,
        }))
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded: ClientFrame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded.command, "roomJoin");
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.args, vec![json!("room1")]);
    }

    #[tokio::test]
    async fn rejects_oversized_frame_declaration() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame::<ClientFrame, _>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_, _)));
    }

    #[tokio::test]
    async fn clean_eof_before_a_frame_is_closed_not_an_error() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_frame::<ClientFrame, _>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }
}
</content>
