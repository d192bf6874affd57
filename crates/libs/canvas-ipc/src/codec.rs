//! Length-prefixed msgpack framing.
//!
//! Every frame is a 4-byte big-endian payload length followed by a msgpack
//! body. Structs are encoded as maps so optional envelope fields can be
//! omitted without shifting positions.

use std::io::{self, ErrorKind};

use rmp_serde::{from_slice, Serializer};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn encode_frame<T: Serialize>(msg: &T) -> io::Result<Vec<u8>> {
    // Serialize straight into the output buffer behind a reserved length prefix.
    let mut framed = Vec::with_capacity(512);
    framed.extend_from_slice(&[0u8; 4]);
    msg.serialize(&mut Serializer::new(&mut framed).with_struct_map())
        .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    let payload_len = framed
        .len()
        .checked_sub(4)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "missing frame payload"))?;
    if payload_len > MAX_FRAME_LEN {
        return Err(io::Error::new(ErrorKind::InvalidInput, "frame too large"));
    }
    let len = u32::try_from(payload_len)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "frame too large"))?;
    framed[..4].copy_from_slice(&len.to_be_bytes());
    Ok(framed)
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> io::Result<T> {
    if bytes.len() < 4 {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "missing frame header"));
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&bytes[..4]);
    let len = u32::from_be_bytes(len_buf) as usize;
    if bytes.len() < 4 + len {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "incomplete frame"));
    }
    let payload = &bytes[4..4 + len];
    from_slice(payload).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<T, W>(writer: &mut W, msg: &T) -> io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let framed = encode_frame(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await
}

/// Reads one frame. A clean end of stream yields `Ok(None)`.
///
/// An undecodable payload fails with `InvalidData` after the payload has been
/// consumed, so the stream stays aligned and the caller may keep reading. An
/// oversized length prefix fails with `InvalidInput`; the stream is unusable
/// afterwards.
pub async fn read_frame<T, R>(reader: &mut R) -> io::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("frame length {len} exceeds limit {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    from_slice(&payload).map(Some).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}
