//! Byte-level framing helpers shared by the protocol messengers and the
//! rendezvous client/server. `libp2p-stream` hands back a raw duplex byte
//! stream per accepted/opened protocol — everything above "bytes in, bytes
//! out" is this module's job.

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 64KiB cap on a single chunk/frame, matching the teacher's
/// request-response codec limit.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Clip/trust/history protocol framing: one writer-produced chunk per
/// message, terminated by closing the write half (spec §4.5 — "the
/// transport does not re-frame"). The reader reads to EOF.
pub async fn write_chunk_and_close<W: AsyncWrite + Unpin>(
    io: &mut W,
    bytes: &[u8],
) -> std::io::Result<()> {
    io.write_all(bytes).await?;
    io.close().await
}

pub async fn read_chunk_to_end<R: AsyncRead + Unpin>(io: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut limited = io.take(MAX_FRAME_LEN as u64);
    limited.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Rendezvous protocol framing: a minimal length-prefixed JSON protocol over
/// a long-lived stream (spec §4.8) — a 4-byte big-endian length prefix
/// followed by that many bytes, so repeated register/list round trips can
/// share one stream.
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(
    io: &mut W,
    bytes: &[u8],
) -> std::io::Result<()> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame exceeds maximum length",
        ));
    }
    let len = (bytes.len() as u32).to_be_bytes();
    io.write_all(&len).await?;
    io.write_all(bytes).await?;
    io.flush().await
}

pub async fn read_length_prefixed<R: AsyncRead + Unpin>(io: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum length",
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}
