use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::error::Error;

/// Default ceiling on a single frame body, chosen generously above anything
/// a dedicated server legitimately sends in one method call or callback.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

/// The banner is bounded tightly; nothing this protocol sends at connect
/// time is anywhere near this long, and it arrives before any handle-based
/// framing applies.
const MAX_BANNER_SIZE: u32 = 64;

const EXPECTED_BANNER: &str = "GBXRemote 2";

/// A decoded frame header: body length and the handle it is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub body_len: u32,
    pub handle: u32,
}

impl FrameHeader {
    /// The high bit of the handle distinguishes a callback (clear) from a
    /// request or response (set).
    pub fn is_response(&self) -> bool {
        self.handle & 0x8000_0000 != 0
    }
}

/// Read the one-time connect banner and verify it matches `GBXRemote 2`.
///
/// The banner is a 4-byte little-endian length followed by that many ASCII
/// bytes, with no handle framing. Bounded by `deadline`.
pub async fn read_banner<R>(stream: &mut R, deadline: Duration) -> Result<(), Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    timeout(deadline, read_banner_inner(stream))
        .await
        .map_err(|_| Error::Timeout)?
}

async fn read_banner_inner<R>(stream: &mut R) -> Result<(), Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_or_closed(stream, &mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_BANNER_SIZE {
        return Err(Error::TooLarge);
    }

    let mut body = vec![0u8; len as usize];
    read_exact_or_closed(stream, &mut body).await?;
    let banner = String::from_utf8(body).map_err(|_| Error::InvalidProtocol("not utf-8".to_string()))?;

    if banner != EXPECTED_BANNER {
        return Err(Error::InvalidProtocol(banner));
    }
    Ok(())
}

/// Read one frame header and body, without a size ceiling override.
pub async fn read_frame<R>(stream: &mut R, max_frame_size: u32) -> Result<(FrameHeader, Vec<u8>), Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header_buf = [0u8; 8];
    read_exact_or_closed(stream, &mut header_buf).await?;

    let body_len = u32::from_le_bytes(header_buf[0..4].try_into().unwrap());
    let handle = u32::from_le_bytes(header_buf[4..8].try_into().unwrap());
    if body_len > max_frame_size {
        return Err(Error::TooLarge);
    }

    let mut body = vec![0u8; body_len as usize];
    read_exact_or_closed(stream, &mut body).await?;

    Ok((FrameHeader { body_len, handle }, body))
}

/// Write one frame: header followed by body, in a single buffered call so a
/// concurrent writer can never interleave a partial frame.
pub async fn write_frame<W>(stream: &mut W, handle: u32, body: &[u8]) -> Result<(), Error>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&handle.to_le_bytes());
    out.extend_from_slice(body);

    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_exact_or_closed<R>(stream: &mut R, buf: &mut [u8]) -> Result<(), Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::Closed),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn banner_roundtrip() {
        let (mut a, mut b) = duplex(128);
        let mut frame = Vec::new();
        frame.extend_from_slice(&(EXPECTED_BANNER.len() as u32).to_le_bytes());
        frame.extend_from_slice(EXPECTED_BANNER.as_bytes());
        a.write_all(&frame).await.unwrap();

        read_banner(&mut b, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn banner_rejects_wrong_protocol() {
        let (mut a, mut b) = duplex(128);
        let bad = b"nope";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(bad.len() as u32).to_le_bytes());
        frame.extend_from_slice(bad);
        a.write_all(&frame).await.unwrap();

        let err = read_banner(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidProtocol(_)));
    }

    #[tokio::test]
    async fn banner_times_out_on_silence() {
        let (_a, mut b) = duplex(128);
        let err = read_banner(&mut b, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, 0x8000_0005, b"hello").await.unwrap();

        let (header, body) = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(header.handle, 0x8000_0005);
        assert!(header.is_response());
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn frame_rejects_oversize_body() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, 1, b"hello").await.unwrap();

        let err = read_frame(&mut b, 2).await.unwrap_err();
        assert!(matches!(err, Error::TooLarge));
    }

    #[tokio::test]
    async fn frame_read_reports_closed_on_clean_eof() {
        let (a, mut b) = duplex(256);
        drop(a);
        let err = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
