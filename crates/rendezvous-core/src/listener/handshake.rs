//! Connection handshake: one length byte followed by the client's UTF-8 name.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Encodes `name` as a handshake frame.
pub fn encode(name: &str) -> io::Result<Vec<u8>> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("client name must be 1..={MAX_NAME_LEN} bytes, got {}", name.len()),
        ));
    }
    let mut frame = Vec::with_capacity(name.len() + 1);
    frame.push(name.len() as u8);
    frame.extend_from_slice(name.as_bytes());
    Ok(frame)
}

/// Reads one handshake frame.
pub async fn read_name<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await? as usize;
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "empty client name in handshake",
        ));
    }
    let mut name = vec![0u8; len];
    reader.read_exact(&mut name).await?;
    String::from_utf8(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_is_length_prefixed() {
        let frame = encode("coordinator").unwrap();
        assert_eq!(frame[0] as usize, "coordinator".len());
        let mut reader = &frame[..];
        assert_eq!(read_name(&mut reader).await.unwrap(), "coordinator");
    }

    #[test]
    fn oversized_or_empty_names_are_rejected() {
        assert!(encode("").is_err());
        assert!(encode(&"x".repeat(256)).is_err());
        assert!(encode(&"x".repeat(255)).is_ok());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut reader: &[u8] = &[5, b'a', b'b'];
        let err = read_name(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn non_utf8_name_is_invalid_data() {
        let mut reader: &[u8] = &[2, 0xff, 0xfe];
        let err = read_name(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
