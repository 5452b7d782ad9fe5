//! Wire format: `length:i32 LE | packetId:i32 LE | type:i32 LE |
//! body:ASCII | 0x00 0x00`. `length` covers everything after itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RconError, Result};

pub const TYPE_AUTH: i32 = 3;
pub const TYPE_EXEC: i32 = 2;
pub const MAX_PACKET_SIZE: usize = 1460;

pub struct Packet {
    pub packet_id: i32,
    pub packet_type: i32,
    pub body: Vec<u8>,
}

/// Serialize and write a packet. Fails if the total framed size would
/// exceed the 1460-byte MTU limit.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet_id: i32,
    packet_type: i32,
    body: &[u8],
) -> Result<()> {
    let length = body.len() as i32 + 4 + 4 + 2;
    let total_size = length as usize + 4;
    if total_size >= MAX_PACKET_SIZE {
        return Err(RconError::PacketTooLarge);
    }

    let mut buf = Vec::with_capacity(total_size);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&packet_id.to_le_bytes());
    buf.extend_from_slice(&packet_type.to_le_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(&[0u8, 0u8]);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one framed response packet.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = i32::from_le_bytes(length_buf);

    if length < 4 + 4 + 2 {
        return Err(RconError::PacketTooShort);
    }

    let mut body_buf = vec![0u8; length as usize];
    reader.read_exact(&mut body_buf).await?;

    let packet_id = i32::from_le_bytes(body_buf[0..4].try_into().unwrap());
    let packet_type = i32::from_le_bytes(body_buf[4..8].try_into().unwrap());
    let body = body_buf[8..body_buf.len() - 2].to_vec();

    Ok(Packet {
        packet_id,
        packet_type,
        body,
    })
}

/// A random non-negative packet id, used to distinguish in-flight
/// commands (and to detect the `-1` authentication-failure echo).
pub fn random_packet_id() -> i32 {
    rand::Rng::gen_range(&mut rand::thread_rng(), 0..i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_packet() {
        let mut buf = Vec::new();
        write_packet(&mut buf, 7, TYPE_EXEC, b"status").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let packet = read_packet(&mut cursor).await.unwrap();
        assert_eq!(packet.packet_id, 7);
        assert_eq!(packet.packet_type, TYPE_EXEC);
        assert_eq!(packet.body, b"status");
    }

    #[tokio::test]
    async fn rejects_a_packet_over_the_mtu_limit() {
        let oversized_body = vec![b'a'; MAX_PACKET_SIZE];
        let mut buf = Vec::new();
        let result = write_packet(&mut buf, 1, TYPE_EXEC, &oversized_body).await;
        assert!(matches!(result, Err(RconError::PacketTooLarge)));
    }

    #[tokio::test]
    async fn rejects_a_packet_whose_total_size_is_exactly_the_mtu_limit() {
        // body.len() + 14 == MAX_PACKET_SIZE: the boundary itself must fail.
        let body = vec![b'a'; MAX_PACKET_SIZE - 14];
        let mut buf = Vec::new();
        let result = write_packet(&mut buf, 1, TYPE_EXEC, &body).await;
        assert!(matches!(result, Err(RconError::PacketTooLarge)));
    }

    #[tokio::test]
    async fn accepts_a_packet_one_byte_under_the_mtu_limit() {
        let body = vec![b'a'; MAX_PACKET_SIZE - 15];
        let mut buf = Vec::new();
        write_packet(&mut buf, 1, TYPE_EXEC, &body).await.unwrap();
        assert_eq!(buf.len(), MAX_PACKET_SIZE - 1);
    }

    #[test]
    fn random_packet_id_is_never_negative() {
        for _ in 0..100 {
            assert!(random_packet_id() >= 0);
        }
    }
}
