//! Post-handshake message framing: `<u32 length><id><payload>`, plus a
//! buffering parser that copes with partial reads.
use super::PeerError;
use byteorder::{BigEndian, ByteOrder};

/// Frames larger than this are rejected outright rather than buffered.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Vec<u8>),
    Request { piece: u32, offset: u32, length: u32 },
    Piece { piece: u32, offset: u32, data: Vec<u8> },
    Cancel { piece: u32, offset: u32, length: u32 },
    Port(u16),
    Extended { extended_id: u8, payload: Vec<u8> },
}

impl PeerMessage {
    /// Serializes to the on-wire `<len><id><payload>` form, including the
    /// 4-byte length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => body.push(0),
            PeerMessage::Unchoke => body.push(1),
            PeerMessage::Interested => body.push(2),
            PeerMessage::NotInterested => body.push(3),
            PeerMessage::Have { piece } => {
                body.push(4);
                body.extend_from_slice(&piece.to_be_bytes());
            }
            PeerMessage::Bitfield(bits) => {
                body.push(5);
                body.extend_from_slice(bits);
            }
            PeerMessage::Request { piece, offset, length } => {
                body.push(6);
                body.extend_from_slice(&piece.to_be_bytes());
                body.extend_from_slice(&offset.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            PeerMessage::Piece { piece, offset, data } => {
                body.push(7);
                body.extend_from_slice(&piece.to_be_bytes());
                body.extend_from_slice(&offset.to_be_bytes());
                body.extend_from_slice(data);
            }
            PeerMessage::Cancel { piece, offset, length } => {
                body.push(8);
                body.extend_from_slice(&piece.to_be_bytes());
                body.extend_from_slice(&offset.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            PeerMessage::Port(port) => {
                body.push(9);
                body.extend_from_slice(&port.to_be_bytes());
            }
            PeerMessage::Extended { extended_id, payload } => {
                body.push(20);
                body.push(*extended_id);
                body.extend_from_slice(payload);
            }
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn parse_body(body: &[u8]) -> Result<Self, PeerError> {
        if body.is_empty() {
            return Err(PeerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "empty non-keep-alive frame",
            )));
        }
        let id = body[0];
        let payload = &body[1..];
        let need = |n: usize| -> Result<(), PeerError> {
            if payload.len() < n {
                Err(PeerError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("message id {id} payload too short: got {}, need {n}", payload.len()),
                )))
            } else {
                Ok(())
            }
        };
        Ok(match id {
            0 => PeerMessage::Choke,
            1 => PeerMessage::Unchoke,
            2 => PeerMessage::Interested,
            3 => PeerMessage::NotInterested,
            4 => {
                need(4)?;
                PeerMessage::Have {
                    piece: BigEndian::read_u32(payload),
                }
            }
            5 => PeerMessage::Bitfield(payload.to_vec()),
            6 => {
                need(12)?;
                PeerMessage::Request {
                    piece: BigEndian::read_u32(&payload[0..4]),
                    offset: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                }
            }
            7 => {
                need(8)?;
                PeerMessage::Piece {
                    piece: BigEndian::read_u32(&payload[0..4]),
                    offset: BigEndian::read_u32(&payload[4..8]),
                    data: payload[8..].to_vec(),
                }
            }
            8 => {
                need(12)?;
                PeerMessage::Cancel {
                    piece: BigEndian::read_u32(&payload[0..4]),
                    offset: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                }
            }
            9 => {
                need(2)?;
                PeerMessage::Port(BigEndian::read_u16(payload))
            }
            20 => {
                need(1)?;
                PeerMessage::Extended {
                    extended_id: payload[0],
                    payload: payload[1..].to_vec(),
                }
            }
            other => {
                return Err(PeerError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown message id {other}"),
                )))
            }
        })
    }
}

/// Accumulates bytes from the wire and yields complete [`PeerMessage`]s as
/// soon as a full frame is available, tolerating arbitrary partial reads.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        MessageDecoder { buf: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls one message out of the buffer if a full frame has arrived.
    /// Call repeatedly after each `feed` — more than one frame may be
    /// buffered at once.
    pub fn next_message(&mut self) -> Result<Option<PeerMessage>, PeerError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = BigEndian::read_u32(&self.buf[0..4]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(PeerError::FrameTooLarge(len, MAX_FRAME_LEN));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(0..4 + len).collect();
        let body = &frame[4..];
        if body.is_empty() {
            return Ok(Some(PeerMessage::KeepAlive));
        }
        PeerMessage::parse_body(body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_round_trips() {
        let mut dec = MessageDecoder::new();
        dec.feed(&PeerMessage::KeepAlive.encode());
        assert_eq!(dec.next_message().unwrap(), Some(PeerMessage::KeepAlive));
    }

    #[test]
    fn simple_messages_round_trip() {
        for msg in [
            PeerMessage::Choke,
            PeerMessage::Unchoke,
            PeerMessage::Interested,
            PeerMessage::NotInterested,
            PeerMessage::Have { piece: 5 },
            PeerMessage::Port(6881),
        ] {
            let mut dec = MessageDecoder::new();
            dec.feed(&msg.encode());
            assert_eq!(dec.next_message().unwrap(), Some(msg));
        }
    }

    #[test]
    fn request_and_piece_round_trip() {
        let req = PeerMessage::Request {
            piece: 1,
            offset: 16384,
            length: 16384,
        };
        let mut dec = MessageDecoder::new();
        dec.feed(&req.encode());
        assert_eq!(dec.next_message().unwrap(), Some(req));

        let piece = PeerMessage::Piece {
            piece: 1,
            offset: 0,
            data: vec![1, 2, 3, 4],
        };
        let mut dec = MessageDecoder::new();
        dec.feed(&piece.encode());
        assert_eq!(dec.next_message().unwrap(), Some(piece));
    }

    #[test]
    fn handles_partial_reads_byte_by_byte() {
        let msg = PeerMessage::Bitfield(vec![0xff, 0x00, 0x0f]);
        let bytes = msg.encode();
        let mut dec = MessageDecoder::new();
        for i in 0..bytes.len() - 1 {
            dec.feed(&bytes[i..i + 1]);
            assert_eq!(dec.next_message().unwrap(), None);
        }
        dec.feed(&bytes[bytes.len() - 1..]);
        assert_eq!(dec.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn two_frames_buffered_back_to_back() {
        let mut dec = MessageDecoder::new();
        dec.feed(&PeerMessage::Choke.encode());
        dec.feed(&PeerMessage::Unchoke.encode());
        assert_eq!(dec.next_message().unwrap(), Some(PeerMessage::Choke));
        assert_eq!(dec.next_message().unwrap(), Some(PeerMessage::Unchoke));
        assert_eq!(dec.next_message().unwrap(), None);
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut dec = MessageDecoder::new();
        let mut header = vec![0u8; 4];
        BigEndian::write_u32(&mut header, (MAX_FRAME_LEN + 1) as u32);
        dec.feed(&header);
        assert!(matches!(dec.next_message(), Err(PeerError::FrameTooLarge(..))));
    }

    #[test]
    fn truncated_request_payload_is_rejected_not_panicking() {
        let mut dec = MessageDecoder::new();
        let mut header = vec![0u8; 4];
        BigEndian::write_u32(&mut header, 3);
        dec.feed(&header);
        dec.feed(&[6, 0, 0]);
        assert!(dec.next_message().is_err());
    }

    #[test]
    fn extended_message_round_trips() {
        let msg = PeerMessage::Extended {
            extended_id: 1,
            payload: b"d1:ri1ee".to_vec(),
        };
        let mut dec = MessageDecoder::new();
        dec.feed(&msg.encode());
        assert_eq!(dec.next_message().unwrap(), Some(msg));
    }
}
