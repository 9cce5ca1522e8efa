//! Wire framing
//!
//! A frame is `[0x1B][length:u16 LE][payload][checksum:u8]` where `length`
//! counts the payload plus the trailing checksum byte and the checksum is the
//! payload bytes summed mod 256.

use crate::error::{FabricError, Result};
use crate::protocol::HEADER_MAGIC;
use crate::transport::Transport;

/// Largest payload `encode_frame` accepts (exclusive)
pub const MAX_PAYLOAD: usize = 0xFFFF - 16;

/// Magic byte plus length field
pub const FRAME_HEADER_LEN: usize = 3;

/// Sum of `data` mod 256
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wrap `payload` in a frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() >= MAX_PAYLOAD {
        return Err(FabricError::PayloadTooLarge(payload.len()));
    }

    let length = (payload.len() + 1) as u16;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + 1);
    frame.push(HEADER_MAGIC);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    Ok(frame)
}

/// Read one frame from `transport`
///
/// Returns `Ok(None)` if the transport times out anywhere inside the frame.
/// The returned payload has the checksum byte stripped.
pub fn decode_frame<T: Transport + ?Sized>(transport: &mut T) -> Result<Option<Vec<u8>>> {
    let mut magic = [0u8; 1];
    if !read_full(transport, &mut magic)? {
        return Ok(None);
    }
    if magic[0] != HEADER_MAGIC {
        return Err(FabricError::BadMagic(magic[0]));
    }

    let mut length = [0u8; 2];
    if !read_full(transport, &mut length)? {
        return Ok(None);
    }
    let length = u16::from_le_bytes(length) as usize;

    let mut body = vec![0u8; length];
    if !read_full(transport, &mut body)? {
        return Ok(None);
    }

    split_checksum(body).map(Some)
}

/// Decode a frame from the front of `buf`
///
/// Returns the payload and the number of bytes the frame occupied, or
/// `Ok(None)` if `buf` does not yet hold a complete frame.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
    let Some(&magic) = buf.first() else {
        return Ok(None);
    };
    if magic != HEADER_MAGIC {
        return Err(FabricError::BadMagic(magic));
    }
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let length = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    let end = FRAME_HEADER_LEN + length;
    if buf.len() < end {
        return Ok(None);
    }

    let payload = split_checksum(buf[FRAME_HEADER_LEN..end].to_vec())?;
    Ok(Some((payload, end)))
}

/// Verify and drop the trailing checksum byte
fn split_checksum(mut body: Vec<u8>) -> Result<Vec<u8>> {
    // A zero length field leaves no room for the checksum
    let Some(expected) = body.pop() else {
        return Err(FabricError::MalformedPacket(0));
    };

    let actual = checksum(&body);
    if actual != expected {
        return Err(FabricError::Checksum { expected, actual });
    }
    Ok(body)
}

/// Fill `buf` completely, returning false on timeout
fn read_full<T: Transport + ?Sized>(transport: &mut T, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
