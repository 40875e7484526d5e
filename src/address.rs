//! Block address grammar and the batch frame codec
//!
//! The wire address of a block is six `/`-separated non-negative
//! integers, `x/y/z/time/channel/angle`. A request may concatenate any
//! number of such groups after its leading coordinate to touch several
//! blocks at once. Decoding scans left to right for non-overlapping
//! groups; malformed trailing text is silently unmatched rather than
//! rejected, mirroring how clients have historically built batch URLs.

use crate::error::{DatastoreError, Result};
use crate::types::{Block, BlockIdentification};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Parses and serializes block addresses per the wire grammar.
pub struct BlockAddressCodec;

impl BlockAddressCodec {
    /// Decode every well-formed six-integer group in `text`, in order.
    pub fn decode(text: &str) -> Vec<BlockIdentification> {
        let mut out = Vec::new();
        let bytes = text.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            match match_group(text, pos) {
                Some((id, end)) => {
                    out.push(id);
                    pos = end;
                }
                None => pos += 1,
            }
        }
        out
    }

    /// Decode a request's full block list: the explicit leading
    /// coordinate followed by every group found in the batch suffix.
    #[allow(clippy::too_many_arguments)]
    pub fn decode_with_leading(
        x: i64,
        y: i64,
        z: i64,
        time: i32,
        channel: i32,
        angle: i32,
        suffix: &str,
    ) -> Vec<BlockIdentification> {
        let mut out = vec![BlockIdentification::new([x, y, z], time, channel, angle)];
        out.extend(Self::decode(suffix));
        out
    }

    /// Canonical `x/y/z/time/channel/angle` text for one identification.
    pub fn encode(id: &BlockIdentification) -> String {
        id.to_string()
    }
}

/// Try to match one six-integer group starting exactly at `start`.
/// Returns the identification and the byte offset one past the match.
fn match_group(text: &str, start: usize) -> Option<(BlockIdentification, usize)> {
    let mut pos = start;
    let mut fields = [0i64; 6];
    for (i, field) in fields.iter_mut().enumerate() {
        if i > 0 {
            if text.as_bytes().get(pos) != Some(&b'/') {
                return None;
            }
            pos += 1;
        }
        let (value, end) = match_integer(text, pos)?;
        *field = value;
        pos = end;
    }
    let time = i32::try_from(fields[3]).ok()?;
    let channel = i32::try_from(fields[4]).ok()?;
    let angle = i32::try_from(fields[5]).ok()?;
    Some((
        BlockIdentification::new([fields[0], fields[1], fields[2]], time, channel, angle),
        pos,
    ))
}

fn match_integer(text: &str, start: usize) -> Option<(i64, usize)> {
    let bytes = text.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return None;
    }
    // Overflowing digit runs are treated as unmatched, like any other
    // malformed text.
    let value = text[start..end].parse().ok()?;
    Some((value, end))
}

/// Frame codec for batch block streams.
///
/// One frame is: size `3 x i32` BE, grid position `3 x i64` BE, payload
/// length `u32` BE, payload bytes. The absent sentinel frames size
/// `[-1, -1, -1]` with a zero-length payload.
pub struct BlockFrame;

impl BlockFrame {
    pub const HEADER_LEN: usize = 3 * 4 + 3 * 8 + 4;

    /// Append one framed block to `buf`.
    pub fn write_to(buf: &mut BytesMut, block: &Block) {
        for dim in block.size {
            buf.put_i32(dim);
        }
        for coord in block.grid_position {
            buf.put_i64(coord);
        }
        buf.put_u32(block.payload.len() as u32);
        buf.put_slice(&block.payload);
    }

    /// Read exactly one frame from `input`, advancing it past the frame.
    ///
    /// Returns `Ok(None)` on clean end of input (nothing left to read)
    /// and `Truncated` if the input ends inside a frame.
    pub fn read_from(input: &mut &[u8]) -> Result<Option<Block>> {
        if input.is_empty() {
            return Ok(None);
        }
        if input.len() < Self::HEADER_LEN {
            return Err(DatastoreError::Truncated(format!(
                "{} bytes left, frame header needs {}",
                input.len(),
                Self::HEADER_LEN
            )));
        }
        let mut size = [0i32; 3];
        for slot in size.iter_mut() {
            *slot = input.get_i32();
        }
        let mut grid_position = [0i64; 3];
        for slot in grid_position.iter_mut() {
            *slot = input.get_i64();
        }
        let payload_len = input.get_u32() as usize;
        if input.len() < payload_len {
            return Err(DatastoreError::Truncated(format!(
                "{} bytes left, frame payload needs {}",
                input.len(),
                payload_len
            )));
        }
        let payload = Bytes::copy_from_slice(&input[..payload_len]);
        input.advance(payload_len);
        Ok(Some(Block::new(size, grid_position, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_group() {
        let ids = BlockAddressCodec::decode("5/6/7/1/2/3");
        assert_eq!(ids, vec![BlockIdentification::new([5, 6, 7], 1, 2, 3)]);
    }

    #[test]
    fn test_decode_batch_suffix() {
        let ids = BlockAddressCodec::decode_with_leading(0, 0, 0, 0, 0, 0, "5/6/7/1/2/3");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], BlockIdentification::new([0, 0, 0], 0, 0, 0));
        assert_eq!(ids[1], BlockIdentification::new([5, 6, 7], 1, 2, 3));
    }

    #[test]
    fn test_decode_empty_suffix() {
        let ids = BlockAddressCodec::decode_with_leading(1, 2, 3, 4, 5, 6, "");
        assert_eq!(ids, vec![BlockIdentification::new([1, 2, 3], 4, 5, 6)]);
    }

    #[test]
    fn test_decode_concatenated_groups() {
        let ids = BlockAddressCodec::decode("/1/2/3/4/5/6/7/8/9/10/11/12");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], BlockIdentification::new([1, 2, 3], 4, 5, 6));
        assert_eq!(ids[1], BlockIdentification::new([7, 8, 9], 10, 11, 12));
    }

    #[test]
    fn test_decode_ignores_malformed_trailing_text() {
        let ids = BlockAddressCodec::decode("5/6/7/1/2/3/garbage");
        assert_eq!(ids.len(), 1);

        let ids = BlockAddressCodec::decode("not an address at all");
        assert!(ids.is_empty());

        // Five integers are not a group
        let ids = BlockAddressCodec::decode("1/2/3/4/5");
        assert!(ids.is_empty());
    }

    #[test]
    fn test_encode_decode_identity() {
        let text = "5/6/7/1/2/3";
        let ids = BlockAddressCodec::decode(text);
        assert_eq!(BlockAddressCodec::encode(&ids[0]), text);
    }

    #[test]
    fn test_frame_round_trip() {
        let block = Block::new([2, 2, 1], [4, 5, 6], Bytes::from_static(&[9u8; 16]));
        let mut buf = BytesMut::new();
        BlockFrame::write_to(&mut buf, &block);
        BlockFrame::write_to(&mut buf, &Block::absent([7, 8, 9]));

        let mut input = &buf[..];
        let first = BlockFrame::read_from(&mut input).unwrap().unwrap();
        assert_eq!(first, block);

        let second = BlockFrame::read_from(&mut input).unwrap().unwrap();
        assert!(second.is_absent());
        assert_eq!(second.grid_position, [7, 8, 9]);

        assert!(BlockFrame::read_from(&mut input).unwrap().is_none());
    }

    #[test]
    fn test_frame_truncation() {
        let block = Block::new([2, 2, 1], [0, 0, 0], Bytes::from_static(&[1u8; 16]));
        let mut buf = BytesMut::new();
        BlockFrame::write_to(&mut buf, &block);

        // Cut inside the payload
        let mut input = &buf[..buf.len() - 4];
        assert!(matches!(
            BlockFrame::read_from(&mut input),
            Err(DatastoreError::Truncated(_))
        ));

        // Cut inside the header
        let mut input = &buf[..6];
        assert!(matches!(
            BlockFrame::read_from(&mut input),
            Err(DatastoreError::Truncated(_))
        ));
    }
}
