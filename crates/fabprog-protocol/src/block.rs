//! Bitstream block splitting and compression
//!
//! Bitstreams are uploaded in blocks of [`BLOCK_SIZE`] raw bytes. Each block
//! is deflated (zlib container, best compression) behind a 2-byte
//! **big-endian** raw-size header. The rest of the protocol is little-endian;
//! the firmware expects this header as is.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{FabricError, Result};
use crate::frame::checksum;
use crate::protocol::{ProgramBlock, ProgramDevice};

/// Raw bytes per block
pub const BLOCK_SIZE: usize = 4096 - 32;

/// Largest block id a `ProgramBlock` can carry
const MAX_BLOCKS: usize = u16::MAX as usize + 1;

/// Deflate `raw` and prefix it with its big-endian length
pub fn compress_block(raw: &[u8]) -> Result<Vec<u8>> {
    let size = u16::try_from(raw.len()).map_err(|_| {
        FabricError::InvalidParameter(format!("block of {} bytes is too large", raw.len()))
    })?;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::best());
    encoder.write_all(raw)?;
    let deflated = encoder.finish()?;

    let mut out = Vec::with_capacity(2 + deflated.len());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&deflated);
    Ok(out)
}

/// Inverse of [`compress_block`]
pub fn decompress_block(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(FabricError::Truncated {
            response: "compressed block",
            expected: 2,
            got: data.len(),
        });
    }
    let size = u16::from_be_bytes([data[0], data[1]]) as usize;

    let mut raw = Vec::with_capacity(size);
    ZlibDecoder::new(&data[2..]).read_to_end(&mut raw)?;
    if raw.len() != size {
        return Err(FabricError::InvalidParameter(format!(
            "block header says {} bytes, stream holds {}",
            size,
            raw.len()
        )));
    }
    Ok(raw)
}

/// How a bitstream is cut into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub total_size: usize,
    pub block_size: usize,
    pub block_count: usize,
}

impl UploadPlan {
    /// Plan an upload of `total_size` bytes
    pub fn new(total_size: usize) -> Result<Self> {
        let block_count = total_size.div_ceil(BLOCK_SIZE);
        if block_count > MAX_BLOCKS || u32::try_from(total_size).is_err() {
            return Err(FabricError::InvalidParameter(format!(
                "bitstream of {} bytes needs {} blocks, at most {} fit",
                total_size, block_count, MAX_BLOCKS
            )));
        }

        Ok(Self {
            total_size,
            block_size: BLOCK_SIZE,
            block_count,
        })
    }

    /// The command that opens the upload
    pub fn begin_command(&self, save_to_flash: bool) -> ProgramDevice {
        ProgramDevice {
            save_to_flash,
            total_size: self.total_size as u32,
            block_count: self.block_count as u32,
            bitstream_crc: 0,
        }
    }

    /// Raw chunks in upload order
    pub fn chunks<'a>(&self, bitstream: &'a [u8]) -> impl Iterator<Item = &'a [u8]> {
        bitstream.chunks(self.block_size)
    }
}

/// Build the `ProgramBlock` for one raw chunk
pub fn build_block(block_id: u16, raw: &[u8]) -> Result<ProgramBlock> {
    let compressed_block = compress_block(raw)?;
    if compressed_block.len() > u16::MAX as usize {
        return Err(FabricError::PayloadTooLarge(compressed_block.len()));
    }

    Ok(ProgramBlock {
        block_id,
        raw_size: raw.len() as u16,
        block_checksum: checksum(raw),
        compressed_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i >> 8) as u8).collect()
    }

    #[test]
    fn test_compress_header_is_big_endian() {
        let raw = pattern(BLOCK_SIZE);
        let compressed = compress_block(&raw).unwrap();
        assert_eq!(&compressed[..2], &[0x0F, 0xE0]);
        // zlib header follows
        assert_eq!(compressed[2], 0x78);
        assert_eq!(decompress_block(&compressed).unwrap(), raw);
    }

    #[test]
    fn test_compress_empty_and_tiny() {
        for raw in [Vec::new(), vec![0x42]] {
            let compressed = compress_block(&raw).unwrap();
            assert_eq!(decompress_block(&compressed).unwrap(), raw);
        }
    }

    #[test]
    fn test_decompress_rejects_size_mismatch() {
        let mut compressed = compress_block(&[1, 2, 3]).unwrap();
        compressed[1] = 4;
        assert!(decompress_block(&compressed).is_err());
        assert!(decompress_block(&[0]).is_err());
    }

    #[test]
    fn test_block_count() {
        assert_eq!(UploadPlan::new(0).unwrap().block_count, 0);
        assert_eq!(UploadPlan::new(1).unwrap().block_count, 1);
        assert_eq!(UploadPlan::new(BLOCK_SIZE).unwrap().block_count, 1);
        assert_eq!(UploadPlan::new(BLOCK_SIZE + 1).unwrap().block_count, 2);
        assert_eq!(UploadPlan::new(10 * BLOCK_SIZE).unwrap().block_count, 10);
    }

    #[test]
    fn test_final_block_sizes() {
        let data = pattern(3 * BLOCK_SIZE + 100);
        let plan = UploadPlan::new(data.len()).unwrap();
        let sizes: Vec<usize> = plan.chunks(&data).map(<[u8]>::len).collect();
        assert_eq!(sizes, [BLOCK_SIZE, BLOCK_SIZE, BLOCK_SIZE, 100]);

        let data = pattern(2 * BLOCK_SIZE);
        let plan = UploadPlan::new(data.len()).unwrap();
        assert!(plan.chunks(&data).all(|c| c.len() == BLOCK_SIZE));
        assert_eq!(plan.chunks(&data).count(), plan.block_count);
    }

    #[test]
    fn test_too_many_blocks() {
        assert!(UploadPlan::new(MAX_BLOCKS * BLOCK_SIZE).is_ok());
        assert!(matches!(
            UploadPlan::new(MAX_BLOCKS * BLOCK_SIZE + 1),
            Err(FabricError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_begin_command_never_carries_crc() {
        let cmd = UploadPlan::new(100).unwrap().begin_command(true);
        assert_eq!(
            cmd,
            ProgramDevice {
                save_to_flash: true,
                total_size: 100,
                block_count: 1,
                bitstream_crc: 0,
            }
        );
    }

    #[test]
    fn test_build_block() {
        let raw = [0x80u8, 0x80, 0x01];
        let block = build_block(3, &raw).unwrap();
        assert_eq!(block.block_id, 3);
        assert_eq!(block.raw_size, 3);
        assert_eq!(block.block_checksum, 0x01);
        assert_eq!(block.compressed_size() as usize, block.compressed_block.len());
        assert_eq!(decompress_block(&block.compressed_block).unwrap(), raw);
    }
}
