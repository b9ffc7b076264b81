use integer_encoding::VarInt;

use crate::crc32c;
use crate::env::RandomAccessFile;
use crate::error::Error;
use crate::options::{CompressionType, ReadOptions};
use crate::Result;

/// Appended after every block payload: 1 compression type byte plus a
/// 4 byte little-endian masked CRC-32C of the payload and that byte.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Maximum encoding length of a [`BlockHandle`]: two varint64s.
pub const MAX_ENCODED_HANDLE: usize = 10 + 10;

/// `metaindex_handle || index_handle || padding || magic`, always 48 bytes.
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE + 8;

pub const TABLE_MAGIC: u64 = 0xdb4775248b80fb57;

/// Points at a block payload on disk; the trailer is not included in
/// `size`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let mut buf = [0u8; 10];
        let n = self.offset.encode_var(&mut buf);
        dst.extend_from_slice(&buf[..n]);
        let n = self.size.encode_var(&mut buf);
        dst.extend_from_slice(&buf[..n]);
    }

    /// Returns the handle and the number of bytes consumed.
    pub fn decode_from(src: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n1) = u64::decode_var(src)
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        let (size, n2) = u64::decode_var(&src[n1..])
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }
}

/// Fixed-size trailer locating the metaindex and index blocks.
#[derive(Clone, Copy, Debug)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(start + 2 * MAX_ENCODED_HANDLE, 0);
        dst.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        debug_assert_eq!(dst.len() - start, FOOTER_SIZE);
    }

    pub fn decode_from(src: &[u8]) -> Result<Footer> {
        if src.len() < FOOTER_SIZE {
            return Err(Error::Corruption("footer is too short".into()));
        }
        let magic = u64::from_le_bytes(src[FOOTER_SIZE - 8..FOOTER_SIZE].try_into().unwrap());
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(
                "not an sstable (bad magic number)".into(),
            ));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(&src[..2 * MAX_ENCODED_HANDLE])?;
        let (index_handle, _) = BlockHandle::decode_from(&src[n..2 * MAX_ENCODED_HANDLE])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Read the block referenced by `handle`, check its trailer and undo
/// compression. Returns the raw payload.
pub fn read_block(
    file: &dyn RandomAccessFile,
    options: &ReadOptions,
    handle: &BlockHandle,
) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    file.read_exact_at(handle.offset, &mut buf)?;

    let ty = buf[n];
    if options.verify_checksums {
        let stored = u32::from_le_bytes(buf[n + 1..n + 5].try_into().unwrap());
        let actual = crc32c::extended(&buf[..n], &[ty]);
        if actual != crc32c::unmask(stored) {
            return Err(Error::Corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }

    match CompressionType::from_u8(ty) {
        Some(CompressionType::None) => {
            buf.truncate(n);
            Ok(buf)
        }
        Some(CompressionType::Snappy) => {
            let mut decoder = snap::raw::Decoder::new();
            decoder
                .decompress_vec(&buf[..n])
                .map_err(|e| Error::Corruption(format!("corrupted compressed block: {}", e)))
        }
        None => Err(Error::NotSupported(format!(
            "unknown block compression type {}",
            ty
        ))),
    }
}
