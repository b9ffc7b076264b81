use std::sync::Arc;

use crate::cache::ShardLruCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use crate::sstable::block::Block;

/// How a block payload is stored on disk. The discriminant is persisted
/// in the block trailer, so variants must never be renumbered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
}

impl CompressionType {
    pub(crate) fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

/// Cache key of a decoded data block: table cache id plus block offset,
/// both u64 little-endian.
pub type BlockCacheKey = [u8; 16];

pub type BlockCache = ShardLruCache<BlockCacheKey, Block>;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 16;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 8 << 20;

/// Knobs shared by the table builder and reader. Tables must be read
/// with the comparator (and filter policy, if any) they were written
/// with.
#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,

    /// If set, every table gets a filter block and point reads consult
    /// it before touching a data block.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Flush threshold for data blocks. Soft: a block never splits a
    /// key/value pair.
    pub block_size: usize,

    pub block_restart_interval: usize,

    pub compression: CompressionType,

    /// Where decoded data blocks live, shared between all tables opened
    /// with these options.
    pub block_cache: Arc<BlockCache>,

    /// Treat checksum mismatches found during open as hard errors.
    pub paranoid_checks: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            compression: CompressionType::Snappy,
            block_cache: Arc::new(BlockCache::new(DEFAULT_BLOCK_CACHE_CAPACITY)),
            paranoid_checks: false,
        }
    }
}

/// Per-read knobs.
#[derive(Clone)]
pub struct ReadOptions {
    /// Verify the trailer CRC of every block read.
    pub verify_checksums: bool,

    /// Insert blocks read on a miss into the block cache. Bulk scans
    /// turn this off to avoid wiping the cache.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}
