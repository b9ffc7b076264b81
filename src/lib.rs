//! The sorted-string-table stack of a log-structured merge-tree store:
//! the immutable on-disk table format, its builder and reader, the block
//! codec with prefix-compressed keys and restart points, per-table bloom
//! filters, and the iterator machinery (block, two-level and merging
//! iterators) the read path is built from.

pub mod arena;
pub mod cache;
pub mod comparator;
pub mod env;
pub mod error;
pub mod filter;
pub mod ioutils;
pub mod iterator;
pub mod options;
pub mod sstable;

mod crc32c;
mod hash;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use error::Error;
pub use options::{CompressionType, Options, ReadOptions};
