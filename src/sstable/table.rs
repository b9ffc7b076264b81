use std::sync::Arc;

use crate::env::RandomAccessFile;
use crate::error::Error;
use crate::filter::FilterPolicy;
use crate::iterator::Iter;
use crate::options::{Options, ReadOptions};
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{self, BlockHandle, Footer, FOOTER_SIZE};
use crate::Result;

/// Reader over one immutable table file.
///
/// A table is opened once and then shared behind an [`Arc`]; any number
/// of iterators over it may exist concurrently. Decoded data blocks live
/// in the options' block cache, keyed by this table's `cache_id` and the
/// block offset.
pub struct Table {
    options: Arc<Options>,
    file: Box<dyn RandomAccessFile>,
    cache_id: u64,
    index_block: Block,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// `size` must be the file's total length in bytes.
    pub fn open(
        options: Arc<Options>,
        file: Box<dyn RandomAccessFile>,
        size: u64,
    ) -> Result<Table> {
        if (size as usize) < FOOTER_SIZE {
            return Err(Error::Corruption(
                "file is too short to be an sstable".into(),
            ));
        }
        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.read_exact_at(size - FOOTER_SIZE as u64, &mut footer_buf)?;
        let footer = Footer::decode_from(&footer_buf)?;

        let read_options = ReadOptions {
            verify_checksums: options.paranoid_checks,
            fill_cache: false,
        };
        let index_contents = format::read_block(file.as_ref(), &read_options, &footer.index_handle)?;
        let index_block = Block::new(index_contents)?;

        let cache_id = options.block_cache.new_id();
        let mut table = Table {
            options,
            file,
            cache_id,
            index_block,
            filter: None,
        };
        table.read_meta(&footer, &read_options);
        Ok(table)
    }

    /// Load the filter named in the metaindex block, if any. Failures
    /// only cost lookup performance, so they degrade instead of erroring.
    fn read_meta(&mut self, footer: &Footer, read_options: &ReadOptions) {
        let policy = match &self.options.filter_policy {
            Some(policy) => policy.clone(),
            None => return,
        };
        let contents =
            match format::read_block(self.file.as_ref(), read_options, &footer.metaindex_handle) {
                Ok(contents) => contents,
                Err(e) => {
                    log::warn!("ignoring unreadable metaindex block: {}", e);
                    return;
                }
            };
        let metaindex_block = match Block::new(contents) {
            Ok(block) => block,
            Err(e) => {
                log::warn!("ignoring undecodable metaindex block: {}", e);
                return;
            }
        };

        let mut name = b"filter.".to_vec();
        name.extend_from_slice(policy.name().as_bytes());
        let mut iter = metaindex_block.iter(self.options.comparator.clone());
        iter.seek(&name);
        if iter.valid() && iter.key() == name.as_slice() {
            let handle_bytes = iter.value().to_vec();
            self.read_filter(policy, &handle_bytes, read_options);
        }
    }

    fn read_filter(
        &mut self,
        policy: Arc<dyn FilterPolicy>,
        handle_bytes: &[u8],
        read_options: &ReadOptions,
    ) {
        let handle = match BlockHandle::decode_from(handle_bytes) {
            Ok((handle, _)) => handle,
            Err(e) => {
                log::warn!("ignoring bad filter block handle: {}", e);
                return;
            }
        };
        // Filter blocks are stored uncompressed.
        match format::read_block(self.file.as_ref(), read_options, &handle) {
            Ok(contents) => self.filter = Some(FilterBlockReader::new(policy, contents)),
            Err(e) => log::warn!("ignoring unreadable filter block: {}", e),
        }
    }

    /// Fetch the data block behind an encoded handle, through the cache,
    /// and return an iterator over it.
    fn block_iter(&self, read_options: &ReadOptions, handle_bytes: &[u8]) -> Result<BlockIter> {
        let (handle, _) = BlockHandle::decode_from(handle_bytes)?;
        let block = self.load_block(read_options, &handle)?;
        Ok(block.iter(self.options.comparator.clone()))
    }

    fn load_block(&self, read_options: &ReadOptions, handle: &BlockHandle) -> Result<Block> {
        let cache = &self.options.block_cache;
        let mut cache_key = [0u8; 16];
        cache_key[..8].copy_from_slice(&self.cache_id.to_le_bytes());
        cache_key[8..].copy_from_slice(&handle.offset.to_le_bytes());

        if let Some(entry) = cache.lookup(&cache_key) {
            return Ok(entry.value().clone());
        }
        let contents = format::read_block(self.file.as_ref(), read_options, handle)?;
        let block = Block::new(contents)?;
        if read_options.fill_cache {
            cache.insert(cache_key, block.clone(), block.size());
        }
        Ok(block)
    }

    /// Point lookup. Consults the filter before touching the data block;
    /// on a filter miss no block is read at all. Returns the first entry
    /// at or after `key` in the candidate block (the caller compares), or
    /// `None` when the key is provably absent.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        index_iter.seek(key);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(None);
        }

        let handle_bytes = index_iter.value().to_vec();
        if let Some(filter) = &self.filter {
            if let Ok((handle, _)) = BlockHandle::decode_from(&handle_bytes) {
                if !filter.key_may_match(handle.offset, key) {
                    return Ok(None);
                }
            }
        }

        let mut block_iter = self.block_iter(read_options, &handle_bytes)?;
        block_iter.seek(key);
        if block_iter.valid() {
            return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
        }
        block_iter.status()?;
        Ok(None)
    }

}

/// Two-level iterator over a table. Empty data blocks are skipped so
/// that `valid()` always implies a meaningful entry.
pub struct TableIter {
    table: Arc<Table>,
    read_options: ReadOptions,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    // Encoded handle of the block data_iter is over
    data_block_handle: Vec<u8>,
    status: Option<Error>,
}

impl TableIter {
    /// Two-level cursor over the whole table: the first level walks the
    /// index block, the second lazily opens the pointed-to data block.
    pub fn new(table: Arc<Table>, read_options: ReadOptions) -> TableIter {
        TableIter {
            index_iter: table.index_block.iter(table.options.comparator.clone()),
            table,
            read_options,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: None,
        }
    }

    fn save_error(&mut self, e: Error) {
        if self.status.is_none() {
            self.status = Some(e);
        }
    }

    fn set_data_iter(&mut self, iter: Option<BlockIter>) {
        if let Some(old) = &self.data_iter {
            if let Err(e) = old.status() {
                self.save_error(e);
            }
        }
        self.data_iter = iter;
    }

    /// Open the data block the index currently points at, reusing the
    /// existing iterator when the handle is unchanged.
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iter(None);
            return;
        }
        let handle_bytes = self.index_iter.value().to_vec();
        if self.data_iter.is_some() && self.data_block_handle == handle_bytes {
            // data_iter is already constructed with this iterator, so
            // no need to change anything
            return;
        }
        match self.table.block_iter(&self.read_options, &handle_bytes) {
            Ok(iter) => {
                self.data_block_handle = handle_bytes;
                self.set_data_iter(Some(iter));
            }
            Err(e) => {
                self.save_error(e);
                self.set_data_iter(None);
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |it| !it.valid()) {
            // Move to next block
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |it| !it.valid()) {
            // Move to previous block
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_last();
            }
        }
    }
}

impl Iter for TableIter {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |it| it.valid())
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = &mut self.data_iter {
            it.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = &mut self.data_iter {
            it.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().map_or(&[], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().map_or(&[], |it| it.value())
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(it) = &self.data_iter {
            it.status()?;
        }
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
