use std::cmp::Ordering;
use std::sync::Arc;

use crate::crc32c;
use crate::env::WritableFile;
use crate::error::Error;
use crate::options::{CompressionType, Options};
use crate::sstable::block_builder::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::Result;

/// Streams strictly increasing key/value pairs into a table file: data
/// blocks as they fill up, then on `finish` the filter block, the
/// metaindex block, the index block and the footer.
///
/// The index entry for a data block is deliberately emitted one block
/// late, when the first key of the next block is known, so the separator
/// between the two can be shortened with
/// [`find_shortest_separator`](crate::comparator::Comparator::find_shortest_separator).
pub struct TableBuilder<W: WritableFile> {
    options: Arc<Options>,
    file: W,
    offset: u64,
    status: Option<Error>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    // Owned copy: it is shortened in place to become the separator.
    last_key: Vec<u8>,
    num_entries: u64,
    // Either finish() or abandon() has been called
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    // Invariant: `pending_index_entry` is true only if the data block is
    // empty, i.e. right after a flush.
    pending_index_entry: bool,
    // Handle of the most recently flushed data block
    pending_handle: BlockHandle,

    compressed_output: Vec<u8>,
}

impl<W: WritableFile> TableBuilder<W> {
    pub fn new(options: Arc<Options>, file: W) -> TableBuilder<W> {
        let mut filter_block = options
            .filter_policy
            .clone()
            .map(FilterBlockBuilder::new);
        if let Some(fb) = &mut filter_block {
            fb.start_block(0);
        }
        TableBuilder {
            data_block: BlockBuilder::new(
                options.block_restart_interval,
                options.comparator.clone(),
            ),
            // Every index entry is its own restart group so lookups can
            // binary-search the whole index.
            index_block: BlockBuilder::new(1, options.comparator.clone()),
            options,
            file,
            offset: 0,
            status: None,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            compressed_output: Vec::new(),
        }
    }

    /// Swap in new options mid-build. The comparator must stay the same;
    /// the table would be unreadable otherwise.
    pub fn change_options(&mut self, options: Arc<Options>) -> Result<()> {
        if options.comparator.name() != self.options.comparator.name() {
            return Err(Error::InvalidArgument(
                "changing comparator while building table".into(),
            ));
        }
        self.options = options;
        Ok(())
    }

    /// REQUIRES: `finish`/`abandon` have not been called and `key`
    /// compares greater than any previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let result = self.add_impl(key, value);
        self.record(result)
    }

    fn add_impl(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.closed);
        self.check_ok()?;
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::InvalidArgument(
                "keys must be added in strictly increasing order".into(),
            ));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(fb) = &mut self.filter_block {
            fb.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush_impl()?;
        }
        Ok(())
    }

    /// Force the current data block out to the file.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.flush_impl();
        self.record(result)
    }

    fn flush_impl(&mut self) -> Result<()> {
        debug_assert!(!self.closed);
        self.check_ok()?;
        if self.data_block.empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry, "flush with a pending index entry");

        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(&raw)?;
        self.pending_index_entry = true;
        self.file.flush()?;

        if let Some(fb) = &mut self.filter_block {
            fb.start_block(self.offset);
        }
        Ok(())
    }

    /// Compress if configured and worthwhile, then append payload and
    /// trailer.
    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let mut ty = self.options.compression;
        let contents: &[u8] = match ty {
            CompressionType::None => raw,
            CompressionType::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                match encoder.compress_vec(raw) {
                    Ok(compressed) if compressed.len() < raw.len() - raw.len() / 8 => {
                        self.compressed_output = compressed;
                        &self.compressed_output
                    }
                    // Compressed by less than 12.5%: not worth the
                    // decompression cost on every future read.
                    _ => {
                        ty = CompressionType::None;
                        raw
                    }
                }
            }
        };
        let handle = Self::write_raw_block(&mut self.file, &mut self.offset, contents, ty);
        self.compressed_output.clear();
        handle
    }

    fn write_raw_block(
        file: &mut W,
        offset: &mut u64,
        contents: &[u8],
        ty: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(*offset, contents.len() as u64);
        file.append(contents)?;

        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = ty as u8;
        let crc = crc32c::extended(contents, &trailer[..1]);
        trailer[1..].copy_from_slice(&crc32c::mask(crc).to_le_bytes());
        file.append(&trailer)?;

        *offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    /// Write out everything buffered plus the filter, metaindex, index
    /// and footer, and mark the file complete.
    pub fn finish(&mut self) -> Result<()> {
        let result = self.finish_impl();
        self.record(result)
    }

    fn finish_impl(&mut self) -> Result<()> {
        self.flush_impl()?;
        debug_assert!(!self.closed);
        self.closed = true;

        // Write filter block
        let mut filter_handle = None;
        if let Some(fb) = &mut self.filter_block {
            let contents = fb.finish();
            let handle = Self::write_raw_block(
                &mut self.file,
                &mut self.offset,
                contents,
                CompressionType::None,
            )?;
            filter_handle = Some(handle);
        }

        // Write metaindex block
        let mut metaindex_block = BlockBuilder::new(
            self.options.block_restart_interval,
            self.options.comparator.clone(),
        );
        if let (Some(handle), Some(policy)) = (filter_handle, &self.options.filter_policy) {
            let mut key = b"filter.".to_vec();
            key.extend_from_slice(policy.name().as_bytes());
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            metaindex_block.add(&key, &handle_encoding);
        }
        let raw = metaindex_block.finish().to_vec();
        let metaindex_handle = self.write_block(&raw)?;

        // Write index block
        if self.pending_index_entry {
            self.options.comparator.find_short_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let raw = self.index_block.finish().to_vec();
        let index_handle = self.write_block(&raw)?;

        // Write footer
        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        self.file.append(&footer_encoding)?;
        self.offset += footer_encoding.len() as u64;
        self.file.flush()?;
        Ok(())
    }

    /// Stop building without finalizing; the caller owns cleanup of the
    /// partially written file.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    #[inline]
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the final file size once `finish` returns.
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn check_ok(&self) -> Result<()> {
        self.status()
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.status.is_none() {
                self.status = Some(e.clone());
            }
        }
        result
    }
}
