use std::sync::Arc;

use crate::filter::FilterPolicy;

// Generate a new filter every 2 KiB of data-block bytes.
const FILTER_BASE_LG: usize = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Builds the single filter block of a table: one filter per
/// `FILTER_BASE` stride of data-block region, concatenated and addressed
/// by a trailing offset array.
///
/// The call sequence must match `(start_block add_key*)* finish`.
///
/// ```text
/// +--------------------------+
/// | filter 1                 |
/// | filter 2                 |
/// | ...                      |
/// +--------------------------+
/// | filter 1 offset (u32 LE) |
/// | filter 2 offset          |
/// | ...                      |
/// +--------------------------+
/// | offset array start (u32) |
/// | base lg        (1 byte)  |
/// +--------------------------+
/// ```
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    // Flattened key contents, and the start of each key in it
    keys: Vec<u8>,
    start: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            start: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Tell the builder a data block begins at `block_offset`. Emits the
    /// filters (possibly none, possibly several empty ones) needed so that
    /// filter i covers the stride starting at `i * FILTER_BASE`.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.start.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(&mut self) -> &[u8] {
        if !self.start.is_empty() {
            self.generate_filter();
        }

        // Append array of per-filter offsets
        let array_offset = self.result.len() as u32;
        for i in 0..self.filter_offsets.len() {
            let offset = self.filter_offsets[i];
            self.result.extend_from_slice(&offset.to_le_bytes());
        }
        self.result.extend_from_slice(&array_offset.to_le_bytes());
        self.result.push(FILTER_BASE_LG as u8);
        &self.result
    }

    fn generate_filter(&mut self) {
        let num_keys = self.start.len();
        if num_keys == 0 {
            // Fast path if there are no keys for this filter
            self.filter_offsets.push(self.result.len() as u32);
            return;
        }

        // Make list of keys from flattened key structure
        self.start.push(self.keys.len()); // Simplify length computation
        let tmp_keys: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.start[i]..self.start[i + 1]])
            .collect();

        self.filter_offsets.push(self.result.len() as u32);
        self.policy.create_filter(&tmp_keys, &mut self.result);

        self.keys.clear();
        self.start.clear();
    }
}

/// Reads the filter block written by [`FilterBlockBuilder`]. Malformed
/// structure degrades to "may match"; only an explicitly empty filter is
/// a definite miss.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    // Start of the offset array within `data`
    offset_start: usize,
    num: usize,
    base_lg: usize,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Vec<u8>) -> FilterBlockReader {
        let n = data.len();
        // 1 byte for base_lg and 4 for the start of the offset array
        if n < 5 {
            return FilterBlockReader {
                policy,
                data,
                offset_start: 0,
                num: 0,
                base_lg: 0,
            };
        }
        let base_lg = data[n - 1] as usize;
        let last_word = u32::from_le_bytes(data[n - 5..n - 1].try_into().unwrap()) as usize;
        if last_word > n - 5 {
            return FilterBlockReader {
                policy,
                data,
                offset_start: 0,
                num: 0,
                base_lg,
            };
        }
        let num = (n - 5 - last_word) / 4;
        FilterBlockReader {
            policy,
            data,
            offset_start: last_word,
            num,
            base_lg,
        }
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index < self.num {
            let start = self.offset_at(index);
            let limit = self.offset_at(index + 1);
            if start <= limit && limit <= self.offset_start {
                let filter = &self.data[start..limit];
                return self.policy.key_may_match(key, filter);
            } else if start == limit {
                // Empty filters do not match any keys
                return false;
            }
        }
        true // Errors are treated as potential matches
    }

    fn offset_at(&self, index: usize) -> usize {
        let p = self.offset_start + index * 4;
        u32::from_le_bytes(self.data[p..p + 4].try_into().unwrap()) as usize
    }
}
