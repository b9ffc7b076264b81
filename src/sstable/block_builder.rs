use std::cmp::Ordering;
use std::sync::Arc;

use integer_encoding::VarInt;

use crate::comparator::Comparator;

/// Builds the payload of one block.
///
/// Keys are prefix-compressed against their predecessor; every
/// `restart_interval` records the full key is stored again and its offset
/// pushed onto the restart array, so readers can binary-search restarts
/// and only scan linearly inside one group.
///
/// Record layout, all integers unsigned varints:
///
/// ```text
/// shared_len | non_shared_len | value_len | key_delta | value
/// ```
///
/// The payload ends with the restart offsets and their count, both 32-bit
/// little-endian.
pub struct BlockBuilder {
    restart_interval: usize,
    comparator: Arc<dyn Comparator>,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    // Number of records since the last restart
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, comparator: Arc<dyn Comparator>) -> BlockBuilder {
        assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            comparator,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Empty the builder as if it were just constructed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// REQUIRES: `finish` has not been called since the last `reset`, and
    /// `key` compares greater than any previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);
        debug_assert!(
            self.buffer.is_empty()
                || self.comparator.compare(key, &self.last_key) == Ordering::Greater
        );

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart compression from a self-contained key
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Append the restart array and return the complete payload. The
    /// builder must be `reset` before it accepts records again.
    pub fn finish(&mut self) -> &[u8] {
        for i in 0..self.restarts.len() {
            let restart = self.restarts[i];
            self.buffer.extend_from_slice(&restart.to_le_bytes());
        }
        self.buffer
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.finished = true;
        &self.buffer
    }

    /// Payload size if `finish` were called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// True iff no records were added since the last `reset`.
    pub fn empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn put_varint32(dst: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 5];
    let n = v.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

#[cfg(test)]
mod tests {
    use super::BlockBuilder;
    use crate::comparator::BytewiseComparator;
    use std::sync::Arc;

    fn new_builder(interval: usize) -> BlockBuilder {
        BlockBuilder::new(interval, Arc::new(BytewiseComparator))
    }

    #[test]
    fn test_empty_block() {
        let mut builder = new_builder(16);
        assert!(builder.empty());
        assert_eq!(builder.current_size_estimate(), 8);
        let payload = builder.finish();
        // Lone restart at zero plus the restart count.
        assert_eq!(payload, [0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_prefix_compression() {
        let mut builder = new_builder(16);
        builder.add(b"apple", b"1");
        builder.add(b"applied", b"2");
        let payload = builder.finish().to_vec();

        // First record is self-contained.
        assert_eq!(&payload[..3], &[0, 5, 1]);
        assert_eq!(&payload[3..8], b"apple");
        // Second shares "appl" with its predecessor.
        assert_eq!(&payload[9..12], &[4, 3, 1]);
        assert_eq!(&payload[12..15], b"ied");
    }

    #[test]
    fn test_restart_cadence() {
        let mut builder = new_builder(2);
        for key in [&b"aaa"[..], b"aab", b"aac", b"aad", b"aae"] {
            builder.add(key, b"v");
        }
        let payload = builder.finish().to_vec();
        let num_restarts =
            u32::from_le_bytes(payload[payload.len() - 4..].try_into().unwrap());
        // Groups of two records: restarts at records 0, 2 and 4.
        assert_eq!(num_restarts, 3);
        let restart0 = u32::from_le_bytes(
            payload[payload.len() - 16..payload.len() - 12]
                .try_into()
                .unwrap(),
        );
        assert_eq!(restart0, 0);
    }

    #[test]
    fn test_size_estimate_matches_finish() {
        let mut builder = new_builder(16);
        let mut last_estimate = builder.current_size_estimate();
        for i in 0..100 {
            builder.add(format!("key{:03}", i).as_bytes(), b"value");
            let estimate = builder.current_size_estimate();
            assert!(estimate > last_estimate);
            last_estimate = estimate;
        }
        let len = builder.finish().len();
        assert_eq!(len, last_estimate);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut builder = new_builder(16);
        builder.add(b"k", b"v");
        builder.finish();
        builder.reset();
        assert!(builder.empty());
        builder.add(b"a", b"b");
        assert!(!builder.empty());
    }
}
