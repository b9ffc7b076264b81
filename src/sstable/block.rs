use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use integer_encoding::VarInt;

use crate::comparator::Comparator;
use crate::error::Error;
use crate::iterator::Iter;
use crate::Result;

/// An immutable decoded block: prefix-compressed records followed by the
/// restart array and its length (see
/// [`block_builder`](crate::sstable::block_builder)).
///
/// The bytes live behind an [`Arc`], so clones are cheap and iterators
/// keep the data alive past cache eviction.
#[derive(Clone)]
pub struct Block {
    data: Arc<Vec<u8>>,
    // Offset of the restart array in `data`
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::Corruption("block is too small".into()));
        }
        let num_restarts = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts {
            return Err(Error::Corruption("bad restart count in block".into()));
        }
        let restart_offset = data.len() - 4 * (num_restarts as usize + 1);
        Ok(Block {
            data: Arc::new(data),
            restart_offset,
            num_restarts,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIter {
        BlockIter::new(self.clone(), comparator)
    }
}

/// Cursor over one block. Binary-searches the restart array on `seek`,
/// then scans linearly inside the restart group; `prev` walks back to the
/// nearest restart and re-scans forward, which is O(interval) amortized.
pub struct BlockIter {
    block: Block,
    comparator: Arc<dyn Comparator>,
    // Offset of the current record; == restart_offset once exhausted
    current: usize,
    // Restart group containing `current`
    restart_index: usize,
    key: Vec<u8>,
    value: Range<usize>,
    status: Option<Error>,
}

impl BlockIter {
    fn new(block: Block, comparator: Arc<dyn Comparator>) -> BlockIter {
        let restart_offset = block.restart_offset;
        let num_restarts = block.num_restarts as usize;
        BlockIter {
            block,
            comparator,
            current: restart_offset,
            restart_index: num_restarts,
            key: Vec::new(),
            value: 0..0,
            status: None,
        }
    }

    #[inline]
    fn num_restarts(&self) -> usize {
        self.block.num_restarts as usize
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts());
        let offset = self.block.restart_offset + 4 * index;
        u32::from_le_bytes(self.block.data[offset..offset + 4].try_into().unwrap()) as usize
    }

    /// Offset just past the current record's value.
    #[inline]
    fn next_entry_offset(&self) -> usize {
        self.value.end
    }

    fn seek_to_restart_point(&mut self, index: usize) -> bool {
        let offset = self.restart_point(index);
        if offset > self.block.restart_offset {
            self.corrupt("restart offset out of range");
            return false;
        }
        self.key.clear();
        self.restart_index = index;
        // parse_next_key picks up from the end of the (empty) value.
        self.value = offset..offset;
        true
    }

    fn corrupt(&mut self, msg: &str) {
        if self.status.is_none() {
            self.status = Some(Error::Corruption(msg.into()));
        }
        self.current = self.block.restart_offset;
        self.restart_index = self.num_restarts();
        self.key.clear();
        self.value = 0..0;
    }

    fn mark_at_end(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.num_restarts();
    }

    /// Decode the record after the current one; false at end of block or
    /// on corruption.
    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            self.mark_at_end();
            return false;
        }

        let data = &self.block.data[..self.block.restart_offset];
        let mut p = self.current;
        let (shared, non_shared, value_len) = match decode_entry_header(data, &mut p) {
            Some(header) => header,
            None => {
                self.corrupt("bad entry in block");
                return false;
            }
        };
        if shared > self.key.len() || p + non_shared + value_len > data.len() {
            self.corrupt("bad entry in block");
            return false;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[p..p + non_shared]);
        self.value = p + non_shared..p + non_shared + value_len;
        while self.restart_index + 1 < self.num_restarts()
            && self.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }
}

/// Parse the three varint fields of a record at `*p`, advancing it past
/// them.
fn decode_entry_header(data: &[u8], p: &mut usize) -> Option<(usize, usize, usize)> {
    let (shared, n) = u32::decode_var(&data[*p..])?;
    *p += n;
    let (non_shared, n) = u32::decode_var(&data[*p..])?;
    *p += n;
    let (value_len, n) = u32::decode_var(&data[*p..])?;
    *p += n;
    Some((shared as usize, non_shared as usize, value_len as usize))
}

impl Iter for BlockIter {
    fn valid(&self) -> bool {
        self.status.is_none() && self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.status.is_some() {
            return;
        }
        if self.num_restarts() == 0 {
            self.mark_at_end();
            return;
        }
        if self.seek_to_restart_point(0) {
            self.parse_next_key();
        }
    }

    fn seek_to_last(&mut self) {
        if self.status.is_some() {
            return;
        }
        if self.num_restarts() == 0 {
            self.mark_at_end();
            return;
        }
        if !self.seek_to_restart_point(self.num_restarts() - 1) {
            return;
        }
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {
            // Keep skipping
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.status.is_some() {
            return;
        }
        if self.num_restarts() == 0 {
            self.mark_at_end();
            return;
        }

        // Binary search in the restart array to find the last restart
        // point with a key < target.
        let mut left = 0;
        let mut right = self.num_restarts() - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.restart_point(mid);
            let data = &self.block.data[..self.block.restart_offset];
            let mut p = region_offset;
            let header = if region_offset < data.len() {
                decode_entry_header(data, &mut p)
            } else {
                None
            };
            let (shared, non_shared, _) = match header {
                Some(h) => h,
                None => {
                    self.corrupt("bad restart offset in block");
                    return;
                }
            };
            if shared != 0 || p + non_shared > data.len() {
                // Keys at restart points must be stored whole.
                self.corrupt("bad restart entry in block");
                return;
            }
            let mid_key = &data[p..p + non_shared];
            if self.comparator.compare(mid_key, target) == Ordering::Less {
                // Key at "mid" is smaller than "target".  Therefore all
                // restarts before "mid" are uninteresting.
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan within the restart group for the first key >= target
        if !self.seek_to_restart_point(left) {
            return;
        }
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        if !self.valid() {
            return;
        }
        self.parse_next_key();
    }

    fn prev(&mut self) {
        if !self.valid() {
            return;
        }

        // Scan backwards to a restart point before `current`
        let original = self.current;
        while self.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No more entries
                self.mark_at_end();
                return;
            }
            self.restart_index -= 1;
        }

        if !self.seek_to_restart_point(self.restart_index) {
            return;
        }
        // Parse forward until the record just before `original`.
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Keep skipping
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value.clone()]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Block;
    use crate::comparator::BytewiseComparator;
    use crate::iterator::Iter;
    use crate::sstable::block_builder::BlockBuilder;
    use std::sync::Arc;

    fn build_block(interval: usize, entries: &[(&[u8], &[u8])]) -> Block {
        let mut builder = BlockBuilder::new(interval, Arc::new(BytewiseComparator));
        for (key, value) in entries {
            builder.add(key, value);
        }
        Block::new(builder.finish().to_vec()).unwrap()
    }

    fn entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    format!("key{:04}", i).into_bytes(),
                    format!("value{}", i).into_bytes(),
                )
            })
            .collect()
    }

    fn as_refs(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<(&[u8], &[u8])> {
        entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect()
    }

    #[test]
    fn test_empty_block_iter() {
        let block = build_block(16, &[]);
        let mut iter = block.iter(Arc::new(BytewiseComparator));
        assert!(!iter.valid());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(b"a");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_forward_scan() {
        for interval in [1, 2, 16] {
            let data = entries(100);
            let block = build_block(interval, &as_refs(&data));
            let mut iter = block.iter(Arc::new(BytewiseComparator));
            iter.seek_to_first();
            for (key, value) in &data {
                assert!(iter.valid());
                assert_eq!(iter.key(), key.as_slice());
                assert_eq!(iter.value(), value.as_slice());
                iter.next();
            }
            assert!(!iter.valid());
            assert!(iter.status().is_ok());
        }
    }

    #[test]
    fn test_backward_scan() {
        for interval in [1, 3, 16] {
            let data = entries(100);
            let block = build_block(interval, &as_refs(&data));
            let mut iter = block.iter(Arc::new(BytewiseComparator));
            iter.seek_to_last();
            for (key, value) in data.iter().rev() {
                assert!(iter.valid());
                assert_eq!(iter.key(), key.as_slice());
                assert_eq!(iter.value(), value.as_slice());
                iter.prev();
            }
            assert!(!iter.valid());
        }
    }

    #[test]
    fn test_seek() {
        let data = entries(100);
        let block = build_block(16, &as_refs(&data));
        let mut iter = block.iter(Arc::new(BytewiseComparator));

        for (key, value) in &data {
            iter.seek(key);
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
        }

        // Between keys: lands on the next one.
        iter.seek(b"key0010a");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key0011");

        // Before the first key.
        iter.seek(b"aaa");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key0000");

        // Past the last key.
        iter.seek(b"zzz");
        assert!(!iter.valid());
    }

    #[test]
    fn test_mixed_directions() {
        let data = entries(10);
        let block = build_block(4, &as_refs(&data));
        let mut iter = block.iter(Arc::new(BytewiseComparator));

        iter.seek(b"key0005");
        assert_eq!(iter.key(), b"key0005");
        iter.prev();
        assert_eq!(iter.key(), b"key0004");
        iter.prev();
        assert_eq!(iter.key(), b"key0003");
        iter.next();
        assert_eq!(iter.key(), b"key0004");

        iter.seek_to_first();
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_restart_array_invariants() {
        let data = entries(50);
        let mut builder = BlockBuilder::new(5, Arc::new(BytewiseComparator));
        for (key, value) in &data {
            builder.add(key, value);
        }
        let payload = builder.finish().to_vec();

        let num_restarts =
            u32::from_le_bytes(payload[payload.len() - 4..].try_into().unwrap()) as usize;
        assert!(num_restarts >= 1);
        let array_start = payload.len() - 4 * (num_restarts + 1);
        let restart = |i: usize| {
            u32::from_le_bytes(
                payload[array_start + 4 * i..array_start + 4 * i + 4]
                    .try_into()
                    .unwrap(),
            ) as usize
        };
        assert_eq!(restart(0), 0);
        for i in 0..num_restarts {
            // Records at restart points store their key whole.
            assert_eq!(payload[restart(i)], 0, "restart {} shares bytes", i);
        }
    }

    #[test]
    fn test_corrupt_restart_array() {
        let data = entries(20);
        let block = build_block(4, &as_refs(&data));
        let mut payload = block.data.to_vec();

        // Point the first restart offset far outside the record area.
        let array_start = payload.len() - 4 * (block.num_restarts as usize + 1);
        payload[array_start] = 0xff;
        payload[array_start + 1] = 0xff;

        let corrupted = Block::new(payload).unwrap();
        let mut iter = corrupted.iter(Arc::new(BytewiseComparator));
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());

        // The error poisons later movement.
        iter.seek(b"key0003");
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
    }

    #[test]
    fn test_bad_restart_count_rejected() {
        assert!(Block::new(vec![0xff]).is_err());
        assert!(Block::new(vec![0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_truncated_record_detected() {
        let data = entries(8);
        let block = build_block(4, &as_refs(&data));
        let mut payload = block.data.to_vec();

        // Inflate the value length of the first record so it runs past
        // the end of the record area.
        payload[2] = 0x7b;
        let corrupted = Block::new(payload).unwrap();
        let mut iter = corrupted.iter(Arc::new(BytewiseComparator));
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
    }
}
