use crate::filter::FilterPolicy;
use crate::hash::murmur_hash;

const SEED: u32 = 0xc7b4e193;

#[inline]
fn bloom_hash(key: &[u8]) -> u32 {
    murmur_hash(key, SEED)
}

/// Bloom filter with a configurable number of bits per key. The probe
/// count is stored in the final byte of each filter so tables built with
/// a different `bits_per_key` stay readable.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> BloomFilterPolicy {
        // k =~ ln(2) * bits_per_key; rounding down trades a little
        // precision for cheaper probing.
        let k = (bits_per_key * 69 / 100).clamp(1, 30);
        BloomFilterPolicy { bits_per_key, k }
    }
}

impl Default for BloomFilterPolicy {
    fn default() -> BloomFilterPolicy {
        BloomFilterPolicy::new(10)
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "sstlite.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // For small n the false positive rate gets very high.  Fix it by
        // enforcing a minimum bloom filter length.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        dst.push(self.k as u8); // Remember # of probes in filter
        let array = &mut dst[init_size..init_size + bytes];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = (h >> 17) | (h << 15); // rotate right 17 bits
            for _ in 0..self.k {
                let bit_pos = h as usize % bits;
                array[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let len = filter.len();
        if len < 2 {
            return false;
        }
        let bits = (len - 1) * 8;
        let k = filter[len - 1] as usize;
        if k > 30 {
            // Reserved for potential new encodings of short filters.
            // Consider it a match.
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = (h >> 17) | (h << 15);
        for _ in 0..k {
            let bit_pos = h as usize % bits;
            if filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}
