use crate::error::Error;
use crate::Result;

/// Ordered cursor over a sorted key/value source.
///
/// The same capability set is implemented by block iterators, the
/// two-level table iterator and the merging iterator, so they compose
/// freely. `key` and `value` may only be called while `valid()` and the
/// returned slices are invalidated by the next movement. After an error,
/// `valid()` turns false, movement becomes a no-op and `status` keeps
/// returning the first error recorded.
pub trait Iter {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    /// REQUIRES: `valid()`
    fn key(&self) -> &[u8];

    /// REQUIRES: `valid()`
    fn value(&self) -> &[u8];

    fn status(&self) -> Result<()>;
}

/// Iterator over an empty sequence, optionally carrying an error.
#[derive(Default)]
pub struct EmptyIter {
    status: Option<Error>,
}

impl EmptyIter {
    pub fn new() -> EmptyIter {
        EmptyIter { status: None }
    }

    pub fn with_error(error: Error) -> EmptyIter {
        EmptyIter {
            status: Some(error),
        }
    }
}

impl Iter for EmptyIter {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {
        debug_assert!(false, "next() on an empty iterator");
    }

    fn prev(&mut self) {
        debug_assert!(false, "prev() on an empty iterator");
    }

    fn key(&self) -> &[u8] {
        debug_assert!(false, "key() on an empty iterator");
        &[]
    }

    fn value(&self) -> &[u8] {
        debug_assert!(false, "value() on an empty iterator");
        &[]
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
    use super::{EmptyIter, Iter};
    use crate::error::Error;

    #[test]
    fn test_empty_iter() {
        let mut it = EmptyIter::new();
        assert!(!it.valid());
        it.seek_to_first();
        it.seek(b"k");
        assert!(!it.valid());
        assert!(it.status().is_ok());

        let it = EmptyIter::with_error(Error::Corruption("bad block".into()));
        assert!(!it.valid());
        assert!(it.status().unwrap_err().is_corruption());
        // The error is sticky across calls.
        assert!(it.status().unwrap_err().is_corruption());
    }
}
