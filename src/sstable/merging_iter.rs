use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::iterator::{EmptyIter, Iter};
use crate::Result;

/// Merge `children` into one ordered stream.
///
/// Zero children yield an empty iterator and a single child is returned
/// as is. Duplicate keys across children are all surfaced; callers
/// layering shadowing semantics on top dedupe themselves.
pub fn new_merging_iterator(
    comparator: Arc<dyn Comparator>,
    mut children: Vec<Box<dyn Iter>>,
) -> Box<dyn Iter> {
    match children.len() {
        0 => Box::new(EmptyIter::new()),
        1 => children.pop().unwrap(),
        _ => Box::new(MergingIter {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// k-way merge cursor. `current` is the child producing the active key;
/// while moving forward every other child sits at its first key >= the
/// active one, while moving backward at its last key <= it. Among equal
/// keys, forward order surfaces the lowest child index first and reverse
/// order the highest.
///
/// A heap would beat the linear scans for large k; table reads merge a
/// handful of children, so an array is fine.
pub struct MergingIter {
    comparator: Arc<dyn Comparator>,
    children: Vec<Box<dyn Iter>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIter {
    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for i in 0..self.children.len() {
            if !self.children[i].valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(i),
                Some(s) => {
                    if self.comparator.compare(self.children[i].key(), self.children[s].key())
                        == Ordering::Less
                    {
                        Some(i)
                    } else {
                        Some(s)
                    }
                }
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for i in (0..self.children.len()).rev() {
            if !self.children[i].valid() {
                continue;
            }
            largest = match largest {
                None => Some(i),
                Some(l) => {
                    if self.comparator.compare(self.children[i].key(), self.children[l].key())
                        == Ordering::Greater
                    {
                        Some(i)
                    } else {
                        Some(l)
                    }
                }
            };
        }
        self.current = largest;
    }
}

impl Iter for MergingIter {
    fn valid(&self) -> bool {
        self.current
            .map_or(false, |i| self.children[i].valid())
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let cur = match self.current {
            Some(cur) => cur,
            None => return,
        };

        // Ensure that all children are positioned after key(). Already
        // true while moving forward, since current produced the smallest
        // key; after a direction change the others must be repositioned
        // explicitly.
        if self.direction != Direction::Forward {
            let key = self.children[cur].key().to_vec();
            for i in 0..self.children.len() {
                if i == cur {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() && self.comparator.compare(&key, child.key()) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[cur].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let cur = match self.current {
            Some(cur) => cur,
            None => return,
        };

        // Mirror image of next(): put every other child before key().
        if self.direction != Direction::Reverse {
            let key = self.children[cur].key().to_vec();
            for i in 0..self.children.len() {
                if i == cur {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() {
                    // Child is at first entry >= key().  Step back one.
                    child.prev();
                } else {
                    // Child has no entries >= key().  Position at last.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[cur].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}
