//! Key-ordered collection used for every dynamic set in the processor.

use std::collections::VecDeque;

/// Integer key an entry is ordered and searched by.
pub trait Keyed {
    fn key(&self) -> u32;
}

/// Owning list ordered by [`Keyed::key`].
///
/// `push`/`unshift` append without regard to order (fragment queues, PMT
/// element order); `insert_sorted` keeps the list ordered for keyed lookup.
/// While only sorted inserts have been used, `search` is a binary search.
#[derive(Debug)]
pub struct OrderedList<T> {
    items: VecDeque<T>,
    sorted: bool,
}

impl<T> Default for OrderedList<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            sorted: true,
        }
    }
}

impl<T: Keyed> OrderedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends at the tail.
    pub fn push(&mut self, item: T) {
        if let Some(last) = self.items.back() {
            self.sorted &= last.key() < item.key();
        }
        self.items.push_back(item);
    }

    /// Prepends at the head.
    pub fn unshift(&mut self, item: T) {
        if let Some(first) = self.items.front() {
            self.sorted &= item.key() < first.key();
        }
        self.items.push_front(item);
    }

    /// Removes the tail entry.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_back();
        self.reset_order_if_empty();
        item
    }

    /// Removes the head entry.
    pub fn shift(&mut self) -> Option<T> {
        let item = self.items.pop_front();
        self.reset_order_if_empty();
        item
    }

    /// Inserts before the first entry with a larger key. An entry with the
    /// same key wins: the new item is handed back in `Err`.
    pub fn insert_sorted(&mut self, item: T) -> Result<&mut T, T> {
        let key = item.key();
        let index = if self.sorted {
            match self.items.binary_search_by_key(&key, |e| e.key()) {
                Ok(_) => return Err(item),
                Err(index) => index,
            }
        } else {
            if self.items.iter().any(|e| e.key() == key) {
                return Err(item);
            }
            self.items
                .iter()
                .position(|e| e.key() > key)
                .unwrap_or(self.items.len())
        };
        self.items.insert(index, item);
        Ok(&mut self.items[index])
    }

    /// Returns the entry with `key`, inserting `make()` at its ordered
    /// position first when absent. `make` must produce an entry with `key`.
    pub fn get_or_insert_with(&mut self, key: u32, make: impl FnOnce() -> T) -> &mut T {
        let index = match self.position(key) {
            Some(index) => index,
            None => {
                let item = make();
                debug_assert_eq!(item.key(), key);
                let index = if self.sorted {
                    self.items.partition_point(|e| e.key() < key)
                } else {
                    self.items.len()
                };
                self.items.insert(index, item);
                index
            }
        };
        &mut self.items[index]
    }

    /// Index of the entry with `key`.
    pub fn position(&self, key: u32) -> Option<usize> {
        if self.sorted {
            self.items.binary_search_by_key(&key, |e| e.key()).ok()
        } else {
            self.items.iter().position(|e| e.key() == key)
        }
    }

    pub fn search(&self, key: u32) -> Option<&T> {
        let index = self.position(key)?;
        Some(&self.items[index])
    }

    pub fn search_mut(&mut self, key: u32) -> Option<&mut T> {
        let index = self.position(key)?;
        Some(&mut self.items[index])
    }

    pub fn contains(&self, key: u32) -> bool {
        self.position(key).is_some()
    }

    /// Unlinks the entry with `key`.
    pub fn remove(&mut self, key: u32) -> Option<T> {
        let index = self.position(key)?;
        let item = self.items.remove(index);
        self.reset_order_if_empty();
        item
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.sorted = true;
    }

    /// Removes every entry, yielding them head first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.sorted = true;
        self.items.drain(..)
    }

    fn reset_order_if_empty(&mut self) {
        if self.items.is_empty() {
            self.sorted = true;
        }
    }
}

impl<'a, T> IntoIterator for &'a OrderedList<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
