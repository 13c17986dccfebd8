//! Index-based storage shared by the graph and the schedule.
//!
//! Nodes and basic blocks live in [`Arena`]s and are referred to by typed
//! [`Id`]s. Per-item side tables (use lists, reducer marks, placements,
//! node→block maps) are [`SecondaryMap`]s keyed by the same ids, so nothing
//! ever holds a pointer into an arena that can move.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe index into an [`Arena<T>`].
///
/// Traits are implemented by hand so that `Id<T>` is `Copy`/`Eq`/`Hash`
/// whatever `T` is.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Sentinel for "no item".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            f.write_str("#INVALID")
        }
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage. Items are never freed individually, so ids stay
/// stable for the lifetime of a compilation.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store an item and return its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let id = self.next_id();
        self.items.push(item);
        id
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.as_usize())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// Iterate over all ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + use<T> {
        (0..self.items.len() as u32).map(Id::new)
    }

    /// The id the next `alloc` will return.
    #[inline]
    pub fn next_id(&self) -> Id<T> {
        Id::new(self.items.len() as u32)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense side table keyed by arena ids.
///
/// Reads past the end yield the default value, writes grow the table, so a
/// map never has to be presized to the arena (nodes keep being created while
/// reducers run).
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    default: V,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::with_default(V::default())
    }

    /// Presize the table for `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.resize(capacity);
        map
    }
}

impl<K, V: Clone> SecondaryMap<K, V> {
    /// Create a map whose unset entries read as `default`.
    pub fn with_default(default: V) -> Self {
        SecondaryMap {
            values: Vec::new(),
            default,
            _marker: PhantomData,
        }
    }

    /// Ensure the table holds at least `len` entries.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, self.default.clone());
        }
    }

    /// Number of materialized entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for `id`, or the default if it was never written.
    #[inline]
    pub fn get(&self, id: Id<K>) -> &V {
        self.values.get(id.as_usize()).unwrap_or(&self.default)
    }

    /// Mutable value for `id`, growing the table if needed.
    #[inline]
    pub fn get_mut(&mut self, id: Id<K>) -> &mut V {
        self.resize(id.as_usize() + 1);
        &mut self.values[id.as_usize()]
    }

    #[inline]
    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.get_mut(id) = value;
    }

    /// Reset every entry to the default.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<K>, &V)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (Id::new(i as u32), v))
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    #[inline]
    fn index(&self, id: Id<K>) -> &Self::Output {
        self.get(id)
    }
}

impl<K, V: Clone> IndexMut<Id<K>> for SecondaryMap<K, V> {
    #[inline]
    fn index_mut(&mut self, id: Id<K>) -> &mut Self::Output {
        self.get_mut(id)
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// A growable bit set over dense indices (visited marks, participation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Set a bit, returning whether it was newly set.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Iterate over set indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(i32);

    #[test]
    fn test_arena_ids_are_dense() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(10));
        let b = arena.alloc(Item(20));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.next_id().index(), 2);

        arena[b].0 = 200;
        assert_eq!(arena[b].0, 200);
        assert_eq!(arena.iter().map(|(_, i)| i.0).collect::<Vec<_>>(), vec![10, 200]);
    }

    #[test]
    fn test_secondary_map_reads_default_past_end() {
        let mut map: SecondaryMap<Item, u32> = SecondaryMap::with_default(7);
        let far = Id::<Item>::new(40);
        assert_eq!(map[far], 7);
        assert!(map.is_empty());

        map[far] += 1;
        assert_eq!(map[far], 8);
        assert_eq!(map.len(), 41);
        assert_eq!(map[Id::new(3)], 7);
    }

    #[test]
    fn test_bit_set() {
        let mut set = BitSet::new();
        assert!(set.insert(0));
        assert!(set.insert(64));
        assert!(set.insert(100));
        assert!(!set.insert(64));

        assert!(set.contains(100));
        assert!(!set.contains(65));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 100]);

        set.remove(64);
        assert_eq!(set.count(), 2);
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_id_invalid() {
        let id: Id<Item> = Id::default();
        assert!(!id.is_valid());
        assert!(Id::<Item>::new(0).is_valid());
        assert_eq!(format!("{:?}", id), "#INVALID");
    }
}
