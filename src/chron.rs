// model = "claude-opus-4-5"
// created = "2026-01-31"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! Chronology: an append-only, order-preserving log with stable cursors.
//!
//! This is the sequence primitive under the text document. Key design
//! decisions:
//!
//! 1. **Entries are never mutated.** Deleting replaces an entry with a
//!    tombstone that keeps the same `(index, key)` identity and the
//!    same neighbour links, so cursors created before the deletion
//!    still resolve afterwards.
//!
//! 2. **Logical order is a linked walk.** Entries live at fixed
//!    physical indices in a persistent vector, and the visible order
//!    is the `former`/`latter` chain starting at an always-deleted
//!    root entry. Splicing is two link rewrites plus one append.
//!
//! 3. **Newest siblings sort first.** An insert lands immediately
//!    after its target, pushing the target's previous successor one
//!    step right. Rapid inserts at one cursor therefore come out
//!    newest-first relative to each other, which keeps interleaved
//!    edits convergent across replicas.
//!
//! # Example
//!
//! ```
//! use ripple::chron::Chron;
//!
//! let chron: Chron<char> = Chron::new();
//! let chron = chron.insert(&chron.tail(), 'h');
//! let chron = chron.insert(&chron.tail(), 'i');
//! assert_eq!(chron.to_string(), "hi");
//! ```

use std::rc::Rc;

use rand::Rng;

use crate::vector::PVec;

/// Keys are uniform random integers in `[1, 2^KEY_BITS)`.
pub const KEY_BITS: u32 = 28;

/// Link sentinel meaning "no neighbour".
pub const NO_INDEX: u32 = u32::MAX;

// =============================================================================
// Entries
// =============================================================================

/// The payload of an entry: either a live atom or a tombstone.
#[derive(Clone, Debug, PartialEq)]
pub enum Atom<T> {
    Live(T),
    Deleted,
}

/// One logical insertion in the log. Immutable; deletion and link
/// rewrites replace the entry with a new one of the same identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry<T> {
    index: u32,
    key: u32,
    atom: Atom<T>,
    former: u32,
    latter: u32,
}

impl<T> Entry<T> {
    /// Physical position in the log.
    #[inline]
    pub fn index(&self) -> u32 {
        return self.index;
    }

    /// Random identity key assigned at insertion.
    #[inline]
    pub fn key(&self) -> u32 {
        return self.key;
    }

    /// Physical index of the logical predecessor.
    #[inline]
    pub fn former(&self) -> u32 {
        return self.former;
    }

    /// Physical index of the logical successor.
    #[inline]
    pub fn latter(&self) -> u32 {
        return self.latter;
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        return matches!(self.atom, Atom::Deleted);
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        return matches!(self.atom, Atom::Live(_));
    }

    /// The live atom, if any.
    pub fn atom(&self) -> Option<&T> {
        match &self.atom {
            Atom::Live(data) => return Some(data),
            Atom::Deleted => return None,
        }
    }

    /// The live atom. Reading a tombstone is a programming error.
    pub fn data(&self) -> &T {
        match &self.atom {
            Atom::Live(data) => return data,
            Atom::Deleted => panic!(
                "read data of deleted entry (index {}, key {})",
                self.index, self.key
            ),
        }
    }

    /// Two entries are the same logical entry iff `(index, key)` match.
    #[inline]
    pub fn same(&self, other: &Entry<T>) -> bool {
        return self.index == other.index && self.key == other.key;
    }

    /// Compare against a bare key.
    #[inline]
    pub fn has_key(&self, key: u32) -> bool {
        return self.key == key;
    }

    /// Copy of this entry with rewritten neighbour links.
    fn relink(&self, former: u32, latter: u32) -> Entry<T>
    where
        T: Clone,
    {
        return Entry {
            index: self.index,
            key: self.key,
            atom: self.atom.clone(),
            former,
            latter,
        };
    }

    /// Rebuild an entry from its stored fields. Decoding only.
    pub(crate) fn from_parts(index: u32, key: u32, atom: Atom<T>, former: u32, latter: u32) -> Entry<T> {
        return Entry {
            index,
            key,
            atom,
            former,
            latter,
        };
    }
}

// =============================================================================
// Cursors and ranges
// =============================================================================

/// Which side of the anchor a cursor points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bias {
    /// Just before the anchor.
    Before,
    /// Just after the anchor.
    After,
}

/// What a cursor hangs on: a full entry, or a bare key to search for.
#[derive(Clone, Debug)]
pub enum Anchor<T> {
    Entry(Rc<Entry<T>>),
    Key(u32),
}

impl<T> Anchor<T> {
    /// The anchor's key, however it is stored.
    pub fn key(&self) -> u32 {
        match self {
            Anchor::Entry(entry) => return entry.key,
            Anchor::Key(key) => return *key,
        }
    }
}

impl<T> PartialEq for Anchor<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Anchor::Entry(a), Anchor::Entry(b)) => return a.same(b),
            // An entry and a bare key compare by key alone.
            _ => return self.key() == other.key(),
        }
    }
}

/// A stable position in a chronology: an anchor plus a side.
///
/// Cursors survive inserts and deletes around them because the anchor
/// identity is preserved by tombstoning.
#[derive(Clone, Debug)]
pub struct Cursor<T> {
    anchor: Anchor<T>,
    bias: Bias,
}

impl<T> PartialEq for Cursor<T> {
    fn eq(&self, other: &Self) -> bool {
        return self.anchor == other.anchor && self.bias == other.bias;
    }
}

impl<T> Cursor<T> {
    /// Cursor just before `entry`.
    pub fn before(entry: &Rc<Entry<T>>) -> Cursor<T> {
        return Cursor {
            anchor: Anchor::Entry(Rc::clone(entry)),
            bias: Bias::Before,
        };
    }

    /// Cursor just after `entry`.
    pub fn after(entry: &Rc<Entry<T>>) -> Cursor<T> {
        return Cursor {
            anchor: Anchor::Entry(Rc::clone(entry)),
            bias: Bias::After,
        };
    }

    /// Cursor just before the entry with `key`.
    pub fn before_key(key: u32) -> Cursor<T> {
        return Cursor {
            anchor: Anchor::Key(key),
            bias: Bias::Before,
        };
    }

    /// Cursor just after the entry with `key`.
    pub fn after_key(key: u32) -> Cursor<T> {
        return Cursor {
            anchor: Anchor::Key(key),
            bias: Bias::After,
        };
    }

    #[inline]
    pub fn anchor(&self) -> &Anchor<T> {
        return &self.anchor;
    }

    #[inline]
    pub fn bias(&self) -> Bias {
        return self.bias;
    }
}

/// A pair of cursors bracketing part of a chronology.
#[derive(Clone, Debug)]
pub struct Range<T> {
    pub head: Cursor<T>,
    pub tail: Cursor<T>,
}

impl<T> PartialEq for Range<T> {
    fn eq(&self, other: &Self) -> bool {
        return self.head == other.head && self.tail == other.tail;
    }
}

impl<T> Range<T> {
    pub fn new(head: Cursor<T>, tail: Cursor<T>) -> Range<T> {
        return Range { head, tail };
    }

    /// True when head and tail are the same position.
    pub fn is_collapsed(&self) -> bool {
        return self.head == self.tail;
    }
}

// =============================================================================
// Chron
// =============================================================================

/// The chronology log. Cloning is O(1); every operation returns a new
/// snapshot sharing entries with the old one.
#[derive(Clone, Debug, PartialEq)]
pub struct Chron<T> {
    /// Entries at fixed physical indices. `log[0]` is the deleted
    /// root that anchors the empty document.
    log: PVec<Rc<Entry<T>>>,
    /// Physical index of the entry at the logical end of the document.
    last: u32,
}

impl<T: Clone> Chron<T> {
    /// A chronology holding only the root.
    pub fn new() -> Chron<T>
    where
        T: 'static,
    {
        let root = Rc::new(Entry {
            index: 0,
            key: 0,
            atom: Atom::Deleted,
            former: NO_INDEX,
            latter: NO_INDEX,
        });
        return Chron {
            log: PVec::new().push(root),
            last: 0,
        };
    }

    /// The always-present root entry.
    pub fn root(&self) -> Rc<Entry<T>> {
        return Rc::clone(self.log.get(0).expect("chron log has a root"));
    }

    /// Sentinel cursor before all content.
    pub fn head(&self) -> Cursor<T> {
        return Cursor::after(&self.root());
    }

    /// Sentinel cursor after all content.
    pub fn tail(&self) -> Cursor<T> {
        let last = self.log.get(self.last as usize).expect("last entry exists");
        return Cursor::after(last);
    }

    /// The whole document as a range.
    pub fn full_range(&self) -> Range<T> {
        return Range::new(self.head(), self.tail());
    }

    /// Number of physical entries, root and tombstones included.
    #[inline]
    pub fn log_len(&self) -> usize {
        return self.log.len();
    }

    /// The entry at physical index `index`.
    pub fn entry_at(&self, index: u32) -> Option<&Rc<Entry<T>>> {
        if index == NO_INDEX {
            return None;
        }
        return self.log.get(index as usize);
    }

    /// The most recently appended entry.
    pub fn newest(&self) -> Option<&Rc<Entry<T>>> {
        return self.log.last();
    }

    /// Resolve a cursor's anchor to the current entry with the same
    /// identity. Bare keys fall back to a key search.
    pub fn anchor_of(&self, cursor: &Cursor<T>) -> Option<Rc<Entry<T>>> {
        match cursor.anchor() {
            Anchor::Entry(entry) => {
                let current = self.log.get(entry.index as usize)?;
                if current.same(entry) {
                    return Some(Rc::clone(current));
                }
                return None;
            }
            Anchor::Key(key) => {
                let found = self.log.find(|entry| entry.key == *key && entry.index != 0)?;
                return Some(Rc::clone(found));
            }
        }
    }

    /// The entry logically just before the cursor position.
    pub fn prev_to(&self, cursor: &Cursor<T>) -> Option<Rc<Entry<T>>> {
        let anchor = self.anchor_of(cursor)?;
        match cursor.bias() {
            Bias::After => return Some(anchor),
            Bias::Before => {
                let former = self.entry_at(anchor.former)?;
                return Some(Rc::clone(former));
            }
        }
    }

    /// The entry logically just after the cursor position.
    pub fn next_to(&self, cursor: &Cursor<T>) -> Option<Rc<Entry<T>>> {
        let anchor = self.anchor_of(cursor)?;
        match cursor.bias() {
            Bias::Before => return Some(anchor),
            Bias::After => {
                let latter = self.entry_at(anchor.latter)?;
                return Some(Rc::clone(latter));
            }
        }
    }

    /// Splice a new atom in just after the cursor's predecessor, with
    /// a fresh random key. An unresolvable cursor is a silent no-op.
    pub fn insert(&self, cursor: &Cursor<T>, value: T) -> Chron<T> {
        return self.insert_with_key(cursor, value, random_key());
    }

    /// Splice with a caller-chosen key. Remote replay uses this to
    /// reproduce an insert exactly.
    pub fn insert_with_key(&self, cursor: &Cursor<T>, value: T, key: u32) -> Chron<T> {
        let target = match self.prev_to(cursor) {
            Some(target) => target,
            None => return self.clone(),
        };
        let index = self.log.len() as u32;
        let entry = Rc::new(Entry {
            index,
            key,
            atom: Atom::Live(value),
            former: target.index,
            latter: target.latter,
        });

        // Rewrite the target's forward link, and the old successor's
        // backward link when there is one.
        let mut log = self
            .log
            .set(target.index as usize, Rc::new(target.relink(target.former, index)));
        if target.latter != NO_INDEX {
            let follower = self.entry_at(target.latter).expect("linked entry exists");
            let relinked = follower.relink(index, follower.latter);
            log = log.set(follower.index as usize, Rc::new(relinked));
        }
        let log = log.push(entry);

        let last = if target.index == self.last { index } else { self.last };
        return Chron { log, last };
    }

    /// Tombstone an entry. Identity mismatches and repeat deletions
    /// are no-ops.
    pub fn delete(&self, entry: &Entry<T>) -> Chron<T> {
        let current = match self.log.get(entry.index as usize) {
            Some(current) if current.same(entry) => Rc::clone(current),
            _ => return self.clone(),
        };
        if current.is_deleted() {
            return self.clone();
        }
        let tombstone = Rc::new(Entry {
            index: current.index,
            key: current.key,
            atom: Atom::Deleted,
            former: current.former,
            latter: current.latter,
        });
        let log = self.log.set(current.index as usize, tombstone);
        return Chron { log, last: self.last };
    }

    /// Walk every entry inside the range, tombstones included. The
    /// walk starts at the entry after `range.head` and stops before
    /// the entry after `range.tail`.
    pub fn entries<'a>(&'a self, range: &Range<T>) -> Entries<'a, T> {
        let start = match self.next_to(&range.head) {
            Some(entry) => entry.index,
            None => NO_INDEX,
        };
        let stop = match self.next_to(&range.tail) {
            Some(entry) => entry.index,
            None => NO_INDEX,
        };
        return Entries {
            chron: self,
            next: start,
            stop,
        };
    }

    /// Walk the live atoms inside the range.
    pub fn data<'a>(&'a self, range: &Range<T>) -> impl Iterator<Item = T> + 'a {
        return self
            .entries(range)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.data().clone());
    }

    /// Walk every live atom in the document.
    pub fn all_data(&self) -> impl Iterator<Item = T> + '_ {
        let range = self.full_range();
        return self.data(&range);
    }

    /// Count of live atoms.
    pub fn live_len(&self) -> usize {
        return self.all_data().count();
    }

    /// True when the document holds no live atoms.
    pub fn is_empty(&self) -> bool {
        return self.all_data().next().is_none();
    }

    /// Bundle this chronology with a range.
    pub fn slice(&self, range: Range<T>) -> Slice<T> {
        return Slice {
            chron: self.clone(),
            range,
        };
    }

    /// Walk the log in physical order, root and tombstones included.
    pub fn log_entries(&self) -> impl Iterator<Item = &Rc<Entry<T>>> {
        return self.log.iter();
    }

    /// Snapshot identity. Clones share it; edits produce a new one.
    pub(crate) fn identity_addr(&self) -> usize {
        return self.log.root_addr();
    }

    /// Rebuild a chronology from decoded parts. Decoding only.
    pub(crate) fn from_parts(log: PVec<Rc<Entry<T>>>, last: u32) -> Chron<T> {
        return Chron { log, last };
    }

    /// Physical index of the logical end of the document.
    pub(crate) fn last_index(&self) -> u32 {
        return self.last;
    }
}

impl<T: Clone + 'static> Default for Chron<T> {
    fn default() -> Self {
        return Self::new();
    }
}

impl Chron<char> {
    /// Collect the live codepoints into a string.
    pub fn to_string(&self) -> String {
        return self.all_data().collect();
    }
}

/// A uniform random entry key in `[1, 2^KEY_BITS)`.
pub fn random_key() -> u32 {
    return rand::thread_rng().gen_range(1..(1u32 << KEY_BITS));
}

// =============================================================================
// Iteration
// =============================================================================

/// Restartable walk over the logical order between two cursors.
pub struct Entries<'a, T> {
    chron: &'a Chron<T>,
    next: u32,
    stop: u32,
}

impl<'a, T: Clone> Iterator for Entries<'a, T> {
    type Item = Rc<Entry<T>>;

    fn next(&mut self) -> Option<Rc<Entry<T>>> {
        if self.next == NO_INDEX || self.next == self.stop {
            return None;
        }
        let entry = Rc::clone(self.chron.entry_at(self.next)?);
        self.next = entry.latter;
        return Some(entry);
    }
}

/// A chronology bundled with a range, for convenient iteration.
#[derive(Clone, Debug)]
pub struct Slice<T> {
    chron: Chron<T>,
    range: Range<T>,
}

impl<T: Clone> Slice<T> {
    pub fn chron(&self) -> &Chron<T> {
        return &self.chron;
    }

    pub fn range(&self) -> &Range<T> {
        return &self.range;
    }

    pub fn entries(&self) -> Entries<'_, T> {
        return self.chron.entries(&self.range);
    }

    pub fn data(&self) -> impl Iterator<Item = T> + '_ {
        return self.chron.data(&self.range);
    }
}

impl std::fmt::Display for Slice<char> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for ch in self.data() {
            write!(f, "{}", ch)?;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_str(text: &str) -> Chron<char> {
        let mut chron = Chron::new();
        for ch in text.chars() {
            chron = chron.insert(&chron.tail(), ch);
        }
        return chron;
    }

    #[test]
    fn empty_chron() {
        let chron: Chron<char> = Chron::new();
        assert!(chron.is_empty());
        assert_eq!(chron.to_string(), "");
        assert_eq!(chron.live_len(), 0);
        assert_eq!(chron.log_len(), 1);
    }

    #[test]
    fn insert_at_tail_builds_in_order() {
        let chron = from_str("hello");
        assert_eq!(chron.to_string(), "hello");
        assert_eq!(chron.live_len(), 5);
    }

    #[test]
    fn insert_in_middle() {
        let chron = from_str("helo");
        // Find the entry holding the first 'l' and insert after it.
        let l = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'l')
            .unwrap();
        let chron = chron.insert(&Cursor::after(&l), 'l');
        assert_eq!(chron.to_string(), "hello");
    }

    #[test]
    fn repeated_inserts_at_one_cursor_come_out_newest_first() {
        let chron = from_str("ad");
        let a = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'a')
            .unwrap();
        let at = Cursor::after(&a);
        let chron = chron.insert(&at, 'b');
        let chron = chron.insert(&at, 'c');
        // 'c' was inserted later, so it sorts closer to the anchor.
        assert_eq!(chron.to_string(), "acbd");
    }

    #[test]
    fn insert_with_unresolvable_cursor_is_a_no_op() {
        let chron = from_str("hi");
        let bogus: Cursor<char> = Cursor::after_key(0x0ffffff);
        let same = chron.insert(&bogus, 'x');
        assert_eq!(same, chron);
    }

    #[test]
    fn delete_removes_from_data() {
        let chron = from_str("hello");
        let e = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'e')
            .unwrap();
        let chron = chron.delete(&e);
        assert_eq!(chron.to_string(), "hllo");
        // The tombstone is still walked by entries().
        assert_eq!(chron.entries(&chron.full_range()).count(), 5);
    }

    #[test]
    fn delete_is_idempotent() {
        let chron = from_str("abc");
        let b = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'b')
            .unwrap();
        let once = chron.delete(&b);
        let twice = once.delete(&b);
        assert_eq!(once, twice);
    }

    #[test]
    fn cursors_survive_deletion() {
        let chron = from_str("abc");
        let b = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'b')
            .unwrap();
        let at = Cursor::after(&b);
        let chron = chron.delete(&b);
        // The anchor still resolves to the tombstone.
        let resolved = chron.anchor_of(&at).unwrap();
        assert!(resolved.is_deleted());
        assert_eq!(resolved.key(), b.key());
        // Inserting at the stale cursor still works.
        let chron = chron.insert(&at, 'x');
        assert_eq!(chron.to_string(), "axc");
    }

    #[test]
    fn bare_key_cursor_resolves_by_search() {
        let chron = from_str("abc");
        let b = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'b')
            .unwrap();
        let by_key: Cursor<char> = Cursor::after_key(b.key());
        let chron = chron.insert(&by_key, 'x');
        assert_eq!(chron.to_string(), "abxc");
    }

    #[test]
    fn insert_at_tail_moves_last() {
        let chron = from_str("ab");
        let tail_before = chron.tail();
        let chron = chron.insert(&tail_before, 'c');
        // A fresh tail cursor now anchors the new entry.
        let anchored = chron.anchor_of(&chron.tail()).unwrap();
        assert_eq!(*anchored.data(), 'c');
    }

    #[test]
    fn insert_in_middle_leaves_last_alone() {
        let chron = from_str("ab");
        let a = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'a')
            .unwrap();
        let chron = chron.insert(&Cursor::after(&a), 'x');
        let anchored = chron.anchor_of(&chron.tail()).unwrap();
        assert_eq!(*anchored.data(), 'b');
    }

    #[test]
    fn range_walk_is_inclusive_start_exclusive_stop() {
        let chron = from_str("abcde");
        let entries: Vec<_> = chron.entries(&chron.full_range()).collect();
        let range = Range::new(Cursor::before(&entries[1]), Cursor::after(&entries[3]));
        let walked: String = chron.data(&range).collect();
        assert_eq!(walked, "bcd");
    }

    #[test]
    fn collapsed_range_walks_nothing() {
        let chron = from_str("abc");
        let entries: Vec<_> = chron.entries(&chron.full_range()).collect();
        let at = Cursor::after(&entries[0]);
        let range = Range::new(at.clone(), at);
        assert!(range.is_collapsed());
        assert_eq!(chron.entries(&range).count(), 0);
    }

    #[test]
    fn snapshots_are_independent() {
        let before = from_str("abc");
        let b = before
            .entries(&before.full_range())
            .find(|entry| *entry.data() == 'b')
            .unwrap();
        let after = before.delete(&b);
        assert_eq!(before.to_string(), "abc");
        assert_eq!(after.to_string(), "ac");
    }

    #[test]
    fn snapshots_share_untouched_entries() {
        let before = from_str("abc");
        let b = before
            .entries(&before.full_range())
            .find(|entry| *entry.data() == 'b')
            .unwrap();
        let after = before.delete(&b);
        let root_before = before.root();
        let root_after = after.root();
        assert!(Rc::ptr_eq(&root_before, &root_after));
    }

    #[test]
    fn random_keys_are_in_range() {
        for _ in 0..1000 {
            let key = random_key();
            assert!(key >= 1);
            assert!(key < (1 << KEY_BITS));
        }
    }

    #[test]
    #[should_panic(expected = "deleted entry")]
    fn reading_data_of_tombstone_panics() {
        let chron = from_str("a");
        let a = chron
            .entries(&chron.full_range())
            .next()
            .unwrap();
        let chron = chron.delete(&a);
        let tombstone = chron.anchor_of(&Cursor::after(&a)).unwrap();
        let _ = tombstone.data();
    }

    #[test]
    fn slice_displays_its_data() {
        let chron = from_str("hello world");
        let entries: Vec<_> = chron.entries(&chron.full_range()).collect();
        let range = Range::new(Cursor::before(&entries[6]), Cursor::after(&entries[10]));
        let slice = chron.slice(range);
        assert_eq!(slice.to_string(), "world");
    }
}
