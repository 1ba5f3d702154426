// model = "claude-opus-4-5"
// created = "2026-01-31"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! Marker ranges over a chronology, with boundary enumeration.
//!
//! A markup is a set of `(marker, range)` pairs where the range is a
//! pair of chronology cursors. Because cursors stay valid across
//! edits, so do markers: deleting every codepoint under a marker
//! leaves the marker resolvable, it just covers nothing live.
//!
//! Enumeration is a sweep over the logical entry order. Marker
//! boundaries are bucketed by the physical index of the entry they
//! anchor to, which never changes, so the event order is stable no
//! matter how many deletions happened since the marker was placed.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::chron::Chron;
use crate::chron::Cursor;
use crate::chron::Entry;
use crate::chron::Range;
use crate::value::Value;
use crate::vector::PVec;

/// Removed entries tolerated before `mark` rebuilds the vector.
pub const COMPACTION_SLACK: usize = 16;

/// A typed attribute attachable to a range. Identity follows the
/// identity of the data value.
#[derive(Clone, Debug)]
pub struct Marker {
    data: Value,
}

impl Marker {
    pub fn new(data: Value) -> Marker {
        return Marker { data };
    }

    #[inline]
    pub fn data(&self) -> &Value {
        return &self.data;
    }

    /// Two markers are the same marker iff their data is identical.
    #[inline]
    pub fn same(&self, other: &Marker) -> bool {
        return self.data.same(&other.data);
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        return self.data == other.data;
    }
}

/// One row of the markup: a marker and where it applies. A `None`
/// range means the marker was removed and the row awaits compaction.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkEntry<T> {
    marker: Marker,
    range: Option<Range<T>>,
}

impl<T> MarkEntry<T> {
    #[inline]
    pub fn marker(&self) -> &Marker {
        return &self.marker;
    }

    #[inline]
    pub fn range(&self) -> Option<&Range<T>> {
        return self.range.as_ref();
    }
}

/// Callbacks driven by `Markup::entries`.
pub trait MarkerSet<T: Clone> {
    /// A marker opened at `cursor`.
    fn add(&mut self, marker: &Marker, cursor: &Cursor<T>);

    /// A marker closed at `cursor`.
    fn delete(&mut self, marker: &Marker, cursor: &Cursor<T>);

    /// A marker spans the whole queried range without opening or
    /// closing inside it.
    fn covered(&mut self, marker: &Marker, range: &Range<T>);

    /// Exclude markers before the sweep. Accepts everything by default.
    fn filter(&mut self, _marker: &Marker, _range: &Range<T>) -> bool {
        return true;
    }

    /// A live entry inside the queried range.
    fn entry(&mut self, _entry: &Rc<Entry<T>>) {}
}

/// The marker set over one chronology. Persistent, like everything
/// else in the document: operations return a new markup.
#[derive(Clone, Debug, PartialEq)]
pub struct Markup<T> {
    markers: PVec<Rc<MarkEntry<T>>>,
}

impl<T: Clone> Markup<T> {
    pub fn new() -> Markup<T>
    where
        T: 'static,
    {
        return Markup {
            markers: PVec::new(),
        };
    }

    /// Number of rows, removed ones included.
    pub fn len(&self) -> usize {
        return self.markers.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.markers.is_empty();
    }

    /// Attach `marker` to `range`, replacing any existing row with
    /// the same marker identity.
    pub fn mark(&self, marker: Marker, range: Range<T>) -> Markup<T>
    where
        T: 'static,
    {
        return self.mark_row(marker, Some(range));
    }

    /// Remove `marker`. The row is kept as a removal placeholder
    /// until compaction.
    pub fn unmark(&self, marker: &Marker) -> Markup<T>
    where
        T: 'static,
    {
        return self.mark_row(marker.clone(), None);
    }

    fn mark_row(&self, marker: Marker, range: Option<Range<T>>) -> Markup<T>
    where
        T: 'static,
    {
        let position = self
            .markers
            .iter()
            .position(|row| row.marker.same(&marker));
        let row = Rc::new(MarkEntry { marker, range });
        let markers = match position {
            Some(index) => self.markers.set(index, row),
            None => self.markers.push(row),
        };

        let removed = markers.iter().filter(|row| row.range.is_none()).count();
        if removed > COMPACTION_SLACK {
            let markers = markers.filter(|row| row.range.is_some());
            return Markup { markers };
        }
        return Markup { markers };
    }

    /// The range a marker currently covers, if it is placed at all.
    pub fn range_of(&self, marker: &Marker) -> Option<Range<T>> {
        let row = self.markers.find(|row| row.marker.same(marker))?;
        return row.range.clone();
    }

    /// Walk the rows in insertion order, removed ones included.
    pub fn rows(&self) -> impl Iterator<Item = &Rc<MarkEntry<T>>> {
        return self.markers.iter();
    }

    /// Sweep the chronology, firing marker boundary events on `set`
    /// and visiting the live entries inside `range` (or the whole
    /// document when no range is given).
    ///
    /// Events anchored on tombstones maintain the open-marker state
    /// silently, so deleting a marked run produces no add/delete
    /// chatter. Markers open before the queried range that stay open
    /// past its end are reported once through `covered`.
    pub fn entries<S: MarkerSet<T>>(&self, chron: &Chron<T>, set: &mut S, range: Option<&Range<T>>) {
        let rows: Vec<Rc<MarkEntry<T>>> = self.markers.iter().cloned().collect();

        // Bucket every surviving boundary by the physical index of
        // its anchor entry. The root's bucket is the document
        // boundary, handled before the walk.
        let mut heads: FxHashMap<u32, Vec<usize>> = FxHashMap::default();
        let mut tails: FxHashMap<u32, Vec<usize>> = FxHashMap::default();
        let mut boundary_heads: Vec<usize> = Vec::new();
        let mut boundary_tails: Vec<usize> = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            let row_range = match &row.range {
                Some(row_range) => row_range,
                None => continue,
            };
            if !set.filter(&row.marker, row_range) {
                continue;
            }
            let head_anchor = match chron.anchor_of(&row_range.head) {
                Some(entry) => entry.index(),
                None => continue,
            };
            let tail_anchor = match chron.anchor_of(&row_range.tail) {
                Some(entry) => entry.index(),
                None => continue,
            };
            if head_anchor == 0 {
                boundary_heads.push(index);
            } else {
                heads.entry(head_anchor).or_default().push(index);
            }
            if tail_anchor == 0 {
                boundary_tails.push(index);
            } else {
                tails.entry(tail_anchor).or_default().push(index);
            }
        }

        // Open markers, in opening order, with a flag recording
        // whether the opening was silent.
        let mut active: Vec<(usize, bool)> = Vec::new();

        let silent_boundary = match range {
            Some(query) => query.head != chron.head(),
            None => false,
        };
        open_all(set, &mut active, &rows, &boundary_heads, silent_boundary);
        close_all(set, &mut active, &rows, &boundary_tails, silent_boundary);

        // Walk silently from the document head up to the query head
        // so the active set is correct when the visible walk starts.
        if let Some(query) = range {
            let lead = Range::new(chron.head(), query.head.clone());
            for entry in chron.entries(&lead) {
                if let Some(bucket) = heads.get(&entry.index()) {
                    open_all(set, &mut active, &rows, bucket, true);
                }
                if let Some(bucket) = tails.get(&entry.index()) {
                    close_all(set, &mut active, &rows, bucket, true);
                }
            }
        }

        // Everything open before the visible walk began is a
        // coverage candidate.
        let at_start: Vec<usize> = active
            .iter()
            .filter(|(_, silent)| *silent)
            .map(|(index, _)| *index)
            .collect();

        let full;
        let walk = match range {
            Some(query) => query,
            None => {
                full = chron.full_range();
                &full
            }
        };
        for entry in chron.entries(walk) {
            let silent = entry.is_deleted();
            if let Some(bucket) = heads.get(&entry.index()) {
                open_all(set, &mut active, &rows, bucket, silent);
            }
            if entry.is_live() {
                set.entry(&entry);
            }
            if let Some(bucket) = tails.get(&entry.index()) {
                close_all(set, &mut active, &rows, bucket, silent);
            }
        }

        for index in at_start {
            let still_open = active.iter().any(|(open, _)| *open == index);
            if still_open {
                let row = &rows[index];
                if let Some(row_range) = &row.range {
                    set.covered(&row.marker, row_range);
                }
            }
        }
    }

    pub(crate) fn identity_addr(&self) -> usize {
        return self.markers.root_addr();
    }

    pub(crate) fn from_parts(markers: PVec<Rc<MarkEntry<T>>>) -> Markup<T> {
        return Markup { markers };
    }

    pub(crate) fn make_row(marker: Marker, range: Option<Range<T>>) -> MarkEntry<T> {
        return MarkEntry { marker, range };
    }
}

impl<T: Clone + 'static> Default for Markup<T> {
    fn default() -> Self {
        return Self::new();
    }
}

/// Fire a bucket of openings in insertion order.
fn open_all<T: Clone, S: MarkerSet<T>>(
    set: &mut S,
    active: &mut Vec<(usize, bool)>,
    rows: &[Rc<MarkEntry<T>>],
    bucket: &[usize],
    silent: bool,
) {
    for index in bucket {
        let row = &rows[*index];
        let row_range = row.range.as_ref().expect("bucketed rows have ranges");
        active.push((*index, silent));
        if !silent {
            set.add(&row.marker, &row_range.head);
        }
    }
}

/// Fire a bucket of closings in reverse insertion order, preserving
/// proper nesting.
fn close_all<T: Clone, S: MarkerSet<T>>(
    set: &mut S,
    active: &mut Vec<(usize, bool)>,
    rows: &[Rc<MarkEntry<T>>],
    bucket: &[usize],
    silent: bool,
) {
    for index in bucket.iter().rev() {
        let row = &rows[*index];
        let row_range = row.range.as_ref().expect("bucketed rows have ranges");
        active.retain(|(open, _)| open != index);
        if !silent {
            set.delete(&row.marker, &row_range.tail);
        }
    }
}
