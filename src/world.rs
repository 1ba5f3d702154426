// model = "claude-opus-4-5"
// created = "2026-01-31"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! Worlds: layered mutable-over-immutable model storage.
//!
//! A world chain is a stack of layers. The top layer is the only
//! mutable one; every layer below is locked history. A model lives in
//! the layer that created it, and layers above shadow it with their
//! own read and write slots:
//!
//! - A **write** is a pending change, staged in the layer it was made.
//! - A **read** is a copy of the value observed from an ancestor, taken
//!   the first time a slot is read through. Reads are what commit
//!   validation checks against, which is how stale snapshots are
//!   caught.
//!
//! Long chains get a lookup cache when locked: a flat id-to-slots map
//! merged bottom-up, so a read through two hundred layers costs one
//! hash lookup.

use std::cell::Cell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::ModelId;
use crate::value::Value;

/// Uncached chain depth tolerated before locking builds a cache.
pub const CACHE_DEPTH: usize = 64;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum WorldError {
    /// A ref resolved to no model in any layer.
    UnknownRef(String),
    /// A write hit a locked layer.
    LockedWrite(String),
    /// A slot constraint rejected an assignment.
    TypeMismatch { slot: String, value: String },
    /// A cached read no longer matches the value below.
    CommitConflict { model: String, slot: usize },
    /// A class name resolved to nothing in the registry.
    UnknownClass(String),
    /// A slot name resolved to nothing on the class.
    UnknownSlot(String),
    /// A method name resolved to nothing on the class.
    UnknownMethod(String),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::UnknownRef(id) => {
                return write!(f, "unknown ref: {}", id);
            }
            WorldError::LockedWrite(id) => {
                return write!(f, "write to {} in a locked world", id);
            }
            WorldError::TypeMismatch { slot, value } => {
                return write!(f, "slot {} rejects value {}", slot, value);
            }
            WorldError::CommitConflict { model, slot } => {
                return write!(f, "commit conflict on {} slot {}", model, slot);
            }
            WorldError::UnknownClass(name) => {
                return write!(f, "unknown class: {}", name);
            }
            WorldError::UnknownSlot(name) => {
                return write!(f, "unknown slot: {}", name);
            }
            WorldError::UnknownMethod(name) => {
                return write!(f, "unknown method: {}", name);
            }
        }
    }
}

impl std::error::Error for WorldError {}

// =============================================================================
// Key stream
// =============================================================================

/// Monotonic id source shared down a world chain. Ids render in
/// base 36 so they stay short on the wire.
#[derive(Clone, Debug)]
pub struct KeyStream {
    counter: Rc<Cell<u64>>,
}

impl KeyStream {
    pub fn new() -> KeyStream {
        return KeyStream {
            counter: Rc::new(Cell::new(0)),
        };
    }

    /// The next fresh model id.
    pub fn next_id(&self) -> ModelId {
        let n = self.counter.get();
        self.counter.set(n + 1);
        return Rc::from(format!("m{}", base36(n)));
    }

    pub(crate) fn current(&self) -> u64 {
        return self.counter.get();
    }

    pub(crate) fn with_value(n: u64) -> KeyStream {
        return KeyStream {
            counter: Rc::new(Cell::new(n)),
        };
    }
}

impl Default for KeyStream {
    fn default() -> Self {
        return Self::new();
    }
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    return String::from_utf8(out).expect("base36 digits are ascii");
}

// =============================================================================
// Models
// =============================================================================

/// A typed record bound to one world layer. Slots are numbered; the
/// class definition gives them names and constraints.
#[derive(Clone, Debug)]
pub struct Model {
    id: ModelId,
    class: Rc<str>,
    reads: Vec<Value>,
    writes: Vec<Value>,
}

impl Model {
    pub fn new(id: ModelId, class: Rc<str>, slot_count: usize) -> Model {
        return Model {
            id,
            class,
            reads: vec![Value::None; slot_count],
            writes: vec![Value::None; slot_count],
        };
    }

    #[inline]
    pub fn id(&self) -> &ModelId {
        return &self.id;
    }

    #[inline]
    pub fn class(&self) -> &Rc<str> {
        return &self.class;
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        return self.writes.len();
    }

    /// True iff any slot holds a pending write.
    pub fn has_writes(&self) -> bool {
        return self.writes.iter().any(|value| !value.is_none());
    }

    /// The locally visible value of a slot: pending write first, then
    /// cached read.
    pub fn local(&self, slot: usize) -> &Value {
        if !self.writes[slot].is_none() {
            return &self.writes[slot];
        }
        return &self.reads[slot];
    }

    pub(crate) fn write(&mut self, slot: usize, value: Value) {
        self.writes[slot] = value;
    }

    pub(crate) fn note_read(&mut self, slot: usize, value: Value) {
        self.reads[slot] = value;
    }

    pub(crate) fn reads(&self) -> &[Value] {
        return &self.reads;
    }

    pub(crate) fn writes(&self) -> &[Value] {
        return &self.writes;
    }

    pub(crate) fn from_parts(id: ModelId, class: Rc<str>, reads: Vec<Value>, writes: Vec<Value>) -> Model {
        return Model {
            id,
            class,
            reads,
            writes,
        };
    }
}

// =============================================================================
// Worlds
// =============================================================================

/// Flat chain summary built when a long chain locks. Maps a model id
/// to its effective slot values, merged bottom-up.
#[derive(Clone, Debug)]
pub struct LookupCache {
    lines: FxHashMap<ModelId, CacheLine>,
}

#[derive(Clone, Debug)]
struct CacheLine {
    class: Rc<str>,
    slots: Vec<Value>,
}

impl LookupCache {
    fn get(&self, id: &str) -> Option<(&Rc<str>, &[Value])> {
        let line = self.lines.get(id)?;
        return Some((&line.class, &line.slots));
    }
}

/// One layer of the chain.
#[derive(Clone, Debug)]
pub struct World {
    models: FxHashMap<ModelId, Model>,
    key_stream: KeyStream,
    locked: bool,
    cache: Option<LookupCache>,
}

impl World {
    /// A fresh root layer with its own key stream.
    pub fn new() -> World {
        return World {
            models: FxHashMap::default(),
            key_stream: KeyStream::new(),
            locked: false,
            cache: None,
        };
    }

    /// A fresh child layer sharing the parent's key stream.
    pub fn child_of(parent: &World) -> World {
        return World {
            models: FxHashMap::default(),
            key_stream: parent.key_stream.clone(),
            locked: false,
            cache: None,
        };
    }

    #[inline]
    pub fn locked(&self) -> bool {
        return self.locked;
    }

    /// True when this layer carries a chain summary cache.
    pub fn cached(&self) -> bool {
        return self.cache.is_some();
    }

    #[inline]
    pub fn key_stream(&self) -> &KeyStream {
        return &self.key_stream;
    }

    pub fn model(&self, id: &str) -> Option<&Model> {
        return self.models.get(id);
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        return self.models.values();
    }

    /// True iff this layer holds a model for `id` with pending writes.
    pub fn has_writes(&self, id: &str) -> bool {
        match self.models.get(id) {
            Some(model) => return model.has_writes(),
            None => return false,
        }
    }

    /// Create a brand new model in this layer.
    pub fn create_model(&mut self, class: Rc<str>, slot_count: usize) -> ModelId {
        let id = self.key_stream.next_id();
        let model = Model::new(Rc::clone(&id), class, slot_count);
        self.models.insert(Rc::clone(&id), model);
        return id;
    }

    pub(crate) fn insert_model(&mut self, model: Model) {
        self.models.insert(Rc::clone(model.id()), model);
    }

    pub(crate) fn model_mut(&mut self, id: &str) -> Option<&mut Model> {
        return self.models.get_mut(id);
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub(crate) fn cache(&self) -> Option<&LookupCache> {
        return self.cache.as_ref();
    }

    pub(crate) fn clear_cache(&mut self) {
        self.cache = None;
    }

    pub(crate) fn from_parts(models: FxHashMap<ModelId, Model>, key_stream: KeyStream, locked: bool) -> World {
        return World {
            models,
            key_stream,
            locked,
            cache: None,
        };
    }

    pub(crate) fn set_key_stream(&mut self, stream: KeyStream) {
        self.key_stream = stream;
    }
}

impl Default for World {
    fn default() -> Self {
        return Self::new();
    }
}

// =============================================================================
// Chain operations
// =============================================================================

/// The model nearest the top of the chain for `id`.
pub fn nearest_model<'a>(worlds: &'a [World], id: &str) -> Option<&'a Model> {
    for world in worlds.iter().rev() {
        if let Some(model) = world.models.get(id) {
            return Some(model);
        }
    }
    return None;
}

/// Read a slot through the chain without side effects: pending write
/// first, then cached read, layer by layer from the top.
pub fn chain_value(worlds: &[World], id: &str, slot: usize) -> Value {
    for world in worlds.iter().rev() {
        if let Some(model) = world.models.get(id) {
            let local = model.local(slot);
            if !local.is_none() {
                return local.clone();
            }
        }
        if let Some(cache) = &world.cache {
            if let Some((_, slots)) = cache.get(id) {
                if let Some(value) = slots.get(slot) {
                    return value.clone();
                }
            }
            // The cache is a full summary of this layer and below.
            return Value::None;
        }
    }
    return Value::None;
}

/// Read a slot through the chain, copying the observed value into the
/// top layer's read set so commit can validate it later.
pub fn read_slot(worlds: &mut [World], id: &str, slot: usize) -> Value {
    let top = worlds.len() - 1;
    if let Some(model) = worlds[top].models.get(id) {
        let local = model.local(slot);
        if !local.is_none() {
            return local.clone();
        }
    }

    let below = &worlds[..top];
    let value = chain_value(below, id, slot);
    if value.is_none() {
        return value;
    }

    // Write-through: remember what we observed. Refs are already bare
    // in value form, so the downcast is a plain copy.
    if ensure_shadow(worlds, id).is_ok() {
        let top = worlds.len() - 1;
        if let Some(model) = worlds[top].models.get_mut(id) {
            model.note_read(slot, value.clone());
        }
    }
    return value;
}

/// Make sure the top layer holds a (possibly empty) shadow model for
/// `id`, so reads and writes have somewhere to land.
pub fn ensure_shadow(worlds: &mut [World], id: &str) -> Result<(), WorldError> {
    let top = worlds.len() - 1;
    if worlds[top].models.contains_key(id) {
        return Ok(());
    }
    let (class, slot_count) = match find_shape(&worlds[..top], id) {
        Some(shape) => shape,
        None => return Err(WorldError::UnknownRef(id.to_string())),
    };
    let model = Model::new(Rc::from(id), class, slot_count);
    worlds[top].models.insert(Rc::from(id), model);
    return Ok(());
}

/// The class and slot count of a model, found anywhere below.
fn find_shape(worlds: &[World], id: &str) -> Option<(Rc<str>, usize)> {
    for world in worlds.iter().rev() {
        if let Some(model) = world.models.get(id) {
            return Some((Rc::clone(model.class()), model.slot_count()));
        }
        if let Some(cache) = &world.cache {
            if let Some((class, slots)) = cache.get(id) {
                return Some((Rc::clone(class), slots.len()));
            }
            return None;
        }
    }
    return None;
}

/// Stage a write in the top layer.
pub fn write_slot(worlds: &mut [World], id: &str, slot: usize, value: Value) -> Result<(), WorldError> {
    let top = worlds.len() - 1;
    if worlds[top].locked {
        return Err(WorldError::LockedWrite(id.to_string()));
    }
    ensure_shadow(worlds, id)?;
    let top = worlds.len() - 1;
    let model = worlds[top].models.get_mut(id).expect("shadow exists");
    model.write(slot, value);
    return Ok(());
}

/// Lock every layer. Long uncached chains get a lookup cache on the
/// top layer so later reads stay O(1).
pub fn lock_chain(worlds: &mut [World]) {
    let uncached = worlds.iter().filter(|world| world.cache.is_none()).count();
    if uncached > CACHE_DEPTH {
        let cache = build_cache(worlds);
        let top = worlds.len() - 1;
        worlds[top].cache = Some(cache);
    }
    for world in worlds.iter_mut() {
        world.locked = true;
    }
}

/// Unlock every layer and drop the caches.
pub fn unlock_chain(worlds: &mut [World]) {
    for world in worlds.iter_mut() {
        world.locked = false;
        world.cache = None;
    }
}

/// Merge the whole chain into one flat summary, bottom-up.
fn build_cache(worlds: &[World]) -> LookupCache {
    let mut lines: FxHashMap<ModelId, CacheLine> = FxHashMap::default();
    for world in worlds.iter() {
        for (id, model) in &world.models {
            let line = lines.entry(Rc::clone(id)).or_insert_with(|| CacheLine {
                class: Rc::clone(model.class()),
                slots: vec![Value::None; model.slot_count()],
            });
            if line.slots.len() < model.slot_count() {
                line.slots.resize(model.slot_count(), Value::None);
            }
            for slot in 0..model.slot_count() {
                let write = &model.writes()[slot];
                if !write.is_none() {
                    line.slots[slot] = write.clone();
                    continue;
                }
                let read = &model.reads()[slot];
                if line.slots[slot].is_none() && !read.is_none() {
                    line.slots[slot] = read.clone();
                }
            }
        }
    }
    return LookupCache { lines };
}

/// Commit the top layer into its parent and drop it. Validation
/// first: every cached read must still match what the chain below
/// says, otherwise the snapshot the writes were based on is stale.
pub fn commit_top(worlds: &mut Vec<World>) -> Result<(), WorldError> {
    let top = worlds.len() - 1;
    assert!(top >= 1, "commit needs a parent layer");

    // Validate against the chain strictly below the top.
    {
        let below = &worlds[..top];
        let child = &worlds[top];
        for (id, model) in &child.models {
            for slot in 0..model.slot_count() {
                let read = &model.reads()[slot];
                if read.is_none() {
                    continue;
                }
                let current = chain_value(below, id, slot);
                if !read.same(&current) {
                    return Err(WorldError::CommitConflict {
                        model: id.to_string(),
                        slot,
                    });
                }
            }
        }
    }

    let child = worlds.pop().expect("top exists");
    let parent = worlds.last_mut().expect("parent exists");
    for (id, model) in child.models {
        let target = parent
            .models
            .entry(Rc::clone(&id))
            .or_insert_with(|| Model::new(id, Rc::clone(model.class()), model.slot_count()));
        for slot in 0..model.slot_count() {
            let write = &model.writes()[slot];
            if !write.is_none() {
                target.write(slot, write.clone());
            }
            let read = &model.reads()[slot];
            if !read.is_none() && target.reads()[slot].is_none() {
                target.note_read(slot, read.clone());
            }
        }
    }
    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with_model() -> (Vec<World>, ModelId) {
        let mut root = World::new();
        let id = root.create_model(Rc::from("note"), 2);
        let worlds = vec![root];
        return (worlds, id);
    }

    #[test]
    fn key_stream_ids_are_monotonic_base36() {
        let stream = KeyStream::new();
        assert_eq!(&*stream.next_id(), "m0");
        assert_eq!(&*stream.next_id(), "m1");
        for _ in 2..36 {
            stream.next_id();
        }
        assert_eq!(&*stream.next_id(), "m10");
    }

    #[test]
    fn child_shares_the_key_stream() {
        let root = World::new();
        let child = World::child_of(&root);
        root.key_stream().next_id();
        assert_eq!(&*child.key_stream().next_id(), "m1");
    }

    #[test]
    fn write_then_read_in_one_layer() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(7)).unwrap();
        assert_eq!(read_slot(&mut worlds, &id, 0), Value::Int(7));
    }

    #[test]
    fn reads_walk_down_the_chain() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(7)).unwrap();
        let child = World::child_of(&worlds[0]);
        worlds.push(child);
        assert_eq!(read_slot(&mut worlds, &id, 0), Value::Int(7));
        // The observed value got copied into the top layer's reads.
        let top = worlds.last().unwrap();
        assert_eq!(top.model(&id).unwrap().reads()[0], Value::Int(7));
    }

    #[test]
    fn writes_shadow_the_parent() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(7)).unwrap();
        worlds.push(World::child_of(&worlds[0]));
        write_slot(&mut worlds, &id, 0, Value::Int(8)).unwrap();
        assert_eq!(read_slot(&mut worlds, &id, 0), Value::Int(8));
        // The parent still sees its own value.
        assert_eq!(chain_value(&worlds[..1], &id, 0), Value::Int(7));
    }

    #[test]
    fn locked_writes_fail() {
        let (mut worlds, id) = chain_with_model();
        lock_chain(&mut worlds);
        let err = write_slot(&mut worlds, &id, 0, Value::Int(1)).unwrap_err();
        assert!(matches!(err, WorldError::LockedWrite(_)));
    }

    #[test]
    fn unlock_restores_writes() {
        let (mut worlds, id) = chain_with_model();
        lock_chain(&mut worlds);
        unlock_chain(&mut worlds);
        assert!(write_slot(&mut worlds, &id, 0, Value::Int(1)).is_ok());
    }

    #[test]
    fn unknown_ref_is_an_error() {
        let (mut worlds, _) = chain_with_model();
        let err = write_slot(&mut worlds, "nope", 0, Value::Int(1)).unwrap_err();
        assert!(matches!(err, WorldError::UnknownRef(_)));
    }

    #[test]
    fn has_writes_is_false_without_model_or_writes() {
        let (mut worlds, id) = chain_with_model();
        worlds.push(World::child_of(&worlds[0]));
        // No model in the top layer at all.
        assert!(!worlds.last().unwrap().has_writes(&id));
        // A read-only shadow still has no writes.
        read_slot(&mut worlds, &id, 0);
        assert!(!worlds.last().unwrap().has_writes(&id));
        write_slot(&mut worlds, &id, 0, Value::Int(3)).unwrap();
        assert!(worlds.last().unwrap().has_writes(&id));
    }

    #[test]
    fn commit_merges_writes_into_parent() {
        let (mut worlds, id) = chain_with_model();
        worlds.push(World::child_of(&worlds[0]));
        write_slot(&mut worlds, &id, 0, Value::Int(9)).unwrap();
        commit_top(&mut worlds).unwrap();
        assert_eq!(worlds.len(), 1);
        assert_eq!(chain_value(&worlds, &id, 0), Value::Int(9));
    }

    #[test]
    fn commit_detects_stale_reads() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(1)).unwrap();
        worlds.push(World::child_of(&worlds[0]));
        // Observe slot 0, then have the parent move underneath us.
        read_slot(&mut worlds, &id, 0);
        worlds[0]
            .models
            .get_mut(&*id)
            .unwrap()
            .write(0, Value::Int(2));
        let err = commit_top(&mut worlds).unwrap_err();
        assert!(matches!(err, WorldError::CommitConflict { .. }));
    }

    #[test]
    fn deep_chain_reads_resolve_through_the_cache() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(0)).unwrap();
        for layer in 1..200u32 {
            let child = World::child_of(worlds.last().unwrap());
            worlds.push(child);
            write_slot(&mut worlds, &id, 0, Value::Int(layer as i64)).unwrap();
        }
        lock_chain(&mut worlds);
        assert!(worlds.last().unwrap().cache().is_some());
        worlds.push(World::child_of(worlds.last().unwrap()));
        assert_eq!(read_slot(&mut worlds, &id, 0), Value::Int(199));
    }

    #[test]
    fn cache_merges_distinct_slots() {
        let (mut worlds, id) = chain_with_model();
        write_slot(&mut worlds, &id, 0, Value::Int(10)).unwrap();
        for _ in 0..100 {
            worlds.push(World::child_of(worlds.last().unwrap()));
        }
        write_slot(&mut worlds, &id, 1, Value::Int(20)).unwrap();
        lock_chain(&mut worlds);
        worlds.push(World::child_of(worlds.last().unwrap()));
        // Both slots resolve even though they were written 100 layers
        // apart.
        assert_eq!(read_slot(&mut worlds, &id, 0), Value::Int(10));
        assert_eq!(read_slot(&mut worlds, &id, 1), Value::Int(20));
    }
}
