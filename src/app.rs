// model = "claude-opus-4-5"
// created = "2026-02-01"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! The app: a world stack with undo, redo, and wave merging.
//!
//! Every mutating call either **advances** (locks the current top
//! world and pushes a fresh child, starting a new undo frame) or
//! **coalesces** into the live top world. Coalescing is what makes a
//! run of keystrokes one undo step instead of forty: a call merges
//! into the running wave when its tag matches the wave's tag and its
//! rate clears the wave's floor. Anything else, an undo included,
//! breaks the wave.
//!
//! Watchers subscribe to a synchronous mutation stream. Every
//! mutating call pushes the resulting top world; undo and redo
//! re-emit the restored world under the synthetic tag `undo` so
//! watchers re-render.

use std::rc::Rc;

use crate::class;
use crate::class::ClassDef;
use crate::class::MethodCx;
use crate::class::MethodKind;
use crate::class::Registry;
use crate::value::ModelId;
use crate::value::Value;
use crate::world;
use crate::world::World;
use crate::world::WorldError;

// =============================================================================
// Streams
// =============================================================================

/// Handle for undoing a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription(u64);

/// A synchronous push stream. Delivery happens in subscription order,
/// on the caller's stack.
pub struct Stream<T> {
    subscribers: Vec<(u64, Box<dyn FnMut(&T)>)>,
    next: u64,
}

impl<T> Stream<T> {
    pub fn new() -> Stream<T> {
        return Stream {
            subscribers: Vec::new(),
            next: 0,
        };
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&T) + 'static) -> Subscription {
        let id = self.next;
        self.next += 1;
        self.subscribers.push((id, Box::new(callback)));
        return Subscription(id);
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.retain(|(id, _)| *id != subscription.0);
    }

    pub fn push(&mut self, item: &T) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(item);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        return self.subscribers.len();
    }
}

impl<T> Default for Stream<T> {
    fn default() -> Self {
        return Self::new();
    }
}

/// What the mutation stream carries: the tag of the call and the
/// world it produced.
#[derive(Clone)]
pub struct Mutation {
    pub tag: Rc<str>,
    pub world: World,
}

// =============================================================================
// Wave state
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WaveState {
    last_tag: Vec<String>,
    last_rate: u32,
}

impl WaveState {
    fn new() -> WaveState {
        return WaveState {
            last_tag: Vec::new(),
            last_rate: 1,
        };
    }
}

/// Split a tag template on `:`, substituting `{id}` and `{rate}`.
fn wave_tokens(tag: &str, id: &str, rate: u32) -> Vec<String> {
    return tag
        .split(':')
        .map(|token| match token {
            "{id}" => id.to_string(),
            "{rate}" => rate.to_string(),
            _ => token.to_string(),
        })
        .collect();
}

/// Elementwise tag match, `*` matching anything on either side.
fn tags_match(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    return a
        .iter()
        .zip(b.iter())
        .all(|(x, y)| x == "*" || y == "*" || x == y);
}

// =============================================================================
// App
// =============================================================================

/// A world stack with undo and redo, coalescing rapid same-kind
/// mutations into single undo frames.
pub struct App {
    registry: Registry,
    worlds: Vec<World>,
    redo: Vec<World>,
    mutations: Stream<Mutation>,
    wave: WaveState,
}

impl App {
    pub fn new(registry: Registry) -> App {
        return App {
            registry,
            worlds: vec![World::new()],
            redo: Vec::new(),
            mutations: Stream::new(),
            wave: WaveState::new(),
        };
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        return &self.registry;
    }

    /// The live top world.
    pub fn top(&self) -> &World {
        return self.worlds.last().expect("world stack is never empty");
    }

    /// The whole chain, root first.
    pub fn worlds(&self) -> &[World] {
        return &self.worlds;
    }

    pub fn redo_worlds(&self) -> &[World] {
        return &self.redo;
    }

    /// Undo frames currently on the stack, the root excluded.
    pub fn depth(&self) -> usize {
        return self.worlds.len() - 1;
    }

    // -------------------------------------------------------------------------
    // Mutation entry points
    // -------------------------------------------------------------------------

    /// Materialize a fresh model of `class_name` in a new undo frame.
    pub fn create(&mut self, class_name: &str) -> Result<ModelId, WorldError> {
        let class = self.registry.require(class_name)?;
        self.begin_wave("create", 1, "");
        let id = class::create_model(&mut self.worlds, &class)?;
        self.emit("create");
        return Ok(id);
    }

    /// Read a slot by name through the chain.
    pub fn get(&mut self, ref_id: &str, slot: &str) -> Result<Value, WorldError> {
        let class = self.class_of(ref_id)?;
        let index = self.slot_index(&class, slot)?;
        return Ok(world::read_slot(&mut self.worlds, ref_id, index));
    }

    /// Assign a slot by name. Each assignment is its own undo frame.
    pub fn assign(&mut self, ref_id: &str, slot: &str, value: Value) -> Result<(), WorldError> {
        let class = self.class_of(ref_id)?;
        let index = self.slot_index(&class, slot)?;
        class::check_constraint(&class, index, &value)?;
        self.begin_wave("assign:{id}", 1, ref_id);
        world::write_slot(&mut self.worlds, ref_id, index, value)?;
        let tag = self.wave.last_tag.join(":");
        self.emit(&tag);
        return Ok(());
    }

    /// Invoke a class method. Pure methods run directly; wave methods
    /// go through the merge decision and the mutation stream.
    pub fn call(&mut self, ref_id: &str, method: &str, args: &[Value]) -> Result<Value, WorldError> {
        let class = self.class_of(ref_id)?;
        let def = match class.method(method) {
            Some(def) => def,
            None => return Err(WorldError::UnknownMethod(method.to_string())),
        };
        let kind = def.kind;
        let body = def.body;

        match kind {
            MethodKind::Pure => {
                let mut cx = MethodCx::new(
                    &mut self.worlds,
                    &self.registry,
                    Rc::from(ref_id),
                    Rc::clone(&class),
                );
                return body(&mut cx, args);
            }
            MethodKind::Wave { tag, rate } => {
                self.begin_wave(tag, rate, ref_id);
                let result = {
                    let mut cx = MethodCx::new(
                        &mut self.worlds,
                        &self.registry,
                        Rc::from(ref_id),
                        Rc::clone(&class),
                    );
                    body(&mut cx, args)?
                };
                let tag = self.wave.last_tag.join(":");
                self.emit(&tag);
                return Ok(result);
            }
        }
    }

    /// Subscribe to every mutation.
    pub fn subscribe(&mut self, callback: impl FnMut(&Mutation) + 'static) -> Subscription {
        return self.mutations.subscribe(callback);
    }

    /// Subscribe to mutations that touched `ref_id`.
    pub fn watch(&mut self, ref_id: &str, mut callback: impl FnMut(&Mutation) + 'static) -> Subscription {
        let id = ref_id.to_string();
        return self.mutations.subscribe(move |mutation| {
            if mutation.world.has_writes(&id) {
                callback(mutation);
            }
        });
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.mutations.unsubscribe(subscription);
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Freeze the current top world and push a fresh child. New edits
    /// invalidate whatever redo history was pending.
    pub fn advance(&mut self) {
        world::lock_chain(&mut self.worlds);
        let child = World::child_of(self.top());
        self.worlds.push(child);
        self.redo.clear();
    }

    /// Pop the top frame onto the redo stack. Returns false at the
    /// root.
    pub fn undo(&mut self) -> bool {
        if self.worlds.len() <= 1 {
            return false;
        }
        let frame = self.worlds.pop().expect("checked depth");
        self.redo.push(frame);
        let top = self.worlds.last_mut().expect("root remains");
        top.set_locked(false);
        top.clear_cache();
        self.wave = WaveState {
            last_tag: vec!["undo".to_string()],
            last_rate: 1,
        };
        self.emit("undo");
        return true;
    }

    /// Push the most recently undone frame back. Returns false when
    /// there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let mut frame = match self.redo.pop() {
            Some(frame) => frame,
            None => return false,
        };
        world::lock_chain(&mut self.worlds);
        frame.set_locked(false);
        frame.clear_cache();
        self.worlds.push(frame);
        self.wave = WaveState {
            last_tag: vec!["undo".to_string()],
            last_rate: 1,
        };
        self.emit("undo");
        return true;
    }

    /// Collapse the whole history into the root, dropping redo. The
    /// running wave ends here: collapsed history cannot coalesce.
    pub fn flatten(&mut self) -> Result<(), WorldError> {
        while self.worlds.len() > 1 {
            world::commit_top(&mut self.worlds)?;
        }
        world::unlock_chain(&mut self.worlds);
        self.redo.clear();
        self.wave = WaveState::new();
        return Ok(());
    }

    /// Drop the redo stack, releasing the snapshots it holds.
    pub fn clean_redo(&mut self) {
        self.redo.clear();
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// The merge decision. A call extends the running wave only when
    /// its tag tokens match and its rate clears the wave's floor;
    /// everything else starts a new frame and resets the floor.
    fn begin_wave(&mut self, tag: &str, rate: u32, id: &str) {
        let tokens = wave_tokens(tag, id, rate);
        let merges = tags_match(&tokens, &self.wave.last_tag) && rate > self.wave.last_rate;
        if merges {
            self.wave.last_tag = tokens;
            return;
        }
        self.advance();
        self.wave = WaveState {
            last_tag: tokens,
            last_rate: 1,
        };
    }

    fn emit(&mut self, tag: &str) {
        let mutation = Mutation {
            tag: Rc::from(tag),
            world: self.top().clone(),
        };
        self.mutations.push(&mutation);
    }

    fn class_of(&self, ref_id: &str) -> Result<Rc<ClassDef>, WorldError> {
        let model = match world::nearest_model(&self.worlds, ref_id) {
            Some(model) => model,
            None => return Err(WorldError::UnknownRef(ref_id.to_string())),
        };
        let name = Rc::clone(model.class());
        return self.registry.require(&name);
    }

    fn slot_index(&self, class: &ClassDef, slot: &str) -> Result<usize, WorldError> {
        match class.slot_index(slot) {
            Some(index) => return Ok(index),
            None => return Err(WorldError::UnknownSlot(slot.to_string())),
        }
    }

    pub(crate) fn wave_state(&self) -> (Vec<String>, u32) {
        return (self.wave.last_tag.clone(), self.wave.last_rate);
    }

    pub(crate) fn from_parts(
        registry: Registry,
        worlds: Vec<World>,
        redo: Vec<World>,
        last_tag: Vec<String>,
        last_rate: u32,
    ) -> App {
        return App {
            registry,
            worlds,
            redo,
            mutations: Stream::new(),
            wave: WaveState {
                last_tag,
                last_rate,
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::MethodDef;
    use crate::class::SlotDef;
    use crate::class::SlotType;
    use std::cell::RefCell;

    fn pad_registry() -> Registry {
        fn bump(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
            let n = cx.read("n")?.as_int().unwrap_or(0);
            cx.write("n", Value::Int(n + 1))?;
            return Ok(Value::Int(n + 1));
        }
        fn put(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
            cx.write("n", args[0].clone())?;
            return Ok(Value::None);
        }
        fn peek(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
            return cx.read("n");
        }
        let mut registry = Registry::new();
        registry.register(ClassDef::new(
            "pad",
            vec![SlotDef::typed("n", SlotType::Int).with_default(|| Value::Int(0))],
            vec![
                MethodDef::wave("bump", "pad:bump:{id}", 8, bump),
                MethodDef::wave("put", "pad:put:{id}", 1, put),
                MethodDef::pure("peek", peek),
            ],
        ));
        return registry;
    }

    #[test]
    fn create_and_read_back() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(0));
    }

    #[test]
    fn rapid_same_tag_calls_coalesce() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let after_create = app.depth();
        for _ in 0..10 {
            app.call(&id, "bump", &[]).unwrap();
        }
        // Ten bumps, one new undo frame.
        assert_eq!(app.depth(), after_create + 1);
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(10));
    }

    #[test]
    fn rate_one_calls_never_coalesce() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let after_create = app.depth();
        app.call(&id, "put", &[Value::Int(1)]).unwrap();
        app.call(&id, "put", &[Value::Int(2)]).unwrap();
        assert_eq!(app.depth(), after_create + 2);
    }

    #[test]
    fn tag_change_breaks_the_wave() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let after_create = app.depth();
        app.call(&id, "bump", &[]).unwrap();
        app.call(&id, "put", &[Value::Int(5)]).unwrap();
        app.call(&id, "bump", &[]).unwrap();
        assert_eq!(app.depth(), after_create + 3);
    }

    #[test]
    fn different_targets_break_the_wave() {
        let mut app = App::new(pad_registry());
        let a = app.create("pad").unwrap();
        let b = app.create("pad").unwrap();
        let after_create = app.depth();
        app.call(&a, "bump", &[]).unwrap();
        app.call(&b, "bump", &[]).unwrap();
        // The tag embeds the id, so edits to b start a new frame.
        assert_eq!(app.depth(), after_create + 2);
    }

    #[test]
    fn undo_restores_the_previous_frame() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        for _ in 0..5 {
            app.call(&id, "bump", &[]).unwrap();
        }
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(5));
        assert!(app.undo());
        // The whole typing wave went away as one frame.
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(0));
        assert!(app.redo());
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(5));
    }

    #[test]
    fn undo_breaks_the_wave() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        app.call(&id, "bump", &[]).unwrap();
        app.undo();
        // Typing after an undo must not merge into the old wave.
        app.call(&id, "bump", &[]).unwrap();
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(1));
        app.undo();
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(0));
    }

    #[test]
    fn undo_at_root_is_refused() {
        let mut app = App::new(pad_registry());
        assert!(!app.undo());
        assert!(!app.redo());
    }

    #[test]
    fn new_edits_clear_redo() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        app.call(&id, "put", &[Value::Int(1)]).unwrap();
        app.undo();
        app.call(&id, "put", &[Value::Int(2)]).unwrap();
        assert!(!app.redo());
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(2));
    }

    #[test]
    fn flatten_collapses_history() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        app.call(&id, "put", &[Value::Int(1)]).unwrap();
        app.call(&id, "put", &[Value::Int(2)]).unwrap();
        app.flatten().unwrap();
        assert_eq!(app.depth(), 0);
        assert_eq!(app.get(&id, "n").unwrap(), Value::Int(2));
        assert!(!app.undo());
    }

    #[test]
    fn mutations_reach_subscribers_synchronously() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let tags: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&tags);
        app.subscribe(move |mutation| {
            seen.borrow_mut().push(mutation.tag.to_string());
        });
        app.call(&id, "bump", &[]).unwrap();
        app.undo();
        let tags = tags.borrow();
        assert_eq!(&tags[0], &format!("pad:bump:{}", id));
        assert_eq!(&tags[1], "undo");
    }

    #[test]
    fn watch_filters_by_touched_model() {
        let mut app = App::new(pad_registry());
        let a = app.create("pad").unwrap();
        let b = app.create("pad").unwrap();
        let count = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&count);
        app.watch(&a, move |_| {
            *seen.borrow_mut() += 1;
        });
        app.call(&a, "bump", &[]).unwrap();
        app.call(&b, "bump", &[]).unwrap();
        app.call(&a, "bump", &[]).unwrap();
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let count = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&count);
        let subscription = app.subscribe(move |_| {
            *seen.borrow_mut() += 1;
        });
        app.call(&id, "bump", &[]).unwrap();
        app.unsubscribe(subscription);
        app.call(&id, "bump", &[]).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn pure_calls_leave_history_alone() {
        let mut app = App::new(pad_registry());
        let id = app.create("pad").unwrap();
        let depth = app.depth();
        let value = app.call(&id, "peek", &[]).unwrap();
        assert_eq!(value, Value::Int(0));
        assert_eq!(app.depth(), depth);
    }

    #[test]
    fn wildcard_tokens_match_any_tag_element() {
        let a = wave_tokens("text:insert:{id}", "m1", 8);
        let b = wave_tokens("text:*:{id}", "m1", 8);
        assert!(tags_match(&a, &b));
        let c = wave_tokens("text:insert:{id}", "m2", 8);
        assert!(!tags_match(&a, &c));
    }

    #[test]
    fn rate_token_substitutes() {
        let tokens = wave_tokens("resize:{rate}", "", 16);
        assert_eq!(tokens, vec!["resize".to_string(), "16".to_string()]);
    }
}
