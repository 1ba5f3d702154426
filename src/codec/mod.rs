// model = "claude-opus-4-5"
// created = "2026-02-01"
// modified = "2026-02-02"
// driver = "Isaac Clayton"

//! Graph-aware binary serializer.
//!
//! Snapshots are object graphs with shared substructure and, through
//! container cells, cycles. A naive recursive codec would duplicate
//! shared values and spin on cycles, so both directions run in two
//! passes:
//!
//! **Encoding.** Pass one walks the reachable graph and refcounts
//! every object (containers, long strings, chronology entries, marker
//! rows, models, worlds). Pass two sorts the unique objects by
//! descending refcount, hands out positions by rank, and emits each
//! object exactly once; any later reference becomes a small POINTER
//! varint. The hottest objects get the shortest pointers.
//!
//! **Decoding.** Pass one (predecode) walks the atom stream linearly,
//! allocating an empty shell per container and recording where each
//! object's body starts, without recursing. Pass two populates the
//! shells, resolving pointers through the shell table. A cycle simply
//! points at a shell that is still filling, so no back-patching is
//! needed.
//!
//! The stream is `varint(atoms) varint(objects) varint(root)`, a
//! packed array of 4-bit atom tags, then the body bytes. Strings are
//! null-terminated UTF-8. Integers outside the 53-bit safe range fall
//! back to FLOAT64, and negatives are biased so zero has one spelling.

pub mod varint;

use std::io::Read;
use std::io::Write;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::app::App;
use crate::chron::Anchor;
use crate::chron::Atom;
use crate::chron::Bias;
use crate::chron::Chron;
use crate::chron::Cursor;
use crate::chron::Entry;
use crate::chron::Range;
use crate::chron::NO_INDEX;
use crate::class::Registry;
use crate::markup::MarkEntry;
use crate::markup::Marker;
use crate::markup::Markup;
use crate::value::Value;
use crate::vector::PVec;
use crate::world::KeyStream;
use crate::world::Model;
use crate::world::World;

use varint::read_varint;
use varint::write_varint;

// =============================================================================
// Atom tags
// =============================================================================

const TAG_UNKNOWN: u8 = 0;
const TAG_POINTER: u8 = 1;
const TAG_POS_INT: u8 = 2;
const TAG_NEG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_NONE: u8 = 6;
const TAG_TRUE: u8 = 7;
const TAG_FALSE: u8 = 8;
const TAG_NULL: u8 = 9;
const TAG_LIST: u8 = 10;
const TAG_RECORD: u8 = 11;
const TAG_OBJECT: u8 = 12;
const TAG_MAP: u8 = 13;
const TAG_SET: u8 = 14;

/// Integers beyond this magnitude lose their exactness guarantee and
/// travel as floats.
const SAFE_INT: i64 = 1 << 53;

/// Extra weight given to type tag strings so they rank near the head
/// of the stream and predecode can always resolve them.
const TAG_BOOST: u64 = 1 << 20;

/// Strings longer than this are interned as shared objects.
const INLINE_STR: usize = 2;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum CodecError {
    /// The decoder met a type tag with no registered coder.
    UnknownType(String),
    /// The stream is structurally broken.
    Malformed(&'static str),
    /// A coder was registered under an already-taken tag.
    SchemaConflict(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::UnknownType(tag) => {
                return write!(f, "unknown type tag: {}", tag);
            }
            CodecError::Malformed(what) => {
                return write!(f, "malformed stream: {}", what);
            }
            CodecError::SchemaConflict(tag) => {
                return write!(f, "type tag registered twice: {}", tag);
            }
        }
    }
}

impl std::error::Error for CodecError {}

// =============================================================================
// The object universe
// =============================================================================

/// Everything the encoder can walk. Values are held by cheap clone
/// (their heap identity rides along in their `Rc`s); runtime
/// structures are borrowed, so their addresses stay put for the
/// duration of both passes.
#[derive(Clone)]
enum Node<'a> {
    Value(Value),
    Entry(Rc<Entry<char>>),
    MarkRow(Rc<MarkEntry<char>>),
    Model(&'a Model),
    World(&'a World),
    App(&'a App),
}

/// Hashable object identity for the refcount and position tables.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Ident {
    /// A stable address: an `Rc` payload or a borrowed structure.
    Addr(usize),
    /// Interned string content.
    Text(Rc<str>),
}

/// The identity of a node, or `None` for atoms that encode inline
/// (primitives, short strings, cursors, ranges, refs).
fn ident(node: &Node) -> Option<Ident> {
    match node {
        Node::Value(value) => match value {
            Value::Str(s) if s.len() > INLINE_STR => {
                return Some(Ident::Text(Rc::clone(s)));
            }
            Value::List(x) => return Some(Ident::Addr(Rc::as_ptr(x) as *const u8 as usize)),
            Value::Record(x) => return Some(Ident::Addr(Rc::as_ptr(x) as *const u8 as usize)),
            Value::Map(x) => return Some(Ident::Addr(Rc::as_ptr(x) as *const u8 as usize)),
            Value::Set(x) => return Some(Ident::Addr(Rc::as_ptr(x) as *const u8 as usize)),
            Value::Chron(c) => return Some(Ident::Addr(c.identity_addr())),
            Value::Markup(m) => return Some(Ident::Addr(m.identity_addr())),
            _ => return None,
        },
        Node::Entry(e) => return Some(Ident::Addr(Rc::as_ptr(e) as *const u8 as usize)),
        Node::MarkRow(r) => return Some(Ident::Addr(Rc::as_ptr(r) as *const u8 as usize)),
        Node::Model(m) => return Some(Ident::Addr(*m as *const Model as usize)),
        Node::World(w) => return Some(Ident::Addr(*w as *const World as usize)),
        Node::App(a) => return Some(Ident::Addr(*a as *const App as usize)),
    }
}

fn sorted_models(world: &World) -> Vec<&Model> {
    let mut models: Vec<&Model> = world.models().collect();
    models.sort_by(|a, b| a.id().cmp(b.id()));
    return models;
}

// =============================================================================
// Pass 1: indexing
// =============================================================================

struct Indexer<'a> {
    counts: FxHashMap<Ident, u64>,
    first: FxHashMap<Ident, usize>,
    uniques: Vec<Node<'a>>,
}

impl<'a> Indexer<'a> {
    fn new() -> Indexer<'a> {
        return Indexer {
            counts: FxHashMap::default(),
            first: FxHashMap::default(),
            uniques: Vec::new(),
        };
    }

    fn visit(&mut self, node: Node<'a>) {
        match ident(&node) {
            Some(id) => {
                *self.counts.entry(id.clone()).or_insert(0) += 1;
                if !self.first.contains_key(&id) {
                    self.first.insert(id, self.uniques.len());
                    self.uniques.push(node.clone());
                    self.children(node);
                }
            }
            None => self.children(node),
        }
    }

    /// Count a type tag string, weighted so it ranks early.
    fn tag(&mut self, tag: &'static str) {
        let text: Rc<str> = Rc::from(tag);
        let id = Ident::Text(Rc::clone(&text));
        *self.counts.entry(id.clone()).or_insert(0) += TAG_BOOST;
        if !self.first.contains_key(&id) {
            self.first.insert(id, self.uniques.len());
            self.uniques.push(Node::Value(Value::Str(text)));
        }
    }

    fn anchor(&mut self, anchor: &Anchor<char>) {
        if let Anchor::Entry(entry) = anchor {
            self.visit(Node::Entry(Rc::clone(entry)));
        }
    }

    fn children(&mut self, node: Node<'a>) {
        match node {
            Node::Value(value) => match value {
                Value::List(items) | Value::Set(items) => {
                    let items = items.borrow();
                    for item in items.iter() {
                        self.visit(Node::Value(item.clone()));
                    }
                }
                Value::Record(fields) => {
                    let fields = fields.borrow();
                    for (key, field) in fields.iter() {
                        self.visit(Node::Value(Value::Str(Rc::clone(key))));
                        self.visit(Node::Value(field.clone()));
                    }
                }
                Value::Map(pairs) => {
                    let pairs = pairs.borrow();
                    for (key, val) in pairs.iter() {
                        self.visit(Node::Value(key.clone()));
                        self.visit(Node::Value(val.clone()));
                    }
                }
                Value::Chron(chron) => {
                    self.tag("chron");
                    let entries: Vec<Rc<Entry<char>>> =
                        chron.log_entries().map(Rc::clone).collect();
                    for entry in entries {
                        self.visit(Node::Entry(entry));
                    }
                }
                Value::Markup(markup) => {
                    self.tag("markup");
                    let rows: Vec<Rc<MarkEntry<char>>> = markup.rows().map(Rc::clone).collect();
                    for row in rows {
                        self.visit(Node::MarkRow(row));
                    }
                }
                Value::Cursor(cursor) => {
                    self.tag("cursor");
                    self.anchor(cursor.anchor());
                }
                Value::Range(range) => {
                    self.tag("range");
                    self.anchor(range.head.anchor());
                    self.anchor(range.tail.anchor());
                }
                Value::Ref(id) => {
                    self.tag("ref");
                    self.visit(Node::Value(Value::Str(Rc::clone(&id))));
                }
                _ => {}
            },
            Node::Entry(_) => {
                self.tag("chron.entry");
            }
            Node::MarkRow(row) => {
                self.tag("markup.row");
                self.visit(Node::Value(row.marker().data().clone()));
                if let Some(range) = row.range() {
                    self.anchor(range.head.anchor());
                    self.anchor(range.tail.anchor());
                }
            }
            Node::Model(model) => {
                self.tag("model");
                self.visit(Node::Value(Value::Str(Rc::clone(model.id()))));
                self.visit(Node::Value(Value::Str(Rc::clone(model.class()))));
                for value in model.reads().iter().chain(model.writes().iter()) {
                    self.visit(Node::Value(value.clone()));
                }
            }
            Node::World(world) => {
                self.tag("world");
                for model in sorted_models(world) {
                    self.visit(Node::Model(model));
                }
            }
            Node::App(app) => {
                self.tag("app");
                for world in app.worlds() {
                    self.visit(Node::World(world));
                }
                for world in app.redo_worlds() {
                    self.visit(Node::World(world));
                }
            }
        }
    }
}

// =============================================================================
// Pass 2: encoding
// =============================================================================

struct Writer {
    tags: Vec<u8>,
    body: Vec<u8>,
}

impl Writer {
    fn new() -> Writer {
        return Writer {
            tags: Vec::new(),
            body: Vec::new(),
        };
    }

    fn atom(&mut self, tag: u8) {
        self.tags.push(tag);
    }

    fn raw_varint(&mut self, value: u64) {
        write_varint(&mut self.body, value);
    }

    fn raw_byte(&mut self, byte: u8) {
        self.body.push(byte);
    }

    fn raw_str(&mut self, text: &str) -> Result<(), CodecError> {
        if text.as_bytes().contains(&0) {
            return Err(CodecError::Malformed("string contains a NUL byte"));
        }
        self.body.extend_from_slice(text.as_bytes());
        self.body.push(0);
        return Ok(());
    }

    fn raw_float(&mut self, value: f64) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn finish(self, object_count: u64, root_ptr: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.tags.len() as u64);
        write_varint(&mut out, object_count);
        write_varint(&mut out, root_ptr);
        for pair in self.tags.chunks(2) {
            let low = pair[0] & 0x0f;
            let high = pair.get(1).map(|tag| tag & 0x0f).unwrap_or(0);
            out.push(low | (high << 4));
        }
        out.extend_from_slice(&self.body);
        return out;
    }
}

struct Encoder {
    positions: FxHashMap<Ident, u64>,
    writer: Writer,
}

impl Encoder {
    fn pointer_to(&mut self, id: &Ident) -> Result<(), CodecError> {
        let rank = match self.positions.get(id) {
            Some(rank) => *rank,
            None => return Err(CodecError::Malformed("reference to an unindexed object")),
        };
        self.writer.atom(TAG_POINTER);
        self.writer.raw_varint(rank);
        return Ok(());
    }

    fn emit_tag(&mut self, tag: &'static str) -> Result<(), CodecError> {
        return self.pointer_to(&Ident::Text(Rc::from(tag)));
    }

    /// Emit a reference position: primitives and small carriers go
    /// inline, everything object-like becomes a pointer.
    fn emit_value(&mut self, node: &Node) -> Result<(), CodecError> {
        if let Some(id) = ident(node) {
            return self.pointer_to(&id);
        }
        let value = match node {
            Node::Value(value) => value,
            _ => return Err(CodecError::Malformed("non-value emitted inline")),
        };
        match value {
            Value::None => self.writer.atom(TAG_NONE),
            Value::Null => self.writer.atom(TAG_NULL),
            Value::Bool(true) => self.writer.atom(TAG_TRUE),
            Value::Bool(false) => self.writer.atom(TAG_FALSE),
            Value::Int(n) => {
                if *n > SAFE_INT || *n < -SAFE_INT {
                    self.writer.atom(TAG_FLOAT);
                    self.writer.raw_float(*n as f64);
                } else if *n >= 0 {
                    self.writer.atom(TAG_POS_INT);
                    self.writer.raw_varint(*n as u64);
                } else {
                    self.writer.atom(TAG_NEG_INT);
                    self.writer.raw_varint((-(n + 1)) as u64);
                }
            }
            Value::Float(x) => {
                self.writer.atom(TAG_FLOAT);
                self.writer.raw_float(*x);
            }
            Value::Str(s) => {
                self.writer.atom(TAG_STR);
                self.writer.raw_str(s)?;
            }
            Value::Cursor(cursor) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("cursor")?;
                self.emit_cursor(cursor)?;
            }
            Value::Range(range) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("range")?;
                self.emit_cursor(&range.head)?;
                self.emit_cursor(&range.tail)?;
            }
            Value::Ref(id) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("ref")?;
                self.emit_value(&Node::Value(Value::Str(Rc::clone(id))))?;
            }
            _ => return Err(CodecError::Malformed("object value emitted inline")),
        }
        return Ok(());
    }

    /// A cursor is an anchor sub-atom (entry pointer or bare key)
    /// plus a raw bias byte.
    fn emit_cursor(&mut self, cursor: &Cursor<char>) -> Result<(), CodecError> {
        match cursor.anchor() {
            Anchor::Entry(entry) => {
                self.emit_value(&Node::Entry(Rc::clone(entry)))?;
            }
            Anchor::Key(key) => {
                self.writer.atom(TAG_POS_INT);
                self.writer.raw_varint(*key as u64);
            }
        }
        let bias = match cursor.bias() {
            Bias::Before => 0u8,
            Bias::After => 1u8,
        };
        self.writer.raw_byte(bias);
        return Ok(());
    }

    /// Emit a ranked object's one and only appearance in the stream.
    fn emit_object(&mut self, node: &Node) -> Result<(), CodecError> {
        match node {
            Node::Value(Value::Str(s)) => {
                self.writer.atom(TAG_STR);
                self.writer.raw_str(s)?;
            }
            Node::Value(Value::List(items)) => {
                self.writer.atom(TAG_LIST);
                let items = items.borrow();
                self.writer.raw_varint(items.len() as u64);
                for item in items.iter() {
                    self.emit_value(&Node::Value(item.clone()))?;
                }
            }
            Node::Value(Value::Set(items)) => {
                self.writer.atom(TAG_SET);
                let items = items.borrow();
                self.writer.raw_varint(items.len() as u64);
                for item in items.iter() {
                    self.emit_value(&Node::Value(item.clone()))?;
                }
            }
            Node::Value(Value::Record(fields)) => {
                self.writer.atom(TAG_RECORD);
                let fields = fields.borrow();
                self.writer.raw_varint(fields.len() as u64);
                for (key, field) in fields.iter() {
                    self.emit_value(&Node::Value(Value::Str(Rc::clone(key))))?;
                    self.emit_value(&Node::Value(field.clone()))?;
                }
            }
            Node::Value(Value::Map(pairs)) => {
                self.writer.atom(TAG_MAP);
                let pairs = pairs.borrow();
                self.writer.raw_varint(pairs.len() as u64);
                for (key, val) in pairs.iter() {
                    self.emit_value(&Node::Value(key.clone()))?;
                    self.emit_value(&Node::Value(val.clone()))?;
                }
            }
            Node::Value(Value::Chron(chron)) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("chron")?;
                self.writer.raw_varint(chron.last_index() as u64);
                self.writer.raw_varint(chron.log_len() as u64);
                let entries: Vec<Rc<Entry<char>>> = chron.log_entries().map(Rc::clone).collect();
                for entry in entries {
                    self.emit_value(&Node::Entry(entry))?;
                }
            }
            Node::Value(Value::Markup(markup)) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("markup")?;
                let rows: Vec<Rc<MarkEntry<char>>> = markup.rows().map(Rc::clone).collect();
                self.writer.raw_varint(rows.len() as u64);
                for row in rows {
                    self.emit_value(&Node::MarkRow(row))?;
                }
            }
            Node::Entry(entry) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("chron.entry")?;
                self.writer.raw_varint(entry.index() as u64);
                self.writer.raw_varint(entry.key() as u64);
                self.writer.raw_varint(encode_link(entry.former()));
                self.writer.raw_varint(encode_link(entry.latter()));
                match entry.atom() {
                    Some(ch) => {
                        self.writer.raw_byte(1);
                        self.writer.raw_varint(*ch as u64);
                    }
                    None => self.writer.raw_byte(0),
                }
            }
            Node::MarkRow(row) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("markup.row")?;
                self.emit_value(&Node::Value(row.marker().data().clone()))?;
                match row.range() {
                    Some(range) => {
                        self.writer.raw_byte(1);
                        self.emit_cursor(&range.head)?;
                        self.emit_cursor(&range.tail)?;
                    }
                    None => self.writer.raw_byte(0),
                }
            }
            Node::Model(model) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("model")?;
                self.emit_value(&Node::Value(Value::Str(Rc::clone(model.id()))))?;
                self.emit_value(&Node::Value(Value::Str(Rc::clone(model.class()))))?;
                self.writer.raw_varint(model.slot_count() as u64);
                for value in model.reads() {
                    self.emit_value(&Node::Value(value.clone()))?;
                }
                for value in model.writes() {
                    self.emit_value(&Node::Value(value.clone()))?;
                }
            }
            Node::World(world) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("world")?;
                let models = sorted_models(world);
                self.writer.raw_varint(models.len() as u64);
                for model in models {
                    self.emit_value(&Node::Model(model))?;
                }
                self.writer.raw_varint(world.key_stream().current());
                self.writer.raw_byte(if world.locked() { 1 } else { 0 });
            }
            Node::App(app) => {
                self.writer.atom(TAG_OBJECT);
                self.emit_tag("app")?;
                self.writer.raw_varint(app.worlds().len() as u64);
                for world in app.worlds() {
                    self.emit_value(&Node::World(world))?;
                }
                self.writer.raw_varint(app.redo_worlds().len() as u64);
                for world in app.redo_worlds() {
                    self.emit_value(&Node::World(world))?;
                }
                let (last_tag, last_rate) = app.wave_state();
                self.writer.raw_varint(last_tag.len() as u64);
                for token in &last_tag {
                    self.writer.raw_str(token)?;
                }
                self.writer.raw_varint(last_rate as u64);
            }
            _ => return Err(CodecError::Malformed("inline value ranked as object")),
        }
        return Ok(());
    }
}

#[inline]
fn encode_link(index: u32) -> u64 {
    if index == NO_INDEX {
        return 0;
    }
    return index as u64 + 1;
}

#[inline]
fn decode_link(value: u64) -> u32 {
    if value == 0 {
        return NO_INDEX;
    }
    return (value - 1) as u32;
}

// =============================================================================
// Decoding
// =============================================================================

struct Reader<'b> {
    head: &'b [u8],
    body: &'b [u8],
    atom_count: usize,
    atom: usize,
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(bytes: &'b [u8]) -> Result<(Reader<'b>, usize, u64), CodecError> {
        let mut pos = 0;
        let atom_count = read_varint(bytes, &mut pos)? as usize;
        let object_count = read_varint(bytes, &mut pos)? as usize;
        let root_ptr = read_varint(bytes, &mut pos)?;
        let head_len = (atom_count + 1) / 2;
        if bytes.len() < pos + head_len {
            return Err(CodecError::Malformed("truncated head array"));
        }
        let reader = Reader {
            head: &bytes[pos..pos + head_len],
            body: &bytes[pos + head_len..],
            atom_count,
            atom: 0,
            pos: 0,
        };
        return Ok((reader, object_count, root_ptr));
    }

    fn next_tag(&mut self) -> Result<u8, CodecError> {
        if self.atom >= self.atom_count {
            return Err(CodecError::Malformed("atom index past the end"));
        }
        let byte = self.head[self.atom / 2];
        let tag = if self.atom % 2 == 0 {
            byte & 0x0f
        } else {
            byte >> 4
        };
        self.atom += 1;
        return Ok(tag);
    }

    fn varint(&mut self) -> Result<u64, CodecError> {
        return read_varint(self.body, &mut self.pos);
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let byte = match self.body.get(self.pos) {
            Some(byte) => *byte,
            None => return Err(CodecError::Malformed("body ran past the end")),
        };
        self.pos += 1;
        return Ok(byte);
    }

    fn float(&mut self) -> Result<f64, CodecError> {
        if self.body.len() < self.pos + 8 {
            return Err(CodecError::Malformed("truncated float"));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.body[self.pos..self.pos + 8]);
        self.pos += 8;
        return Ok(f64::from_le_bytes(raw));
    }

    fn string(&mut self) -> Result<Rc<str>, CodecError> {
        let rest = &self.body[self.pos..];
        let end = match rest.iter().position(|byte| *byte == 0) {
            Some(end) => end,
            None => return Err(CodecError::Malformed("unterminated string")),
        };
        let text = match std::str::from_utf8(&rest[..end]) {
            Ok(text) => text,
            Err(_) => return Err(CodecError::Malformed("string is not valid utf-8")),
        };
        self.pos += end + 1;
        return Ok(Rc::from(text));
    }

    fn mark(&self) -> (usize, usize) {
        return (self.atom, self.pos);
    }

    fn seek(&mut self, mark: (usize, usize)) {
        self.atom = mark.0;
        self.pos = mark.1;
    }
}

/// A decoded object, typed by kind.
#[derive(Clone)]
enum Dec {
    Value(Value),
    Entry(Rc<Entry<char>>),
    MarkRow(Rc<MarkEntry<char>>),
    Model(Model),
    World(World),
    App(AppParts),
}

#[derive(Clone)]
struct AppParts {
    worlds: Vec<World>,
    redo: Vec<World>,
    last_tag: Vec<String>,
    last_rate: u32,
}

enum SlotState {
    /// A typed object awaiting its decode pass.
    Pending { mark: (usize, usize) },
    /// A container shell, possibly mid-fill (that is what breaks
    /// cycles).
    Shell {
        value: Value,
        mark: (usize, usize),
        filled: bool,
    },
    /// Temporarily taken; meeting this means a malformed cycle.
    Busy,
    Done(Dec),
}

struct Decoder<'c, 'b> {
    codec: &'c Codec,
    reader: Reader<'b>,
    slots: Vec<SlotState>,
}

impl<'c, 'b> Decoder<'c, 'b> {
    /// Walk the ranked objects linearly, allocating shells and
    /// recording body positions, without recursing into anything.
    fn predecode(&mut self, object_count: usize) -> Result<(), CodecError> {
        for _ in 0..object_count {
            let mark = self.reader.mark();
            let tag = self.reader.next_tag()?;
            let state = match tag {
                TAG_STR => {
                    let text = self.reader.string()?;
                    SlotState::Done(Dec::Value(Value::Str(text)))
                }
                TAG_LIST => {
                    self.skip_items(1)?;
                    SlotState::Shell {
                        value: Value::list(Vec::new()),
                        mark,
                        filled: false,
                    }
                }
                TAG_SET => {
                    self.skip_items(1)?;
                    SlotState::Shell {
                        value: Value::set(Vec::new()),
                        mark,
                        filled: false,
                    }
                }
                TAG_RECORD => {
                    self.skip_items(2)?;
                    SlotState::Shell {
                        value: Value::record(Vec::new()),
                        mark,
                        filled: false,
                    }
                }
                TAG_MAP => {
                    self.skip_items(2)?;
                    SlotState::Shell {
                        value: Value::map(Vec::new()),
                        mark,
                        filled: false,
                    }
                }
                TAG_OBJECT => {
                    let name = self.tag_string()?;
                    let coder = match self.codec.types.get(&*name) {
                        Some(coder) => coder,
                        None => return Err(CodecError::UnknownType(name.to_string())),
                    };
                    (coder.skip)(self)?;
                    SlotState::Pending { mark }
                }
                _ => return Err(CodecError::Malformed("unexpected object atom")),
            };
            self.slots.push(state);
        }
        return Ok(());
    }

    /// Skip `per`-atoms-per-element worth of container body.
    fn skip_items(&mut self, per: usize) -> Result<(), CodecError> {
        let count = self.reader.varint()? as usize;
        for _ in 0..count * per {
            self.skip_atom()?;
        }
        return Ok(());
    }

    fn skip_atom(&mut self) -> Result<(), CodecError> {
        let tag = self.reader.next_tag()?;
        match tag {
            TAG_UNKNOWN | TAG_NONE | TAG_TRUE | TAG_FALSE | TAG_NULL => return Ok(()),
            TAG_POINTER | TAG_POS_INT | TAG_NEG_INT => {
                self.reader.varint()?;
                return Ok(());
            }
            TAG_FLOAT => {
                self.reader.float()?;
                return Ok(());
            }
            TAG_STR => {
                self.reader.string()?;
                return Ok(());
            }
            TAG_LIST | TAG_SET => return self.skip_items(1),
            TAG_RECORD | TAG_MAP => return self.skip_items(2),
            TAG_OBJECT => {
                let name = self.tag_string()?;
                let coder = match self.codec.types.get(&*name) {
                    Some(coder) => coder,
                    None => return Err(CodecError::UnknownType(name.to_string())),
                };
                return (coder.skip)(self);
            }
            _ => return Err(CodecError::Malformed("unknown atom tag")),
        }
    }

    /// Read a type tag: an inline string or a pointer to an already
    /// predecoded string. Tag strings always rank early, so forward
    /// tag pointers never happen in a well-formed stream.
    fn tag_string(&mut self) -> Result<Rc<str>, CodecError> {
        let tag = self.reader.next_tag()?;
        match tag {
            TAG_STR => return self.reader.string(),
            TAG_POINTER => {
                let rank = self.reader.varint()? as usize;
                match self.slots.get(rank) {
                    Some(SlotState::Done(Dec::Value(Value::Str(text)))) => {
                        return Ok(Rc::clone(text));
                    }
                    _ => return Err(CodecError::Malformed("tag pointer is not a string")),
                }
            }
            _ => return Err(CodecError::Malformed("bad type tag atom")),
        }
    }

    /// Produce the decoded object at `rank`, decoding on demand.
    fn force(&mut self, rank: usize) -> Result<Dec, CodecError> {
        if rank >= self.slots.len() {
            return Err(CodecError::Malformed("pointer out of range"));
        }
        let state = std::mem::replace(&mut self.slots[rank], SlotState::Busy);
        match state {
            SlotState::Done(dec) => {
                let out = dec.clone();
                self.slots[rank] = SlotState::Done(dec);
                return Ok(out);
            }
            SlotState::Busy => {
                return Err(CodecError::Malformed("cycle through a typed object"));
            }
            SlotState::Shell {
                value,
                mark,
                filled,
            } => {
                if filled {
                    // A cycle: hand out the shell mid-fill.
                    let out = Dec::Value(value.clone());
                    self.slots[rank] = SlotState::Shell {
                        value,
                        mark,
                        filled,
                    };
                    return Ok(out);
                }
                self.slots[rank] = SlotState::Shell {
                    value: value.clone(),
                    mark,
                    filled: true,
                };
                let saved = self.reader.mark();
                self.reader.seek(mark);
                self.fill_shell(&value)?;
                self.reader.seek(saved);
                self.slots[rank] = SlotState::Done(Dec::Value(value.clone()));
                return Ok(Dec::Value(value));
            }
            SlotState::Pending { mark } => {
                let saved = self.reader.mark();
                self.reader.seek(mark);
                let tag = self.reader.next_tag()?;
                if tag != TAG_OBJECT {
                    return Err(CodecError::Malformed("pending slot is not an object"));
                }
                let name = self.tag_string()?;
                let coder = match self.codec.types.get(&*name) {
                    Some(coder) => coder,
                    None => return Err(CodecError::UnknownType(name.to_string())),
                };
                let dec = (coder.decode)(self)?;
                self.reader.seek(saved);
                self.slots[rank] = SlotState::Done(dec.clone());
                return Ok(dec);
            }
        }
    }

    fn fill_shell(&mut self, value: &Value) -> Result<(), CodecError> {
        let tag = self.reader.next_tag()?;
        let count = self.reader.varint()? as usize;
        match (tag, value) {
            (TAG_LIST, Value::List(cell)) | (TAG_SET, Value::Set(cell)) => {
                for _ in 0..count {
                    let item = self.read_value()?;
                    cell.borrow_mut().push(item);
                }
                return Ok(());
            }
            (TAG_RECORD, Value::Record(cell)) => {
                for _ in 0..count {
                    let key = match self.read_value()? {
                        Value::Str(key) => key,
                        _ => return Err(CodecError::Malformed("record key is not a string")),
                    };
                    let field = self.read_value()?;
                    cell.borrow_mut().push((key, field));
                }
                return Ok(());
            }
            (TAG_MAP, Value::Map(cell)) => {
                for _ in 0..count {
                    let key = self.read_value()?;
                    let val = self.read_value()?;
                    cell.borrow_mut().push((key, val));
                }
                return Ok(());
            }
            _ => return Err(CodecError::Malformed("shell does not match its atom")),
        }
    }

    /// Read one value-position sub-atom.
    fn read_value(&mut self) -> Result<Value, CodecError> {
        let tag = self.reader.next_tag()?;
        match tag {
            TAG_NONE => return Ok(Value::None),
            TAG_NULL => return Ok(Value::Null),
            TAG_TRUE => return Ok(Value::Bool(true)),
            TAG_FALSE => return Ok(Value::Bool(false)),
            TAG_POS_INT => {
                let n = self.reader.varint()?;
                return Ok(Value::Int(n as i64));
            }
            TAG_NEG_INT => {
                let n = self.reader.varint()?;
                return Ok(Value::Int(-(n as i64) - 1));
            }
            TAG_FLOAT => return Ok(Value::Float(self.reader.float()?)),
            TAG_STR => return Ok(Value::Str(self.reader.string()?)),
            TAG_POINTER => {
                let rank = self.reader.varint()? as usize;
                match self.force(rank)? {
                    Dec::Value(value) => return Ok(value),
                    _ => return Err(CodecError::Malformed("pointer to a non-value")),
                }
            }
            TAG_OBJECT => {
                let name = self.tag_string()?;
                let coder = match self.codec.types.get(&*name) {
                    Some(coder) => coder,
                    None => return Err(CodecError::UnknownType(name.to_string())),
                };
                match (coder.decode)(self)? {
                    Dec::Value(value) => return Ok(value),
                    _ => return Err(CodecError::Malformed("inline object is not a value")),
                }
            }
            _ => return Err(CodecError::Malformed("container atom in value position")),
        }
    }

    fn read_cursor(&mut self) -> Result<Cursor<char>, CodecError> {
        let tag = self.reader.next_tag()?;
        enum Raw {
            Entry(Rc<Entry<char>>),
            Key(u32),
        }
        let anchor = match tag {
            TAG_POINTER => {
                let rank = self.reader.varint()? as usize;
                match self.force(rank)? {
                    Dec::Entry(entry) => Raw::Entry(entry),
                    _ => return Err(CodecError::Malformed("cursor anchor is not an entry")),
                }
            }
            TAG_POS_INT => Raw::Key(self.reader.varint()? as u32),
            _ => return Err(CodecError::Malformed("bad cursor anchor atom")),
        };
        let bias = self.reader.byte()?;
        match (anchor, bias) {
            (Raw::Entry(entry), 0) => return Ok(Cursor::before(&entry)),
            (Raw::Entry(entry), 1) => return Ok(Cursor::after(&entry)),
            (Raw::Key(key), 0) => return Ok(Cursor::before_key(key)),
            (Raw::Key(key), 1) => return Ok(Cursor::after_key(key)),
            _ => return Err(CodecError::Malformed("bad cursor bias")),
        }
    }
}

// =============================================================================
// Typed coders
// =============================================================================

/// A registered typed object coder. Skip advances the reader past one
/// body during predecode; decode rebuilds the object.
struct TypeCoder {
    tag: &'static str,
    skip: fn(&mut Decoder<'_, '_>) -> Result<(), CodecError>,
    decode: fn(&mut Decoder<'_, '_>) -> Result<Dec, CodecError>,
}

fn skip_chron(d: &mut Decoder) -> Result<(), CodecError> {
    d.reader.varint()?;
    return d.skip_items(1);
}

fn decode_chron(d: &mut Decoder) -> Result<Dec, CodecError> {
    let last = d.reader.varint()? as u32;
    let count = d.reader.varint()? as usize;
    if count == 0 {
        return Err(CodecError::Malformed("chron without a root entry"));
    }
    let mut log: PVec<Rc<Entry<char>>> = PVec::new();
    for position in 0..count {
        let tag = d.reader.next_tag()?;
        if tag != TAG_POINTER {
            return Err(CodecError::Malformed("chron log holds entry pointers"));
        }
        let rank = d.reader.varint()? as usize;
        let entry = match d.force(rank)? {
            Dec::Entry(entry) => entry,
            _ => return Err(CodecError::Malformed("chron log points at a non-entry")),
        };
        if entry.index() as usize != position {
            return Err(CodecError::Malformed("entry stored out of place"));
        }
        log = log.push(entry);
    }
    if last as usize >= count {
        return Err(CodecError::Malformed("chron last index dangles"));
    }
    return Ok(Dec::Value(Value::Chron(Chron::from_parts(log, last))));
}

fn skip_entry(d: &mut Decoder) -> Result<(), CodecError> {
    d.reader.varint()?;
    d.reader.varint()?;
    d.reader.varint()?;
    d.reader.varint()?;
    if d.reader.byte()? == 1 {
        d.reader.varint()?;
    }
    return Ok(());
}

fn decode_entry(d: &mut Decoder) -> Result<Dec, CodecError> {
    let index = d.reader.varint()? as u32;
    let key = d.reader.varint()? as u32;
    let former = decode_link(d.reader.varint()?);
    let latter = decode_link(d.reader.varint()?);
    let atom = if d.reader.byte()? == 1 {
        let code = d.reader.varint()? as u32;
        let ch = match char::from_u32(code) {
            Some(ch) => ch,
            None => return Err(CodecError::Malformed("entry holds an invalid codepoint")),
        };
        Atom::Live(ch)
    } else {
        Atom::Deleted
    };
    let entry = Entry::from_parts(index, key, atom, former, latter);
    return Ok(Dec::Entry(Rc::new(entry)));
}

fn skip_markup(d: &mut Decoder) -> Result<(), CodecError> {
    return d.skip_items(1);
}

fn decode_markup(d: &mut Decoder) -> Result<Dec, CodecError> {
    let count = d.reader.varint()? as usize;
    let mut rows: PVec<Rc<MarkEntry<char>>> = PVec::new();
    for _ in 0..count {
        let tag = d.reader.next_tag()?;
        if tag != TAG_POINTER {
            return Err(CodecError::Malformed("markup holds row pointers"));
        }
        let rank = d.reader.varint()? as usize;
        let row = match d.force(rank)? {
            Dec::MarkRow(row) => row,
            _ => return Err(CodecError::Malformed("markup points at a non-row")),
        };
        rows = rows.push(row);
    }
    return Ok(Dec::Value(Value::Markup(Markup::from_parts(rows))));
}

fn skip_cursor_raw(d: &mut Decoder) -> Result<(), CodecError> {
    d.skip_atom()?;
    d.reader.byte()?;
    return Ok(());
}

fn skip_mark_row(d: &mut Decoder) -> Result<(), CodecError> {
    d.skip_atom()?;
    if d.reader.byte()? == 1 {
        skip_cursor_raw(d)?;
        skip_cursor_raw(d)?;
    }
    return Ok(());
}

fn decode_mark_row(d: &mut Decoder) -> Result<Dec, CodecError> {
    let data = d.read_value()?;
    let range = if d.reader.byte()? == 1 {
        let head = d.read_cursor()?;
        let tail = d.read_cursor()?;
        Some(Range::new(head, tail))
    } else {
        None
    };
    let row = Markup::<char>::make_row(Marker::new(data), range);
    return Ok(Dec::MarkRow(Rc::new(row)));
}

fn skip_cursor(d: &mut Decoder) -> Result<(), CodecError> {
    return skip_cursor_raw(d);
}

fn decode_cursor(d: &mut Decoder) -> Result<Dec, CodecError> {
    let cursor = d.read_cursor()?;
    return Ok(Dec::Value(Value::Cursor(cursor)));
}

fn skip_range(d: &mut Decoder) -> Result<(), CodecError> {
    skip_cursor_raw(d)?;
    return skip_cursor_raw(d);
}

fn decode_range(d: &mut Decoder) -> Result<Dec, CodecError> {
    let head = d.read_cursor()?;
    let tail = d.read_cursor()?;
    return Ok(Dec::Value(Value::Range(Range::new(head, tail))));
}

fn skip_ref(d: &mut Decoder) -> Result<(), CodecError> {
    return d.skip_atom();
}

fn decode_ref(d: &mut Decoder) -> Result<Dec, CodecError> {
    match d.read_value()? {
        Value::Str(id) => return Ok(Dec::Value(Value::Ref(id))),
        _ => return Err(CodecError::Malformed("ref id is not a string")),
    }
}

fn skip_model(d: &mut Decoder) -> Result<(), CodecError> {
    d.skip_atom()?;
    d.skip_atom()?;
    let slots = d.reader.varint()? as usize;
    for _ in 0..slots * 2 {
        d.skip_atom()?;
    }
    return Ok(());
}

fn decode_model(d: &mut Decoder) -> Result<Dec, CodecError> {
    let id = match d.read_value()? {
        Value::Str(id) => id,
        _ => return Err(CodecError::Malformed("model id is not a string")),
    };
    let class = match d.read_value()? {
        Value::Str(class) => class,
        _ => return Err(CodecError::Malformed("model class is not a string")),
    };
    let slots = d.reader.varint()? as usize;
    let mut reads = Vec::with_capacity(slots);
    for _ in 0..slots {
        reads.push(d.read_value()?);
    }
    let mut writes = Vec::with_capacity(slots);
    for _ in 0..slots {
        writes.push(d.read_value()?);
    }
    return Ok(Dec::Model(Model::from_parts(id, class, reads, writes)));
}

fn skip_world(d: &mut Decoder) -> Result<(), CodecError> {
    d.skip_items(1)?;
    d.reader.varint()?;
    d.reader.byte()?;
    return Ok(());
}

fn decode_world(d: &mut Decoder) -> Result<Dec, CodecError> {
    let count = d.reader.varint()? as usize;
    let mut models = FxHashMap::default();
    for _ in 0..count {
        let tag = d.reader.next_tag()?;
        if tag != TAG_POINTER {
            return Err(CodecError::Malformed("world holds model pointers"));
        }
        let rank = d.reader.varint()? as usize;
        let model = match d.force(rank)? {
            Dec::Model(model) => model,
            _ => return Err(CodecError::Malformed("world points at a non-model")),
        };
        models.insert(Rc::clone(model.id()), model);
    }
    let stream = d.reader.varint()?;
    let locked = d.reader.byte()? == 1;
    let world = World::from_parts(models, KeyStream::with_value(stream), locked);
    return Ok(Dec::World(world));
}

fn skip_app(d: &mut Decoder) -> Result<(), CodecError> {
    d.skip_items(1)?;
    d.skip_items(1)?;
    let tokens = d.reader.varint()? as usize;
    for _ in 0..tokens {
        d.reader.string()?;
    }
    d.reader.varint()?;
    return Ok(());
}

fn read_world_list(d: &mut Decoder) -> Result<Vec<World>, CodecError> {
    let count = d.reader.varint()? as usize;
    let mut worlds = Vec::new();
    for _ in 0..count {
        let tag = d.reader.next_tag()?;
        if tag != TAG_POINTER {
            return Err(CodecError::Malformed("app holds world pointers"));
        }
        let rank = d.reader.varint()? as usize;
        match d.force(rank)? {
            Dec::World(world) => worlds.push(world),
            _ => return Err(CodecError::Malformed("app points at a non-world")),
        }
    }
    return Ok(worlds);
}

fn decode_app(d: &mut Decoder) -> Result<Dec, CodecError> {
    let worlds = read_world_list(d)?;
    let redo = read_world_list(d)?;
    let tokens = d.reader.varint()? as usize;
    let mut last_tag = Vec::new();
    for _ in 0..tokens {
        last_tag.push(d.reader.string()?.to_string());
    }
    let last_rate = d.reader.varint()? as u32;
    return Ok(Dec::App(AppParts {
        worlds,
        redo,
        last_tag,
        last_rate,
    }));
}

// =============================================================================
// The codec
// =============================================================================

/// The codec: a fixed table of typed coders plus the two-pass
/// pipelines. Built once at startup; immutable afterwards.
pub struct Codec {
    types: FxHashMap<&'static str, TypeCoder>,
}

impl Codec {
    /// A codec with every runtime type registered.
    pub fn new() -> Codec {
        let mut codec = Codec {
            types: FxHashMap::default(),
        };
        let coders = [
            TypeCoder { tag: "chron", skip: skip_chron, decode: decode_chron },
            TypeCoder { tag: "chron.entry", skip: skip_entry, decode: decode_entry },
            TypeCoder { tag: "markup", skip: skip_markup, decode: decode_markup },
            TypeCoder { tag: "markup.row", skip: skip_mark_row, decode: decode_mark_row },
            TypeCoder { tag: "cursor", skip: skip_cursor, decode: decode_cursor },
            TypeCoder { tag: "range", skip: skip_range, decode: decode_range },
            TypeCoder { tag: "ref", skip: skip_ref, decode: decode_ref },
            TypeCoder { tag: "model", skip: skip_model, decode: decode_model },
            TypeCoder { tag: "world", skip: skip_world, decode: decode_world },
            TypeCoder { tag: "app", skip: skip_app, decode: decode_app },
        ];
        for coder in coders {
            codec.register(coder).expect("runtime tags are unique");
        }
        return codec;
    }

    fn register(&mut self, coder: TypeCoder) -> Result<(), CodecError> {
        if self.types.contains_key(coder.tag) {
            return Err(CodecError::SchemaConflict(coder.tag.to_string()));
        }
        self.types.insert(coder.tag, coder);
        return Ok(());
    }

    fn encode_root(&self, root: Node) -> Result<Vec<u8>, CodecError> {
        let mut indexer = Indexer::new();
        indexer.visit(root.clone());

        // Rank unique objects: most referenced first, ties by first
        // visit. The rank is the object's pointer id.
        let idents: Vec<Ident> = indexer
            .uniques
            .iter()
            .map(|node| ident(node).expect("uniques have identity"))
            .collect();
        let mut order: Vec<usize> = (0..indexer.uniques.len()).collect();
        order.sort_by(|&a, &b| {
            let count_a = indexer.counts[&idents[a]];
            let count_b = indexer.counts[&idents[b]];
            return count_b.cmp(&count_a).then(a.cmp(&b));
        });

        let mut positions = FxHashMap::default();
        for (rank, &unique) in order.iter().enumerate() {
            positions.insert(idents[unique].clone(), rank as u64);
        }
        let mut encoder = Encoder {
            positions,
            writer: Writer::new(),
        };
        for &unique in &order {
            encoder.emit_object(&indexer.uniques[unique])?;
        }

        let object_count = order.len() as u64;
        let root_ptr = match ident(&root) {
            Some(id) => encoder.positions[&id],
            None => {
                // A primitive root trails the object table.
                encoder.emit_value(&root)?;
                object_count
            }
        };
        return Ok(encoder.writer.finish(object_count, root_ptr));
    }

    fn decode_root(&self, bytes: &[u8]) -> Result<Dec, CodecError> {
        let (reader, object_count, root_ptr) = Reader::new(bytes)?;
        let mut decoder = Decoder {
            codec: self,
            reader,
            slots: Vec::new(),
        };
        decoder.predecode(object_count)?;
        if (root_ptr as usize) < object_count {
            return decoder.force(root_ptr as usize);
        }
        if root_ptr as usize != object_count {
            return Err(CodecError::Malformed("root pointer out of range"));
        }
        return Ok(Dec::Value(decoder.read_value()?));
    }

    /// Encode any value graph.
    pub fn encode_value(&self, root: &Value) -> Result<Vec<u8>, CodecError> {
        return self.encode_root(Node::Value(root.clone()));
    }

    /// Decode a value graph.
    pub fn decode_value(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match self.decode_root(bytes)? {
            Dec::Value(value) => return Ok(value),
            _ => return Err(CodecError::Malformed("root is not a value")),
        }
    }

    /// Encode one world layer.
    pub fn encode_world(&self, world: &World) -> Result<Vec<u8>, CodecError> {
        return self.encode_root(Node::World(world));
    }

    pub fn decode_world(&self, bytes: &[u8]) -> Result<World, CodecError> {
        match self.decode_root(bytes)? {
            Dec::World(world) => return Ok(world),
            _ => return Err(CodecError::Malformed("root is not a world")),
        }
    }

    /// Encode a whole app: the world stack, the redo stack, and the
    /// wave state. Subscriptions do not travel.
    pub fn encode_app(&self, app: &App) -> Result<Vec<u8>, CodecError> {
        return self.encode_root(Node::App(app));
    }

    /// Decode an app, rebinding it to a class registry. The worlds
    /// come back sharing one key stream, set to the highest counter
    /// any of them recorded.
    pub fn decode_app(&self, bytes: &[u8], registry: Registry) -> Result<App, CodecError> {
        let parts = match self.decode_root(bytes)? {
            Dec::App(parts) => parts,
            _ => return Err(CodecError::Malformed("root is not an app")),
        };
        let AppParts {
            mut worlds,
            mut redo,
            last_tag,
            last_rate,
        } = parts;
        if worlds.is_empty() {
            return Err(CodecError::Malformed("app without a world stack"));
        }
        let highest = worlds
            .iter()
            .chain(redo.iter())
            .map(|world| world.key_stream().current())
            .max()
            .unwrap_or(0);
        let shared = KeyStream::with_value(highest);
        for world in worlds.iter_mut().chain(redo.iter_mut()) {
            world.set_key_stream(shared.clone());
        }
        return Ok(App::from_parts(registry, worlds, redo, last_tag, last_rate));
    }
}

impl Default for Codec {
    fn default() -> Self {
        return Self::new();
    }
}

// =============================================================================
// Compression helpers
// =============================================================================

/// DEFLATE a snapshot for persistence.
pub fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).expect("writing to a vec cannot fail");
    return encoder.finish().expect("deflate to a vec cannot fail");
}

/// Inflate a persisted snapshot.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = flate2::read::DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => return Ok(out),
        Err(_) => return Err(CodecError::Malformed("deflate stream corrupt")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn round_trip(value: &Value) -> Value {
        let codec = Codec::new();
        let bytes = codec.encode_value(value).unwrap();
        return codec.decode_value(&bytes).unwrap();
    }

    #[test]
    fn primitives_round_trip() {
        assert_eq!(round_trip(&Value::None), Value::None);
        assert_eq!(round_trip(&Value::Null), Value::Null);
        assert_eq!(round_trip(&Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(&Value::Bool(false)), Value::Bool(false));
        assert_eq!(round_trip(&Value::Int(0)), Value::Int(0));
        assert_eq!(round_trip(&Value::Int(1234567)), Value::Int(1234567));
        assert_eq!(round_trip(&Value::Int(-1)), Value::Int(-1));
        assert_eq!(round_trip(&Value::Int(-1234567)), Value::Int(-1234567));
        assert_eq!(round_trip(&Value::Float(1.5)), Value::Float(1.5));
    }

    #[test]
    fn unsafe_integers_become_floats() {
        let big = Value::Int((1 << 54) + 2);
        match round_trip(&big) {
            Value::Float(x) => assert_eq!(x, ((1i64 << 54) + 2) as f64),
            other => panic!("expected a float, got {:?}", other),
        }
    }

    #[test]
    fn strings_round_trip() {
        assert_eq!(round_trip(&Value::str("")), Value::str(""));
        assert_eq!(round_trip(&Value::str("ab")), Value::str("ab"));
        assert_eq!(round_trip(&Value::str("hello world")), Value::str("hello world"));
        assert_eq!(round_trip(&Value::str("héllo ✓")), Value::str("héllo ✓"));
    }

    #[test]
    fn containers_round_trip() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::str("two"),
            Value::record(vec![(Rc::from("three"), Value::Bool(true))]),
            Value::map(vec![(Value::str("key"), Value::Int(4))]),
            Value::set(vec![Value::Int(5)]),
        ]);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn shared_substructure_stays_shared() {
        let inner = Value::list(vec![Value::Int(42)]);
        let outer = Value::list(vec![inner.clone(), inner.clone()]);
        let decoded = round_trip(&outer);
        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        assert!(items[0].same(&items[1]));
        assert_eq!(items[0], inner);
    }

    #[test]
    fn cycles_round_trip() {
        let cell = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let list = Value::List(Rc::clone(&cell));
        cell.borrow_mut().push(list.clone());

        let codec = Codec::new();
        let bytes = codec.encode_value(&list).unwrap();
        let decoded = codec.decode_value(&bytes).unwrap();

        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Value::Int(1));
        assert!(items[1].same(&decoded));
    }

    #[test]
    fn equal_long_strings_are_interned() {
        let a = Value::str("shared contents");
        let b = Value::str("shared contents");
        let outer = Value::list(vec![a, b]);
        let decoded = round_trip(&outer);
        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        // Distinct at encode time, one interned object after decode.
        assert!(items[0].same(&items[1]));
    }

    #[test]
    fn refs_round_trip() {
        let value = Value::list(vec![Value::Ref(Rc::from("m7")), Value::Ref(Rc::from("m8"))]);
        assert_eq!(round_trip(&value), value);
    }

    fn sample_chron() -> Chron<char> {
        let mut chron = Chron::new();
        for ch in "hello".chars() {
            chron = chron.insert(&chron.tail(), ch);
        }
        let e = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'e')
            .unwrap();
        return chron.delete(&e);
    }

    #[test]
    fn chron_round_trips() {
        let chron = sample_chron();
        let decoded = round_trip(&Value::Chron(chron.clone()));
        let Value::Chron(decoded) = decoded else {
            panic!("expected a chron");
        };
        assert_eq!(decoded.to_string(), "hllo");
        assert_eq!(decoded.log_len(), chron.log_len());
        assert_eq!(decoded, chron);
    }

    #[test]
    fn shared_entries_stay_shared_across_snapshots() {
        let before = sample_chron();
        let x = before
            .entries(&before.full_range())
            .find(|entry| *entry.data() == 'o')
            .unwrap();
        let after = before.delete(&x);

        let value = Value::list(vec![Value::Chron(before), Value::Chron(after)]);
        let decoded = round_trip(&value);
        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        let (Value::Chron(a), Value::Chron(b)) = (&items[0], &items[1]) else {
            panic!("expected chrons");
        };
        // The untouched root is one object, not two copies.
        assert!(Rc::ptr_eq(&a.root(), &b.root()));
        assert_eq!(a.to_string(), "hllo");
        assert_eq!(b.to_string(), "hll");
    }

    #[test]
    fn markup_round_trips_with_anchors_shared() {
        let chron = sample_chron();
        let h = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'h')
            .unwrap();
        let o = chron
            .entries(&chron.full_range())
            .find(|entry| *entry.data() == 'o')
            .unwrap();
        let range = Range::new(Cursor::before(&h), Cursor::after(&o));
        let markup = Markup::new().mark(Marker::new(Value::str("bold")), range);

        let value = Value::list(vec![Value::Chron(chron), Value::Markup(markup)]);
        let decoded = round_trip(&value);
        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        let (Value::Chron(chron), Value::Markup(markup)) = (&items[0], &items[1]) else {
            panic!("expected chron and markup");
        };
        let range = markup.range_of(&Marker::new(Value::str("bold"))).unwrap();
        // Marker anchors resolve against the decoded chron, because
        // they are the same entry objects.
        let head = chron.anchor_of(&range.head).unwrap();
        assert_eq!(*head.data(), 'h');
        let spanned: String = chron.data(&range).collect();
        assert_eq!(spanned, "hllo");
    }

    #[test]
    fn cursor_and_range_values_round_trip() {
        let chron = sample_chron();
        let h = chron
            .entries(&chron.full_range())
            .next()
            .unwrap();
        let cursor = Value::Cursor(Cursor::after(&h));
        let decoded = round_trip(&Value::list(vec![cursor, Value::Chron(chron.clone())]));
        let Value::List(items) = &decoded else {
            panic!("expected a list");
        };
        let items = items.borrow();
        let (Value::Cursor(cursor), Value::Chron(chron)) = (&items[0], &items[1]) else {
            panic!("expected cursor and chron");
        };
        let anchored = chron.anchor_of(cursor).unwrap();
        assert_eq!(*anchored.data(), 'h');

        let bare: Value = Value::Cursor(Cursor::before_key(77));
        assert_eq!(round_trip(&bare), bare);
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let codec = Codec::new();
        let bytes = codec.encode_value(&Value::str("hello world")).unwrap();
        let result = codec.decode_value(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn empty_input_is_malformed() {
        let codec = Codec::new();
        assert!(codec.decode_value(&[]).is_err());
    }

    #[test]
    fn duplicate_registration_is_a_schema_conflict() {
        let mut codec = Codec::new();
        let result = codec.register(TypeCoder {
            tag: "chron",
            skip: skip_chron,
            decode: decode_chron,
        });
        assert_eq!(result, Err(CodecError::SchemaConflict("chron".to_string())));
    }

    #[test]
    fn compression_round_trips() {
        let codec = Codec::new();
        let rows: Vec<Value> = (0..200)
            .map(|i| Value::str(&format!("row {:04} content content content", i)))
            .collect();
        let value = Value::list(rows);
        let bytes = codec.encode_value(&value).unwrap();
        let packed = compress(&bytes);
        assert!(packed.len() < bytes.len());
        let unpacked = decompress(&packed).unwrap();
        assert_eq!(unpacked, bytes);
        assert_eq!(codec.decode_value(&unpacked).unwrap(), value);
    }

    #[test]
    fn corrupt_compressed_stream_is_malformed() {
        assert!(decompress(&[0xff, 0x00, 0xab]).is_err());
    }
}
