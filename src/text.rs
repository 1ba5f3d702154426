// model = "claude-opus-4-5"
// created = "2026-02-01"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! The text model class: a chronology of codepoints plus a markup.
//!
//! This is the model the editor front end talks to. Insertion threads
//! a cursor through the chronology one codepoint at a time, so a
//! pasted string comes out in source order even though sibling
//! inserts at one anchor sort newest-first. Removal tombstones; it
//! never unlinks, so markers and remote cursors keep resolving.
//!
//! `insert` and `remove` ride the `typing` wave (rate 8): a burst of
//! keystrokes collapses into one undo frame. Marking is deliberate
//! (rate 1) and gets a frame of its own.

use std::rc::Rc;

use crate::chron::Chron;
use crate::chron::Cursor;
use crate::chron::Entry;
use crate::chron::Range;
use crate::class::ClassDef;
use crate::class::MethodCx;
use crate::class::MethodDef;
use crate::class::Registry;
use crate::class::SlotDef;
use crate::class::SlotType;
use crate::markup::Marker;
use crate::markup::Markup;
use crate::value::Value;
use crate::world::WorldError;

/// Register the `text` class.
pub fn register_text(registry: &mut Registry) {
    registry.register(ClassDef::new(
        "text",
        vec![
            SlotDef::typed("codepoints", SlotType::Chron)
                .with_default(|| Value::Chron(Chron::new())),
            SlotDef::typed("markup", SlotType::Markup)
                .with_default(|| Value::Markup(Markup::new())),
        ],
        vec![
            MethodDef::wave("insert", "text:insert:{id}", 8, insert),
            MethodDef::wave("remove", "text:remove:{id}", 8, remove),
            MethodDef::wave("mark", "text:mark", 1, mark),
            MethodDef::wave("unmark", "text:mark", 1, unmark),
            MethodDef::pure("string", string),
            MethodDef::pure("length", length),
            MethodDef::pure("head", head),
            MethodDef::pure("tail", tail),
            MethodDef::pure("cursor_at", cursor_at),
            MethodDef::pure("mark_range", mark_range),
        ],
    ));
}

fn codepoints(cx: &mut MethodCx) -> Result<Chron<char>, WorldError> {
    match cx.read("codepoints")? {
        Value::Chron(chron) => return Ok(chron),
        _ => return Ok(Chron::new()),
    }
}

fn markup(cx: &mut MethodCx) -> Result<Markup<char>, WorldError> {
    match cx.read("markup")? {
        Value::Markup(markup) => return Ok(markup),
        _ => return Ok(Markup::new()),
    }
}

/// `insert(cursor?, text)`: splice codepoints at the cursor, default
/// the document tail. Returns the inserted range, or the empty
/// sentinel when nothing landed.
fn insert(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let mut chron = codepoints(cx)?;
    let mut at = match args.first() {
        Some(Value::Cursor(cursor)) => cursor.clone(),
        _ => chron.tail(),
    };
    let text = match args.get(1).and_then(Value::as_str) {
        Some(text) => text,
        None => return Ok(Value::None),
    };

    let mut first: Option<Rc<Entry<char>>> = None;
    let mut last: Option<Rc<Entry<char>>> = None;
    for ch in text.chars() {
        let next = chron.insert(&at, ch);
        if next.log_len() > chron.log_len() {
            let entry = Rc::clone(next.newest().expect("insert appended"));
            at = Cursor::after(&entry);
            if first.is_none() {
                first = Some(Rc::clone(&entry));
            }
            last = Some(entry);
        }
        chron = next;
    }
    cx.write("codepoints", Value::Chron(chron))?;

    match (first, last) {
        (Some(first), Some(last)) => {
            let range = Range::new(Cursor::before(&first), Cursor::after(&last));
            return Ok(Value::Range(range));
        }
        _ => return Ok(Value::None),
    }
}

/// `remove(range)`: tombstone every entry inside the range.
fn remove(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    let range = match args.first() {
        Some(Value::Range(range)) => range.clone(),
        _ => return Ok(Value::None),
    };
    let doomed: Vec<Rc<Entry<char>>> = chron.entries(&range).collect();
    let mut chron = chron;
    for entry in doomed {
        chron = chron.delete(&entry);
    }
    cx.write("codepoints", Value::Chron(chron))?;
    return Ok(Value::None);
}

/// `mark(data, range)`: attach a marker to a range.
fn mark(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let data = match args.first() {
        Some(data) => data.clone(),
        None => return Ok(Value::None),
    };
    let range = match args.get(1) {
        Some(Value::Range(range)) => range.clone(),
        _ => return Ok(Value::None),
    };
    let current = markup(cx)?;
    let next = current.mark(Marker::new(data), range);
    cx.write("markup", Value::Markup(next))?;
    return Ok(Value::None);
}

/// `unmark(data)`: remove a marker.
fn unmark(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let data = match args.first() {
        Some(data) => data.clone(),
        None => return Ok(Value::None),
    };
    let current = markup(cx)?;
    let next = current.unmark(&Marker::new(data));
    cx.write("markup", Value::Markup(next))?;
    return Ok(Value::None);
}

/// `string()`: the live codepoints.
fn string(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    return Ok(Value::str(&chron.to_string()));
}

/// `length()`: the live codepoint count.
fn length(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    return Ok(Value::Int(chron.live_len() as i64));
}

/// `head()`: the cursor before all content.
fn head(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    return Ok(Value::Cursor(chron.head()));
}

/// `tail()`: the cursor after all content.
fn tail(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    return Ok(Value::Cursor(chron.tail()));
}

/// `cursor_at(pos)`: the cursor before the pos-th live codepoint.
/// Past the end clamps to the tail.
fn cursor_at(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let chron = codepoints(cx)?;
    let pos = match args.first().and_then(Value::as_int) {
        Some(pos) if pos >= 0 => pos as usize,
        _ => 0,
    };
    let full = chron.full_range();
    let found = chron
        .entries(&full)
        .filter(|entry| entry.is_live())
        .nth(pos);
    match found {
        Some(entry) => return Ok(Value::Cursor(Cursor::before(&entry))),
        None => return Ok(Value::Cursor(chron.tail())),
    }
}

/// `mark_range(data)`: where a marker currently sits, if anywhere.
fn mark_range(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
    let data = match args.first() {
        Some(data) => data.clone(),
        None => return Ok(Value::None),
    };
    let markup = markup(cx)?;
    match markup.range_of(&Marker::new(data)) {
        Some(range) => return Ok(Value::Range(range)),
        None => return Ok(Value::None),
    }
}
