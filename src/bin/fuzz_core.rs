// model = "claude-opus-4-5"
// created = "2026-02-02"
// modified = "2026-02-02"
// driver = "Isaac Clayton"

//! AFL fuzz harness for the document runtime.
//!
//! Interprets the input bytes as an editing session (inserts,
//! removals, marks, undo, redo) and checks the invariants that must
//! hold after every operation:
//!
//! 1. `string()` and `length()` agree.
//! 2. Markup enumeration visits exactly the live codepoints.
//! 3. A snapshot round trip reproduces the document.

use afl::fuzz;

use std::rc::Rc;

use ripple::app::App;
use ripple::chron::{Cursor, Entry, Range};
use ripple::class::Registry;
use ripple::codec::Codec;
use ripple::markup::{Marker, MarkerSet};
use ripple::text::register_text;
use ripple::value::Value;

#[derive(Debug, Clone, Copy)]
enum FuzzOp {
    Insert { pos_frac: u8, len: u8 },
    Remove { pos_frac: u8, len: u8 },
    Mark { marker: u8, pos_frac: u8, len: u8 },
    Unmark { marker: u8 },
    Undo,
    Redo,
}

impl FuzzOp {
    fn from_bytes(bytes: &[u8]) -> Option<(FuzzOp, &[u8])> {
        if bytes.is_empty() {
            return None;
        }
        let rest = &bytes[1..];
        match bytes[0] % 6 {
            0 if rest.len() >= 2 => {
                let op = FuzzOp::Insert {
                    pos_frac: rest[0],
                    len: (rest[1] % 8).saturating_add(1),
                };
                return Some((op, &rest[2..]));
            }
            1 if rest.len() >= 2 => {
                let op = FuzzOp::Remove {
                    pos_frac: rest[0],
                    len: (rest[1] % 8).saturating_add(1),
                };
                return Some((op, &rest[2..]));
            }
            2 if rest.len() >= 3 => {
                let op = FuzzOp::Mark {
                    marker: rest[0] % 4,
                    pos_frac: rest[1],
                    len: (rest[2] % 8).saturating_add(1),
                };
                return Some((op, &rest[3..]));
            }
            3 if !rest.is_empty() => {
                let op = FuzzOp::Unmark { marker: rest[0] % 4 };
                return Some((op, &rest[1..]));
            }
            4 => return Some((FuzzOp::Undo, rest)),
            5 => return Some((FuzzOp::Redo, rest)),
            _ => return None,
        }
    }
}

/// Collects the live entries the sweep visits.
#[derive(Default)]
struct Audit {
    text: String,
}

impl MarkerSet<char> for Audit {
    fn add(&mut self, _marker: &Marker, _cursor: &Cursor<char>) {}
    fn delete(&mut self, _marker: &Marker, _cursor: &Cursor<char>) {}
    fn covered(&mut self, _marker: &Marker, _range: &Range<char>) {}
    fn entry(&mut self, entry: &Rc<Entry<char>>) {
        self.text.push(*entry.data());
    }
}

fn doc_len(app: &mut App, id: &str) -> usize {
    match app.call(id, "length", &[]).unwrap() {
        Value::Int(n) => return n as usize,
        _ => unreachable!("length returns an int"),
    }
}

fn cursor_at(app: &mut App, id: &str, pos: usize) -> Value {
    return app.call(id, "cursor_at", &[Value::Int(pos as i64)]).unwrap();
}

fn run_session(data: &[u8]) {
    let mut registry = Registry::new();
    register_text(&mut registry);
    let mut app = App::new(registry);
    let id = app.create("text").unwrap();
    let codec = Codec::new();

    let mut remaining = data;
    while let Some((op, rest)) = FuzzOp::from_bytes(remaining) {
        remaining = rest;
        match op {
            FuzzOp::Insert { pos_frac, len } => {
                let doc = doc_len(&mut app, &id);
                let pos = (pos_frac as usize * (doc + 1)) / 256;
                let text: String = (0..len)
                    .map(|i| char::from(b'a' + (pos_frac.wrapping_add(i)) % 26))
                    .collect();
                let at = cursor_at(&mut app, &id, pos.min(doc));
                app.call(&id, "insert", &[at, Value::str(&text)]).unwrap();
            }
            FuzzOp::Remove { pos_frac, len } => {
                let doc = doc_len(&mut app, &id);
                if doc == 0 {
                    continue;
                }
                let start = (pos_frac as usize * doc) / 256;
                let len = (len as usize).min(doc - start);
                let from = cursor_at(&mut app, &id, start);
                let to = cursor_at(&mut app, &id, start + len);
                let (Value::Cursor(from), Value::Cursor(to)) = (from, to) else {
                    unreachable!("cursor_at returns cursors");
                };
                app.call(&id, "remove", &[Value::Range(Range::new(from, to))])
                    .unwrap();
            }
            FuzzOp::Mark { marker, pos_frac, len } => {
                let doc = doc_len(&mut app, &id);
                if doc == 0 {
                    continue;
                }
                let start = (pos_frac as usize * doc) / 256;
                let len = (len as usize).min(doc - start).max(1);
                let from = cursor_at(&mut app, &id, start);
                let to = cursor_at(&mut app, &id, (start + len).min(doc));
                let (Value::Cursor(from), Value::Cursor(to)) = (from, to) else {
                    unreachable!("cursor_at returns cursors");
                };
                app.call(
                    &id,
                    "mark",
                    &[Value::Int(marker as i64), Value::Range(Range::new(from, to))],
                )
                .unwrap();
            }
            FuzzOp::Unmark { marker } => {
                app.call(&id, "unmark", &[Value::Int(marker as i64)]).unwrap();
            }
            FuzzOp::Undo => {
                // Keep the frame that created the document.
                if app.depth() > 1 {
                    app.undo();
                }
            }
            FuzzOp::Redo => {
                app.redo();
            }
        }

        // Invariant 1: string and length agree.
        let text = match app.call(&id, "string", &[]).unwrap() {
            Value::Str(text) => text.to_string(),
            _ => unreachable!("string returns a string"),
        };
        assert_eq!(text.chars().count(), doc_len(&mut app, &id));

        // Invariant 2: the sweep sees exactly the live codepoints.
        let Value::Chron(chron) = app.get(&id, "codepoints").unwrap() else {
            unreachable!("codepoints slot holds a chron");
        };
        let Value::Markup(markup) = app.get(&id, "markup").unwrap() else {
            unreachable!("markup slot holds a markup");
        };
        let mut audit = Audit::default();
        markup.entries(&chron, &mut audit, None);
        assert_eq!(audit.text, text);
    }

    // Invariant 3: the snapshot reproduces the document.
    let before = match app.call(&id, "string", &[]).unwrap() {
        Value::Str(text) => text.to_string(),
        _ => unreachable!(),
    };
    let bytes = codec.encode_app(&app).unwrap();
    let mut registry = Registry::new();
    register_text(&mut registry);
    let mut decoded = codec.decode_app(&bytes, registry).unwrap();
    let after = match decoded.call(&id, "string", &[]).unwrap() {
        Value::Str(text) => text.to_string(),
        _ => unreachable!(),
    };
    assert_eq!(before, after);
}

fn main() {
    fuzz!(|data: &[u8]| {
        run_session(data);
    });
}
