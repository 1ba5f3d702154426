// model = "claude-opus-4-5"
// created = "2026-01-31"
// modified = "2026-02-02"
// driver = "Isaac Clayton"

//! Ripple - a collaborative, undoable document runtime.
//!
//! # Quick Start
//!
//! ```
//! use ripple::app::App;
//! use ripple::class::Registry;
//! use ripple::text::register_text;
//! use ripple::value::Value;
//!
//! // Register the document classes this app serves.
//! let mut registry = Registry::new();
//! register_text(&mut registry);
//! let mut app = App::new(registry);
//!
//! // Create a document and type into it.
//! let doc = app.create("text").unwrap();
//! app.call(&doc, "insert", &[Value::None, Value::str("Hello, world!")])
//!     .unwrap();
//! assert_eq!(
//!     app.call(&doc, "string", &[]).unwrap(),
//!     Value::str("Hello, world!")
//! );
//!
//! // The whole burst is one undo frame.
//! app.undo();
//! assert_eq!(app.call(&doc, "string", &[]).unwrap(), Value::str(""));
//! ```
//!
//! The layers, bottom up:
//!
//! - [`vector`]: persistent bit-partitioned vectors, the storage
//!   under everything.
//! - [`chron`]: the order-preserving codepoint log with stable
//!   cursors.
//! - [`markup`]: marker ranges over a chronology, with sweep
//!   enumeration.
//! - [`value`]: the dynamic values slots and wires carry.
//! - [`world`] and [`class`]: layered model storage and the class
//!   registry.
//! - [`app`]: the undo stack, wave merging, and the mutation stream.
//! - [`codec`]: the graph-aware binary snapshot format.
//! - [`remote`]: dispatch records for the session transport.

pub mod app;
pub mod chron;
pub mod class;
pub mod codec;
pub mod markup;
pub mod remote;
pub mod text;
pub mod value;
pub mod vector;
pub mod world;
