// model = "claude-opus-4-5"
// created = "2026-02-02"
// modified = "2026-02-02"
// driver = "Isaac Clayton"

use ripple::app::App;
use ripple::class::Registry;
use ripple::codec;
use ripple::codec::Codec;
use ripple::text::register_text;
use ripple::value::Value;

fn main() {
    let mut registry = Registry::new();
    register_text(&mut registry);
    let mut app = App::new(registry);

    let doc = app.create("text").unwrap();
    app.watch(&doc, |mutation| {
        println!("mutation: {}", mutation.tag);
    });

    // Type a sentence one keystroke at a time; it coalesces into a
    // single undo frame.
    for ch in "Hello, world!".chars() {
        let at = app.call(&doc, "tail", &[]).unwrap();
        app.call(&doc, "insert", &[at, Value::str(&ch.to_string())])
            .unwrap();
    }
    println!("document: {:?}", app.call(&doc, "string", &[]).unwrap());
    println!("undo frames: {}", app.depth());

    app.undo();
    println!("after undo: {:?}", app.call(&doc, "string", &[]).unwrap());
    app.redo();
    println!("after redo: {:?}", app.call(&doc, "string", &[]).unwrap());

    // Snapshot the whole session.
    let bytes = Codec::new().encode_app(&app).unwrap();
    let packed = codec::compress(&bytes);
    println!("snapshot: {} bytes ({} deflated)", bytes.len(), packed.len());
}
