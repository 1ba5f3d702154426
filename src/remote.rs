// model = "claude-opus-4-5"
// created = "2026-02-01"
// modified = "2026-02-02"
// driver = "Isaac Clayton"

//! Remote dispatch: the records a session transport carries, and the
//! host-side entry points that run them.
//!
//! The transport itself (membership, ordering, delivery) lives
//! outside this crate. What it needs from the core is small: decode a
//! call record, run it against the app in delivery order, and ship a
//! reply keyed by the caller's call key. Refs travel as bare id
//! strings; replies upcast model results back to refs.

use std::cell::RefCell;
use std::rc::Rc;

use crate::app::App;
use crate::app::Subscription;
use crate::codec::Codec;
use crate::codec::CodecError;
use crate::value::Value;
use crate::world::WorldError;

/// One method invocation on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    pub method: Rc<str>,
    pub caller_key: Rc<str>,
    pub call_key: u64,
    pub parameters: Vec<Value>,
}

impl CallRecord {
    pub fn new(method: &str, caller_key: &str, call_key: u64, parameters: Vec<Value>) -> CallRecord {
        return CallRecord {
            method: Rc::from(method),
            caller_key: Rc::from(caller_key),
            call_key,
            parameters,
        };
    }

    /// The record as an encodable value.
    pub fn to_value(&self) -> Value {
        return Value::record(vec![
            (Rc::from("method"), Value::Str(Rc::clone(&self.method))),
            (Rc::from("caller_key"), Value::Str(Rc::clone(&self.caller_key))),
            (Rc::from("call_key"), Value::Int(self.call_key as i64)),
            (Rc::from("parameters"), Value::list(self.parameters.clone())),
        ]);
    }

    pub fn from_value(value: &Value) -> Result<CallRecord, CodecError> {
        let method = match value.field("method").and_then(|v| v.as_str()) {
            Some(method) => method,
            None => return Err(CodecError::Malformed("call record lacks a method")),
        };
        let caller_key = match value.field("caller_key").and_then(|v| v.as_str()) {
            Some(key) => key,
            None => return Err(CodecError::Malformed("call record lacks a caller key")),
        };
        let call_key = match value.field("call_key").and_then(|v| v.as_int()) {
            Some(key) if key >= 0 => key as u64,
            _ => return Err(CodecError::Malformed("call record lacks a call key")),
        };
        let parameters = match value.field("parameters") {
            Some(Value::List(items)) => items.borrow().clone(),
            _ => return Err(CodecError::Malformed("call record lacks parameters")),
        };
        return Ok(CallRecord {
            method,
            caller_key,
            call_key,
            parameters,
        });
    }
}

/// The host's answer, published on the caller's channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyRecord {
    pub call_key: u64,
    pub result: Value,
    pub error: Option<String>,
}

impl ReplyRecord {
    fn ok(call_key: u64, result: Value) -> ReplyRecord {
        return ReplyRecord {
            call_key,
            result,
            error: None,
        };
    }

    fn failed(call_key: u64, error: &WorldError) -> ReplyRecord {
        return ReplyRecord {
            call_key,
            result: Value::None,
            error: Some(error.to_string()),
        };
    }

    pub fn to_value(&self) -> Value {
        let error = match &self.error {
            Some(error) => Value::str(error),
            None => Value::None,
        };
        return Value::record(vec![
            (Rc::from("call_key"), Value::Int(self.call_key as i64)),
            (Rc::from("result"), self.result.clone()),
            (Rc::from("error"), error),
        ]);
    }

    pub fn from_value(value: &Value) -> Result<ReplyRecord, CodecError> {
        let call_key = match value.field("call_key").and_then(|v| v.as_int()) {
            Some(key) if key >= 0 => key as u64,
            _ => return Err(CodecError::Malformed("reply record lacks a call key")),
        };
        let result = match value.field("result") {
            Some(result) => result,
            None => return Err(CodecError::Malformed("reply record lacks a result")),
        };
        let error = value
            .field("error")
            .and_then(|v| v.as_str())
            .map(|text| text.to_string());
        return Ok(ReplyRecord {
            call_key,
            result,
            error,
        });
    }
}

/// The host side of a session: runs delivered records against the
/// app, in delivery order, and produces replies.
pub struct Host {
    app: App,
    codec: Codec,
    notifications: Rc<RefCell<Vec<ReplyRecord>>>,
    watches: Vec<(Rc<str>, Subscription)>,
}

impl Host {
    pub fn new(app: App) -> Host {
        return Host {
            app,
            codec: Codec::new(),
            notifications: Rc::new(RefCell::new(Vec::new())),
            watches: Vec::new(),
        };
    }

    pub fn app(&self) -> &App {
        return &self.app;
    }

    pub fn app_mut(&mut self) -> &mut App {
        return &mut self.app;
    }

    /// Run one delivered record and produce the reply.
    pub fn dispatch(&mut self, record: &CallRecord) -> ReplyRecord {
        match self.run(record) {
            Ok(result) => return ReplyRecord::ok(record.call_key, result),
            Err(error) => return ReplyRecord::failed(record.call_key, &error),
        }
    }

    /// Decode, dispatch, and encode in one step, for transports that
    /// hand the host raw bytes.
    pub fn dispatch_bytes(&mut self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let value = self.codec.decode_value(bytes)?;
        let record = CallRecord::from_value(&value)?;
        let reply = self.dispatch(&record);
        return self.codec.encode_value(&reply.to_value());
    }

    /// Watch notifications queued since the last drain, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<ReplyRecord> {
        return self.notifications.borrow_mut().drain(..).collect();
    }

    /// Drop every watch registered on `id`, for peers leaving the
    /// session.
    pub fn unwatch(&mut self, id: &str) {
        let mut keep = Vec::new();
        for (watched, subscription) in self.watches.drain(..) {
            if &*watched == id {
                self.app.unsubscribe(subscription);
            } else {
                keep.push((watched, subscription));
            }
        }
        self.watches = keep;
    }

    fn run(&mut self, record: &CallRecord) -> Result<Value, WorldError> {
        match &*record.method {
            "create" => {
                let class = match record.parameters.first().and_then(Value::as_str) {
                    Some(class) => class,
                    None => return Err(WorldError::UnknownClass("<missing>".to_string())),
                };
                let id = self.app.create(&class)?;
                return Ok(Value::Ref(id));
            }
            "assign" => {
                let id = ref_parameter(&record.parameters, 0)?;
                let slot = match record.parameters.get(1).and_then(Value::as_str) {
                    Some(slot) => slot,
                    None => return Err(WorldError::UnknownSlot("<missing>".to_string())),
                };
                let value = record.parameters.get(2).cloned().unwrap_or(Value::None);
                self.app.assign(&id, &slot, value)?;
                return Ok(Value::None);
            }
            "call" => {
                let id = ref_parameter(&record.parameters, 0)?;
                let method = match record.parameters.get(1).and_then(Value::as_str) {
                    Some(method) => method,
                    None => return Err(WorldError::UnknownMethod("<missing>".to_string())),
                };
                let args = &record.parameters[2..];
                return self.app.call(&id, &method, args);
            }
            "watch" => {
                let id = ref_parameter(&record.parameters, 0)?;
                let queue = Rc::clone(&self.notifications);
                let call_key = record.call_key;
                let subscription = self.app.watch(&id, move |mutation| {
                    queue.borrow_mut().push(ReplyRecord::ok(
                        call_key,
                        Value::Str(Rc::clone(&mutation.tag)),
                    ));
                });
                self.watches.push((Rc::clone(&id), subscription));
                return Ok(Value::None);
            }
            "undo" => return Ok(Value::Bool(self.app.undo())),
            "redo" => return Ok(Value::Bool(self.app.redo())),
            other => return Err(WorldError::UnknownMethod(other.to_string())),
        }
    }
}

/// A ref parameter arrives either as a bare id string (the wire
/// downcast) or as a ref value.
fn ref_parameter(parameters: &[Value], index: usize) -> Result<Rc<str>, WorldError> {
    match parameters.get(index) {
        Some(Value::Ref(id)) => return Ok(Rc::clone(id)),
        Some(Value::Str(id)) => return Ok(Rc::clone(id)),
        _ => return Err(WorldError::UnknownRef("<missing>".to_string())),
    }
}
