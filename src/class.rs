// model = "claude-opus-4-5"
// created = "2026-02-01"
// modified = "2026-02-01"
// driver = "Isaac Clayton"

//! Model classes: declarative slot and method definitions.
//!
//! A model class binds a string name to a slot layout and a method
//! table. The name travels everywhere the model does: world lookup,
//! the wire, and the snapshot codec all use it. Methods declare how
//! they mutate: `Pure` methods read without touching history, `Wave`
//! methods carry a merge descriptor so rapid repeats coalesce into
//! one undo step.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::ModelId;
use crate::value::Value;
use crate::world;
use crate::world::World;
use crate::world::WorldError;

/// Constraint a slot enforces on assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotType {
    Str,
    Int,
    Float,
    Bool,
    Chron,
    Markup,
    Ref,
    List,
    Record,
}

impl SlotType {
    /// Whether a value may be assigned under this constraint. The
    /// empty sentinel is always assignable, so slots can be cleared.
    pub fn admits(&self, value: &Value) -> bool {
        if value.is_none() {
            return true;
        }
        match (self, value) {
            (SlotType::Str, Value::Str(_)) => return true,
            (SlotType::Int, Value::Int(_)) => return true,
            (SlotType::Float, Value::Float(_)) => return true,
            (SlotType::Bool, Value::Bool(_)) => return true,
            (SlotType::Chron, Value::Chron(_)) => return true,
            (SlotType::Markup, Value::Markup(_)) => return true,
            (SlotType::Ref, Value::Ref(_)) => return true,
            (SlotType::List, Value::List(_)) => return true,
            (SlotType::Record, Value::Record(_)) => return true,
            _ => return false,
        }
    }
}

/// One named slot on a class.
pub struct SlotDef {
    pub name: &'static str,
    pub constraint: Option<SlotType>,
    pub default: Option<fn() -> Value>,
}

impl SlotDef {
    /// A slot accepting any value.
    pub fn untyped(name: &'static str) -> SlotDef {
        return SlotDef {
            name,
            constraint: None,
            default: None,
        };
    }

    /// A slot constrained to one value kind.
    pub fn typed(name: &'static str, constraint: SlotType) -> SlotDef {
        return SlotDef {
            name,
            constraint: Some(constraint),
            default: None,
        };
    }

    /// Attach an initial value, written when the model is created.
    pub fn with_default(mut self, default: fn() -> Value) -> SlotDef {
        self.default = Some(default);
        return self;
    }
}

/// How a method interacts with history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    /// Reads only. Skips the wave machinery entirely.
    Pure,
    /// Mutates, carrying a wave-merge descriptor. `tag` is a colon
    /// separated template; `{id}` and `{rate}` are substituted per
    /// call, and `*` matches anything.
    Wave { tag: &'static str, rate: u32 },
}

/// A method body runs against the live top world through the context.
pub type MethodBody = fn(&mut MethodCx, &[Value]) -> Result<Value, WorldError>;

pub struct MethodDef {
    pub name: &'static str,
    pub kind: MethodKind,
    pub body: MethodBody,
}

impl MethodDef {
    pub fn pure(name: &'static str, body: MethodBody) -> MethodDef {
        return MethodDef {
            name,
            kind: MethodKind::Pure,
            body,
        };
    }

    pub fn wave(name: &'static str, tag: &'static str, rate: u32, body: MethodBody) -> MethodDef {
        return MethodDef {
            name,
            kind: MethodKind::Wave { tag, rate },
            body,
        };
    }
}

/// A registered model class.
pub struct ClassDef {
    name: Rc<str>,
    slots: Vec<SlotDef>,
    methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(name: &str, slots: Vec<SlotDef>, methods: Vec<MethodDef>) -> ClassDef {
        return ClassDef {
            name: Rc::from(name),
            slots,
            methods,
        };
    }

    #[inline]
    pub fn name(&self) -> &Rc<str> {
        return &self.name;
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        return self.slots.len();
    }

    pub fn slot(&self, index: usize) -> &SlotDef {
        return &self.slots[index];
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        return self.slots.iter().position(|slot| slot.name == name);
    }

    pub fn slots(&self) -> &[SlotDef] {
        return &self.slots;
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        return self.methods.iter().find(|method| method.name == name);
    }
}

/// Name-to-class table. Populated at startup, read-only afterwards.
pub struct Registry {
    classes: FxHashMap<Rc<str>, Rc<ClassDef>>,
}

impl Registry {
    pub fn new() -> Registry {
        return Registry {
            classes: FxHashMap::default(),
        };
    }

    /// Register a class. Double registration is a programming error.
    pub fn register(&mut self, def: ClassDef) {
        let name = Rc::clone(def.name());
        if self.classes.contains_key(&name) {
            panic!("class {} registered twice", name);
        }
        self.classes.insert(name, Rc::new(def));
    }

    pub fn class(&self, name: &str) -> Option<&Rc<ClassDef>> {
        return self.classes.get(name);
    }

    pub fn require(&self, name: &str) -> Result<Rc<ClassDef>, WorldError> {
        match self.classes.get(name) {
            Some(class) => return Ok(Rc::clone(class)),
            None => return Err(WorldError::UnknownClass(name.to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        return Self::new();
    }
}

/// What a method body sees: its target model viewed through the live
/// world chain.
pub struct MethodCx<'a> {
    worlds: &'a mut Vec<World>,
    registry: &'a Registry,
    target: ModelId,
    class: Rc<ClassDef>,
}

impl<'a> MethodCx<'a> {
    pub(crate) fn new(
        worlds: &'a mut Vec<World>,
        registry: &'a Registry,
        target: ModelId,
        class: Rc<ClassDef>,
    ) -> MethodCx<'a> {
        return MethodCx {
            worlds,
            registry,
            target,
            class,
        };
    }

    /// The ref this method was invoked on.
    pub fn target(&self) -> ModelId {
        return Rc::clone(&self.target);
    }

    /// Read a slot by name through the world chain.
    pub fn read(&mut self, slot: &str) -> Result<Value, WorldError> {
        let index = self.slot_index(slot)?;
        return Ok(world::read_slot(self.worlds, &self.target, index));
    }

    /// Stage a write to a slot by name, enforcing its constraint.
    pub fn write(&mut self, slot: &str, value: Value) -> Result<(), WorldError> {
        let index = self.slot_index(slot)?;
        check_constraint(&self.class, index, &value)?;
        return world::write_slot(self.worlds, &self.target, index, value);
    }

    /// Create a sibling model in the live world, defaults applied.
    pub fn create(&mut self, class_name: &str) -> Result<ModelId, WorldError> {
        let class = self.registry.require(class_name)?;
        return create_model(self.worlds, &class);
    }

    fn slot_index(&self, name: &str) -> Result<usize, WorldError> {
        match self.class.slot_index(name) {
            Some(index) => return Ok(index),
            None => return Err(WorldError::UnknownSlot(name.to_string())),
        }
    }
}

/// Enforce a class slot constraint on an assignment.
pub(crate) fn check_constraint(class: &ClassDef, slot: usize, value: &Value) -> Result<(), WorldError> {
    let def = class.slot(slot);
    if let Some(constraint) = &def.constraint {
        if !constraint.admits(value) {
            return Err(WorldError::TypeMismatch {
                slot: def.name.to_string(),
                value: format!("{:?}", value),
            });
        }
    }
    return Ok(());
}

/// Spawn a model of `class` in the live world and write its slot
/// defaults.
pub(crate) fn create_model(worlds: &mut Vec<World>, class: &Rc<ClassDef>) -> Result<ModelId, WorldError> {
    let top = worlds.len() - 1;
    if worlds[top].locked() {
        return Err(WorldError::LockedWrite(format!("create {}", class.name())));
    }
    let id = worlds[top].create_model(Rc::clone(class.name()), class.slot_count());
    for (index, slot) in class.slots().iter().enumerate() {
        if let Some(default) = slot.default {
            world::write_slot(worlds, &id, index, default())?;
        }
    }
    return Ok(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_class() -> ClassDef {
        fn title_of(cx: &mut MethodCx, _args: &[Value]) -> Result<Value, WorldError> {
            return cx.read("title");
        }
        fn retitle(cx: &mut MethodCx, args: &[Value]) -> Result<Value, WorldError> {
            cx.write("title", args[0].clone())?;
            return Ok(Value::None);
        }
        return ClassDef::new(
            "note",
            vec![
                SlotDef::typed("title", SlotType::Str).with_default(|| Value::str("")),
                SlotDef::typed("stars", SlotType::Int),
            ],
            vec![
                MethodDef::pure("title_of", title_of),
                MethodDef::wave("retitle", "note:retitle:{id}", 1, retitle),
            ],
        );
    }

    #[test]
    fn slot_lookup_by_name() {
        let class = note_class();
        assert_eq!(class.slot_index("title"), Some(0));
        assert_eq!(class.slot_index("stars"), Some(1));
        assert_eq!(class.slot_index("missing"), None);
    }

    #[test]
    fn method_lookup_by_name() {
        let class = note_class();
        assert!(class.method("retitle").is_some());
        assert!(matches!(
            class.method("retitle").unwrap().kind,
            MethodKind::Wave { rate: 1, .. }
        ));
        assert!(class.method("nope").is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_panics() {
        let mut registry = Registry::new();
        registry.register(note_class());
        registry.register(note_class());
    }

    #[test]
    fn create_applies_defaults() {
        let mut registry = Registry::new();
        registry.register(note_class());
        let class = registry.require("note").unwrap();
        let mut worlds = vec![World::new()];
        let id = create_model(&mut worlds, &class).unwrap();
        assert_eq!(
            world::read_slot(&mut worlds, &id, 0),
            Value::str("")
        );
        // No default on stars, so nothing was written.
        assert_eq!(world::read_slot(&mut worlds, &id, 1), Value::None);
    }

    #[test]
    fn constraints_reject_mismatched_values() {
        let class = note_class();
        let err = check_constraint(&class, 1, &Value::str("three")).unwrap_err();
        assert!(matches!(err, WorldError::TypeMismatch { .. }));
        assert!(check_constraint(&class, 1, &Value::Int(3)).is_ok());
        assert!(check_constraint(&class, 1, &Value::None).is_ok());
    }

    #[test]
    fn methods_run_through_the_context() {
        let mut registry = Registry::new();
        registry.register(note_class());
        let class = registry.require("note").unwrap();
        let mut worlds = vec![World::new()];
        let id = create_model(&mut worlds, &class).unwrap();

        let method = class.method("retitle").unwrap().body;
        let mut cx = MethodCx::new(&mut worlds, &registry, Rc::clone(&id), Rc::clone(&class));
        method(&mut cx, &[Value::str("hello")]).unwrap();

        let read = class.method("title_of").unwrap().body;
        let mut cx = MethodCx::new(&mut worlds, &registry, id, class);
        let title = read(&mut cx, &[]).unwrap();
        assert_eq!(title, Value::str("hello"));
    }
}
