//! Character sheet host objects
//!
//! A [`CharacterSheet`] is shared state (`Send + Sync`) describing one
//! character's attributes and items. During a run it is exposed to scripts
//! as the global `Owner`:
//!
//! ```text
//! Owner.Attribute("Stamina").value
//! Owner.Attribute("Stamina").add(10)
//! Owner.hasItem("Lantern")
//! ```
//!
//! Every write through an attribute proxy is recorded in the run's modified
//! attribute ids. Writes are staged for the length of the run and reach the
//! sheet only through [`StagedWrites::commit`], so a failed run leaves the
//! sheet untouched.

use parking_lot::Mutex;
use qbscript_scripting::builtins::{arity, number_arg};
use qbscript_scripting::{EvaluationContext, HostObject, ScriptError, SideEffects, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

/// One attribute on the sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeState {
    pub id: String,
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Default)]
struct SheetData {
    attributes: Vec<AttributeState>,
    items: Vec<String>,
}

impl SheetData {
    fn by_name(&self, name: &str) -> Option<&AttributeState> {
        self.attributes.iter().find(|a| a.name == name)
    }

    fn by_id(&self, id: &str) -> Option<&AttributeState> {
        self.attributes.iter().find(|a| a.id == id)
    }

    fn by_id_mut(&mut self, id: &str) -> Option<&mut AttributeState> {
        self.attributes.iter_mut().find(|a| a.id == id)
    }
}

/// A character's attributes and owned items
#[derive(Debug, Clone)]
pub struct CharacterSheet {
    character_id: String,
    ruleset_id: String,
    data: Arc<Mutex<SheetData>>,
}

impl CharacterSheet {
    pub fn new(character_id: impl Into<String>, ruleset_id: impl Into<String>) -> Self {
        Self {
            character_id: character_id.into(),
            ruleset_id: ruleset_id.into(),
            data: Arc::new(Mutex::new(SheetData::default())),
        }
    }

    pub fn character_id(&self) -> &str {
        &self.character_id
    }

    pub fn ruleset_id(&self) -> &str {
        &self.ruleset_id
    }

    /// Add (or replace) an attribute
    pub fn add_attribute(&self, id: impl Into<String>, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        let attribute = AttributeState {
            id: id.into(),
            name: name.into(),
            value: value.into(),
        };
        let mut data = self.data.lock();
        data.attributes.retain(|a| a.id != attribute.id);
        data.attributes.push(attribute);
    }

    pub fn add_item(&self, name: impl Into<String>) {
        self.data.lock().items.push(name.into());
    }

    /// Remove one item with this name; false when none is owned
    pub fn remove_item(&self, name: &str) -> bool {
        let mut data = self.data.lock();
        match data.items.iter().position(|i| i == name) {
            Some(index) => {
                data.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has_item(&self, name: &str) -> bool {
        self.data.lock().items.iter().any(|i| i == name)
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeState> {
        self.data.lock().by_name(name).cloned()
    }

    pub fn attribute_by_id(&self, id: &str) -> Option<AttributeState> {
        self.data.lock().by_id(id).cloned()
    }

    /// Current value of the attribute called `name`
    pub fn value(&self, name: &str) -> Option<serde_json::Value> {
        self.data.lock().by_name(name).map(|a| a.value.clone())
    }

    /// Set an attribute by name; false when it does not exist
    pub fn set_value(&self, name: &str, value: serde_json::Value) -> bool {
        let mut data = self.data.lock();
        match data.attributes.iter_mut().find(|a| a.name == name) {
            Some(attribute) => {
                attribute.value = value;
                true
            }
            None => false,
        }
    }

    /// Set an attribute by id, returning its name
    pub fn set_value_by_id(&self, id: &str, value: serde_json::Value) -> Option<String> {
        let mut data = self.data.lock();
        let attribute = data.by_id_mut(id)?;
        attribute.value = value;
        Some(attribute.name.clone())
    }

    /// Snapshot of every attribute
    pub fn attributes(&self) -> Vec<AttributeState> {
        self.data.lock().attributes.clone()
    }

    /// Expose the sheet to a run as `Owner`. Attribute writes made by the
    /// run are held in the returned [`StagedWrites`] until committed.
    #[must_use = "staged attribute writes are lost unless committed"]
    pub fn install(&self, ctx: &mut EvaluationContext) -> StagedWrites {
        let pending = Pending::default();
        ctx.define_object(
            "Owner",
            Rc::new(OwnerObject {
                data: Arc::clone(&self.data),
                pending: Rc::clone(&pending),
            }),
        );
        StagedWrites {
            data: Arc::clone(&self.data),
            pending,
        }
    }
}

/// Attribute values written during a run, by attribute id
type Pending = Rc<RefCell<BTreeMap<String, serde_json::Value>>>;

/// Attribute writes of one run, not yet applied to the sheet
#[derive(Debug)]
pub struct StagedWrites {
    data: Arc<Mutex<SheetData>>,
    pending: Pending,
}

impl StagedWrites {
    /// Ids of the attributes written so far
    pub fn attribute_ids(&self) -> Vec<String> {
        self.pending.borrow().keys().cloned().collect()
    }

    /// Apply every staged write to the sheet, returning how many landed
    pub fn commit(self) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut data = self.data.lock();
        let mut applied = 0;
        for (id, value) in pending {
            if let Some(attribute) = data.by_id_mut(&id) {
                attribute.value = value;
                applied += 1;
            }
        }
        applied
    }
}

/// `Owner` global
#[derive(Debug)]
struct OwnerObject {
    data: Arc<Mutex<SheetData>>,
    pending: Pending,
}

impl HostObject for OwnerObject {
    fn type_name(&self) -> &str {
        "Owner"
    }

    fn call_method(&self, name: &str, args: &[Value], _effects: &mut SideEffects) -> Result<Value, ScriptError> {
        match name {
            "Attribute" => {
                arity(name, args, 1)?;
                let attribute_name = args[0].to_string();
                let data = self.data.lock();
                let attribute = data
                    .by_name(&attribute_name)
                    .ok_or_else(|| ScriptError::Runtime(format!("Attribute '{}' not found", attribute_name)))?;
                Ok(Value::Object(Rc::new(AttributeProxy {
                    data: Arc::clone(&self.data),
                    pending: Rc::clone(&self.pending),
                    id: attribute.id.clone(),
                    name: attribute.name.clone(),
                })))
            }
            "hasItem" => {
                arity(name, args, 1)?;
                let item = args[0].to_string();
                Ok(Value::Bool(self.data.lock().items.iter().any(|i| *i == item)))
            }
            _ => Err(ScriptError::UnknownMethod {
                receiver: self.type_name().to_string(),
                method: name.to_string(),
            }),
        }
    }
}

/// Handle to one attribute, returned by `Owner.Attribute(name)`
#[derive(Debug)]
struct AttributeProxy {
    data: Arc<Mutex<SheetData>>,
    pending: Pending,
    id: String,
    name: String,
}

impl AttributeProxy {
    /// Staged value if this run wrote one, else the sheet's
    fn current(&self) -> Value {
        if let Some(value) = self.pending.borrow().get(&self.id) {
            return Value::from_json(value);
        }
        self.data
            .lock()
            .by_id(&self.id)
            .map(|a| Value::from_json(&a.value))
            .unwrap_or(Value::Null)
    }

    fn write(&self, value: Value, effects: &mut SideEffects) -> Value {
        self.pending.borrow_mut().insert(self.id.clone(), value.to_json());
        effects.mark_modified(&self.id);
        value
    }

    fn current_number(&self) -> Result<f64, ScriptError> {
        let current = self.current();
        current.coerce_number().ok_or_else(|| {
            ScriptError::TypeError(format!("Attribute '{}' is not numeric ({})", self.name, current))
        })
    }
}

impl HostObject for AttributeProxy {
    fn type_name(&self) -> &str {
        "Attribute"
    }

    fn get_property(&self, name: &str) -> Result<Value, ScriptError> {
        match name {
            "value" => Ok(self.current()),
            "name" => Ok(Value::String(self.name.clone())),
            "id" => Ok(Value::String(self.id.clone())),
            _ => Err(ScriptError::UnknownMethod {
                receiver: self.type_name().to_string(),
                method: name.to_string(),
            }),
        }
    }

    fn call_method(&self, name: &str, args: &[Value], effects: &mut SideEffects) -> Result<Value, ScriptError> {
        match name {
            "set" => {
                arity(name, args, 1)?;
                Ok(self.write(args[0].clone(), effects))
            }
            "add" => {
                arity(name, args, 1)?;
                let amount = number_arg(name, &args[0])?;
                let value = self.current_number()? + amount;
                Ok(self.write(Value::Number(value), effects))
            }
            "subtract" => {
                arity(name, args, 1)?;
                let amount = number_arg(name, &args[0])?;
                let value = self.current_number()? - amount;
                Ok(self.write(Value::Number(value), effects))
            }
            "value" => {
                arity(name, args, 0)?;
                Ok(self.current())
            }
            _ => Err(ScriptError::UnknownMethod {
                receiver: self.type_name().to_string(),
                method: name.to_string(),
            }),
        }
    }
}
