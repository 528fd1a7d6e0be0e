use std::collections::BTreeMap;
use std::fmt;

use slab::Slab;

use super::gate::{Gate, GateDesc};
use super::ComponentId;

/// A node of the module hierarchy.
///
/// Components are owned by the [`ModuleGraph`](super::ModuleGraph) arena and
/// refer to their parent and children by [`ComponentId`].
#[derive(Debug)]
pub struct Component {
    pub(super) id: ComponentId,
    pub(super) type_name: String,
    pub(super) name: String,
    pub(super) index: Option<usize>,
    pub(super) parent: Option<ComponentId>,
    pub(super) children: Vec<ComponentId>,
    pub(super) gates: Slab<Gate>,
    next_gate_epoch: u64,
    pub(super) gate_descs: Vec<GateDesc>,
    pub(super) params: BTreeMap<String, ParamValue>,
    pub(super) display_string: String,
}

impl Component {
    pub(super) fn new(
        id: ComponentId,
        type_name: String,
        name: String,
        index: Option<usize>,
        parent: Option<ComponentId>,
    ) -> Self {
        Self {
            id,
            type_name,
            name,
            index,
            parent,
            children: Vec::new(),
            gates: Slab::new(),
            next_gate_epoch: 0,
            gate_descs: Vec::new(),
            params: BTreeMap::new(),
            display_string: String::new(),
        }
    }

    /// Stores a new gate, stamping it with a fresh epoch.
    pub(super) fn insert_gate(&mut self, mut gate: Gate) -> usize {
        gate.epoch = self.next_gate_epoch;
        self.next_gate_epoch += 1;

        self.gates.insert(gate)
    }

    /// Returns the unique identifier of this component.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Returns the name of the type this component was instantiated from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the name of this component, without vector index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of this component within its module vector, if it
    /// belongs to one.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Returns the name of this component with its vector index, if any,
    /// e.g. `host[3]`.
    pub fn full_name(&self) -> String {
        full_name(&self.name, self.index)
    }

    /// Returns the parent component, or `None` for the root.
    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    /// Returns the children of this component in creation order.
    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    /// Returns the value of a parameter.
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Returns an iterator over all parameters, sorted by name.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &ParamValue)> + '_ {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the display string.
    pub fn display_string(&self) -> &str {
        &self.display_string
    }

    /// Returns the names of the gates and gate vectors of this component, in
    /// declaration order.
    pub fn gate_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.gate_descs.iter().map(|desc| desc.name.as_str())
    }

    /// Returns the number of half-gates owned by this component.
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub(super) fn desc_position(&self, name: &str) -> Option<usize> {
        self.gate_descs.iter().position(|desc| desc.name == name)
    }
}

/// Formats a name with an optional vector index.
pub(crate) fn full_name(name: &str, index: Option<usize>) -> String {
    match index {
        Some(index) => format!("{}[{}]", name, index),
        None => name.to_owned(),
    }
}

/// The value of a component parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Double(f64),
    /// A string.
    String(String),
}

impl ParamValue {
    /// Returns the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a floating-point number; integers are widened.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
