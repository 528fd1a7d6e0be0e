//! Module hierarchy and gate connectivity.
//!
//! The [`ModuleGraph`] is an arena of [`Component`]s indexed by
//! [`ComponentId`]. Parent/child links and gate connections are plain
//! identifiers, so deleting a component explicitly walks its subtree,
//! disconnects its gates and invalidates its identifier rather than relying on
//! destructors.
//!
//! Every mutation fires a pair of pre/post [`ModelChange`] notifications. A
//! notification is *emitted on* a component: it reaches the global listeners
//! and the listeners subscribed to that component or to one of its ancestors.
//!
//! Identifiers are never reused: a stale [`ComponentId`] simply stops
//! resolving once its component is deleted.
mod component;
mod gate;
mod path;

use std::fmt;

use thiserror::Error;

use crate::notify::{ModelChange, Notifier};

pub use component::{Component, ParamValue};
pub use gate::{Channel, Direction, Gate, GateId, GateType};
pub use path::Hop;

pub(crate) use component::full_name;

/// Unique identifier of a component.
///
/// Identifiers start at 1 and are never reused within a simulation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(usize);

impl ComponentId {
    /// Returns the numeric value of the identifier.
    pub fn get(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An error raised when an identifier, name or type cannot be resolved.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// No component type is registered under this name.
    #[error("unknown component type `{0}`")]
    UnknownType(String),
    /// The component does not exist or was deleted.
    #[error("component {0} does not exist")]
    NoSuchComponent(ComponentId),
    /// The component has no gate with this name.
    #[error("module `{module}` has no gate `{gate}`")]
    NoSuchGate {
        /// Full path of the module.
        module: String,
        /// Requested gate name.
        gate: String,
    },
    /// The gate does not exist or was deleted.
    #[error("gate {0} does not exist")]
    InvalidGate(GateId),
    /// A gate vector was addressed with an index beyond its size.
    #[error("index {index} is out of range for gate vector `{gate}` of size {size}")]
    IndexOutOfRange {
        /// Full name of the gate vector.
        gate: String,
        /// Requested index.
        index: usize,
        /// Current vector size.
        size: usize,
    },
}

/// An error raised when a mutation would leave the graph inconsistent.
///
/// The graph is left unchanged when such an error is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StructuralError {
    /// A root component already exists.
    #[error("the network already has a root module")]
    RootExists,
    /// The root component cannot be moved or deleted through this operation.
    #[error("operation not permitted on the root module")]
    RootOperation,
    /// The name is empty or contains a reserved character.
    #[error("invalid name `{0}`")]
    InvalidName(String),
    /// A sibling with the same name and index already exists.
    #[error("module `{parent}` already contains `{name}`")]
    DuplicateName {
        /// Full path of the parent module.
        parent: String,
        /// Full name of the clashing child or gate.
        name: String,
    },
    /// Reparenting would make a module its own ancestor.
    #[error("cannot move `{module}` under its own descendant `{new_parent}`")]
    Cycle {
        /// Full path of the module being moved.
        module: String,
        /// Full path of the requested parent.
        new_parent: String,
    },
    /// The module has gates connected outside of it.
    #[error("module `{0}` has connected gates")]
    ConnectedGates(String),
    /// The gate is not a vector.
    #[error("gate `{0}` is not a gate vector")]
    NotAVector(String),
    /// A gate vector was addressed without an index.
    #[error("gate `{0}` is a gate vector and requires an index")]
    IsAVector(String),
    /// Shrinking the vector would delete connected gates.
    #[error("cannot shrink gate vector `{0}` over connected gates")]
    ShrinkConnected(String),
    /// The gate is already connected on that side.
    #[error("gate `{0}` is already connected")]
    AlreadyConnected(String),
    /// The gates cannot be connected in this direction or at these levels of
    /// the hierarchy.
    #[error("cannot connect `{from}` to `{to}`")]
    InvalidConnection {
        /// Full path of the source gate.
        from: String,
        /// Full path of the destination gate.
        to: String,
    },
    /// The connection would close a loop in a gate chain.
    #[error("connecting `{from}` to `{to}` would close a loop")]
    GateCycle {
        /// Full path of the source gate.
        from: String,
        /// Full path of the destination gate.
        to: String,
    },
}

/// An error returned by mutating graph operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An identifier or name could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The mutation was rejected.
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// The arena holding the component tree.
#[derive(Debug)]
pub struct ModuleGraph {
    // Slot 0 is never used so that identifiers start at 1.
    components: Vec<Option<Component>>,
    root: Option<ComponentId>,
    len: usize,
    notifier: Notifier,
}

impl ModuleGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            components: vec![None],
            root: None,
            len: 0,
            notifier: Notifier::default(),
        }
    }

    /// Returns the root component, if any.
    pub fn root(&self) -> Option<ComponentId> {
        self.root
    }

    /// Returns the number of live components.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the graph has no components.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the component exists.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.component(id).is_some()
    }

    /// Returns the component with this identifier, if it exists.
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0).and_then(Option::as_ref)
    }

    /// Returns an iterator over all live components in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Component> + '_ {
        self.components.iter().filter_map(Option::as_ref)
    }

    /// Returns the parent of a component.
    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.component(id).and_then(Component::parent)
    }

    /// Returns the children of a component, or an empty slice if it does not
    /// exist.
    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.component(id).map(Component::children).unwrap_or(&[])
    }

    /// Returns the dot-separated path of full names from the root, e.g.
    /// `net.host[2].app`.
    pub fn full_path(&self, id: ComponentId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let component = self.component(id)?;
            names.push(component.full_name());
            current = component.parent;
        }
        names.reverse();

        Some(names.join("."))
    }

    /// Resolves a path as produced by [`full_path`](Self::full_path).
    pub fn find_by_path(&self, path: &str) -> Option<ComponentId> {
        let mut segments = path.split('.');
        let root = self.root?;
        if self.component(root)?.full_name() != segments.next()? {
            return None;
        }

        segments.try_fold(root, |current, segment| {
            self.children(current).iter().copied().find(|&child| {
                self.component(child)
                    .is_some_and(|c| c.full_name() == segment)
            })
        })
    }

    /// Returns `true` if `ancestor` is `module` or one of its ancestors.
    pub fn is_ancestor_of(&self, ancestor: ComponentId, module: ComponentId) -> bool {
        let mut current = Some(module);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }

        false
    }

    /// Returns the lowest common ancestor of two components, which may be one
    /// of the components themselves.
    pub fn common_ancestor(&self, a: ComponentId, b: ComponentId) -> Option<ComponentId> {
        let ancestry = self.ancestry(a);
        let mut current = self.component(b).map(Component::id);
        while let Some(id) = current {
            if ancestry.contains(&id) {
                return Some(id);
            }
            current = self.parent(id);
        }

        None
    }

    /// Returns the component followed by its ancestors up to the root.
    pub fn ancestry(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut ancestry = Vec::new();
        let mut current = self.component(id).map(Component::id);
        while let Some(id) = current {
            ancestry.push(id);
            current = self.parent(id);
        }

        ancestry
    }

    /// Returns the subtree rooted at `id` in pre-order (parents first).
    pub fn pre_order(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut order = Vec::new();
        let mut stack = Vec::new();
        if self.contains(id) {
            stack.push(id);
        }
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev());
        }

        order
    }

    /// Returns the subtree rooted at `id` in post-order (children first).
    pub fn post_order(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut order = Vec::new();
        self.collect_post_order(id, &mut order);

        order
    }

    fn collect_post_order(&self, id: ComponentId, order: &mut Vec<ComponentId>) {
        if let Some(component) = self.component(id) {
            for &child in &component.children {
                self.collect_post_order(child, order);
            }
            order.push(id);
        }
    }

    /// Creates a component under `parent`, or the root if `parent` is `None`.
    ///
    /// Fires `PreModuleAdd` on the parent and `PostModuleAdd` on the new
    /// component.
    pub fn create_component(
        &mut self,
        type_name: &str,
        name: &str,
        parent: Option<ComponentId>,
        index: Option<usize>,
    ) -> Result<ComponentId, GraphError> {
        validate_name(name)?;
        match parent {
            None if self.root.is_some() => return Err(StructuralError::RootExists.into()),
            None => {}
            Some(parent) => self.check_unique_child(parent, name, index)?,
        }

        self.notify(
            parent,
            ModelChange::PreModuleAdd {
                parent,
                type_name: type_name.to_owned(),
                name: name.to_owned(),
                index,
            },
        );

        let id = ComponentId(self.components.len());
        self.components.push(Some(Component::new(
            id,
            type_name.to_owned(),
            name.to_owned(),
            index,
            parent,
        )));
        self.len += 1;
        match parent {
            Some(parent) => self.node_mut(parent)?.children.push(id),
            None => self.root = Some(id),
        }

        self.notify(Some(id), ModelChange::PostModuleAdd { module: id });

        Ok(id)
    }

    /// Deletes a component and its whole subtree.
    ///
    /// Each deleted component fires `PreModuleDelete` on itself before its
    /// children are deleted and `PostModuleDelete` on its former parent once it
    /// is gone; gates are disconnected and deleted along the way. Returns the
    /// deleted identifiers in deletion order (children before parents).
    pub fn delete_component(&mut self, id: ComponentId) -> Result<Vec<ComponentId>, GraphError> {
        self.node(id)?;
        let mut deleted = Vec::new();
        self.delete_subtree(id, &mut deleted)?;

        Ok(deleted)
    }

    fn delete_subtree(
        &mut self,
        id: ComponentId,
        deleted: &mut Vec<ComponentId>,
    ) -> Result<(), GraphError> {
        self.notify(Some(id), ModelChange::PreModuleDelete { module: id });

        let children = self.node(id)?.children.clone();
        for child in children {
            self.delete_subtree(child, deleted)?;
        }
        let gate_names: Vec<String> = self
            .node(id)?
            .gate_descs
            .iter()
            .map(|desc| desc.name.clone())
            .collect();
        for name in gate_names {
            self.delete_gate(id, &name)?;
        }

        let component = self
            .components
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(ResolutionError::NoSuchComponent(id))?;
        self.len -= 1;
        match component.parent {
            Some(parent) => self.node_mut(parent)?.children.retain(|&c| c != id),
            None => self.root = None,
        }

        self.notify(
            component.parent,
            ModelChange::PostModuleDelete {
                module: id,
                parent: component.parent,
                type_name: component.type_name,
                name: component.name,
                index: component.index,
            },
        );
        self.notifier.forget_scope(id);
        deleted.push(id);

        Ok(())
    }

    /// Moves a component under a new parent.
    ///
    /// The component must not be the root, must not have gates connected
    /// outside of itself, and the new parent must not be one of its
    /// descendants. Moving a component under its current parent is a no-op.
    pub fn reparent(&mut self, id: ComponentId, new_parent: ComponentId) -> Result<(), GraphError> {
        let old_parent = self.node(id)?.parent.ok_or(StructuralError::RootOperation)?;
        self.node(new_parent)?;
        if old_parent == new_parent {
            return Ok(());
        }
        if self.is_ancestor_of(id, new_parent) {
            return Err(StructuralError::Cycle {
                module: self.describe(id),
                new_parent: self.describe(new_parent),
            }
            .into());
        }
        if self.has_outer_connections(id) {
            return Err(StructuralError::ConnectedGates(self.describe(id)).into());
        }
        let (name, index) = {
            let component = self.node(id)?;
            (component.name.clone(), component.index)
        };
        self.check_unique_child(new_parent, &name, index)?;

        self.notify(
            Some(id),
            ModelChange::PreModuleReparent {
                module: id,
                new_parent,
            },
        );

        self.node_mut(old_parent)?.children.retain(|&c| c != id);
        self.node_mut(new_parent)?.children.push(id);
        self.node_mut(id)?.parent = Some(new_parent);

        self.notify(
            Some(id),
            ModelChange::PostModuleReparent {
                module: id,
                old_parent,
            },
        );

        Ok(())
    }

    /// Sets the value of a parameter, creating it if needed.
    pub fn set_parameter(
        &mut self,
        id: ComponentId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), GraphError> {
        self.node(id)?;
        validate_name(name)?;

        self.notify(
            Some(id),
            ModelChange::PreParameterChange {
                module: id,
                name: name.to_owned(),
            },
        );
        self.node_mut(id)?.params.insert(name.to_owned(), value);
        self.notify(
            Some(id),
            ModelChange::PostParameterChange {
                module: id,
                name: name.to_owned(),
            },
        );

        Ok(())
    }

    /// Replaces the display string of a component.
    pub fn set_display_string(
        &mut self,
        id: ComponentId,
        display_string: &str,
    ) -> Result<(), GraphError> {
        self.node(id)?;

        self.notify(Some(id), ModelChange::PreDisplayStringChange { module: id });
        self.node_mut(id)?.display_string = display_string.to_owned();
        self.notify(Some(id), ModelChange::PostDisplayStringChange { module: id });

        Ok(())
    }

    pub(crate) fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    /// Emits a model change on `source`.
    fn notify(&mut self, source: Option<ComponentId>, change: ModelChange) {
        if self.notifier.is_empty() {
            return;
        }
        let scope = source.map(|id| self.ancestry(id)).unwrap_or_default();
        self.notifier.model_change(source, &scope, &change);
    }

    fn node(&self, id: ComponentId) -> Result<&Component, ResolutionError> {
        self.component(id)
            .ok_or(ResolutionError::NoSuchComponent(id))
    }

    fn node_mut(&mut self, id: ComponentId) -> Result<&mut Component, ResolutionError> {
        self.components
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ResolutionError::NoSuchComponent(id))
    }

    /// Full path for error messages, falling back to the identifier.
    fn describe(&self, id: ComponentId) -> String {
        self.full_path(id).unwrap_or_else(|| id.to_string())
    }

    fn check_unique_child(
        &self,
        parent: ComponentId,
        name: &str,
        index: Option<usize>,
    ) -> Result<(), GraphError> {
        let clash = self.node(parent)?.children.iter().any(|&child| {
            self.component(child)
                .is_some_and(|c| c.name == name && c.index == index)
        });
        if clash {
            return Err(StructuralError::DuplicateName {
                parent: self.describe(parent),
                name: full_name(name, index),
            }
            .into());
        }

        Ok(())
    }
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<(), StructuralError> {
    if name.is_empty() || name.contains(['.', '[', ']', '$']) {
        return Err(StructuralError::InvalidName(name.to_owned()));
    }

    Ok(())
}
