//! Gates, gate vectors and connections.
use std::fmt;
use std::time::Duration;

use super::{full_name, ComponentId, GraphError, ModuleGraph, ResolutionError, StructuralError};
use crate::notify::ModelChange;

/// Declared type of a gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GateType {
    /// An input gate.
    Input,
    /// An output gate.
    Output,
    /// A bidirectional gate, made of an input half `name$i` and an output half
    /// `name$o`.
    Inout,
}

impl GateType {
    fn directions(self) -> &'static [Direction] {
        match self {
            Self::Input => &[Direction::Input],
            Self::Output => &[Direction::Output],
            Self::Inout => &[Direction::Input, Direction::Output],
        }
    }
}

/// Direction of a single (half-)gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Messages arrive through this gate.
    Input,
    /// Messages leave through this gate.
    Output,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Self::Input => "$i",
            Self::Output => "$o",
        }
    }
}

/// Unique identifier of a gate.
///
/// The slot of a deleted gate may be taken over by a later gate of the same
/// component; the insertion epoch tells them apart, so the identifier of a
/// deleted gate never resolves again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GateId {
    module: ComponentId,
    slot: usize,
    epoch: u64,
}

impl GateId {
    /// Returns the component owning the gate.
    pub fn module(self) -> ComponentId {
        self.module
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.module, self.slot, self.epoch)
    }
}

/// Transmission properties of a connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    /// Propagation delay added to every message.
    pub delay: Duration,
    /// Data rate in bit/s; `None` means infinite.
    pub datarate: Option<f64>,
    /// A disabled channel drops every message sent through it.
    pub disabled: bool,
}

impl Channel {
    /// Creates a channel with a propagation delay only.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Sets the data rate, in bit/s.
    pub fn datarate(mut self, bits_per_second: f64) -> Self {
        self.datarate = Some(bits_per_second);
        self
    }

    /// Marks the channel as disabled.
    pub fn disable(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Time needed to transmit `bit_length` bits at the channel's data rate.
    ///
    /// Returns `None` if the duration is not representable.
    pub fn transmission_duration(&self, bit_length: u64) -> Option<Duration> {
        match self.datarate {
            Some(rate) if rate > 0.0 && bit_length > 0 => {
                Duration::try_from_secs_f64(bit_length as f64 / rate).ok()
            }
            _ => Some(Duration::ZERO),
        }
    }
}

/// A (half-)gate owned by a component.
#[derive(Clone, Debug)]
pub struct Gate {
    pub(super) epoch: u64,
    name: String,
    gate_type: GateType,
    direction: Direction,
    index: Option<usize>,
    next: Option<GateId>,
    prev: Option<GateId>,
    channel: Option<Channel>,
}

impl Gate {
    fn new(name: &str, gate_type: GateType, direction: Direction, index: Option<usize>) -> Self {
        Self {
            epoch: 0,
            name: name.to_owned(),
            gate_type,
            direction,
            index,
            next: None,
            prev: None,
            channel: None,
        }
    }

    /// Returns the declared name, without half-gate suffix or index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the full name, e.g. `port$o[2]`.
    pub fn full_name(&self) -> String {
        let name = match self.gate_type {
            GateType::Inout => format!("{}{}", self.name, self.direction.suffix()),
            _ => self.name.clone(),
        };

        full_name(&name, self.index)
    }

    /// Returns the declared type.
    pub fn gate_type(&self) -> GateType {
        self.gate_type
    }

    /// Returns the direction of this half-gate.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the index within the gate vector, if any.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Returns the gate this one is connected to.
    pub fn next(&self) -> Option<GateId> {
        self.next
    }

    /// Returns the gate connected to this one.
    pub fn prev(&self) -> Option<GateId> {
        self.prev
    }

    /// Returns the channel of the outgoing connection, if any.
    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// Returns `true` if the gate is connected on either side.
    pub fn is_connected(&self) -> bool {
        self.next.is_some() || self.prev.is_some()
    }
}

/// Declaration of a gate or gate vector with its half-gate slots.
#[derive(Clone, Debug)]
pub(super) struct GateDesc {
    pub(super) name: String,
    gate_type: GateType,
    size: Option<usize>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl GateDesc {
    fn slots(&self, direction: Direction) -> &[usize] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    fn slots_mut(&mut self, direction: Direction) -> &mut Vec<usize> {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }

    fn all_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.inputs.iter().chain(&self.outputs).copied()
    }
}

impl ModuleGraph {
    /// Adds a gate to a component; `size` makes it a gate vector.
    pub fn add_gate(
        &mut self,
        module: ComponentId,
        name: &str,
        gate_type: GateType,
        size: Option<usize>,
    ) -> Result<(), GraphError> {
        super::validate_name(name)?;
        if self.node(module)?.desc_position(name).is_some() {
            return Err(StructuralError::DuplicateName {
                parent: self.describe(module),
                name: name.to_owned(),
            }
            .into());
        }

        self.notify(
            Some(module),
            ModelChange::PreGateAdd {
                module,
                name: name.to_owned(),
                gate_type,
                size,
            },
        );

        let component = self.node_mut(module)?;
        let mut desc = GateDesc {
            name: name.to_owned(),
            gate_type,
            size,
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        for &direction in gate_type.directions() {
            for index in 0..size.unwrap_or(1) {
                let slot = component.insert_gate(Gate::new(
                    name,
                    gate_type,
                    direction,
                    size.map(|_| index),
                ));
                desc.slots_mut(direction).push(slot);
            }
        }
        component.gate_descs.push(desc);

        self.notify(
            Some(module),
            ModelChange::PostGateAdd {
                module,
                name: name.to_owned(),
            },
        );

        Ok(())
    }

    /// Deletes a gate or gate vector, disconnecting it first.
    pub fn delete_gate(&mut self, module: ComponentId, name: &str) -> Result<(), GraphError> {
        let position = self.desc_position(module, name)?;

        self.notify(
            Some(module),
            ModelChange::PreGateDelete {
                module,
                name: name.to_owned(),
            },
        );

        let slots: Vec<usize> = self.node(module)?.gate_descs[position].all_slots().collect();
        for &slot in &slots {
            if let Some(gate) = self.gate_at(module, slot) {
                self.unlink(gate)?;
            }
        }
        let component = self.node_mut(module)?;
        for slot in slots {
            component.gates.remove(slot);
        }
        component.gate_descs.remove(position);

        self.notify(
            Some(module),
            ModelChange::PostGateDelete {
                module,
                name: name.to_owned(),
            },
        );

        Ok(())
    }

    /// Changes the size of a gate vector.
    ///
    /// Shrinking is rejected if any of the removed gates is connected.
    pub fn resize_gate_vector(
        &mut self,
        module: ComponentId,
        name: &str,
        new_size: usize,
    ) -> Result<(), GraphError> {
        let position = self.desc_position(module, name)?;
        let component = self.node(module)?;
        let desc = &component.gate_descs[position];
        let old_size = desc
            .size
            .ok_or_else(|| StructuralError::NotAVector(self.describe_gate_name(module, name)))?;
        if old_size == new_size {
            return Ok(());
        }
        let removed_connected = desc
            .all_slots()
            .filter_map(|slot| component.gates.get(slot))
            .any(|gate| gate.index.is_some_and(|i| i >= new_size) && gate.is_connected());
        if removed_connected {
            return Err(
                StructuralError::ShrinkConnected(self.describe_gate_name(module, name)).into(),
            );
        }

        let change = |pre| {
            let (module, name) = (module, name.to_owned());
            if pre {
                ModelChange::PreGateVectorResize {
                    module,
                    name,
                    old_size,
                    new_size,
                }
            } else {
                ModelChange::PostGateVectorResize {
                    module,
                    name,
                    old_size,
                    new_size,
                }
            }
        };
        self.notify(Some(module), change(true));

        let component = self.node_mut(module)?;
        let mut desc = component.gate_descs[position].clone();
        let gate_type = desc.gate_type;
        for &direction in gate_type.directions() {
            let slots = desc.slots_mut(direction);
            if new_size < old_size {
                for slot in slots.drain(new_size..) {
                    component.gates.remove(slot);
                }
            } else {
                for index in old_size..new_size {
                    slots.push(component.insert_gate(Gate::new(
                        name,
                        gate_type,
                        direction,
                        Some(index),
                    )));
                }
            }
        }
        desc.size = Some(new_size);
        component.gate_descs[position] = desc;

        self.notify(Some(module), change(false));

        Ok(())
    }

    /// Resolves a gate by name and optional vector index.
    ///
    /// Halves of an inout gate are addressed as `name$i` and `name$o`.
    pub fn gate_id(
        &self,
        module: ComponentId,
        name: &str,
        index: Option<usize>,
    ) -> Result<GateId, GraphError> {
        let component = self.node(module)?;
        let no_such_gate = || ResolutionError::NoSuchGate {
            module: self.describe(module),
            gate: full_name(name, index),
        };

        let (base, half) = match name.split_once('$') {
            Some((base, "i")) => (base, Some(Direction::Input)),
            Some((base, "o")) => (base, Some(Direction::Output)),
            Some(_) => return Err(no_such_gate().into()),
            None => (name, None),
        };
        let desc = component
            .desc_position(base)
            .map(|position| &component.gate_descs[position])
            .ok_or_else(no_such_gate)?;
        let direction = match (desc.gate_type, half) {
            (GateType::Input, None) => Direction::Input,
            (GateType::Output, None) => Direction::Output,
            (GateType::Inout, Some(direction)) => direction,
            _ => return Err(no_such_gate().into()),
        };
        let slots = desc.slots(direction);
        let slot = match (desc.size, index) {
            (None, None) => slots.first().copied(),
            (Some(size), Some(index)) => {
                if index >= size {
                    return Err(ResolutionError::IndexOutOfRange {
                        gate: self.describe_gate_name(module, name),
                        index,
                        size,
                    }
                    .into());
                }
                slots.get(index).copied()
            }
            (Some(_), None) => {
                return Err(StructuralError::IsAVector(self.describe_gate_name(module, name)).into())
            }
            (None, Some(_)) => {
                return Err(StructuralError::NotAVector(self.describe_gate_name(module, name)).into())
            }
        };

        slot.and_then(|slot| self.gate_at(module, slot))
            .ok_or_else(|| no_such_gate().into())
    }

    /// Returns the gate with this identifier, if it exists.
    pub fn gate(&self, id: GateId) -> Option<&Gate> {
        self.component(id.module)
            .and_then(|component| component.gates.get(id.slot))
            .filter(|gate| gate.epoch == id.epoch)
    }

    /// Returns the size of a gate vector, or `None` for a scalar gate.
    pub fn gate_size(&self, module: ComponentId, name: &str) -> Result<Option<usize>, GraphError> {
        let position = self.desc_position(module, name)?;

        Ok(self.node(module)?.gate_descs[position].size)
    }

    /// Returns all half-gates of a component in declaration order.
    pub fn gates(&self, module: ComponentId) -> Vec<GateId> {
        self.component(module)
            .map(|component| {
                component
                    .gate_descs
                    .iter()
                    .flat_map(GateDesc::all_slots)
                    .filter_map(|slot| self.gate_at(module, slot))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the full path of a gate, e.g. `net.host[0].port$o[1]`.
    pub fn gate_path(&self, id: GateId) -> Option<String> {
        let gate = self.gate(id)?;

        Some(format!("{}.{}", self.full_path(id.module)?, gate.full_name()))
    }

    /// Connects `from` to `to`, optionally through a channel.
    ///
    /// Valid connections are output to sibling (or own) input, child output to
    /// parent output, parent input to child input, and a module's input to its
    /// own output. `PreGateConnect`/`PostGateConnect` are emitted on the
    /// compound module holding the connection, and the path notifications on
    /// the owners of both ends of the resulting path.
    pub fn connect(
        &mut self,
        from: GateId,
        to: GateId,
        channel: Option<Channel>,
    ) -> Result<(), GraphError> {
        let from_gate = self.gate(from).ok_or(ResolutionError::InvalidGate(from))?;
        let to_gate = self.gate(to).ok_or(ResolutionError::InvalidGate(to))?;
        if from_gate.next.is_some() {
            return Err(StructuralError::AlreadyConnected(self.describe_gate(from)).into());
        }
        if to_gate.prev.is_some() {
            return Err(StructuralError::AlreadyConnected(self.describe_gate(to)).into());
        }

        let (src, dst) = (from.module, to.module);
        let valid = match (from_gate.direction, to_gate.direction) {
            (Direction::Output, Direction::Input) => {
                self.parent(src).is_some() && self.parent(src) == self.parent(dst)
            }
            (Direction::Output, Direction::Output) => self.parent(src) == Some(dst),
            (Direction::Input, Direction::Input) => self.parent(dst) == Some(src),
            (Direction::Input, Direction::Output) => src == dst,
        };
        if !valid {
            return Err(StructuralError::InvalidConnection {
                from: self.describe_gate(from),
                to: self.describe_gate(to),
            }
            .into());
        }
        if self.path_end(to)? == from {
            return Err(StructuralError::GateCycle {
                from: self.describe_gate(from),
                to: self.describe_gate(to),
            }
            .into());
        }

        let compound = self.compound_of(from)?;
        let start = self.path_start(from)?;
        let end = self.path_end(to)?;

        self.notify(
            Some(compound),
            ModelChange::PreGateConnect {
                gate: from,
                target: to,
                channel: channel.clone(),
            },
        );
        self.notify_path(start, end, from, true, true);

        let from_gate = self.gate_mut(from)?;
        from_gate.next = Some(to);
        from_gate.channel = channel;
        self.gate_mut(to)?.prev = Some(from);

        self.notify_path(start, end, from, true, false);
        self.notify(Some(compound), ModelChange::PostGateConnect { gate: from });

        Ok(())
    }

    /// Removes the outgoing connection of `from`; does nothing if it is not
    /// connected.
    pub fn disconnect(&mut self, from: GateId) -> Result<(), GraphError> {
        let to = match self.gate(from).ok_or(ResolutionError::InvalidGate(from))?.next {
            Some(to) => to,
            None => return Ok(()),
        };

        let compound = self.compound_of(from)?;
        let start = self.path_start(from)?;
        let end = self.path_end(from)?;

        self.notify(Some(compound), ModelChange::PreGateDisconnect { gate: from });
        self.notify_path(start, end, from, false, true);

        let from_gate = self.gate_mut(from)?;
        from_gate.next = None;
        let channel = from_gate.channel.take();
        if let Ok(to_gate) = self.gate_mut(to) {
            to_gate.prev = None;
        }

        self.notify_path(start, end, from, false, false);
        self.notify(
            Some(compound),
            ModelChange::PostGateDisconnect {
                gate: from,
                target: to,
                channel,
            },
        );

        Ok(())
    }

    /// Returns the first gate of the chain `gate` belongs to.
    pub fn path_start(&self, gate: GateId) -> Result<GateId, ResolutionError> {
        let mut current = gate;
        loop {
            match self.gate(current).ok_or(ResolutionError::InvalidGate(current))?.prev {
                Some(prev) => current = prev,
                None => return Ok(current),
            }
        }
    }

    /// Returns the last gate of the chain `gate` belongs to.
    pub fn path_end(&self, gate: GateId) -> Result<GateId, ResolutionError> {
        let mut current = gate;
        loop {
            match self.gate(current).ok_or(ResolutionError::InvalidGate(current))?.next {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
    }

    /// Returns `true` if a gate of the module is connected to something outside
    /// of it.
    pub(super) fn has_outer_connections(&self, module: ComponentId) -> bool {
        self.component(module).is_some_and(|component| {
            component.gates.iter().any(|(_, gate)| match gate.direction {
                Direction::Input => gate.prev.is_some(),
                Direction::Output => gate.next.is_some(),
            })
        })
    }

    /// Disconnects both sides of a gate.
    fn unlink(&mut self, gate: GateId) -> Result<(), GraphError> {
        let prev = self.gate(gate).ok_or(ResolutionError::InvalidGate(gate))?.prev;
        self.disconnect(gate)?;
        if let Some(prev) = prev {
            self.disconnect(prev)?;
        }

        Ok(())
    }

    /// The compound module in which the connection starting at `gate` lives.
    fn compound_of(&self, gate: GateId) -> Result<ComponentId, ResolutionError> {
        let direction = self
            .gate(gate)
            .ok_or(ResolutionError::InvalidGate(gate))?
            .direction;

        Ok(match direction {
            Direction::Output => self.parent(gate.module).unwrap_or(gate.module),
            Direction::Input => gate.module,
        })
    }

    fn notify_path(&mut self, start: GateId, end: GateId, changed: GateId, create: bool, pre: bool) {
        for owner in [start.module, end.module] {
            let change = match (create, pre) {
                (true, true) => ModelChange::PrePathCreate {
                    start,
                    end,
                    changed,
                },
                (true, false) => ModelChange::PostPathCreate {
                    start,
                    end,
                    changed,
                },
                (false, true) => ModelChange::PrePathCut {
                    start,
                    end,
                    changed,
                },
                (false, false) => ModelChange::PostPathCut {
                    start,
                    end,
                    changed,
                },
            };
            self.notify(Some(owner), change);
        }
    }

    fn gate_mut(&mut self, id: GateId) -> Result<&mut Gate, ResolutionError> {
        self.node_mut(id.module)?
            .gates
            .get_mut(id.slot)
            .filter(|gate| gate.epoch == id.epoch)
            .ok_or(ResolutionError::InvalidGate(id))
    }

    /// The identifier of the gate currently stored in a slot.
    fn gate_at(&self, module: ComponentId, slot: usize) -> Option<GateId> {
        let gate = self.component(module)?.gates.get(slot)?;

        Some(GateId {
            module,
            slot,
            epoch: gate.epoch,
        })
    }

    fn desc_position(&self, module: ComponentId, name: &str) -> Result<usize, GraphError> {
        self.node(module)?.desc_position(name).ok_or_else(|| {
            ResolutionError::NoSuchGate {
                module: self.describe(module),
                gate: name.to_owned(),
            }
            .into()
        })
    }

    fn describe_gate(&self, id: GateId) -> String {
        self.gate_path(id).unwrap_or_else(|| id.to_string())
    }

    fn describe_gate_name(&self, module: ComponentId, name: &str) -> String {
        format!("{}.{}", self.describe(module), name)
    }
}
