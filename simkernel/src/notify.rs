//! Notifications to external observers.
//!
//! Observers implement [`Listener`] and are registered on a
//! [`Simulation`](crate::simulation::Simulation), either globally or scoped to
//! a component. Scoped listeners receive the [`ModelChange`]s emitted on that
//! component or on any of its descendants; all other notifications are
//! delivered to every listener.
//!
//! Listeners are invoked synchronously, in registration order, and must not
//! assume that a component or gate named in a post-delete notification still
//! exists.
mod buffer;

use std::fmt;
use std::time::Duration;

use slab::Slab;

use crate::event::EventId;
use crate::graph::{Channel, ComponentId, GateId, GateType, Hop};
use crate::model::{RuntimeFailure, TerminationCondition};
use crate::simulation::RunState;
use crate::time::MonotonicTime;

pub use buffer::{Notification, NotificationBuffer, NotificationWriter};

/// A structural change of the model, announced before (`Pre*`) and after
/// (`Post*`) it happens.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelChange {
    /// A component is about to be created; emitted on its future parent.
    PreModuleAdd {
        /// Future parent, `None` for the root.
        parent: Option<ComponentId>,
        /// Type name.
        type_name: String,
        /// Name.
        name: String,
        /// Vector index.
        index: Option<usize>,
    },
    /// A component was created; emitted on the new component.
    PostModuleAdd {
        /// The new component.
        module: ComponentId,
    },
    /// A component is about to be deleted; emitted on the component.
    PreModuleDelete {
        /// The component.
        module: ComponentId,
    },
    /// A component was deleted; emitted on its former parent.
    PostModuleDelete {
        /// Identifier of the deleted component.
        module: ComponentId,
        /// Former parent, `None` for the root.
        parent: Option<ComponentId>,
        /// Former type name.
        type_name: String,
        /// Former name.
        name: String,
        /// Former vector index.
        index: Option<usize>,
    },
    /// A component is about to move; emitted on the component.
    PreModuleReparent {
        /// The component.
        module: ComponentId,
        /// The parent it moves under.
        new_parent: ComponentId,
    },
    /// A component was moved; emitted on the component.
    PostModuleReparent {
        /// The component.
        module: ComponentId,
        /// The parent it was removed from.
        old_parent: ComponentId,
    },
    /// A gate is about to be added.
    PreGateAdd {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
        /// Gate type.
        gate_type: GateType,
        /// Vector size, `None` for a scalar gate.
        size: Option<usize>,
    },
    /// A gate was added.
    PostGateAdd {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
    },
    /// A gate is about to be deleted.
    PreGateDelete {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
    },
    /// A gate was deleted.
    PostGateDelete {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
    },
    /// A gate vector is about to be resized.
    PreGateVectorResize {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
        /// Current size.
        old_size: usize,
        /// Requested size.
        new_size: usize,
    },
    /// A gate vector was resized.
    PostGateVectorResize {
        /// Owner.
        module: ComponentId,
        /// Gate name.
        name: String,
        /// Former size.
        old_size: usize,
        /// Current size.
        new_size: usize,
    },
    /// Two gates are about to be connected; emitted on the compound module
    /// holding the connection.
    PreGateConnect {
        /// Source gate.
        gate: GateId,
        /// Destination gate.
        target: GateId,
        /// Channel of the connection.
        channel: Option<Channel>,
    },
    /// Two gates were connected.
    PostGateConnect {
        /// Source gate.
        gate: GateId,
    },
    /// A connection is about to be removed.
    PreGateDisconnect {
        /// Source gate.
        gate: GateId,
    },
    /// A connection was removed.
    PostGateDisconnect {
        /// Source gate.
        gate: GateId,
        /// Former destination gate.
        target: GateId,
        /// Former channel.
        channel: Option<Channel>,
    },
    /// A connection is about to join a path; emitted on the owners of both
    /// path ends.
    PrePathCreate {
        /// First gate of the resulting path.
        start: GateId,
        /// Last gate of the resulting path.
        end: GateId,
        /// Source gate of the new connection.
        changed: GateId,
    },
    /// A connection joined a path.
    PostPathCreate {
        /// First gate of the path.
        start: GateId,
        /// Last gate of the path.
        end: GateId,
        /// Source gate of the new connection.
        changed: GateId,
    },
    /// A path is about to be cut; emitted on the owners of both path ends.
    PrePathCut {
        /// First gate of the path.
        start: GateId,
        /// Last gate of the path.
        end: GateId,
        /// Source gate of the removed connection.
        changed: GateId,
    },
    /// A path was cut.
    PostPathCut {
        /// Former first gate of the path.
        start: GateId,
        /// Former last gate of the path.
        end: GateId,
        /// Source gate of the removed connection.
        changed: GateId,
    },
    /// A parameter is about to change.
    PreParameterChange {
        /// Owner.
        module: ComponentId,
        /// Parameter name.
        name: String,
    },
    /// A parameter changed.
    PostParameterChange {
        /// Owner.
        module: ComponentId,
        /// Parameter name.
        name: String,
    },
    /// The display string is about to change.
    PreDisplayStringChange {
        /// Owner.
        module: ComponentId,
    },
    /// The display string changed.
    PostDisplayStringChange {
        /// Owner.
        module: ComponentId,
    },
}

impl ModelChange {
    /// Returns `true` for notifications sent before the change.
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            Self::PreModuleAdd { .. }
                | Self::PreModuleDelete { .. }
                | Self::PreModuleReparent { .. }
                | Self::PreGateAdd { .. }
                | Self::PreGateDelete { .. }
                | Self::PreGateVectorResize { .. }
                | Self::PreGateConnect { .. }
                | Self::PreGateDisconnect { .. }
                | Self::PrePathCreate { .. }
                | Self::PrePathCut { .. }
                | Self::PreParameterChange { .. }
                | Self::PreDisplayStringChange { .. }
        )
    }
}

/// A transition of the simulation life cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The network is about to be built.
    PreNetworkSetup,
    /// The network was built.
    PostNetworkSetup,
    /// The network is about to be initialized.
    PreNetworkInitialize,
    /// The network was initialized.
    PostNetworkInitialize,
    /// A step or run starts.
    Resume,
    /// A step or run returned without terminating.
    Pause,
    /// The simulation terminated normally.
    Success(TerminationCondition),
    /// The simulation stopped on a failure.
    Failure(RuntimeFailure),
    /// The finalize pass is about to run.
    PreNetworkFinish,
    /// The finalize pass completed.
    PostNetworkFinish,
    /// The end-of-run cleanup was performed.
    RunEnd,
    /// The network is about to be deleted.
    PreNetworkDelete,
    /// The network was deleted.
    PostNetworkDelete,
}

/// Description of an event about to be dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBanner {
    /// Sequential number of the event, starting at 1.
    pub event_number: u64,
    /// Timestamp of the event.
    pub time: MonotonicTime,
    /// Identity of the event.
    pub event: EventId,
    /// Name of the message or action.
    pub name: String,
    /// Target module, `None` for actions.
    pub target: Option<ComponentId>,
}

/// Route followed by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Sent through a chain of connected gates, listed in order.
    Gates(Vec<GateId>),
    /// Sent directly to an input gate, following hierarchy hops.
    Direct {
        /// Hops from the sender to the owner of `gate`.
        hops: Vec<Hop>,
        /// The gate the message is delivered to.
        gate: GateId,
    },
}

/// Record of a message leaving its sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRoute {
    /// Scheduled event, `None` if a disabled channel dropped the message.
    pub event: Option<EventId>,
    /// Name of the message.
    pub message: String,
    /// Sending module.
    pub sender: ComponentId,
    /// Send time.
    pub sending_time: MonotonicTime,
    /// Arrival time; meaningless if the message was dropped.
    pub arrival_time: MonotonicTime,
    /// Route taken.
    pub route: Route,
}

/// Periodic status of a running simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStatus {
    /// Current run state.
    pub state: RunState,
    /// Number of dispatched events.
    pub event_number: u64,
    /// Current simulation time.
    pub time: MonotonicTime,
    /// Number of pending events.
    pub pending_events: usize,
    /// Accumulated wall-clock run time.
    pub elapsed: Duration,
}

/// An observer of the simulation.
///
/// All methods have empty default implementations.
pub trait Listener: 'static {
    /// Called for every model change emitted within the listener's scope.
    ///
    /// `source` is the component the change was emitted on, `None` for
    /// changes concerning the root before it exists or after it is gone.
    fn model_changed(&mut self, source: Option<ComponentId>, change: &ModelChange) {
        let _ = (source, change);
    }

    /// Called on life-cycle transitions.
    fn lifecycle(&mut self, event: &LifecycleEvent) {
        let _ = event;
    }

    /// Called before an event is dispatched.
    fn event_dispatched(&mut self, banner: &EventBanner) {
        let _ = banner;
    }

    /// Called when a message is sent through gates or directly.
    fn message_sent(&mut self, route: &MessageRoute) {
        let _ = route;
    }

    /// Called when the run loop refreshes its status.
    fn refresh(&mut self, status: &RunStatus) {
        let _ = status;
    }
}

/// Handle to a registered listener.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

struct Subscription {
    scope: Option<ComponentId>,
    listener: Box<dyn Listener>,
}

/// Registry of listeners and dispatcher of notifications.
#[derive(Default)]
pub(crate) struct Notifier {
    subscriptions: Slab<Subscription>,
}

impl Notifier {
    pub(crate) fn add(&mut self, listener: Box<dyn Listener>, scope: Option<ComponentId>) -> ListenerId {
        ListenerId(self.subscriptions.insert(Subscription { scope, listener }))
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<Box<dyn Listener>> {
        self.subscriptions
            .try_remove(id.0)
            .map(|subscription| subscription.listener)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drops the listeners scoped to a deleted component.
    pub(crate) fn forget_scope(&mut self, component: ComponentId) {
        self.subscriptions
            .retain(|_, subscription| subscription.scope != Some(component));
    }

    /// Delivers a change emitted on `source`, whose ancestry (`source`
    /// included) is `scope`.
    pub(crate) fn model_change(
        &mut self,
        source: Option<ComponentId>,
        scope: &[ComponentId],
        change: &ModelChange,
    ) {
        for (_, subscription) in self.subscriptions.iter_mut() {
            let in_scope = subscription
                .scope
                .map_or(true, |component| scope.contains(&component));
            if in_scope {
                subscription.listener.model_changed(source, change);
            }
        }
    }

    pub(crate) fn lifecycle(&mut self, event: &LifecycleEvent) {
        self.each(|listener| listener.lifecycle(event));
    }

    pub(crate) fn event_dispatched(&mut self, banner: &EventBanner) {
        self.each(|listener| listener.event_dispatched(banner));
    }

    pub(crate) fn message_sent(&mut self, route: &MessageRoute) {
        self.each(|listener| listener.message_sent(route));
    }

    pub(crate) fn refresh(&mut self, status: &RunStatus) {
        self.each(|listener| listener.refresh(status));
    }

    fn each(&mut self, mut f: impl FnMut(&mut dyn Listener)) {
        for (_, subscription) in self.subscriptions.iter_mut() {
            f(subscription.listener.as_mut());
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}
