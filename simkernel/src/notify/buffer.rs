use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use super::{EventBanner, LifecycleEvent, Listener, MessageRoute, ModelChange};
use crate::graph::ComponentId;

/// A notification recorded by a [`NotificationBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A model change and the component it was emitted on.
    ModelChange {
        /// Component the change was emitted on.
        source: Option<ComponentId>,
        /// The change.
        change: ModelChange,
    },
    /// A life-cycle transition.
    Lifecycle(LifecycleEvent),
    /// An event about to be dispatched.
    EventDispatched(EventBanner),
    /// A message sent.
    MessageSent(MessageRoute),
}

/// The shared data of a `NotificationBuffer`.
struct Inner {
    capacity: usize,
    is_open: Cell<bool>,
    buffer: RefCell<VecDeque<Notification>>,
}

/// A bounded recorder of notifications.
///
/// Register the writer returned by [`listener`](Self::listener) with the
/// simulation, then read the recorded notifications back by iterating the
/// buffer. If the maximum capacity is exceeded, older notifications are
/// overwritten. Notifications are returned in first-in-first-out order. Note
/// that even if the iterator returns `None`, it may still produce more items
/// in the future.
///
/// Status refreshes are not recorded.
pub struct NotificationBuffer {
    inner: Rc<Inner>,
}

impl NotificationBuffer {
    /// Default capacity when constructed with `new`.
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Creates an open `NotificationBuffer` with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates an open `NotificationBuffer` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                capacity,
                is_open: Cell::new(true),
                buffer: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Returns a listener writing into this buffer.
    pub fn listener(&self) -> NotificationWriter {
        NotificationWriter {
            inner: self.inner.clone(),
        }
    }

    /// Starts or resumes recording.
    pub fn open(&mut self) {
        self.inner.is_open.set(true);
    }

    /// Stops recording; notifications are discarded until reopened.
    pub fn close(&mut self) {
        self.inner.is_open.set(false);
    }

    /// Returns the number of recorded notifications not yet read.
    pub fn len(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    /// Returns `true` if no notification is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.inner.buffer.borrow().is_empty()
    }

    /// Discards all recorded notifications.
    pub fn clear(&mut self) {
        self.inner.buffer.borrow_mut().clear();
    }
}

impl Iterator for NotificationBuffer {
    type Item = Notification;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.buffer.borrow_mut().pop_front()
    }
}

impl Clone for NotificationBuffer {
    /// Returns a handle reading from the same underlying buffer.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for NotificationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NotificationBuffer").finish_non_exhaustive()
    }
}

/// The listener half of a `NotificationBuffer`.
pub struct NotificationWriter {
    inner: Rc<Inner>,
}

impl NotificationWriter {
    fn write(&self, notification: Notification) {
        if !self.inner.is_open.get() {
            return;
        }

        let mut buffer = self.inner.buffer.borrow_mut();
        if buffer.len() == self.inner.capacity {
            buffer.pop_front();
        }

        buffer.push_back(notification);
    }
}

impl Listener for NotificationWriter {
    fn model_changed(&mut self, source: Option<ComponentId>, change: &ModelChange) {
        self.write(Notification::ModelChange {
            source,
            change: change.clone(),
        });
    }

    fn lifecycle(&mut self, event: &LifecycleEvent) {
        self.write(Notification::Lifecycle(event.clone()));
    }

    fn event_dispatched(&mut self, banner: &EventBanner) {
        self.write(Notification::EventDispatched(banner.clone()));
    }

    fn message_sent(&mut self, route: &MessageRoute) {
        self.write(Notification::MessageSent(route.clone()));
    }
}

impl fmt::Debug for NotificationWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NotificationWriter").finish_non_exhaustive()
    }
}
