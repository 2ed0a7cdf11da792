//! Session output multiplexer.
//!
//! This module fans a session's output events out to every attached
//! [`Subscriber`]. Membership is weak: the transport that created a subscriber
//! owns it, and a subscriber whose transport has gone away is pruned on the
//! next broadcast. Late subscribers only see events broadcast after they
//! attach; nothing is buffered for replay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use protocol::StreamEvent;

/// A transport-agnostic sink for session output.
///
/// Implementations must not block: `enqueue` is called from the session's
/// driver task for every output chunk.
pub trait Subscriber: Send + Sync {
    /// Delivers one event.
    fn enqueue(&self, event: StreamEvent);

    /// Signals that no further events will be delivered.
    fn close(&self);
}

struct Members {
    subscribers: Vec<Weak<dyn Subscriber>>,
    closed: bool,
}

/// The set of subscribers attached to one session.
pub struct SubscriberSet {
    members: Mutex<Members>,
}

fn same_subscriber(member: &Weak<dyn Subscriber>, subscriber: &Arc<dyn Subscriber>) -> bool {
    std::ptr::addr_eq(member.as_ptr(), Arc::as_ptr(subscriber))
}

impl SubscriberSet {
    /// Creates an empty, open set.
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Members {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a subscriber.
    ///
    /// Attaching an already attached subscriber is a no-op. Returns false if
    /// the set has been shut down.
    pub fn attach(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        let mut members = self.lock();
        if members.closed {
            return false;
        }
        if !members
            .subscribers
            .iter()
            .any(|member| same_subscriber(member, subscriber))
        {
            members.subscribers.push(Arc::downgrade(subscriber));
        }
        true
    }

    /// Detaches a subscriber. Returns whether it was attached.
    pub fn detach(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        let mut members = self.lock();
        let before = members.subscribers.len();
        members
            .subscribers
            .retain(|member| !same_subscriber(member, subscriber));
        members.subscribers.len() != before
    }

    /// Returns whether a subscriber is attached.
    pub fn contains(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        self.lock()
            .subscribers
            .iter()
            .any(|member| same_subscriber(member, subscriber))
    }

    /// Returns the number of attached subscribers still alive.
    pub fn len(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|member| member.strong_count() > 0)
            .count()
    }

    /// Returns whether no live subscriber is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the set has been shut down.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Delivers an event to every attached subscriber.
    ///
    /// Delivery iterates a snapshot taken under the lock, so a subscriber may
    /// detach itself (or others) from inside `enqueue`. Returns the number of
    /// subscribers the event was handed to.
    pub fn broadcast(&self, event: &StreamEvent) -> usize {
        let snapshot: Vec<Arc<dyn Subscriber>> = {
            let mut members = self.lock();
            if members.closed {
                return 0;
            }
            members.subscribers.retain(|member| member.strong_count() > 0);
            members
                .subscribers
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        };

        for subscriber in &snapshot {
            subscriber.enqueue(event.clone());
        }
        snapshot.len()
    }

    /// Shuts the set down, closing every attached subscriber exactly once.
    ///
    /// If `last` is given it is delivered to each subscriber just before its
    /// `close`. Later calls do nothing and return 0; later attaches fail.
    pub fn shutdown(&self, last: Option<StreamEvent>) -> usize {
        let drained: Vec<Arc<dyn Subscriber>> = {
            let mut members = self.lock();
            if members.closed {
                return 0;
            }
            members.closed = true;
            members
                .subscribers
                .drain(..)
                .filter_map(|member| member.upgrade())
                .collect()
        };

        for subscriber in &drained {
            if let Some(event) = &last {
                subscriber.enqueue(event.clone());
            }
            subscriber.close();
        }
        drained.len()
    }
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::new()
    }
}
