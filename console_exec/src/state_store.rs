//! # Console State Store
//!
//! The robot state shown by the console has exactly one writer, the [`StatePublisher`], and any
//! number of readers holding a [`StateView`]. Every write replaces the whole [`ConsoleSnapshot`]
//! with a new immutable one, so readers never observe a partially updated state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use arc_swap::ArcSwap;
use comms_if::robot::RobotState;
use std::sync::Arc;

use crate::{
    events::{EventBus, SubscriptionId},
    hub_client::ConnectionState,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the presentation layer needs to draw the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleSnapshot {
    /// Where `robot` comes from
    pub source: StateSource,

    pub robot: RobotState,

    /// State of the link to the live controller, reported regardless of the selected source
    pub connection: ConnectionState,

    /// Most recent status line
    pub status_message: Option<String>,

    /// Incremented on every publish
    pub seq: u64,
}

/// The only writer of the console state.
///
/// Deliberately not `Clone`.
pub struct StatePublisher {
    shared: Arc<Shared>,
}

/// Read access to the console state.
#[derive(Clone)]
pub struct StateView {
    shared: Arc<Shared>,
}

struct Shared {
    /// Swapped whole on every publish, read without locking
    current: ArcSwap<ConsoleSnapshot>,

    listeners: EventBus<Arc<ConsoleSnapshot>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which component is feeding the mirrored robot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// Telemetry from a controller via the hub client
    Live,

    /// The local joint simulator
    Simulated,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConsoleSnapshot {
    pub fn initial(source: StateSource) -> Self {
        Self {
            source,
            robot: RobotState::disconnected(),
            connection: ConnectionState::Disconnected,
            status_message: None,
            seq: 0,
        }
    }
}

impl StatePublisher {
    /// The snapshot last published.
    pub fn current(&self) -> Arc<ConsoleSnapshot> {
        self.shared.load()
    }

    /// Derive a new snapshot from the current one and publish it.
    ///
    /// The sequence number is managed here, whatever `f` does to it is overwritten.
    pub fn update<F>(&mut self, f: F) -> Arc<ConsoleSnapshot>
    where
        F: FnOnce(&mut ConsoleSnapshot),
    {
        let prev = self.current();
        let mut next = (*prev).clone();
        f(&mut next);
        next.seq = prev.seq + 1;

        self.publish(next)
    }

    /// Replace the whole snapshot.
    pub fn replace(&mut self, mut snapshot: ConsoleSnapshot) -> Arc<ConsoleSnapshot> {
        snapshot.seq = self.current().seq + 1;
        self.publish(snapshot)
    }

    fn publish(&mut self, snapshot: ConsoleSnapshot) -> Arc<ConsoleSnapshot> {
        let snapshot = Arc::new(snapshot);

        self.shared.current.store(snapshot.clone());

        self.shared.listeners.emit(&snapshot);

        snapshot
    }

    pub fn view(&self) -> StateView {
        StateView {
            shared: self.shared.clone(),
        }
    }
}

impl StateView {
    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<ConsoleSnapshot> {
        self.shared.load()
    }

    /// Be notified of every snapshot published from now on.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Arc<ConsoleSnapshot>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }
}

impl Shared {
    fn load(&self) -> Arc<ConsoleSnapshot> {
        self.current.load_full()
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create a new store, returning its single writer and a first reader.
pub fn state_store(source: StateSource) -> (StatePublisher, StateView) {
    let shared = Arc::new(Shared {
        current: ArcSwap::from_pointee(ConsoleSnapshot::initial(source)),
        listeners: EventBus::new(),
    });

    (
        StatePublisher {
            shared: shared.clone(),
        },
        StateView { shared },
    )
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
