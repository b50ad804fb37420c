//! # Hub Client
//!
//! The hub client is the console's single logical connection to a robot controller. It mirrors
//! pushed telemetry to its subscribers, issues operator commands and correlates their results,
//! and keeps the connection alive across network faults using a bounded exponential backoff.
//!
//! All outbound operations block only the calling thread, and take `&self` so several may be in
//! flight at once from different threads. None of them are retried or queued: while no link
//! exists they return `None` straight away.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod backoff;
pub mod transport;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    hub::{Command, CommandResult, HubError, HubEvent, HubMethod, JogCommand, MoveCommand},
    robot::RobotState,
};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

pub use backoff::ReconnectPolicy;
use transport::{Connector, HubLink};

use crate::events::{EventBus, SubscriptionId};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How long the event pump waits for an event before checking whether it has been superseded.
const PUMP_POLL: Duration = Duration::from_millis(50);

/// Status line raised when an emergency stop could not be delivered.
pub const ESTOP_UNREACHABLE_MSG: &str =
    "EMERGENCY STOP NOT DELIVERED: no live link to the controller";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client side of the controller hub.
///
/// Cloning gives another handle on the same connection.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Box<dyn Connector>,

    policy: ReconnectPolicy,

    /// Serialises `connect()` and `disconnect()`
    lifecycle: Mutex<()>,

    /// Bumped every time the current link is superseded, cancelling its pump and any
    /// reconnection in progress
    generation: Mutex<u64>,

    generation_changed: Condvar,

    link: Mutex<Option<Arc<dyn HubLink>>>,

    state: Mutex<ConnectionState>,

    events: EventBus<ChannelEvent>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Lifecycle of the connection to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Errored,
}

/// Events delivered to the hub client's subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The hub pushed a complete new robot state
    StateUpdate(RobotState),

    /// The hub pushed a human-readable status line, or the client raised one itself
    StatusMessage(String),

    /// An asynchronous fault, not tied to any particular command
    Error(HubError),

    ConnectionChanged(ConnectionState),

    /// The link was lost and has been re-established. Commands issued before the loss are not
    /// re-sent.
    Reconnected,
}

/// The outcome of [`HubClient::execute`], shaped by the kind of command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Result(CommandResult),

    /// Whether the controller opened the robot's port
    PortConnected(bool),

    PortDisconnected,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HubClient {
    pub fn new(connector: Box<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                lifecycle: Mutex::new(()),
                generation: Mutex::new(0),
                generation_changed: Condvar::new(),
                link: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                events: EventBus::new(),
            }),
        }
    }

    /// Register a listener for channel events.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Establish the link to the hub.
    ///
    /// If already connected this returns `true` without creating a second link. On failure the
    /// state becomes `Errored`, the failure is emitted as an `Error` event and `false` is
    /// returned.
    ///
    /// The events raised by the attempt are delivered once it has finished, so listeners may
    /// themselves call `connect()` or `disconnect()`.
    pub fn connect(&self) -> bool {
        let mut events = Vec::new();

        let (connected, new_link) = {
            let _lifecycle = lock(&self.inner.lifecycle);

            if self.is_connected() && lock(&self.inner.link).is_some() {
                debug!("Already connected to the hub");
                (true, None)
            } else {
                // Supersede whatever was running before (a reconnection loop for example)
                let gen = self.inner.bump_generation();
                if let Some(old) = lock(&self.inner.link).take() {
                    old.close();
                }

                events.extend(self.inner.swap_state(ConnectionState::Connecting));

                match self.inner.connector.connect() {
                    Ok(link) => {
                        *lock(&self.inner.link) = Some(link.clone());
                        events.extend(self.inner.swap_state(ConnectionState::Connected));
                        info!("Connected to the hub");

                        (true, Some((link, gen)))
                    }
                    Err(e) => {
                        warn!("Could not connect to the hub: {}", e);
                        events.extend(self.inner.swap_state(ConnectionState::Errored));
                        events.push(ChannelEvent::Error(HubError::new(e.to_string())));

                        (false, None)
                    }
                }
            }
        };

        self.inner.emit_all(events);

        // Started after the connection events so telemetry never overtakes them. If a listener
        // has already superseded this link the pump exits straight away.
        if let Some((link, gen)) = new_link {
            self.inner.spawn_pump(link, gen);
        }

        connected
    }

    /// Tear down the link and cancel any pending reconnection.
    ///
    /// Safe to call while disconnected. The client can be connected again afterwards.
    pub fn disconnect(&self) {
        let events = {
            let _lifecycle = lock(&self.inner.lifecycle);

            self.inner.bump_generation();

            if let Some(link) = lock(&self.inner.link).take() {
                link.close();
                info!("Disconnected from the hub");
            }

            self.inner.swap_state(ConnectionState::Disconnected)
        };

        self.inner.emit_all(events);
    }

    /// Ask the hub for its current robot state.
    pub fn get_state(&self) -> Option<RobotState> {
        self.inner.invoke(HubMethod::GetState, vec![])
    }

    pub fn move_to(&self, cmd: &MoveCommand) -> Option<CommandResult> {
        let args = self.inner.args(&Command::Move(cmd.clone()))?;
        self.inner.invoke(HubMethod::Move, args)
    }

    pub fn jog(&self, cmd: &JogCommand) -> Option<CommandResult> {
        let args = self.inner.args(&Command::Jog(cmd.clone()))?;
        self.inner.invoke(HubMethod::Jog, args)
    }

    pub fn home(&self) -> Option<CommandResult> {
        self.inner.invoke(HubMethod::Home, vec![])
    }

    pub fn stop(&self) -> Option<CommandResult> {
        self.inner.invoke(HubMethod::Stop, vec![])
    }

    /// Request an emergency stop.
    ///
    /// Behaves like every other command, except that failing to deliver it is raised as an
    /// operator visible status message rather than only being logged.
    pub fn emergency_stop(&self) -> Option<CommandResult> {
        let result = self.inner.invoke(HubMethod::EmergencyStop, vec![]);

        if result.is_none() {
            error!("{}", ESTOP_UNREACHABLE_MSG);
            self.inner.events.emit(&ChannelEvent::StatusMessage(String::from(
                ESTOP_UNREACHABLE_MSG,
            )));
        }

        result
    }

    /// Ask the controller to open the robot on the given port.
    pub fn connect_robot(&self, port_name: &str) -> Option<bool> {
        self.inner
            .invoke(HubMethod::Connect, vec![Value::String(port_name.to_owned())])
    }

    /// Ask the controller to close the robot's port. `None` if the request could not be
    /// delivered.
    pub fn disconnect_robot(&self) -> Option<()> {
        self.inner.invoke_raw(HubMethod::Disconnect, vec![]).map(|_| ())
    }

    /// Issue any command, returning its outcome or `None` on transport failure.
    pub fn execute(&self, cmd: &Command) -> Option<CommandOutcome> {
        match cmd {
            Command::Move(m) => self.move_to(m).map(CommandOutcome::Result),
            Command::Jog(j) => self.jog(j).map(CommandOutcome::Result),
            Command::Home => self.home().map(CommandOutcome::Result),
            Command::Stop => self.stop().map(CommandOutcome::Result),
            Command::EmergencyStop => self.emergency_stop().map(CommandOutcome::Result),
            Command::ConnectPort(p) => self.connect_robot(p).map(CommandOutcome::PortConnected),
            Command::DisconnectPort => self
                .disconnect_robot()
                .map(|_| CommandOutcome::PortDisconnected),
        }
    }
}

impl Inner {
    fn current_link(&self) -> Option<Arc<dyn HubLink>> {
        lock(&self.link).clone()
    }

    fn args(&self, cmd: &Command) -> Option<Vec<Value>> {
        match cmd.arguments() {
            Ok(a) => Some(a),
            Err(e) => {
                warn!("Could not serialize {} arguments: {}", cmd.hub_method(), e);
                None
            }
        }
    }

    /// Invoke a method and return its raw JSON result, or `None` if there is no link or the
    /// transport failed.
    fn invoke_raw(&self, method: HubMethod, args: Vec<Value>) -> Option<Value> {
        let link = match self.current_link() {
            Some(l) => l,
            None => {
                warn!("Cannot invoke {}: not connected to the hub", method);
                return None;
            }
        };

        match link.invoke(method, args) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{} failed: {}", method, e);
                None
            }
        }
    }

    /// Invoke a method and deserialize its result. A `null` result is treated as no result.
    fn invoke<T: DeserializeOwned>(&self, method: HubMethod, args: Vec<Value>) -> Option<T> {
        let value = self.invoke_raw(method, args)?;

        match serde_json::from_value::<Option<T>>(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("Could not parse the result of {}: {}", method, e);
                None
            }
        }
    }

    /// Set the connection state, returning the change event to emit if it changed.
    ///
    /// Emitting is left to the caller so that it happens with no lock held.
    fn swap_state(&self, new_state: ConnectionState) -> Option<ChannelEvent> {
        let mut state = lock(&self.state);

        if *state == new_state {
            return None;
        }

        *state = new_state;
        debug!("Hub connection state: {:?}", new_state);

        Some(ChannelEvent::ConnectionChanged(new_state))
    }

    fn emit_all<I: IntoIterator<Item = ChannelEvent>>(&self, events: I) {
        for evt in events {
            self.events.emit(&evt);
        }
    }

    fn bump_generation(&self) -> u64 {
        let mut gen = lock(&self.generation);
        *gen += 1;
        self.generation_changed.notify_all();
        *gen
    }

    fn is_current(&self, gen: u64) -> bool {
        *lock(&self.generation) == gen
    }

    /// Wait for `delay`, returning `true` early if the generation moves on.
    fn wait_superseded(&self, gen: u64, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut current = lock(&self.generation);

        loop {
            if *current != gen {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            current = match self.generation_changed.wait_timeout(current, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn spawn_pump(self: &Arc<Self>, link: Arc<dyn HubLink>, gen: u64) {
        let inner = self.clone();
        thread::spawn(move || inner.pump(link, gen));
    }

    /// Forward push events from the link to subscribers until the link is superseded. If the link
    /// is lost unexpectedly run the reconnection schedule.
    fn pump(self: Arc<Self>, mut link: Arc<dyn HubLink>, gen: u64) {
        loop {
            let result = link.next_event(PUMP_POLL);

            if !self.is_current(gen) {
                return;
            }

            match result {
                Ok(Some(evt)) => self.dispatch(evt),
                Ok(None) => (),
                Err(e) => {
                    warn!("Lost the link to the hub: {}", e);
                    link.close();

                    match self.reconnect(gen) {
                        Some(l) => link = l,
                        None => return,
                    }
                }
            }
        }
    }

    fn dispatch(&self, evt: HubEvent) {
        let channel_evt = match evt {
            HubEvent::StateUpdate(s) => ChannelEvent::StateUpdate(s),
            HubEvent::StatusMessage(m) => ChannelEvent::StatusMessage(m),
            HubEvent::Error(e) => {
                warn!("Hub error: {}", e.message);
                ChannelEvent::Error(e)
            }
        };

        self.events.emit(&channel_evt);
    }

    /// Run the reconnection schedule. Returns the new link, or `None` if the schedule ran out or
    /// the client was disconnected meanwhile.
    ///
    /// The link and state are only changed while holding the generation lock and only if `gen`
    /// is still current, so a concurrent `connect()` or `disconnect()` always has the last word.
    fn reconnect(&self, gen: u64) -> Option<Arc<dyn HubLink>> {
        let evt = {
            let gen_guard = lock(&self.generation);
            if *gen_guard != gen {
                return None;
            }
            *lock(&self.link) = None;
            self.swap_state(ConnectionState::Reconnecting)
        };
        self.emit_all(evt);

        let mut attempt = 0;
        while let Some(delay) = self.policy.delay(attempt) {
            if self.wait_superseded(gen, delay) {
                return None;
            }

            info!(
                "Reconnection attempt {} of {} (after {} ms)",
                attempt + 1,
                self.policy.max_attempts,
                delay.as_millis()
            );

            match self.connector.connect() {
                Ok(link) => {
                    // Only install the link if nobody has superseded us while connecting
                    let evt = {
                        let gen_guard = lock(&self.generation);
                        if *gen_guard != gen {
                            link.close();
                            return None;
                        }
                        *lock(&self.link) = Some(link.clone());
                        self.swap_state(ConnectionState::Connected)
                    };

                    info!("Reconnected to the hub");
                    self.emit_all(evt.into_iter().chain(Some(ChannelEvent::Reconnected)));

                    return Some(link);
                }
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt + 1, e),
            }

            attempt += 1;
        }

        error!(
            "Giving up on the hub after {} reconnection attempts",
            self.policy.max_attempts
        );

        let evt = {
            let gen_guard = lock(&self.generation);
            if *gen_guard == gen {
                self.swap_state(ConnectionState::Disconnected)
            } else {
                None
            }
        };
        self.emit_all(evt);

        None
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a mutex, ignoring poisoning. None of the data guarded here can be left half-updated.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::robot::JointVector;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use transport::TransportError;

    // ---- IN-MEMORY HUB ----

    #[derive(Default)]
    struct MockHub {
        connects: AtomicUsize,
        refuse: AtomicBool,
        replies: Mutex<HashMap<HubMethod, Value>>,
        invocations: Mutex<Vec<HubMethod>>,
        links: Mutex<Vec<Arc<MockLink>>>,
    }

    struct MockLink {
        hub: Arc<MockHub>,
        lost: AtomicBool,
        closed: AtomicBool,
        events: Mutex<VecDeque<HubEvent>>,
    }

    struct MockConnector(Arc<MockHub>);

    impl Connector for MockConnector {
        fn connect(&self) -> Result<Arc<dyn HubLink>, TransportError> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);

            if self.0.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let link = Arc::new(MockLink {
                hub: self.0.clone(),
                lost: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: Mutex::new(VecDeque::new()),
            });
            self.0.links.lock().unwrap().push(link.clone());

            Ok(link)
        }
    }

    impl HubLink for MockLink {
        fn invoke(&self, method: HubMethod, _: Vec<Value>) -> Result<Value, TransportError> {
            if self.lost.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            self.hub.invocations.lock().unwrap().push(method);

            match self.hub.replies.lock().unwrap().get(&method) {
                Some(v) => Ok(v.clone()),
                None => Err(TransportError::Timeout(method)),
            }
        }

        fn next_event(&self, timeout: Duration) -> Result<Option<HubEvent>, TransportError> {
            if self.lost.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            match self.events.lock().unwrap().pop_front() {
                Some(e) => Ok(Some(e)),
                None => {
                    thread::sleep(timeout.min(Duration::from_millis(2)));
                    Ok(None)
                }
            }
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl MockHub {
        fn reply(&self, method: HubMethod, value: Value) {
            self.replies.lock().unwrap().insert(method, value);
        }

        fn push(&self, evt: HubEvent) {
            if let Some(l) = self.links.lock().unwrap().last() {
                l.events.lock().unwrap().push_back(evt);
            }
        }

        fn drop_links(&self) {
            for l in self.links.lock().unwrap().iter() {
                l.lost.store(true, Ordering::SeqCst);
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    // ---- HELPERS ----

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay_ms: 1,
            max_delay_ms: 30,
            max_attempts: 4,
        }
    }

    fn client_with(policy: ReconnectPolicy) -> (HubClient, Arc<MockHub>) {
        let hub = Arc::new(MockHub::default());
        let client = HubClient::new(Box::new(MockConnector(hub.clone())), policy);
        (client, hub)
    }

    fn record(client: &HubClient) -> Arc<Mutex<Vec<ChannelEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        client.subscribe(move |e| s.lock().unwrap().push(e.clone()));
        seen
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn result_json(success: bool, message: &str) -> Value {
        serde_json::to_value(CommandResult {
            success,
            message: message.to_owned(),
            data: None,
            timestamp: chrono::Utc::now(),
        })
        .unwrap()
    }

    // ---- TESTS ----

    #[test]
    fn test_connect_is_idempotent() {
        let (client, hub) = client_with(fast_policy());
        let seen = record(&client);

        assert!(client.connect());
        assert!(client.connect());
        assert!(client.connect());

        assert_eq!(hub.connects(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ChannelEvent::ConnectionChanged(ConnectionState::Connecting),
                ChannelEvent::ConnectionChanged(ConnectionState::Connected),
            ]
        );
    }

    #[test]
    fn test_commands_fail_fast_while_disconnected() {
        let (client, hub) = client_with(fast_policy());

        assert_eq!(client.get_state(), None);
        assert_eq!(client.move_to(&MoveCommand::default()), None);
        assert_eq!(
            client.jog(&JogCommand {
                joint_index: 0,
                delta_degrees: 5.0,
                speed: None
            }),
            None
        );
        assert_eq!(client.home(), None);
        assert_eq!(client.stop(), None);
        assert_eq!(client.emergency_stop(), None);
        assert_eq!(client.connect_robot("/dev/ttyUSB0"), None);
        assert_eq!(client.disconnect_robot(), None);
        assert_eq!(client.execute(&Command::Home), None);

        assert!(hub.invocations.lock().unwrap().is_empty());
        assert_eq!(hub.connects(), 0);
    }

    #[test]
    fn test_unreachable_estop_is_flagged() {
        let (client, _hub) = client_with(fast_policy());
        let seen = record(&client);

        assert_eq!(client.emergency_stop(), None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChannelEvent::StatusMessage(String::from(ESTOP_UNREACHABLE_MSG))]
        );
    }

    #[test]
    fn test_connect_failure() {
        let (client, hub) = client_with(fast_policy());
        hub.refuse.store(true, Ordering::SeqCst);
        let seen = record(&client);

        assert!(!client.connect());
        assert_eq!(client.connection_state(), ConnectionState::Errored);

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|e| matches!(e, ChannelEvent::Error(_))));
        assert_eq!(
            seen.last(),
            Some(&ChannelEvent::Error(HubError::new(
                TransportError::Closed.to_string()
            )))
        );
        drop(seen);

        // The initial connection is not retried in the background
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hub.connects(), 1);

        // But a later call succeeds once the hub is back
        hub.refuse.store(false, Ordering::SeqCst);
        assert!(client.connect());
        assert!(client.is_connected());
    }

    #[test]
    fn test_results_and_rejections() {
        let (client, hub) = client_with(fast_policy());
        hub.reply(HubMethod::Home, result_json(true, "Homing"));
        hub.reply(HubMethod::Move, result_json(false, "Emergency stop active"));
        hub.reply(HubMethod::Connect, Value::Bool(true));
        hub.reply(HubMethod::GetState, Value::Null);
        hub.reply(HubMethod::Disconnect, Value::Null);

        assert!(client.connect());

        let home = client.home().unwrap();
        assert!(home.success);
        assert_eq!(home.message, "Homing");

        // A business rejection is a normal result and leaves the link alone
        let mv = client
            .move_to(&MoveCommand {
                joint_angles: Some(JointVector::zero()),
                ..Default::default()
            })
            .unwrap();
        assert!(!mv.success);
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        assert_eq!(client.connect_robot("COM3"), Some(true));
        assert_eq!(
            client.execute(&Command::ConnectPort(String::from("COM3"))),
            Some(CommandOutcome::PortConnected(true))
        );
        assert_eq!(client.get_state(), None);
        assert_eq!(client.disconnect_robot(), Some(()));

        // No reply configured for Stop, so the transport times out. Exactly one request is sent.
        assert_eq!(client.stop(), None);
        assert_eq!(
            hub.invocations
                .lock()
                .unwrap()
                .iter()
                .filter(|m| **m == HubMethod::Stop)
                .count(),
            1
        );
        assert_eq!(hub.connects(), 1);
    }

    #[test]
    fn test_push_events_reach_every_subscriber() {
        let (client, hub) = client_with(fast_policy());
        let first = record(&client);
        let second = record(&client);

        assert!(client.connect());

        let mut state = RobotState::disconnected();
        state.is_connected = true;
        state.status = String::from("Idle");
        hub.push(HubEvent::StateUpdate(state.clone()));
        hub.push(HubEvent::StatusMessage(String::from("Ready")));

        assert!(wait_for(|| second.lock().unwrap().len() >= 4));

        for seen in [first, second].iter() {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[2], ChannelEvent::StateUpdate(state.clone()));
            assert_eq!(seen[3], ChannelEvent::StatusMessage(String::from("Ready")));
        }
    }

    #[test]
    fn test_reconnects_after_loss() {
        let (client, hub) = client_with(fast_policy());
        hub.reply(HubMethod::Home, result_json(true, "Homing"));
        let seen = record(&client);

        assert!(client.connect());
        assert!(client.home().is_some());

        hub.drop_links();

        assert!(wait_for(|| seen
            .lock()
            .unwrap()
            .contains(&ChannelEvent::Reconnected)));
        assert!(client.is_connected());
        assert_eq!(hub.connects(), 2);

        // The last command is not replayed on the new link
        assert_eq!(hub.invocations.lock().unwrap().len(), 1);

        // And the new link is usable
        assert!(client.home().is_some());
    }

    #[test]
    fn test_gives_up_after_schedule() {
        let (client, hub) = client_with(fast_policy());
        let seen = record(&client);

        assert!(client.connect());

        hub.refuse.store(true, Ordering::SeqCst);
        hub.drop_links();

        assert!(wait_for(|| seen
            .lock()
            .unwrap()
            .last()
            .map(|e| *e == ChannelEvent::ConnectionChanged(ConnectionState::Disconnected))
            .unwrap_or(false)));

        // One initial connection plus exactly four attempts
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hub.connects(), 5);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(seen
            .lock()
            .unwrap()
            .contains(&ChannelEvent::ConnectionChanged(ConnectionState::Reconnecting)));

        // Only an explicit connect brings it back
        hub.refuse.store(false, Ordering::SeqCst);
        assert!(client.connect());
        assert_eq!(hub.connects(), 6);
    }

    #[test]
    fn test_disconnect_cancels_reconnection() {
        let (client, hub) = client_with(ReconnectPolicy::default());

        assert!(client.connect());
        hub.drop_links();

        assert!(wait_for(
            || client.connection_state() == ConnectionState::Reconnecting
        ));

        // The first attempt is a second away, disconnecting must cancel it
        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        thread::sleep(Duration::from_millis(1200));
        assert_eq!(hub.connects(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        // Disconnecting twice is fine, and the client is reusable
        client.disconnect();
        assert!(client.connect());
        assert_eq!(hub.connects(), 2);
    }

    #[test]
    fn test_listener_can_call_back_into_client() {
        let (client, hub) = client_with(fast_policy());
        hub.refuse.store(true, Ordering::SeqCst);

        // Retry once from the listener when the first attempt fails
        let retried = Arc::new(AtomicBool::new(false));
        {
            let c = client.clone();
            let h = hub.clone();
            let r = retried.clone();
            client.subscribe(move |e| {
                if *e == ChannelEvent::ConnectionChanged(ConnectionState::Errored)
                    && !r.swap(true, Ordering::SeqCst)
                {
                    h.refuse.store(false, Ordering::SeqCst);
                    assert!(c.connect());
                }
            });
        }

        assert!(!client.connect());
        assert!(retried.load(Ordering::SeqCst));
        assert!(client.is_connected());
        assert_eq!(hub.connects(), 2);

        // And disconnect from a listener on the pump thread
        {
            let c = client.clone();
            client.subscribe(move |e| {
                if *e == ChannelEvent::StatusMessage(String::from("Shutting down")) {
                    c.disconnect();
                }
            });
        }
        hub.push(HubEvent::StatusMessage(String::from("Shutting down")));

        assert!(wait_for(
            || client.connection_state() == ConnectionState::Disconnected
        ));
        assert_eq!(client.home(), None);
    }

    #[test]
    fn test_disconnect_during_reconnection_is_final() {
        let policy = ReconnectPolicy {
            base_delay_ms: 1,
            max_delay_ms: 1,
            max_attempts: 4,
        };

        for i in 0..100u64 {
            let (client, hub) = client_with(policy);
            assert!(client.connect());

            hub.drop_links();

            // Land the disconnect at a different point of the reconnection each time
            thread::sleep(Duration::from_micros((i % 25) * 200));
            client.disconnect();

            thread::sleep(Duration::from_millis(10));
            assert_eq!(client.connection_state(), ConnectionState::Disconnected);
            assert!(lock(&client.inner.link).is_none());
            assert_eq!(client.home(), None);
        }
    }

    #[test]
    fn test_disconnect_closes_link() {
        let (client, hub) = client_with(fast_policy());

        assert!(client.connect());
        client.disconnect();

        assert!(hub.links.lock().unwrap()[0].closed.load(Ordering::SeqCst));
        assert_eq!(client.home(), None);

        // A closed link is not a loss, no reconnection happens
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hub.connects(), 1);
    }
}
