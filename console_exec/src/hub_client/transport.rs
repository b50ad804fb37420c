//! # Hub Transport
//!
//! The hub client talks to the controller through two traits:
//! - [`Connector`] establishes a new link to the hub.
//! - [`HubLink`] is one established link: it carries invocations out and push events in.
//!
//! [`ZmqConnector`] implements these over ZMQ. Invocations go out on a DEALER socket connected to
//! the hub's ROUTER and are correlated with their completions by invocation ID, so several
//! invocations may be in flight at once. Push events arrive on a SUB socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    hub::{Completion, HubEvent, HubMethod, Invocation},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, trace, warn};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum time the I/O thread blocks in a single poll.
///
/// Units: milliseconds
const IO_POLL_MS: i64 = 10;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can establish a link to the hub.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn HubLink>, TransportError>;
}

/// One established link to the hub.
pub trait HubLink: Send + Sync {
    /// Call a hub method and wait for its completion.
    ///
    /// Exactly one request is sent. The raw JSON result is returned, which may be `null`.
    fn invoke(&self, method: HubMethod, arguments: Vec<Value>) -> Result<Value, TransportError>;

    /// Wait up to `timeout` for the next push event.
    ///
    /// `Ok(None)` means no event arrived in time. `Err(TransportError::Closed)` means the link is
    /// gone, either because it was lost or because [`HubLink::close`] was called.
    fn next_event(&self, timeout: Duration) -> Result<Option<HubEvent>, TransportError>;

    /// Tear the link down. Must be safe to call more than once.
    fn close(&self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Connects to the hub over ZMQ.
pub struct ZmqConnector {
    ctx: zmq::Context,

    params: NetParams,
}

/// A ZMQ link to the hub.
///
/// The sockets are owned by a background I/O thread, the link itself only holds the channels
/// used to talk to that thread.
pub struct ZmqLink {
    outbound: Mutex<mpsc::Sender<Outbound>>,

    events: Mutex<mpsc::Receiver<IoEvent>>,

    next_id: AtomicU64,

    invoke_timeout: Duration,

    shutdown: Arc<AtomicBool>,

    join_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// An invocation waiting to be sent by the I/O thread.
struct Outbound {
    invocation: Invocation,

    reply: mpsc::Sender<Result<Completion, TransportError>>,

    deadline: Instant,
}

/// Completion channel and deadline for an invocation that has been sent.
struct Pending {
    reply: mpsc::Sender<Result<Completion, TransportError>>,

    deadline: Instant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not connect to the hub: {0}")]
    ConnectError(MonitoredSocketError),

    #[error("Could not subscribe to hub events: {0}")]
    SubscribeError(zmq::Error),

    #[error("The link to the hub is closed")]
    Closed,

    #[error("No completion for {0} within the timeout")]
    Timeout(HubMethod),

    #[error("Could not send the invocation to the hub: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("The hub could not execute {0}: {1}")]
    HubFailure(HubMethod, String),
}

/// Messages from the I/O thread to the link.
enum IoEvent {
    Event(HubEvent),
    Lost,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqConnector {
    pub fn new(params: NetParams) -> Self {
        Self {
            ctx: zmq::Context::new(),
            params,
        }
    }
}

impl Connector for ZmqConnector {
    fn connect(&self) -> Result<Arc<dyn HubLink>, TransportError> {
        // Our own backoff handles reconnection, so zmq's is disabled on the invocation socket
        let invoke_options = SocketOptions {
            block_on_first_connect: true,
            connect_timeout: self.params.connect_timeout_ms,
            heartbeat_ivl: self.params.heartbeat_ivl_ms,
            heartbeat_ttl: self.params.heartbeat_ivl_ms * 2,
            heartbeat_timeout: self.params.heartbeat_ivl_ms * 2,
            linger: 1,
            reconnect_ivl: -1,
            recv_timeout: 0,
            send_timeout: 10,
            ..Default::default()
        };
        let event_options = SocketOptions {
            block_on_first_connect: false,
            linger: 1,
            recv_timeout: 0,
            ..Default::default()
        };

        let invoke_socket = MonitoredSocket::new(
            &self.ctx,
            zmq::DEALER,
            invoke_options,
            &self.params.hub_invoke_endpoint,
        )
        .map_err(TransportError::ConnectError)?;
        let event_socket = MonitoredSocket::new(
            &self.ctx,
            zmq::SUB,
            event_options,
            &self.params.hub_event_endpoint,
        )
        .map_err(TransportError::ConnectError)?;
        event_socket
            .set_subscribe(b"")
            .map_err(TransportError::SubscribeError)?;

        debug!(
            "Connected to hub at {} (events from {})",
            self.params.hub_invoke_endpoint, self.params.hub_event_endpoint
        );

        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown_clone = shutdown.clone();
        let join_handle = thread::spawn(move || {
            io_thread(invoke_socket, event_socket, outbound_rx, events_tx, shutdown_clone)
        });

        Ok(Arc::new(ZmqLink {
            outbound: Mutex::new(outbound_tx),
            events: Mutex::new(events_rx),
            next_id: AtomicU64::new(0),
            invoke_timeout: Duration::from_millis(self.params.invoke_timeout_ms),
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        }))
    }
}

impl HubLink for ZmqLink {
    fn invoke(&self, method: HubMethod, arguments: Vec<Value>) -> Result<Value, TransportError> {
        let invocation = Invocation {
            invocation_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            target: method,
            arguments,
        };

        let (reply_tx, reply_rx) = mpsc::channel();

        // Hand the invocation to the I/O thread
        {
            let outbound = self.outbound.lock().map_err(|_| TransportError::Closed)?;
            outbound
                .send(Outbound {
                    invocation,
                    reply: reply_tx,
                    deadline: Instant::now() + self.invoke_timeout,
                })
                .map_err(|_| TransportError::Closed)?;
        }

        match reply_rx.recv_timeout(self.invoke_timeout) {
            Ok(Ok(completion)) => match completion.error {
                Some(e) => Err(TransportError::HubFailure(method, e)),
                None => Ok(completion.result),
            },
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(method)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<HubEvent>, TransportError> {
        let events = self.events.lock().map_err(|_| TransportError::Closed)?;

        match events.recv_timeout(timeout) {
            Ok(IoEvent::Event(e)) => Ok(Some(e)),
            Ok(IoEvent::Lost) => Err(TransportError::Closed),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let handle = match self.join_handle.lock() {
            Ok(mut h) => h.take(),
            Err(_) => None,
        };

        if let Some(jh) = handle {
            jh.join().ok();
        }
    }
}

impl Drop for ZmqLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Owns the hub sockets: sends queued invocations, routes completions back to their callers and
/// forwards push events.
fn io_thread(
    invoke_socket: MonitoredSocket,
    event_socket: MonitoredSocket,
    outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<IoEvent>,
    shutdown: Arc<AtomicBool>,
) {
    let mut pending: HashMap<u64, Pending> = HashMap::new();

    while !shutdown.load(Ordering::Relaxed) {
        // ---- SEND ----

        while let Ok(out) = outbound.try_recv() {
            let id = out.invocation.invocation_id;

            let msg = match serde_json::to_string(&out.invocation) {
                Ok(m) => m,
                Err(e) => {
                    out.reply.send(Err(TransportError::SerializationError(e))).ok();
                    continue;
                }
            };

            match invoke_socket.send(msg.as_str(), 0) {
                Ok(_) => {
                    trace!("Sent {} (id {})", out.invocation.target, id);
                    pending.insert(
                        id,
                        Pending {
                            reply: out.reply,
                            deadline: out.deadline,
                        },
                    );
                }
                Err(e) => {
                    out.reply.send(Err(TransportError::SendError(e))).ok();
                }
            }
        }

        // ---- LIVENESS ----

        if invoke_socket.peer_lost() || !invoke_socket.connected() {
            warn!("Link to the hub lost");
            events.send(IoEvent::Lost).ok();
            break;
        }

        // ---- RECEIVE ----

        let (invoke_ready, event_ready) = {
            let mut items = [
                invoke_socket.as_poll_item(zmq::POLLIN),
                event_socket.as_poll_item(zmq::POLLIN),
            ];

            match zmq::poll(&mut items, IO_POLL_MS) {
                Ok(_) => (items[0].is_readable(), items[1].is_readable()),
                Err(e) => {
                    warn!("Could not poll the hub sockets: {}", e);
                    (false, false)
                }
            }
        };

        if invoke_ready {
            while let Ok(msg) = invoke_socket.recv_string(zmq::DONTWAIT) {
                let completion: Completion = match msg
                    .map_err(|_| String::from("non UTF-8 message"))
                    .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
                {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Discarding malformed completion from the hub: {}", e);
                        continue;
                    }
                };

                match pending.remove(&completion.invocation_id) {
                    Some(p) => {
                        p.reply.send(Ok(completion)).ok();
                    }
                    None => debug!(
                        "Discarding completion for unknown invocation {}",
                        completion.invocation_id
                    ),
                }
            }
        }

        if event_ready {
            while let Ok(msg) = event_socket.recv_string(zmq::DONTWAIT) {
                match msg
                    .map_err(|_| String::from("non UTF-8 message"))
                    .and_then(|s| serde_json::from_str::<HubEvent>(&s).map_err(|e| e.to_string()))
                {
                    Ok(e) => {
                        if events.send(IoEvent::Event(e)).is_err() {
                            // The link has been dropped
                            return;
                        }
                    }
                    Err(e) => warn!("Discarding malformed event from the hub: {}", e),
                }
            }
        }

        // ---- EXPIRE ----

        let now = Instant::now();
        pending.retain(|_, p| p.deadline > now);
    }
}
