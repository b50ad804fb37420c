//! # Hub Server Module
//!
//! This module abstracts over the networking side of the simulated controller. Consoles invoke
//! methods through the ROUTER socket and recieve push events from the PUB socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    hub::{Completion, HubEvent, Invocation},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::warn;
use serde_json::Value;

use crate::params::CtrlSimExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the simulated controller.
pub struct HubServer {
    /// ROUTER socket which accepts invocations from any number of consoles
    invoke_socket: MonitoredSocket,

    /// PUB socket which broadcasts events to every console
    event_socket: MonitoredSocket,
}

/// Routing identity of the console which sent an invocation.
pub struct Peer(Vec<u8>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`HubServer`]
#[derive(thiserror::Error, Debug)]
pub enum HubServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send data to the console: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize data for the console: {0}")]
    SerializationError(serde_json::Error),
}

/// Something recieved on the invocation socket.
pub enum Incoming {
    Invocation(Peer, Invocation),

    /// A message which isn't a valid invocation. The ID is recovered if possible so the caller can
    /// still be sent an error completion.
    Malformed {
        peer: Peer,
        invocation_id: Option<u64>,
        error: String,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HubServer {
    /// Create a new instance of the hub server.
    ///
    /// This function will not wait for a connection from a console before returning.
    pub fn new(params: &CtrlSimExecParams) -> Result<Self, HubServerError> {
        // Create the zmq context
        let ctx = zmq::Context::new();

        // Create the socket options
        let invoke_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: 0,
            send_timeout: 10,
            ..Default::default()
        };
        let event_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            send_timeout: 10,
            ..Default::default()
        };

        // Create the sockets
        let invoke_socket = MonitoredSocket::new(
            &ctx,
            zmq::ROUTER,
            invoke_socket_options,
            &params.invoke_endpoint,
        )?;
        let event_socket = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            event_socket_options,
            &params.event_endpoint,
        )?;

        Ok(Self {
            invoke_socket,
            event_socket,
        })
    }

    /// Wait up to `timeout_ms` for the next invocation.
    ///
    /// `None` is returned if nothing arrived in time.
    pub fn next_invocation(&self, timeout_ms: i64) -> Option<Incoming> {
        match self.invoke_socket.poll(zmq::POLLIN, timeout_ms) {
            Ok(n) if n > 0 => (),
            Ok(_) => return None,
            Err(e) => {
                warn!("Could not poll the invocation socket: {}", e);
                return None;
            }
        }

        let mut frames = match self.invoke_socket.recv_multipart(zmq::DONTWAIT) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not read from the invocation socket: {}", e);
                return None;
            }
        };

        // A DEALER sends [identity, payload] through the ROUTER
        if frames.len() != 2 {
            warn!("Discarding a message with {} frames", frames.len());
            return None;
        }
        let payload = frames.pop().unwrap_or_default();
        let peer = Peer(frames.pop().unwrap_or_default());

        Some(match serde_json::from_slice::<Invocation>(&payload) {
            Ok(inv) => Incoming::Invocation(peer, inv),
            Err(e) => Incoming::Malformed {
                peer,
                invocation_id: serde_json::from_slice::<Value>(&payload)
                    .ok()
                    .and_then(|v| v.get("invocationId").and_then(Value::as_u64)),
                error: e.to_string(),
            },
        })
    }

    /// Send a completion back to the console which made the invocation.
    pub fn complete(&self, peer: &Peer, completion: &Completion) -> Result<(), HubServerError> {
        let msg = serde_json::to_string(completion).map_err(HubServerError::SerializationError)?;

        self.invoke_socket
            .send(peer.0.as_slice(), zmq::SNDMORE)
            .map_err(HubServerError::SendError)?;
        self.invoke_socket
            .send(msg.as_str(), 0)
            .map_err(HubServerError::SendError)
    }

    /// Broadcast an event to every connected console.
    pub fn publish(&self, event: &HubEvent) -> Result<(), HubServerError> {
        let msg = serde_json::to_string(event).map_err(HubServerError::SerializationError)?;

        self.event_socket
            .send(msg.as_str(), 0)
            .map_err(HubServerError::SendError)
    }
}

impl From<MonitoredSocketError> for HubServerError {
    fn from(e: MonitoredSocketError) -> Self {
        HubServerError::SocketError(e)
    }
}
