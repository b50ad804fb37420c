//! # State Mirror
//!
//! Folds the two possible feeds of robot state, live telemetry from the hub client and snapshots
//! from the local simulator, into the console state store. Only the selected source may change
//! the mirrored robot state. Status lines and connection changes concern the live link and are
//! always recorded, so a failed emergency stop is never hidden by the simulator being selected.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::robot::RobotState;
use log::{debug, info};

use crate::{
    hub_client::{ChannelEvent, ConnectionState},
    joint_sim::SimSnapshot,
    state_store::{StatePublisher, StateSource},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Status shown while the live link is down.
pub const OFFLINE_STATUS: &str = "Offline";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writes channel events and simulator snapshots into the console state.
pub struct Mirror {
    publisher: StatePublisher,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Mirror {
    pub fn new(publisher: StatePublisher) -> Self {
        Self { publisher }
    }

    pub fn source(&self) -> StateSource {
        self.publisher.current().source
    }

    /// Switch the feed of robot state. The mirrored robot state is reset so nothing from the
    /// previous source lingers.
    pub fn select_source(&mut self, source: StateSource) {
        if self.source() == source {
            return;
        }

        info!("Robot state source is now {:?}", source);

        self.publisher.update(|s| {
            s.source = source;
            s.robot = RobotState::disconnected();

            if source == StateSource::Live && s.connection != ConnectionState::Connected {
                s.robot.status = String::from(OFFLINE_STATUS);
            }
        });
    }

    /// Apply one event from the hub client.
    pub fn apply_channel_event(&mut self, event: &ChannelEvent) {
        let live = self.source() == StateSource::Live;

        match event {
            ChannelEvent::StateUpdate(state) => {
                if live {
                    let state = state.clone();
                    self.publisher.update(|s| s.robot = state);
                }
            }
            ChannelEvent::StatusMessage(msg) => {
                let msg = msg.clone();
                self.publisher.update(|s| s.status_message = Some(msg));
            }
            ChannelEvent::Error(e) => {
                let msg = format!("Error: {}", e.message);
                self.publisher.update(|s| s.status_message = Some(msg));
            }
            ChannelEvent::ConnectionChanged(conn) => {
                let conn = *conn;
                let lost = matches!(
                    conn,
                    ConnectionState::Disconnected
                        | ConnectionState::Reconnecting
                        | ConnectionState::Errored
                );

                if lost {
                    debug!("Live link down ({:?}), marking robot offline", conn);
                }

                self.publisher.update(|s| {
                    s.connection = conn;

                    if lost {
                        s.status_message = Some(String::from(OFFLINE_STATUS));

                        if live {
                            s.robot.is_connected = false;
                            s.robot.is_moving = false;
                            s.robot.status = String::from(OFFLINE_STATUS);
                        }
                    }
                });
            }
            ChannelEvent::Reconnected => {
                self.publisher
                    .update(|s| s.status_message = Some(String::from("Reconnected")));
            }
        }
    }

    /// Apply one simulator tick.
    pub fn apply_sim_snapshot(&mut self, snapshot: &SimSnapshot) {
        if self.source() != StateSource::Simulated {
            return;
        }

        let robot = snapshot.to_robot_state();
        self.publisher.update(|s| s.robot = robot);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::joint_sim::JointSim;
    use crate::state_store::state_store;
    use comms_if::{hub::HubError, robot::JointVector};

    fn live_state() -> RobotState {
        let mut state = RobotState::disconnected();
        state.is_connected = true;
        state.is_homed = true;
        state.status = String::from("Idle");
        state.joint_positions = JointVector::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        state
    }

    #[test]
    fn test_live_feed() {
        let (publisher, view) = state_store(StateSource::Live);
        let mut mirror = Mirror::new(publisher);

        mirror.apply_channel_event(&ChannelEvent::ConnectionChanged(ConnectionState::Connected));
        mirror.apply_channel_event(&ChannelEvent::StateUpdate(live_state()));

        let snap = view.snapshot();
        assert_eq!(snap.robot, live_state());
        assert_eq!(snap.connection, ConnectionState::Connected);

        // Simulator ticks are ignored while live is selected
        let mut sim = JointSim::default();
        sim.apply_preset("wave");
        mirror.apply_sim_snapshot(&sim.tick());
        assert_eq!(view.snapshot().robot, live_state());
    }

    #[test]
    fn test_goes_offline() {
        let (publisher, view) = state_store(StateSource::Live);
        let mut mirror = Mirror::new(publisher);

        mirror.apply_channel_event(&ChannelEvent::StateUpdate(live_state()));
        mirror.apply_channel_event(&ChannelEvent::ConnectionChanged(
            ConnectionState::Reconnecting,
        ));

        let snap = view.snapshot();
        assert!(!snap.robot.is_connected);
        assert_eq!(snap.robot.status, OFFLINE_STATUS);
        assert_eq!(snap.status_message.as_deref(), Some(OFFLINE_STATUS));
        assert_eq!(snap.connection, ConnectionState::Reconnecting);

        // The last known joint positions are kept
        assert_eq!(snap.robot.joint_positions, live_state().joint_positions);
    }

    #[test]
    fn test_sim_feed() {
        let (publisher, view) = state_store(StateSource::Live);
        let mut mirror = Mirror::new(publisher);

        mirror.apply_channel_event(&ChannelEvent::StateUpdate(live_state()));
        mirror.select_source(StateSource::Simulated);

        // Switching resets the mirrored state
        assert_eq!(view.snapshot().robot.joint_positions, JointVector::zero());
        assert!(!view.snapshot().robot.is_homed);

        let mut sim = JointSim::default();
        sim.apply_preset("wave");
        let tick = sim.tick();
        mirror.apply_sim_snapshot(&tick);
        assert_eq!(view.snapshot().robot.joint_positions, tick.joint_positions);
        assert!(view.snapshot().robot.is_moving);

        // Live telemetry is ignored, but status lines still come through
        mirror.apply_channel_event(&ChannelEvent::StateUpdate(live_state()));
        mirror.apply_channel_event(&ChannelEvent::Error(HubError::new("Serial timeout")));

        let snap = view.snapshot();
        assert_eq!(snap.robot.joint_positions, tick.joint_positions);
        assert_eq!(snap.status_message.as_deref(), Some("Error: Serial timeout"));
        assert_eq!(snap.source, StateSource::Simulated);
    }

    #[test]
    fn test_select_same_source_is_noop() {
        let (publisher, view) = state_store(StateSource::Live);
        let mut mirror = Mirror::new(publisher);

        mirror.apply_channel_event(&ChannelEvent::StateUpdate(live_state()));
        let seq = view.snapshot().seq;

        mirror.select_source(StateSource::Live);

        assert_eq!(view.snapshot().seq, seq);
        assert_eq!(view.snapshot().robot, live_state());
    }
}
