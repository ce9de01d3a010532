//! Election State Machine
//!
//! A node is in exactly one of four states. Competing candidates settle
//! on the highest address: observing a strictly greater address in any
//! state defers to it, so once the maximum address in a connected set
//! has announced itself, every other node converges on it as
//! coordinator. The settling window (leader threshold) absorbs in-flight
//! competing announcements before a node commits to a role.
//!
//! The machine performs no I/O: handling an event mutates machine-owned
//! state and returns commands for the event loop to execute.

use super::aggregate::SensorAggregate;
use super::registry::{ClientRegistry, RegisterOutcome};
use super::timer::{TimerKind, TimerOp};
use super::{Command, Event};
use crate::addr::NodeAddr;
use crate::sensor::SharedSensor;

/// Election state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Announcing own candidacy, watching for competitors
    Discover,
    /// Deferred to a higher address, waiting for discovery to settle
    Elect,
    /// Registered with a coordinator, watching its liveness
    Client,
    /// Aggregating and republishing client sensor readings
    Coordinator,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Discover => write!(f, "DISCOVER"),
            ElectionState::Elect => write!(f, "ELECT"),
            ElectionState::Client => write!(f, "CLIENT"),
            ElectionState::Coordinator => write!(f, "COORDINATOR"),
        }
    }
}

/// The election state machine for one node
pub struct ElectionMachine {
    /// This node's own address
    own_addr: NodeAddr,
    /// Current state
    state: ElectionState,
    /// Address currently believed to be the coordinator (may be self)
    coordinator: NodeAddr,
    /// Registered clients, valid while coordinator
    registry: ClientRegistry,
    /// Running EWMA, valid while coordinator
    aggregate: SensorAggregate,
    /// Local sensor, read when seeding the aggregate
    sensor: SharedSensor,
}

impl ElectionMachine {
    /// Create a machine in the initial condition: `Discover`, optimistic
    /// candidate for its own coordinator seat
    pub fn new(
        own_addr: NodeAddr,
        max_nodes: usize,
        weight: i32,
        sensor: SharedSensor,
    ) -> Self {
        Self {
            own_addr,
            state: ElectionState::Discover,
            coordinator: own_addr,
            registry: ClientRegistry::new(max_nodes),
            aggregate: SensorAggregate::new(weight),
            sensor,
        }
    }

    /// Commands that bootstrap the machine at startup: arm the settling
    /// window. The caller posts the initial `IntervalTick` to start the
    /// announce cadence.
    pub fn startup_commands(&self) -> Vec<Command> {
        tracing::info!(
            "Node {} starting in {} as its own coordinator candidate",
            self.own_addr,
            self.state
        );
        vec![Command::Timer(TimerOp::Start, TimerKind::LeaderThreshold)]
    }

    /// Current state
    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Address currently believed to be the coordinator
    pub fn coordinator(&self) -> NodeAddr {
        self.coordinator
    }

    /// This node's own address
    pub fn own_addr(&self) -> NodeAddr {
        self.own_addr
    }

    /// Number of registered clients (meaningful while coordinator)
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Current aggregate value (meaningful while coordinator)
    pub fn aggregate_value(&self) -> i16 {
        self.aggregate.value()
    }

    /// Process one event, mutating state and returning the side effects
    /// to execute
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match self.state {
            ElectionState::Discover => self.handle_discover(event),
            ElectionState::Elect => self.handle_elect(event),
            ElectionState::Client => self.handle_client(event),
            ElectionState::Coordinator => self.handle_coordinator(event),
        }
    }

    fn handle_discover(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::IntervalTick => {
                vec![
                    Command::Announce,
                    Command::Timer(TimerOp::Restart, TimerKind::Interval),
                ]
            }
            Event::PeerBroadcast(addr) if addr > self.own_addr => {
                tracing::info!("Deferring candidacy to higher address {}", addr);
                self.coordinator = addr;
                self.transition(ElectionState::Elect);
                vec![
                    Command::Timer(TimerOp::Stop, TimerKind::Interval),
                    Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold),
                ]
            }
            Event::LeaderThresholdTick => self.commit_candidacy(),
            other => self.ignore(other),
        }
    }

    fn handle_elect(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::PeerBroadcast(addr) if addr != self.coordinator => {
                // A competing announcement keeps the settling window open
                if addr > self.coordinator {
                    tracing::info!(
                        "Candidate {} supersedes {}",
                        addr,
                        self.coordinator
                    );
                    self.coordinator = addr;
                }
                vec![Command::Timer(
                    TimerOp::Restart,
                    TimerKind::LeaderThreshold,
                )]
            }
            Event::LeaderThresholdTick => self.commit_candidacy(),
            other => self.ignore(other),
        }
    }

    fn handle_client(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::CoordinatorHeartbeat => {
                vec![Command::Timer(TimerOp::Restart, TimerKind::LeaderTimeout)]
            }
            Event::LeaderTimeoutTick => {
                tracing::warn!(
                    "Coordinator {} timed out, restarting election",
                    self.coordinator
                );
                self.become_own_candidate()
            }
            Event::PeerBroadcast(addr) => self.handle_settled_broadcast(addr),
            other => self.ignore(other),
        }
    }

    fn handle_coordinator(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::IntervalTick => {
                if let Some(value) = self.read_sensor() {
                    self.aggregate.seed(value);
                }
                let mut cmds: Vec<Command> =
                    self.registry.members().map(Command::QuerySensor).collect();
                cmds.push(Command::Timer(TimerOp::Restart, TimerKind::Interval));
                cmds
            }
            Event::ClientJoin(addr) => {
                match self.registry.register(addr) {
                    RegisterOutcome::Added => {
                        tracing::info!(
                            "Registered client {} ({} registered)",
                            addr,
                            self.registry.len()
                        );
                    }
                    RegisterOutcome::AlreadyPresent => {
                        tracing::debug!("Client {} already registered", addr);
                    }
                    RegisterOutcome::Full => {
                        tracing::warn!("Registry full, ignoring join from {}", addr);
                    }
                }
                Vec::new()
            }
            Event::SensorReport(value) => {
                let new_value = self.aggregate.update(value);
                tracing::debug!("Sensor report {} folded into aggregate {}", value, new_value);
                vec![Command::Publish(new_value)]
            }
            Event::PeerBroadcast(addr) => self.handle_settled_broadcast(addr),
            other => self.ignore(other),
        }
    }

    /// A broadcast observed in a settled state (Client or Coordinator):
    /// a strictly greater address demotes us toward it, anything else
    /// restarts our own candidacy
    fn handle_settled_broadcast(&mut self, addr: NodeAddr) -> Vec<Command> {
        if addr > self.own_addr {
            tracing::info!("Observed higher address {}, deferring", addr);
            self.coordinator = addr;
            self.transition(ElectionState::Elect);
            vec![Command::Timer(
                TimerOp::Restart,
                TimerKind::LeaderThreshold,
            )]
        } else {
            tracing::info!(
                "Observed candidate {} at or below own address, re-entering discovery",
                addr
            );
            self.become_own_candidate()
        }
    }

    /// Re-enter `Discover` with self as the default candidate
    fn become_own_candidate(&mut self) -> Vec<Command> {
        self.coordinator = self.own_addr;
        self.transition(ElectionState::Discover);
        vec![
            Command::Timer(TimerOp::Restart, TimerKind::Interval),
            Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold),
        ]
    }

    /// The settling window expired: commit to the role the agreed
    /// coordinator address implies
    fn commit_candidacy(&mut self) -> Vec<Command> {
        if self.coordinator == self.own_addr {
            self.registry.clear();
            if let Some(value) = self.read_sensor() {
                self.aggregate.seed(value);
            }
            self.transition(ElectionState::Coordinator);
            vec![Command::Timer(TimerOp::Restart, TimerKind::Interval)]
        } else {
            self.transition(ElectionState::Client);
            vec![
                Command::Register(self.coordinator),
                Command::Timer(TimerOp::Restart, TimerKind::LeaderTimeout),
            ]
        }
    }

    /// Read the local sensor; a failure keeps the previous aggregate
    /// value and is only logged
    fn read_sensor(&self) -> Option<i16> {
        let mut sensor = match self.sensor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Sensor lock poisoned, using inner value");
                poisoned.into_inner()
            }
        };
        match sensor.read() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Sensor read failed, keeping previous aggregate: {}", e);
                None
            }
        }
    }

    fn transition(&mut self, next: ElectionState) {
        if self.state != next {
            tracing::info!(
                "{} -> {} (coordinator: {})",
                self.state,
                next,
                self.coordinator
            );
            self.state = next;
        }
    }

    fn ignore(&self, event: Event) -> Vec<Command> {
        tracing::debug!(
            "Ignoring {} in state {}",
            event.type_name(),
            self.state
        );
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::testing::{BrokenSensor, ScriptedSensor};
    use crate::sensor::SharedSensor;
    use std::sync::{Arc, Mutex};

    fn addr(n: u16) -> NodeAddr {
        format!("fe80::{:x}", n).parse().unwrap()
    }

    fn scripted(readings: Vec<i16>) -> SharedSensor {
        Arc::new(Mutex::new(ScriptedSensor::new(readings)))
    }

    fn machine(own: NodeAddr) -> ElectionMachine {
        ElectionMachine::new(own, 8, 16, scripted(vec![2150]))
    }

    #[test]
    fn test_initial_condition() {
        let m = machine(addr(5));
        assert_eq!(m.state(), ElectionState::Discover);
        assert_eq!(m.coordinator(), m.own_addr());
        assert_eq!(
            m.startup_commands(),
            vec![Command::Timer(TimerOp::Start, TimerKind::LeaderThreshold)]
        );
    }

    #[test]
    fn test_discover_interval_announces_and_rearms() {
        let mut m = machine(addr(5));
        let cmds = m.handle(Event::IntervalTick);
        assert_eq!(
            cmds,
            vec![
                Command::Announce,
                Command::Timer(TimerOp::Restart, TimerKind::Interval),
            ]
        );
        assert_eq!(m.state(), ElectionState::Discover);
    }

    #[test]
    fn test_discover_defers_to_higher_address() {
        let mut m = machine(addr(5));
        let cmds = m.handle(Event::PeerBroadcast(addr(9)));

        assert_eq!(m.state(), ElectionState::Elect);
        assert_eq!(m.coordinator(), addr(9));
        assert_eq!(
            cmds,
            vec![
                Command::Timer(TimerOp::Stop, TimerKind::Interval),
                Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold),
            ]
        );
    }

    #[test]
    fn test_discover_ignores_lower_and_equal_addresses() {
        let mut m = machine(addr(5));
        assert!(m.handle(Event::PeerBroadcast(addr(3))).is_empty());
        assert!(m.handle(Event::PeerBroadcast(addr(5))).is_empty());
        assert_eq!(m.state(), ElectionState::Discover);
        assert_eq!(m.coordinator(), addr(5));
    }

    #[test]
    fn test_threshold_with_self_as_candidate_wins_coordinator() {
        let mut m = ElectionMachine::new(addr(5), 8, 16, scripted(vec![321]));
        let cmds = m.handle(Event::LeaderThresholdTick);

        assert_eq!(m.state(), ElectionState::Coordinator);
        assert_eq!(m.aggregate_value(), 321);
        assert_eq!(
            cmds,
            vec![Command::Timer(TimerOp::Restart, TimerKind::Interval)]
        );
    }

    #[test]
    fn test_threshold_with_other_candidate_becomes_client() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));
        let cmds = m.handle(Event::LeaderThresholdTick);

        assert_eq!(m.state(), ElectionState::Client);
        assert_eq!(
            cmds,
            vec![
                Command::Register(addr(9)),
                Command::Timer(TimerOp::Restart, TimerKind::LeaderTimeout),
            ]
        );
    }

    #[test]
    fn test_elect_adopts_greater_candidate_and_extends_window() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(7)));
        assert_eq!(m.coordinator(), addr(7));

        let cmds = m.handle(Event::PeerBroadcast(addr(9)));
        assert_eq!(m.coordinator(), addr(9));
        assert_eq!(
            cmds,
            vec![Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold)]
        );
    }

    #[test]
    fn test_elect_lower_candidate_extends_window_without_adoption() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));

        let cmds = m.handle(Event::PeerBroadcast(addr(6)));
        assert_eq!(m.coordinator(), addr(9));
        assert_eq!(
            cmds,
            vec![Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold)]
        );
    }

    #[test]
    fn test_elect_same_coordinator_broadcast_is_noop() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));
        assert!(m.handle(Event::PeerBroadcast(addr(9))).is_empty());
        assert_eq!(m.state(), ElectionState::Elect);
    }

    #[test]
    fn test_client_heartbeat_extends_liveness_window() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));
        m.handle(Event::LeaderThresholdTick);

        let cmds = m.handle(Event::CoordinatorHeartbeat);
        assert_eq!(
            cmds,
            vec![Command::Timer(TimerOp::Restart, TimerKind::LeaderTimeout)]
        );
        assert_eq!(m.state(), ElectionState::Client);
    }

    #[test]
    fn test_client_leader_timeout_restarts_election() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));
        m.handle(Event::LeaderThresholdTick);

        let cmds = m.handle(Event::LeaderTimeoutTick);
        assert_eq!(m.state(), ElectionState::Discover);
        assert_eq!(m.coordinator(), addr(5));
        assert_eq!(
            cmds,
            vec![
                Command::Timer(TimerOp::Restart, TimerKind::Interval),
                Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold),
            ]
        );
    }

    #[test]
    fn test_client_self_demotion_on_higher_broadcast() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(7)));
        m.handle(Event::LeaderThresholdTick);
        assert_eq!(m.state(), ElectionState::Client);

        m.handle(Event::PeerBroadcast(addr(9)));
        assert_eq!(m.state(), ElectionState::Elect);
        assert_eq!(m.coordinator(), addr(9));
    }

    #[test]
    fn test_client_lower_broadcast_triggers_rediscovery() {
        let mut m = machine(addr(5));
        m.handle(Event::PeerBroadcast(addr(9)));
        m.handle(Event::LeaderThresholdTick);

        m.handle(Event::PeerBroadcast(addr(2)));
        assert_eq!(m.state(), ElectionState::Discover);
        assert_eq!(m.coordinator(), addr(5));
    }

    #[test]
    fn test_coordinator_never_survives_higher_address() {
        let mut m = machine(addr(5));
        m.handle(Event::LeaderThresholdTick);
        assert_eq!(m.state(), ElectionState::Coordinator);

        m.handle(Event::PeerBroadcast(addr(9)));
        assert_ne!(m.state(), ElectionState::Coordinator);
        assert_eq!(m.coordinator(), addr(9));
    }

    #[test]
    fn test_coordinator_lower_broadcast_reenters_discovery() {
        let mut m = machine(addr(5));
        m.handle(Event::LeaderThresholdTick);

        let cmds = m.handle(Event::PeerBroadcast(addr(2)));
        assert_eq!(m.state(), ElectionState::Discover);
        assert_eq!(m.coordinator(), addr(5));
        assert_eq!(
            cmds,
            vec![
                Command::Timer(TimerOp::Restart, TimerKind::Interval),
                Command::Timer(TimerOp::Restart, TimerKind::LeaderThreshold),
            ]
        );
    }

    #[test]
    fn test_coordinator_interval_reseeds_and_queries_clients() {
        let mut m = ElectionMachine::new(addr(9), 8, 16, scripted(vec![100, 200]));
        m.handle(Event::LeaderThresholdTick);
        m.handle(Event::ClientJoin(addr(3)));
        m.handle(Event::ClientJoin(addr(4)));

        let cmds = m.handle(Event::IntervalTick);
        assert_eq!(m.aggregate_value(), 200);
        assert_eq!(
            cmds,
            vec![
                Command::QuerySensor(addr(3)),
                Command::QuerySensor(addr(4)),
                Command::Timer(TimerOp::Restart, TimerKind::Interval),
            ]
        );
    }

    #[test]
    fn test_coordinator_sensor_report_updates_and_publishes() {
        let mut m = ElectionMachine::new(addr(9), 8, 16, scripted(vec![100]));
        m.handle(Event::LeaderThresholdTick);

        let cmds = m.handle(Event::SensorReport(116));
        assert_eq!(m.aggregate_value(), 101);
        assert_eq!(cmds, vec![Command::Publish(101)]);
    }

    #[test]
    fn test_registry_cleared_on_each_coordinator_entry() {
        let mut m = machine(addr(5));
        m.handle(Event::LeaderThresholdTick);
        m.handle(Event::ClientJoin(addr(1)));
        assert_eq!(m.client_count(), 1);

        // Demoted by a lower peer, then wins the next settling window
        m.handle(Event::PeerBroadcast(addr(2)));
        m.handle(Event::LeaderThresholdTick);
        assert_eq!(m.state(), ElectionState::Coordinator);
        assert_eq!(m.client_count(), 0);
    }

    #[test]
    fn test_broken_sensor_keeps_previous_aggregate() {
        let mut m = ElectionMachine::new(
            addr(9),
            8,
            16,
            Arc::new(Mutex::new(BrokenSensor)),
        );
        m.handle(Event::LeaderThresholdTick);
        assert_eq!(m.state(), ElectionState::Coordinator);
        assert_eq!(m.aggregate_value(), 0);
    }

    #[test]
    fn test_unexpected_events_are_ignored() {
        let mut m = machine(addr(5));
        assert!(m.handle(Event::ClientJoin(addr(1))).is_empty());
        assert!(m.handle(Event::SensorReport(42)).is_empty());
        assert!(m.handle(Event::CoordinatorHeartbeat).is_empty());
        assert!(m.handle(Event::LeaderTimeoutTick).is_empty());
        assert_eq!(m.state(), ElectionState::Discover);
    }

    // Drives a set of machines to convergence by cross-feeding every
    // Announce as a PeerBroadcast to the others, then firing settling
    // windows for whoever still has one armed.
    fn converge(machines: &mut [ElectionMachine]) {
        for _ in 0..4 {
            let mut announced: Vec<NodeAddr> = Vec::new();
            for m in machines.iter_mut() {
                let cmds = m.handle(Event::IntervalTick);
                if cmds.contains(&Command::Announce) {
                    announced.push(m.own_addr());
                }
            }
            for from in announced {
                for m in machines.iter_mut() {
                    if m.own_addr() != from {
                        m.handle(Event::PeerBroadcast(from));
                    }
                }
            }
        }
        for m in machines.iter_mut() {
            if !matches!(m.state(), ElectionState::Client | ElectionState::Coordinator) {
                m.handle(Event::LeaderThresholdTick);
            }
        }
    }

    #[test]
    fn test_three_nodes_converge_on_highest_address() {
        let mut machines = vec![machine(addr(1)), machine(addr(2)), machine(addr(3))];
        converge(&mut machines);

        assert_eq!(machines[0].state(), ElectionState::Client);
        assert_eq!(machines[1].state(), ElectionState::Client);
        assert_eq!(machines[2].state(), ElectionState::Coordinator);
        for m in &machines {
            assert_eq!(m.coordinator(), addr(3));
        }
    }

    #[test]
    fn test_late_joining_higher_node_takes_over() {
        let mut machines = vec![machine(addr(1)), machine(addr(2)), machine(addr(3))];
        converge(&mut machines);

        // A higher node appears after the mesh has settled
        machines.push(machine(addr(7)));
        converge(&mut machines);

        assert_eq!(machines[3].state(), ElectionState::Coordinator);
        for m in &machines[..3] {
            assert_eq!(m.state(), ElectionState::Client);
            assert_eq!(m.coordinator(), addr(7));
        }
    }
}
