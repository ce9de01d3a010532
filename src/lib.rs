//! Meshelect - Coordinator Election for Ad Hoc Sensor Meshes
//!
//! A small daemon for nodes in an ad hoc IPv6 mesh that elects a single
//! coordinator and aggregates sensor readings through it. Nodes announce
//! themselves on a multicast channel; the highest address in a connected
//! set wins the election, the rest register with it as clients. The
//! coordinator periodically queries each client's sensor, folds the
//! replies into an exponentially weighted moving average, and publishes
//! the aggregate on a second multicast channel.
//!
//! # Architecture
//!
//! The election core is a pure state machine: it handles one event at a
//! time and returns the side effects to execute as commands. Network
//! listeners, the request/response endpoint, and the timer manager feed
//! events into a single mailbox; one worker loop drains it, runs the
//! machine, and executes the commands. Datagram producers block until the
//! worker has processed their event, so each source delivers at most one
//! event into the system at a time.
//!
//! # Features
//!
//! - Leaderless bootstrap: every node starts as its own candidate
//! - Deterministic winner: bytewise-highest IPv6 address
//! - Client-side coordinator failure detection and re-election
//! - EWMA aggregation of client sensor readings in centi-degrees Celsius
//! - Best-effort multicast announce and publish channels
//! - UDP request/response endpoint for register and sensor queries

pub mod addr;
pub mod config;
pub mod election;
pub mod error;
pub mod net;
pub mod sensor;

pub use config::MeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::addr::NodeAddr;
    pub use crate::config::MeshConfig;
    pub use crate::election::{
        Command, ElectionMachine, ElectionState, Envelope, Event, TimerManager,
    };
    pub use crate::error::{Error, Result};
    pub use crate::sensor::{SensorSource, SharedSensor, SimulatedSensor};
}
