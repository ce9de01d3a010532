//! Election Module
//!
//! The election core: events, commands, the state machine, its timers,
//! the coordinator-side client registry, and the sensor aggregate.
//!
//! The machine itself performs no I/O. Handling an event returns a list
//! of [`Command`]s that the surrounding event loop executes against the
//! network adapters and the timer manager.

pub mod aggregate;
pub mod machine;
pub mod registry;
pub mod timer;

pub use aggregate::SensorAggregate;
pub use machine::{ElectionMachine, ElectionState};
pub use registry::{ClientRegistry, RegisterOutcome};
pub use timer::{TimerKind, TimerManager, TimerOp};

use tokio::sync::{mpsc, oneshot};

use crate::addr::NodeAddr;
use crate::error::{Error, Result};

/// Events dispatched to the election state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Periodic announce/query cadence expired
    IntervalTick,
    /// A peer announced its address on the broadcast channel
    PeerBroadcast(NodeAddr),
    /// The coordinator queried us; it is alive
    CoordinatorHeartbeat,
    /// The coordinator liveness window expired
    LeaderTimeoutTick,
    /// A client registered with us via the endpoint
    ClientJoin(NodeAddr),
    /// A queried client reported a sensor value
    SensorReport(i16),
    /// The candidacy settling window expired
    LeaderThresholdTick,
}

impl Event {
    /// Get the event type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::IntervalTick => "IntervalTick",
            Event::PeerBroadcast(_) => "PeerBroadcast",
            Event::CoordinatorHeartbeat => "CoordinatorHeartbeat",
            Event::LeaderTimeoutTick => "LeaderTimeoutTick",
            Event::ClientJoin(_) => "ClientJoin",
            Event::SensorReport(_) => "SensorReport",
            Event::LeaderThresholdTick => "LeaderThresholdTick",
        }
    }
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Arm, disarm, or supersede a timer
    Timer(TimerOp, TimerKind),
    /// Announce our own address on the identity channel
    Announce,
    /// Publish an aggregate value on the sensor channel
    Publish(i16),
    /// Send a registration request to the coordinator
    Register(NodeAddr),
    /// Query a registered client for its sensor value
    QuerySensor(NodeAddr),
}

/// A mailbox item: one event, with an optional completion signal
///
/// Network and endpoint producers attach an ack channel and wait for it,
/// so the worker fully reacts to one datagram before the producer reads
/// the next from that source. Timer expiries carry no ack.
#[derive(Debug)]
pub struct Envelope {
    pub event: Event,
    pub ack: Option<oneshot::Sender<()>>,
}

/// Sender half of the event mailbox
pub type Mailbox = mpsc::Sender<Envelope>;

/// Deliver an event and block until the worker has processed it
pub async fn post(tx: &Mailbox, event: Event) -> Result<()> {
    let (ack_tx, ack_rx) = oneshot::channel();
    tx.send(Envelope {
        event,
        ack: Some(ack_tx),
    })
    .await
    .map_err(|_| Error::MailboxClosed)?;
    ack_rx.await.map_err(|_| Error::MailboxClosed)
}

/// Deliver an event without waiting for processing (timer expiries)
pub async fn post_nowait(tx: &Mailbox, event: Event) -> Result<()> {
    tx.send(Envelope { event, ack: None })
        .await
        .map_err(|_| Error::MailboxClosed)
}
