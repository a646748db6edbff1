//! The association lifecycle state machine.
//!
//! Both the requester and the acceptor drive one [`StateMachine`]
//! per connection through the states of the upper layer protocol.
//! Transitions are checked:
//! the drivers only ever request legal ones,
//! and an illegal request indicates an out-of-sequence PDU
//! which the drivers convert into a local A-ABORT.

use std::time::Duration;

use snafu::{ensure, Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("illegal association state transition {:?} -> {:?}", from, to))]
    IllegalTransition {
        from: State,
        to: State,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The lifecycle states of an association.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum State {
    /// no connection activity yet
    Idle,
    /// transport connection requested or accepted
    ConnectRequested,
    /// A-ASSOCIATE-RQ sent, awaiting the acceptor's answer
    AssociateRequestSent,
    /// A-ASSOCIATE-RQ received, negotiation in progress
    AssociateRequestReceived,
    /// association negotiated, data transfer phase
    Established,
    /// A-RELEASE-RQ sent, awaiting the release reply
    ReleaseRequested,
    /// association released cleanly
    Released,
    /// association torn down by A-ABORT or transport loss
    Aborted,
}

impl State {
    /// Whether no further transitions can leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Released | State::Aborted)
    }
}

/// A checked association state holder.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine { state: State::Idle }
    }
}

impl StateMachine {
    /// Create a state machine in the idle state.
    pub fn new() -> Self {
        StateMachine::default()
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Move to the given state,
    /// failing if the protocol does not allow the transition.
    pub fn transition(&mut self, to: State) -> Result<()> {
        use State::*;
        let legal = matches!(
            (self.state, to),
            (Idle, ConnectRequested)
                | (ConnectRequested, AssociateRequestSent)
                | (ConnectRequested, AssociateRequestReceived)
                | (AssociateRequestSent, Established)
                | (AssociateRequestReceived, Established)
                | (Established, ReleaseRequested)
                | (ReleaseRequested, Released)
        ) || (to == Aborted && !self.state.is_terminal());
        ensure!(
            legal,
            IllegalTransitionSnafu {
                from: self.state,
                to
            }
        );
        self.state = to;
        Ok(())
    }

    /// Move to the aborted state.
    ///
    /// Legal from every non-terminal state;
    /// a no-op when already aborted.
    pub fn abort(&mut self) {
        if self.state != State::Released {
            self.state = State::Aborted;
        }
    }
}

/// The wall-clock deadlines enforced by the association drivers.
///
/// All deadlines default to `None`, meaning no limit.
/// Expiry of any deadline while waiting on the peer
/// aborts the association and surfaces as a network error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutOptions {
    /// deadline for establishing the transport connection
    pub connect_timeout: Option<Duration>,
    /// deadline for the peer's answer to an A-ASSOCIATE-RQ
    pub associate_timeout: Option<Duration>,
    /// deadline for each PDU read during the data transfer phase
    pub read_timeout: Option<Duration>,
    /// deadline for each PDU write
    pub write_timeout: Option<Duration>,
}

impl TimeoutOptions {
    pub fn new() -> Self {
        TimeoutOptions::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn associate_timeout(mut self, timeout: Duration) -> Self {
        self.associate_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}
