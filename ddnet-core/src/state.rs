//! Signaling link state machine.
//!
//! A pure, side-effect-free state machine for the relay connection lifecycle.
//! It consumes events and produces a new state plus a list of actions; the
//! actual I/O (dialing, authenticating, timers) is performed by the client
//! crate. This keeps the lifecycle instantly unit-testable without network
//! mocks.

use crate::backoff::reconnect_delay;
use std::time::Duration;

/// Signaling link state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected to any relay.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Number of attempts that have already failed this cycle.
        attempt: u32,
    },
    /// Connected, performing challenge-response authentication.
    Authenticating {
        /// Number of attempts that have already failed this cycle.
        attempt: u32,
    },
    /// Fully connected and authenticated.
    Connected,
    /// Disconnected, waiting to reconnect.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
}

impl LinkState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: LinkEvent) -> (Self, Vec<LinkAction>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, LinkEvent::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![LinkAction::Connect])
            }

            // From Connecting
            (Self::Connecting { attempt }, LinkEvent::ConnectSucceeded) => {
                (Self::Authenticating { attempt }, vec![LinkAction::StartAuth])
            }
            (Self::Connecting { attempt }, LinkEvent::ConnectFailed { error }) => {
                Self::fail_attempt(attempt, error)
            }

            // From Authenticating
            (Self::Authenticating { .. }, LinkEvent::AuthSucceeded) => (
                Self::Connected,
                vec![LinkAction::Notify(LinkNotice::Connected)],
            ),
            (Self::Authenticating { attempt }, LinkEvent::AuthFailed { error }) => {
                Self::fail_attempt(attempt, error)
            }

            // An explicit close while the link is still coming up tears the
            // attempt down and reports it as disconnected.
            (Self::Connecting { .. }, LinkEvent::DisconnectRequested)
            | (Self::Authenticating { .. }, LinkEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    LinkAction::Disconnect,
                    LinkAction::Notify(LinkNotice::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // From Connected
            (Self::Connected, LinkEvent::Disconnected { reason }) => Self::begin_reconnect(
                1,
                LinkNotice::Disconnected { reason },
            ),
            (Self::Connected, LinkEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    LinkAction::Disconnect,
                    LinkAction::Notify(LinkNotice::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { attempt }, LinkEvent::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![LinkAction::Connect])
            }
            (Self::Reconnecting { .. }, LinkEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![LinkAction::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected and authenticated.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Authenticating { .. } | Self::Reconnecting { .. }
        )
    }

    /// One more attempt just failed; notify and re-enter the backoff
    /// schedule, keeping the count so the delay keeps doubling.
    fn fail_attempt(attempt: u32, error: String) -> (Self, Vec<LinkAction>) {
        let notice = if attempt == 0 {
            LinkNotice::ConnectionFailed { error }
        } else {
            LinkNotice::ReconnectFailed { attempt, error }
        };
        Self::begin_reconnect(attempt.saturating_add(1), notice)
    }

    /// Enter Reconnecting at `attempt`, or give up once the backoff schedule
    /// is exhausted.
    fn begin_reconnect(attempt: u32, notice: LinkNotice) -> (Self, Vec<LinkAction>) {
        match reconnect_delay(attempt) {
            Some(delay) => (
                Self::Reconnecting { attempt },
                vec![
                    LinkAction::Notify(notice),
                    LinkAction::StartReconnectTimer { delay },
                ],
            ),
            None => (
                Self::Disconnected,
                vec![
                    LinkAction::Notify(notice),
                    LinkAction::Notify(LinkNotice::ReconnectsExhausted),
                ],
            ),
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// User requested connection.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Challenge-response authentication completed.
    AuthSucceeded,
    /// Challenge-response authentication failed.
    AuthFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the client.
///
/// These are instructions, not side effects. The client interprets these and
/// performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Initiate transport connection.
    Connect,
    /// Disconnect the transport.
    Disconnect,
    /// Begin challenge-response authentication.
    StartAuth,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit a notice to the application.
    Notify(LinkNotice),
}

/// Notices emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    /// Successfully connected and authenticated.
    Connected,
    /// Connection or authentication failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Disconnected from the relay.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Reconnection attempt failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// All reconnect attempts were used up; the link is down for good.
    ReconnectsExhausted,
}
