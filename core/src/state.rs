//! Ticket lifecycle.
//!
//! A ticket moves forward through `Open → InProgress → Closed` and nowhere
//! else. [`TicketState::transition_to`] is the only way to obtain a
//! [`Transition`], and every store write that changes a ticket's state takes
//! one, so the forward-only rule is checked in exactly one place.
//!
//! # Example
//!
//! ```
//! use helpdesk_core::TicketState;
//!
//! let start = TicketState::Open.transition_to(TicketState::InProgress).unwrap();
//! assert!(start.requires_enqueue());
//!
//! assert!(TicketState::Closed.transition_to(TicketState::Open).is_err());
//! assert!(TicketState::Open.transition_to(TicketState::Closed).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ParseLabelError;

/// Lifecycle state of a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Created, not yet picked up.
    Open,
    /// Being processed; a completion message is (or was) queued.
    InProgress,
    /// Terminal.
    Closed,
}

impl TicketState {
    /// Persisted label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "abierto",
            Self::InProgress => "en_proceso",
            Self::Closed => "cerrado",
        }
    }

    /// Parse a persisted label.
    ///
    /// # Errors
    ///
    /// Returns [`ParseLabelError`] for unknown labels.
    pub fn parse(s: &str) -> Result<Self, ParseLabelError> {
        match s {
            "abierto" => Ok(Self::Open),
            "en_proceso" => Ok(Self::InProgress),
            "cerrado" => Ok(Self::Closed),
            _ => Err(ParseLabelError::new("ticket state", s)),
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The state directly after this one, if any.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Open => Some(Self::InProgress),
            Self::InProgress => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Validate a move from `self` to `next`.
    ///
    /// Only single forward steps are accepted: `Open → InProgress` and
    /// `InProgress → Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for backward moves, skips and no-ops.
    pub fn transition_to(self, next: Self) -> Result<Transition, InvalidTransition> {
        if self.successor() == Some(next) {
            Ok(Transition { from: self, to: next })
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated state change.
///
/// Store implementations apply it as a compare-and-set: the write only
/// happens while the ticket is still in [`Transition::from`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    from: TicketState,
    to: TicketState,
}

impl Transition {
    /// Expected current state.
    #[must_use]
    pub const fn from(&self) -> TicketState {
        self.from
    }

    /// Target state.
    #[must_use]
    pub const fn to(&self) -> TicketState {
        self.to
    }

    /// Entering processing hands the ticket to the completion workers.
    #[must_use]
    pub const fn requires_enqueue(&self) -> bool {
        matches!(self.to, TicketState::InProgress)
    }

    /// Audit message recorded for this change, e.g. `Estado cambiado a cerrado`.
    #[must_use]
    pub fn audit_message(&self) -> String {
        format!("Estado cambiado a {}", self.to)
    }
}

/// A state change that violates the forward-only lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid ticket transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Current state
    pub from: TicketState,
    /// Requested state
    pub to: TicketState,
}
