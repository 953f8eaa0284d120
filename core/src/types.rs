//! Domain types for tickets, users and the audit trail.
//!
//! Identifiers are newtypes over the integer primary keys used by the
//! relational store. Enumerated fields carry the labels they are persisted
//! under (`baja`, `operador`, ...) so the SQL layer and the queue never deal
//! in raw strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::state::TicketState;

/// Error type for parsing persisted labels and identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {value:?}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database id.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// The raw database id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|_| ParseLabelError::new($kind, s))
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

integer_id!(
    /// Unique, immutable ticket identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk_core::TicketId;
    ///
    /// let id: TicketId = "42".parse().unwrap();
    /// assert_eq!(id, TicketId::new(42));
    /// assert_eq!(id.to_string(), "42");
    /// ```
    TicketId,
    "ticket id"
);

integer_id!(
    /// Unique user identifier.
    UserId,
    "user id"
);

integer_id!(
    /// Audit entry identifier.
    InteractionId,
    "interaction id"
);

/// Role of a user, and of the author of an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Raises tickets.
    Client,
    /// Works tickets; the only role that may change ticket state.
    Operator,
}

impl Role {
    /// Persisted label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "cliente",
            Self::Operator => "operador",
        }
    }

    /// Parse a persisted label.
    ///
    /// # Errors
    ///
    /// Returns [`ParseLabelError`] for unknown labels.
    pub fn parse(s: &str) -> Result<Self, ParseLabelError> {
        match s {
            "cliente" => Ok(Self::Client),
            "operador" => Ok(Self::Operator),
            _ => Err(ParseLabelError::new("role", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket priority, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low priority
    Low,
    /// Medium priority
    Medium,
    /// High priority
    High,
}

impl Priority {
    /// Persisted label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "baja",
            Self::Medium => "media",
            Self::High => "alta",
        }
    }

    /// Parse a persisted label.
    ///
    /// # Errors
    ///
    /// Returns [`ParseLabelError`] for unknown labels.
    pub fn parse(s: &str) -> Result<Self, ParseLabelError> {
        match s {
            "baja" => Ok(Self::Low),
            "media" => Ok(Self::Medium),
            "alta" => Ok(Self::High),
            _ => Err(ParseLabelError::new("priority", s)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Email (unique)
    pub email: String,
    /// Client or operator
    pub role: Role,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// A support ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id
    pub id: TicketId,
    /// Client who owns the ticket (immutable)
    pub owner_id: UserId,
    /// Subject line, never empty
    pub subject: String,
    /// Free-form description, may be empty
    pub description: String,
    /// Priority (immutable)
    pub priority: Priority,
    /// Current lifecycle state
    pub state: TicketState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last state change (creation time until the first one).
    ///
    /// Lets a reconciliation pass find tickets stuck in processing.
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a ticket. Tickets always start [`TicketState::Open`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketDraft {
    /// Owning client
    pub owner_id: UserId,
    /// Subject line
    pub subject: String,
    /// Description
    pub description: String,
    /// Priority
    pub priority: Priority,
}

/// An immutable audit-trail entry attached to a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Entry id
    pub id: InteractionId,
    /// Ticket the entry belongs to
    pub ticket_id: TicketId,
    /// Who wrote it
    pub author: Role,
    /// Message text
    pub message: String,
    /// Creation time; history is ordered by this, then by id
    pub created_at: DateTime<Utc>,
}

/// Audit entry to append alongside a ticket write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry {
    /// Author role
    pub author: Role,
    /// Message text
    pub message: String,
}

impl AuditEntry {
    /// Entry authored by an operator (every automated entry is).
    #[must_use]
    pub fn operator(message: impl Into<String>) -> Self {
        Self {
            author: Role::Operator,
            message: message.into(),
        }
    }
}
