//! Identity types for InferPay
//!
//! Two families of identifiers coexist:
//!
//! - Principals (`AccountId`, `FactId`) are externally supplied or random,
//!   represented as UUID newtypes.
//! - Handles (`ConversationId`, `JobId`, `MessageId`, `TriggerId`) are issued
//!   by the registry from monotonic counters. Zero is never issued: it is the
//!   caller-facing sentinel for "not yet assigned / create new".

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate UUID-backed principal ID types
macro_rules! define_principal_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// The nil principal, used as the "zero address" reject value
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the nil principal
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_principal_type!(AccountId, "acct", "Authenticated principal that owns conversations, jobs and authorizations");
define_principal_type!(FactId, "fact", "Unique identifier for a published domain fact");

/// Macro to generate counter-issued handle types
macro_rules! define_handle_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// The unassigned sentinel (`0` means "not yet assigned / create new")
            pub const UNASSIGNED: Self = Self(0);

            /// Wrap a raw handle value
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Whether this is the unassigned sentinel
            pub fn is_unassigned(&self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_handle_type!(ConversationId, "conv", "Handle for an ownership-scoped conversation thread");
define_handle_type!(JobId, "job", "Handle for a recurring / autonomous agent job");
define_handle_type!(MessageId, "msg", "Handle for a prompt or answer message");
define_handle_type!(TriggerId, "trig", "Handle for a single firing of an agent job");

/// The handle an escrow record is keyed by: the answer message or the job
/// trigger whose outcome the escrowed payment awaits.
///
/// Message and trigger counters are independent, so the two handle spaces
/// can collide numerically; the escrow ledger must never confuse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowHandle {
    /// Escrow backing a prompt, keyed by its reserved answer message
    Answer(MessageId),
    /// Escrow backing an agent job firing, keyed by its trigger
    Trigger(TriggerId),
}

impl fmt::Display for EscrowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer(id) => write!(f, "{}", id),
            Self::Trigger(id) => write!(f, "{}", id),
        }
    }
}

impl From<MessageId> for EscrowHandle {
    fn from(id: MessageId) -> Self {
        Self::Answer(id)
    }
}

impl From<TriggerId> for EscrowHandle {
    fn from(id: TriggerId) -> Self {
        Self::Trigger(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_creation() {
        let id = AccountId::new();
        let s = id.to_string();
        assert!(s.starts_with("acct_"));
        assert!(!id.is_nil());
    }

    #[test]
    fn test_account_id_parsing() {
        let id = AccountId::new();
        let parsed = AccountId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_handle_sentinel() {
        assert!(ConversationId::UNASSIGNED.is_unassigned());
        assert!(!ConversationId::new(1).is_unassigned());
        assert_eq!(MessageId::from(7), MessageId::new(7));
    }

    #[test]
    fn test_escrow_handle_spaces_are_distinct() {
        let answer = EscrowHandle::from(MessageId::new(3));
        let trigger = EscrowHandle::from(TriggerId::new(3));
        assert_ne!(answer, trigger);
    }
}
