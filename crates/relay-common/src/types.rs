//! Peer roles and protocol constants.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The two fixed peer types a connection identifies as when attaching
/// to a session. A session holds at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The agent side of a session.
    Agent,
    /// The relay side of a session.
    Relay,
}

impl Role {
    /// The role a message from this role is forwarded to.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Agent => Self::Relay,
            Self::Relay => Self::Agent,
        }
    }

    /// Wire name of the role, as it appears in the `role` query parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `role` query parameter named something other than `agent` or `relay`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role")]
pub struct UnknownRole;

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "relay" => Ok(Self::Relay),
            _ => Err(UnknownRole),
        }
    }
}

/// WebSocket close status codes used by the relay.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// A fragmented message was received; fragmentation is unsupported.
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// Policy violation. Reserved: parameter and token failures are
    /// rejected pre-handshake with plain HTTP statuses instead.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// A frame declared a payload larger than the codec accepts.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// The connection was displaced by a newer one for the same role.
    pub const REPLACED: u16 = 1012;
}

/// Close reasons paired with the codes in [`close_code`].
pub mod close_reason {
    /// Sent with [`super::close_code::UNSUPPORTED_DATA`].
    pub const FRAGMENTED: &str = "fragmented_not_supported";
    /// Sent with [`super::close_code::MESSAGE_TOO_BIG`].
    pub const FRAME_TOO_LARGE: &str = "frame_too_large";
    /// Sent with [`super::close_code::REPLACED`].
    pub const REPLACED: &str = "replaced";
}
