//! Authenticated players and the registry that tracks them.

pub mod registry;

pub use registry::{PendingSession, SessionRegistry};

use crate::connection::{ConnectionHandle, ConnectionId};
use voxel_protocol::{Location, OPERATOR_USER_TYPE, PLAYER_USER_TYPE};

/// Wire-level player id, unique among online sessions (0..=127).
pub type PlayerId = i8;

/// Highest player id the wire format can carry.
pub const MAX_PLAYER_ID: PlayerId = 127;

/// Privilege level of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Player,
    Operator,
}

impl Role {
    /// Colour prefix for chat lines sent by this role.
    pub fn chat_prefix(self) -> &'static str {
        match self {
            Self::Operator => "&c",
            Self::Player => "&7",
        }
    }

    /// User type byte carried by the identification acknowledgment.
    pub fn user_type(self) -> u8 {
        match self {
            Self::Operator => OPERATOR_USER_TYPE,
            Self::Player => PLAYER_USER_TYPE,
        }
    }

    pub fn is_operator(self) -> bool {
        matches!(self, Self::Operator)
    }
}

/// An authenticated player bound to one connection.
///
/// The registry owns the authoritative copy; everything handed out by it is
/// a snapshot.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: ConnectionHandle,
    pub username: String,
    pub player_id: PlayerId,
    pub world: String,
    pub location: Location,
    pub role: Role,
    /// Whether the session receives world traffic. Stays `false` until the
    /// level and its peers have been sent.
    pub visible: bool,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Formats a chat line spoken by this player.
    pub fn chat_line(&self, text: &str) -> String {
        format!("{}{}: &f{}", self.role.chat_prefix(), self.username, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_are_highlighted_in_chat() {
        let (connection, _rx) = ConnectionHandle::new(1, "127.0.0.1:1".parse().unwrap(), 1);
        let mut session = Session {
            connection,
            username: "Alice".into(),
            player_id: 0,
            world: "main".into(),
            location: Location::default(),
            role: Role::Operator,
            visible: true,
        };
        assert_eq!(session.chat_line("hi"), "&cAlice: &fhi");

        session.role = Role::Player;
        assert_eq!(session.chat_line("hi"), "&7Alice: &fhi");
        assert_eq!(Role::Operator.user_type(), OPERATOR_USER_TYPE);
    }
}
