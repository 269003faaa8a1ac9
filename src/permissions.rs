//! Permission Checks
//!
//! Two questions the dispatcher asks before doing any work:
//! - **Admin**: is the sender allowed to run admin-only commands?
//! - **Room**: is the bot enabled in this room at all?
//!
//! Failing either produces a fixed denial reply and never touches the
//! cache or the health counters.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::info;

pub const ADMIN_ONLY_MESSAGE: &str = "⚠️ This command is restricted to administrators.";
pub const ROOM_DISABLED_MESSAGE: &str = "This bot is not available in this room.";

/// Administrative surface consumed by the dispatcher
pub trait AccessControl: Send + Sync {
    fn is_admin(&self, sender: &str) -> bool;
    fn is_room_enabled(&self, room: &str) -> bool;
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    AdminOnly,
    RoomDisabled,
}

impl Denial {
    pub fn message(&self) -> &'static str {
        match self {
            Denial::AdminOnly => ADMIN_ONLY_MESSAGE,
            Denial::RoomDisabled => ROOM_DISABLED_MESSAGE,
        }
    }
}

/// Check a command's requirements against the access list
///
/// Admin is checked first so a non-admin in a disabled room still learns
/// the command is admin-only.
pub fn check(
    access: &dyn AccessControl,
    room: &str,
    sender: &str,
    requires_admin: bool,
    requires_enabled_room: bool,
) -> Result<(), Denial> {
    if requires_admin && !access.is_admin(sender) {
        return Err(Denial::AdminOnly);
    }
    if requires_enabled_room && !access.is_room_enabled(room) {
        return Err(Denial::RoomDisabled);
    }
    Ok(())
}

/// Static admin and room lists, editable at runtime by admins
#[derive(Debug, Default)]
pub struct StaticAccessList {
    admins: RwLock<BTreeSet<String>>,
    rooms: RwLock<BTreeSet<String>>,
}

impl StaticAccessList {
    pub fn new<A, R>(admins: A, rooms: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            admins: RwLock::new(admins.into_iter().map(Into::into).collect()),
            rooms: RwLock::new(rooms.into_iter().map(Into::into).collect()),
        }
    }

    /// Enable the bot in a room. Returns false if it already was.
    pub fn add_room(&self, room: &str) -> bool {
        let added = self.rooms.write().insert(room.to_string());
        if added {
            info!("Room enabled: {}", room);
        }
        added
    }

    /// Disable the bot in a room. Returns false if it was not enabled.
    pub fn remove_room(&self, room: &str) -> bool {
        let removed = self.rooms.write().remove(room);
        if removed {
            info!("Room disabled: {}", room);
        }
        removed
    }

    pub fn rooms(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }

    pub fn admins(&self) -> Vec<String> {
        self.admins.read().iter().cloned().collect()
    }
}

impl AccessControl for StaticAccessList {
    fn is_admin(&self, sender: &str) -> bool {
        self.admins.read().contains(sender)
    }

    fn is_room_enabled(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> StaticAccessList {
        StaticAccessList::new(["alice"], ["general", "ops"])
    }

    #[test]
    fn test_admin_and_room_checks() {
        let acl = access();

        assert_eq!(check(&acl, "general", "bob", false, true), Ok(()));
        assert_eq!(check(&acl, "general", "alice", true, true), Ok(()));
        assert_eq!(
            check(&acl, "general", "bob", true, true),
            Err(Denial::AdminOnly)
        );
        assert_eq!(
            check(&acl, "random", "alice", false, true),
            Err(Denial::RoomDisabled)
        );
        // Room requirement can be waived per command
        assert_eq!(check(&acl, "random", "bob", false, false), Ok(()));
    }

    #[test]
    fn test_admin_denial_reported_before_room() {
        let acl = access();
        assert_eq!(
            check(&acl, "random", "bob", true, true),
            Err(Denial::AdminOnly)
        );
    }

    #[test]
    fn test_room_management() {
        let acl = access();

        assert!(acl.add_room("new-room"));
        assert!(!acl.add_room("new-room"));
        assert!(acl.is_room_enabled("new-room"));

        assert!(acl.remove_room("ops"));
        assert!(!acl.remove_room("ops"));
        assert!(!acl.is_room_enabled("ops"));

        assert_eq!(acl.rooms(), vec!["general", "new-room"]);
    }
}
