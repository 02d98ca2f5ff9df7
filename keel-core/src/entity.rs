//! Base attributes shared by persisted entities.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and audit fields carried by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBase {
    id: Uuid,
    pub create_user: String,
    pub update_user: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityBase {
    /// Entity with a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Entity with an id assigned by the caller.
    pub fn with_id(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            create_user: String::new(),
            update_user: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Entity whose id has not been assigned yet (nil UUID).
    pub fn unassigned() -> Self {
        Self::with_id(Uuid::nil())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_nil()
    }

    /// Assign the id once. Re-assigning the same id is a no-op; a different
    /// id fails with `Conflict`.
    pub fn assign_id(&mut self, id: Uuid) -> Result<()> {
        if self.has_id() && self.id != id {
            return Err(Error::Conflict(format!(
                "entity id already set to {}",
                self.id
            )));
        }
        self.id = id;
        Ok(())
    }

    /// Stamp creation audit fields.
    pub fn mark_created(&mut self, user: impl Into<String>) {
        let user = user.into();
        let now = Utc::now();
        self.create_user = user.clone();
        self.update_user = user;
        self.created_at = now;
        self.updated_at = now;
    }

    /// Stamp update audit fields.
    pub fn mark_updated(&mut self, user: impl Into<String>) {
        self.update_user = user.into();
        self.updated_at = Utc::now();
    }
}

impl Default for EntityBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Types persisted through repository adapters.
pub trait Entity: Send + Sync {
    fn base(&self) -> &EntityBase;

    fn base_mut(&mut self) -> &mut EntityBase;

    fn id(&self) -> Uuid {
        self.base().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_immutable_once_set() {
        let mut base = EntityBase::unassigned();
        assert!(!base.has_id());

        let id = Uuid::new_v4();
        base.assign_id(id).unwrap();
        base.assign_id(id).unwrap();
        assert_eq!(base.id(), id);

        let err = base.assign_id(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
        assert_eq!(base.id(), id);
    }

    #[test]
    fn test_audit_stamps() {
        let mut base = EntityBase::new();
        base.mark_created("alice");
        assert_eq!(base.create_user, "alice");
        assert_eq!(base.update_user, "alice");

        base.mark_updated("bob");
        assert_eq!(base.create_user, "alice");
        assert_eq!(base.update_user, "bob");
        assert!(base.updated_at >= base.created_at);
    }

    #[test]
    fn test_serde_round_trip_keeps_id() {
        let base = EntityBase::new();
        let json = serde_json::to_string(&base).unwrap();
        let back: EntityBase = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), base.id());
    }
}
