//! Per-role mutual exclusion for mutating operations.
//!
//! A lease is taken synchronously before the first await of an operation and
//! released when the guard drops, so a second caller never waits: it fails
//! immediately with `RotationInProgress` or `RoleBusy`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{Result, UdoError};

/// Identity of a role within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleKey {
    pub cluster: String,
    pub role: String,
}

impl RoleKey {
    #[must_use]
    pub fn new(cluster: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            role: role.into(),
        }
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.role)
    }
}

/// Mutating operation holding a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Destroy,
    Reload,
    UpdateLaunchConfig,
    Scale,
}

impl Operation {
    /// Whether the operation rotates instances between groups.
    #[must_use]
    pub const fn is_rotation(self) -> bool {
        matches!(self, Self::Reload | Self::UpdateLaunchConfig)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Destroy => write!(f, "destroy"),
            Self::Reload => write!(f, "reload"),
            Self::UpdateLaunchConfig => write!(f, "updatelc"),
            Self::Scale => write!(f, "scale"),
        }
    }
}

type LeaseTable = Arc<Mutex<HashMap<RoleKey, Operation>>>;

fn lock(table: &LeaseTable) -> MutexGuard<'_, HashMap<RoleKey, Operation>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of held role leases.
#[derive(Debug, Clone, Default)]
pub struct RoleLeases {
    held: LeaseTable,
}

impl RoleLeases {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `key`, failing fast if it is held.
    ///
    /// # Errors
    /// `RotationInProgress` if a rotation holds the role, `RoleBusy` otherwise.
    pub fn acquire(&self, key: &RoleKey, operation: Operation) -> Result<RoleLease> {
        let mut held = lock(&self.held);
        if let Some(holder) = held.get(key) {
            return Err(if holder.is_rotation() {
                UdoError::RotationInProgress(key.to_string())
            } else {
                UdoError::RoleBusy {
                    role: key.to_string(),
                    operation: holder.to_string(),
                }
            });
        }
        held.insert(key.clone(), operation);
        debug!(role = %key, %operation, "Lease acquired");

        Ok(RoleLease {
            table: Arc::clone(&self.held),
            key: key.clone(),
            operation,
        })
    }

    /// Operation currently holding `key`, if any.
    #[must_use]
    pub fn holder(&self, key: &RoleKey) -> Option<Operation> {
        lock(&self.held).get(key).copied()
    }
}

/// Held lease; released on drop.
#[derive(Debug)]
pub struct RoleLease {
    table: LeaseTable,
    key: RoleKey,
    operation: Operation,
}

impl RoleLease {
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Drop for RoleLease {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.key);
        debug!(role = %self.key, operation = %self.operation, "Lease released");
    }
}
