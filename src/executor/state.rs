use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

/// Lifecycle of one plan execution.
///
/// `Pending -> Applying -> Committed | RolledBack`, and `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum UpgradeState {
    Pending = 0,
    Applying = 1,
    Committed = 2,
    RolledBack = 3,
    Cancelled = 4,
}

impl UpgradeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Applying,
            2 => Self::Committed,
            3 => Self::RolledBack,
            _ => Self::Cancelled,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Cancelled)
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Shared view of an execution's state; clones observe the same execution.
#[derive(Debug, Clone)]
pub struct UpgradeHandle {
    state: Arc<AtomicU8>,
}

impl Default for UpgradeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(UpgradeState::Pending as u8)),
        }
    }

    pub fn state(&self) -> UpgradeState {
        UpgradeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancels an execution that has not started applying yet.
    pub fn cancel(&self) -> Result<()> {
        self.transition(UpgradeState::Pending, UpgradeState::Cancelled)
    }

    pub(crate) fn begin(&self) -> Result<()> {
        match self.transition(UpgradeState::Pending, UpgradeState::Applying) {
            Ok(()) => Ok(()),
            Err(_) if self.state() == UpgradeState::Cancelled => Err(DbError::Cancelled),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn finish(&self, committed: bool) -> Result<()> {
        let target = if committed {
            UpgradeState::Committed
        } else {
            UpgradeState::RolledBack
        };
        self.transition(UpgradeState::Applying, target)
    }

    fn transition(&self, from: UpgradeState, to: UpgradeState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                DbError::InvalidState(format!(
                    "cannot move from {} to {}, upgrade is {}",
                    from,
                    to,
                    UpgradeState::from_u8(actual)
                ))
            })
    }
}
