//! # Named Operations
//!
//! The platform operations a test can invoke by name, plus the table of
//! historical names that were removed or renamed.
//!
//! Resolving a removed name is a hard error carrying the replacement, so
//! stale call sites fail at test-authoring time instead of silently doing
//! something else.

use crate::types::MinihullError;
use std::fmt;
use std::str::FromStr;

/// Operations exposed through the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Install,
    UpdateEntity,
    EnterGroup,
    ExitGroup,
    UpdateSubscriber,
    RenameGroup,
    Notify,
    Report,
    Batch,
    CallSubscriber,
    Dashboard,
    Reset,
    Save,
    Load,
}

impl Operation {
    /// Every operation, in documentation order.
    pub const ALL: [Operation; 14] = [
        Operation::Install,
        Operation::UpdateEntity,
        Operation::EnterGroup,
        Operation::ExitGroup,
        Operation::UpdateSubscriber,
        Operation::RenameGroup,
        Operation::Notify,
        Operation::Report,
        Operation::Batch,
        Operation::CallSubscriber,
        Operation::Dashboard,
        Operation::Reset,
        Operation::Save,
        Operation::Load,
    ];

    /// Current name of the operation.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::UpdateEntity => "update_entity",
            Self::EnterGroup => "enter_group",
            Self::ExitGroup => "exit_group",
            Self::UpdateSubscriber => "update_subscriber",
            Self::RenameGroup => "rename_group",
            Self::Notify => "notify",
            Self::Report => "report",
            Self::Batch => "batch",
            Self::CallSubscriber => "call_subscriber",
            Self::Dashboard => "dashboard",
            Self::Reset => "reset",
            Self::Save => "save",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Historical operation names and the operation that replaced them.
pub const REMOVED_OPERATIONS: &[(&str, Operation)] = &[
    ("mimicInstall", Operation::Install),
    ("mimicUpdateUser", Operation::UpdateEntity),
    ("mimicUserEntersSegment", Operation::EnterGroup),
    ("mimicUserExitsSegment", Operation::ExitGroup),
    ("mimicUpdateConnector", Operation::UpdateSubscriber),
    ("mimicSendNotification", Operation::Notify),
    ("mimicUserReport", Operation::Report),
    ("mimicBatchCall", Operation::Batch),
    ("mimicPostConnector", Operation::CallSubscriber),
    ("mimicDashboard", Operation::Dashboard),
    ("updateUser", Operation::UpdateEntity),
    ("addUserToSegment", Operation::EnterGroup),
    ("removeUserFromSegment", Operation::ExitGroup),
    ("updateShip", Operation::UpdateSubscriber),
    ("updateFirstShip", Operation::UpdateSubscriber),
    ("sendNotification", Operation::Notify),
    ("buildUserReport", Operation::Report),
    ("sendBatchToFirstShip", Operation::Batch),
    ("callFirstShip", Operation::CallSubscriber),
    ("resetState", Operation::Reset),
];

/// Resolve an operation name, failing loudly on removed names.
pub fn resolve_operation(name: &str) -> Result<Operation, MinihullError> {
    if let Some((_, replacement)) = REMOVED_OPERATIONS.iter().find(|(old, _)| *old == name) {
        return Err(MinihullError::RemovedOperation {
            name: name.to_string(),
            replacement: replacement.name(),
        });
    }
    Operation::ALL
        .iter()
        .copied()
        .find(|op| op.name() == name)
        .ok_or_else(|| MinihullError::UnknownOperation(name.to_string()))
}

impl FromStr for Operation {
    type Err = MinihullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve_operation(s)
    }
}
