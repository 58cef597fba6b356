//! Kinds of trees a backing system exposes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which slice of a backing system a tree holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Configuration owned by this system.
    Config,
    /// Observed-only state, such as faults and runtime counters.
    Operational,
    /// Configuration owned by another authority but visible here.
    Monitored,
}

impl TreeKind {
    /// Every kind, in a fixed order.
    pub const ALL: [Self; 3] = [Self::Config, Self::Operational, Self::Monitored];
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Operational => write!(f, "operational"),
            Self::Monitored => write!(f, "monitored"),
        }
    }
}
