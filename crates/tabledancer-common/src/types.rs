use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MigrationId(i64);

macro_rules! impl_id_type {
    ($t:ty) => {
        impl $t {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $t {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

impl_id_type!(MigrationId);

/// Lifecycle of one migration. Phases only ever move forward through
/// `init → copy → replay → cutover → complete`; `aborted` is terminal and
/// reachable from every phase except `complete`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Copy,
    Replay,
    Cutover,
    Complete,
    Aborted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Copy => "copy",
            Self::Replay => "replay",
            Self::Cutover => "cutover",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db(value: &str) -> Result<Self> {
        match value {
            "init" => Ok(Self::Init),
            "copy" => Ok(Self::Copy),
            "replay" => Ok(Self::Replay),
            "cutover" => Ok(Self::Cutover),
            "complete" => Ok(Self::Complete),
            "aborted" => Ok(Self::Aborted),
            other => Err(Error::Database(format!("unknown migration phase: {other}"))),
        }
    }

    /// The phase a successful run of this phase's operation advances to.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Copy),
            Self::Copy => Some(Self::Replay),
            Self::Replay => Some(Self::Cutover),
            Self::Cutover => Some(Self::Complete),
            Self::Complete | Self::Aborted => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row mutation captured in the change log. The numeric codes are
/// persisted and must not change.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Insert,
    Update,
    Delete,
}

impl Instruction {
    pub const ALL: [Instruction; 3] = [Self::Insert, Self::Update, Self::Delete];

    pub fn code(&self) -> i64 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            other => Err(Error::Database(format!("unknown instruction code: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Trigger row reference holding the affected row id.
    pub fn row_ref(&self) -> &'static str {
        match self {
            Self::Insert | Self::Update => "NEW",
            Self::Delete => "OLD",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
