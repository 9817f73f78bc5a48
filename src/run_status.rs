use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The status reported for a command that has never been run
pub const NOT_RUN_YET: &str = "not run yet";

/// The lifecycle of a single run
///
/// A run is created `InProgress` and moves exactly once to one of the terminal states. The database enforces the
/// one-shot transition, this type only describes it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Map a process exit code to the terminal status it produces
    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }

    /// The value stored in the database and sent over the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::InProgress
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "in_progress" => Self::InProgress,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => bail!("Invalid run status {value}"),
        })
    }
}

// Human-friendly form used in listings
impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in progress"),
            status => write!(f, "{}", status.as_str()),
        }
    }
}
