//! Stage checkpoints for the distributed request loop
//!
//! A stage is an ordinal. Components vote for the earliest stage they still
//! need and the coordinator runs the minimum of all votes. Only the ordering
//! matters, so a component can introduce its own checkpoint between two
//! well-known ones without coordinating with anybody else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Totally ordered processing checkpoint with reserved bounds.
///
/// `Stage::START` is the smallest value and `Stage::DONE` the largest. A vote
/// of `DONE` means "nothing left to contribute".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(u32);

impl Stage {
    pub const START: Stage = Stage(0);
    pub const PARSE_QUERY: Stage = Stage(1000);
    pub const TOP_GROUPS: Stage = Stage(1500);
    pub const EXECUTE_QUERY: Stage = Stage(2000);
    pub const GET_FIELDS: Stage = Stage(3000);
    pub const DONE: Stage = Stage(u32::MAX);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn is_done(self) -> bool {
        self == Self::DONE
    }

    fn well_known_name(self) -> Option<&'static str> {
        match self {
            Self::START => Some("start"),
            Self::PARSE_QUERY => Some("parse_query"),
            Self::TOP_GROUPS => Some("top_groups"),
            Self::EXECUTE_QUERY => Some("execute_query"),
            Self::GET_FIELDS => Some("get_fields"),
            Self::DONE => Some("done"),
            _ => None,
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::START
    }
}

impl From<u32> for Stage {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.well_known_name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Minimum of a set of votes. An empty set means there is nothing to run.
pub fn earliest<I>(votes: I) -> Stage
where
    I: IntoIterator<Item = Stage>,
{
    votes.into_iter().min().unwrap_or(Stage::DONE)
}
