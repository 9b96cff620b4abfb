// Error types for the simulation crate.
//
// `SyncParseError` covers the world-sync text grammar and aborts a single
// merge without touching the world. `ConfigError` covers loading and
// validating `SimConfig`. `SimError` is what the robot and context APIs
// return.

use std::path::PathBuf;

use robot_world_messaging::MessagingError;
use thiserror::Error;

use crate::types::ObjectId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncParseError {
    #[error("unknown section {0:?}")]
    UnknownSection(String),
    #[error("section is missing its {0:?} tag")]
    MissingTag(&'static str),
    #[error("{section}: {token:?} is not an integer")]
    BadNumber { section: &'static str, token: String },
    #[error("{section}: {token} is out of range")]
    OutOfRange { section: &'static str, token: String },
    #[error("{section}: expected {expected} numbers per group, got {got}")]
    WrongArity {
        section: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncParseError),
    #[error("no goal named {0:?} and no fallback goal in the world")]
    NoGoal(String),
    #[error("robot {0} is not in the world")]
    UnknownRobot(ObjectId),
    #[error("the world has no robot")]
    NoRobot,
    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
