//! Stream model: every aggregate instance owns one append-only event stream.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of aggregate a stream belongs to.
///
/// The wire form (`user` / `resource`) is also the first segment of every
/// event and snapshot key in the blob store, so renaming a variant is a data
/// migration, not a refactor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    User,
    Resource,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::User => "user",
            StreamType::Resource => "resource",
        }
    }
}

impl core::fmt::Display for StreamType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(StreamType::User),
            "resource" => Ok(StreamType::Resource),
            other => Err(DomainError::invalid_request(format!(
                "unknown stream type: {other}"
            ))),
        }
    }
}
