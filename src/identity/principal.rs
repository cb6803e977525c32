use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque user key bound to a session. Downstream code compares and forwards it,
/// it never treats it as a user entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(UserId)
    }
}

impl From<u64> for UserId {
    fn from(v: u64) -> Self { UserId(v) }
}
