//! k-of-n quorum shared by the collector fan-out and the opinion fan-out

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum number of successful parallel calls a step needs before it may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub required: usize,
    pub total: usize,
}

impl Quorum {
    pub fn new(required: usize, total: usize) -> Self {
        Self { required, total }
    }

    /// Every call must succeed
    pub fn all(total: usize) -> Self {
        Self::new(total, total)
    }

    /// At least `required` of however many calls are issued
    pub fn at_least(required: usize, total: usize) -> Self {
        Self::new(required, total)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required == 0 {
            return Err(ConsensusError::ConfigurationError(format!(
                "quorum {self} requires at least one success"
            )));
        }
        if self.required > self.total {
            return Err(ConsensusError::ConfigurationError(format!(
                "quorum {self} requires more successes than calls"
            )));
        }
        Ok(())
    }

    /// Same requirement, applied to a different number of calls
    pub fn with_total(self, total: usize) -> Self {
        Self {
            required: self.required,
            total,
        }
    }

    pub fn is_met(&self, successes: usize) -> bool {
        successes >= self.required
    }

    pub fn is_unanimous(&self) -> bool {
        self.required == self.total
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-of-{}", self.required, self.total)
    }
}

impl FromStr for Quorum {
    type Err = ConsensusError;

    /// Parses `"2/3"` or `"2-of-3"`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (required, total) = s
            .split_once('/')
            .or_else(|| s.split_once("-of-"))
            .ok_or_else(|| ConsensusError::ConfigurationError(format!("bad quorum: {s}")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|e| ConsensusError::ConfigurationError(format!("bad quorum {s}: {e}")))
        };
        let quorum = Self::new(parse(required)?, parse(total)?);
        quorum.validate()?;
        Ok(quorum)
    }
}
