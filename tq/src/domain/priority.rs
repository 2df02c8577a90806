//! Priority levels for task scheduling

use serde::{Deserialize, Serialize};

/// Signed task priority; higher values are dequeued first
///
/// Any `i32` is valid. The named levels are shorthands for common bands and
/// are what `FromStr` accepts besides plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
    pub const CRITICAL: Priority = Priority(20);

    /// Raw priority value
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "normal" => Ok(Self::NORMAL),
            "high" => Ok(Self::HIGH),
            "critical" => Ok(Self::CRITICAL),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| format!("Unknown priority: {}", s)),
        }
    }
}
