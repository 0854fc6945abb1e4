use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::document::Delta;

/// Origin of a sweep in the canonical sweep list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepKind {
    /// Loaded from a sub-directory of the input root.
    Described,
    /// Synthesised seed sweep.
    Seed,
    /// Single no-op arm injected to satisfy the minimum sweep count.
    Dummy,
}

/// One concrete variant within a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub name: String,
    pub delta: Delta,
}

impl Arm {
    pub fn new(name: impl Into<String>, delta: Delta) -> Self {
        Self {
            name: name.into(),
            delta,
        }
    }
}

/// Independent axis of variation: a named set of mutually exclusive arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub name: String,
    pub kind: SweepKind,
    pub arms: Vec<Arm>,
}

impl Sweep {
    pub fn new(name: impl Into<String>, kind: SweepKind, arms: Vec<Arm>) -> Self {
        Self {
            name: name.into(),
            kind,
            arms,
        }
    }

    /// Index of the arm called `name`, if any.
    pub fn arm_index(&self, name: &str) -> Option<usize> {
        self.arms.iter().position(|arm| arm.name == name)
    }
}

/// One design point: an arm index per sweep, in canonical sweep order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    /// Stable scenario identifier.
    pub id: u64,
    pub choices: Vec<usize>,
}

/// Ordered `(sweep, arm)` name pairs identifying a combination independent
/// of its identifier or generation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature(pub Vec<(String, String)>);

impl Signature {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (sweep, arm)) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ";")?;
            }
            write!(f, "{sweep}={arm}")?;
        }
        Ok(())
    }
}
