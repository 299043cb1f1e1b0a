//! Request and reply envelopes.
//!
//! ```text
//! Request = { id: int64, step: { observation: Value, reward: Value } }
//! Reply   = { action: Value }
//! ```

use serde::{Deserialize, Serialize};

use super::value::{Value, ValueError};

/// Observation and reward for one control interval. Both fields are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub observation: Value,
    pub reward: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token linking this request to its reply.
    pub id: i64,
    pub step: Step,
}

impl Request {
    pub fn new(id: i64, observation: Value, reward: Value) -> Self {
        Self {
            id,
            step: Step {
                observation,
                reward,
            },
        }
    }

    pub fn observation(&self) -> &Value {
        &self.step.observation
    }

    pub fn reward(&self) -> &Value {
        &self.step.reward
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        self.step.observation.validate()?;
        self.step.reward.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub action: Value,
}

impl Reply {
    pub fn new(action: Value) -> Self {
        Self { action }
    }

    /// Reply carrying an empty action dict.
    pub fn empty() -> Self {
        Self {
            action: Value::empty_dict(),
        }
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        self.action.validate()
    }
}
