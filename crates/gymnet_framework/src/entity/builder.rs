use gymnet_types::prelude::{Request, Value, ValueError};

use serde::{Deserialize, Serialize};

/// How request ids are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// 1, 2, 3, ... per entity.
    #[default]
    Monotonic,
    /// Same id on every request. Only for single-shot demos; replies cannot be correlated.
    Fixed(i64),
}

/// Current sampled state of an entity: named feature groups plus the reward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub features: Vec<(String, Vec<f64>)>,
    pub reward: Vec<f64>,
}

impl Observation {
    pub fn new(reward: impl Into<Vec<f64>>) -> Self {
        Self {
            features: Vec::new(),
            reward: reward.into(),
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        self.features.push((name.into(), values.into()));
        self
    }
}

/// Assembles one well-formed [`Request`] per tick.
#[derive(Debug)]
pub struct MessageBuilder {
    policy: IdPolicy,
    next_id: i64,
    last_id: Option<i64>,
    warned_fixed: bool,
}

impl MessageBuilder {
    pub fn new(policy: IdPolicy) -> Self {
        Self {
            policy,
            next_id: 1,
            last_id: None,
            warned_fixed: false,
        }
    }

    pub fn policy(&self) -> IdPolicy {
        self.policy
    }

    pub fn last_id(&self) -> Option<i64> {
        self.last_id
    }

    fn allocate_id(&mut self) -> i64 {
        let id = match self.policy {
            IdPolicy::Monotonic => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                id
            }
            IdPolicy::Fixed(id) => {
                if !self.warned_fixed {
                    log::warn!(
                        "[MessageBuilder] Fixed request id {} in use; replies cannot be correlated (not for production)",
                        id
                    );
                    self.warned_fixed = true;
                }
                id
            }
        };
        self.last_id = Some(id);
        id
    }

    pub fn build(&mut self, observation: Value, reward: Value) -> Request {
        Request::new(self.allocate_id(), observation, reward)
    }

    /// Observation becomes a dict of boxes, one per feature group; reward becomes a box.
    pub fn build_from_observation(&mut self, sample: &Observation) -> Result<Request, ValueError> {
        let observation = Value::dict_from(
            sample
                .features
                .iter()
                .map(|(name, values)| (name.as_str(), Value::from_values(values.iter().copied()))),
        )?;
        let reward = Value::from_values(sample.reward.iter().copied());
        Ok(self.build(observation, reward))
    }
}
