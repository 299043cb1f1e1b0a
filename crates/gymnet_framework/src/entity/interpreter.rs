use gymnet_types::prelude::{Reply, Value};

/// What a reply said about one recognized action key.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Values(Vec<f64>),
    /// The reply had no entry for this key. Distinct from a zero-valued action.
    Missing,
    /// The entry exists but is not a box.
    Malformed(String),
}

impl ActionOutcome {
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            ActionOutcome::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ActionOutcome::Missing)
    }
}

/// Per-key outcomes, in the order the keys were registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpretedActions {
    outcomes: Vec<(String, ActionOutcome)>,
}

impl InterpretedActions {
    pub fn from_outcomes(outcomes: Vec<(String, ActionOutcome)>) -> Self {
        Self { outcomes }
    }

    pub fn get(&self, key: &str) -> Option<&ActionOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn values(&self, key: &str) -> Option<&[f64]> {
        self.get(key).and_then(ActionOutcome::values)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionOutcome)> {
        self.outcomes.iter().map(|(k, o)| (k.as_str(), o))
    }

    /// True when no key carried usable values.
    pub fn is_no_action(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| outcome.values().is_none())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Extracts the recognized action entries from a reply. Unrecognized keys are ignored.
#[derive(Debug, Clone)]
pub struct ReplyInterpreter {
    keys: Vec<String>,
}

impl ReplyInterpreter {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn interpret(&self, reply: &Reply) -> InterpretedActions {
        let Value::Dict(_) = &reply.action else {
            let reason = "action root is a box, expected a dict".to_string();
            return self.uniform(ActionOutcome::Malformed(reason));
        };

        let outcomes = self
            .keys
            .iter()
            .map(|key| {
                let outcome = match reply.action.get(key) {
                    Some(Value::Box(values)) => ActionOutcome::Values(values.clone()),
                    Some(Value::Dict(_)) => {
                        ActionOutcome::Malformed(format!("`{}` is a dict, expected a box", key))
                    }
                    None => ActionOutcome::Missing,
                };
                (key.clone(), outcome)
            })
            .collect();

        if log::log_enabled!(log::Level::Trace) {
            if let Some(items) = reply.action.as_dict() {
                for item in items.iter().filter(|i| !self.keys.contains(&i.key)) {
                    log::trace!("[ReplyInterpreter] Ignoring unrecognized key `{}`", item.key);
                }
            }
        }

        InterpretedActions::from_outcomes(outcomes)
    }

    /// Every recognized key marked missing.
    pub fn no_action(&self) -> InterpretedActions {
        self.uniform(ActionOutcome::Missing)
    }

    fn uniform(&self, outcome: ActionOutcome) -> InterpretedActions {
        InterpretedActions::from_outcomes(
            self.keys
                .iter()
                .map(|key| (key.clone(), outcome.clone()))
                .collect(),
        )
    }
}
