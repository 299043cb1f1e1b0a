//! Recursive value tree carried by every observation, reward and action.
//!
//! A [`Value`] is either a flat numeric vector (`Box`) or an ordered collection of uniquely
//! keyed sub-values (`Dict`). Nesting depth is unbounded in memory; decoding through
//! [`with_depth_limit`] caps it.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::cell::Cell;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Duplicate dict key: {0}")]
    DuplicateKey(String),
    #[error("Expected a dict value, found a box")]
    NotADict,
    #[error("Expected a box value, found a dict")]
    NotABox,
}

/// One named entry of a [`Value::Dict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictItem {
    pub key: String,
    pub value: Value,
}

impl DictItem {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// Ordered sequence of doubles; duplicates allowed, may be empty.
    Box(Vec<f64>),
    /// Ordered `(key, value)` entries with keys unique within this dict.
    Dict(Vec<DictItem>),
}

/// Same shape and names as [`Value`] on the wire; nested values still go through
/// `Value::deserialize`.
#[derive(Deserialize)]
#[serde(rename = "Value")]
enum WireValue {
    Box(Vec<f64>),
    Dict(Vec<DictItem>),
}

thread_local! {
    /// Nesting levels still allowed for the decode in progress on this thread.
    static LEVELS_LEFT: Cell<Option<usize>> = const { Cell::new(None) };
    static LIMIT_HIT: Cell<bool> = const { Cell::new(false) };
}

/// Runs `decode` with every [`Value`] it deserializes capped at `max_depth` levels.
///
/// Returns the decode result and whether the cap was hit. Decoding outside this scope is
/// unbounded.
pub(crate) fn with_depth_limit<T>(max_depth: usize, decode: impl FnOnce() -> T) -> (T, bool) {
    let scope = DepthScope {
        levels_left: LEVELS_LEFT.with(|levels| levels.replace(Some(max_depth))),
        limit_hit: LIMIT_HIT.with(|hit| hit.replace(false)),
    };
    let decoded = decode();
    let hit = LIMIT_HIT.with(Cell::get);
    drop(scope);
    (decoded, hit)
}

/// Restores the enclosing scope's budget, also on unwind.
struct DepthScope {
    levels_left: Option<usize>,
    limit_hit: bool,
}

impl Drop for DepthScope {
    fn drop(&mut self) {
        LEVELS_LEFT.with(|levels| levels.set(self.levels_left));
        LIMIT_HIT.with(|hit| hit.set(self.limit_hit));
    }
}

/// One level of the current decode; gives the level back when dropped.
struct NestingLevel;

impl NestingLevel {
    fn enter() -> Option<Self> {
        LEVELS_LEFT.with(|levels| match levels.get() {
            None => Some(Self),
            Some(0) => {
                LIMIT_HIT.with(|hit| hit.set(true));
                None
            }
            Some(left) => {
                levels.set(Some(left - 1));
                Some(Self)
            }
        })
    }
}

impl Drop for NestingLevel {
    fn drop(&mut self) {
        LEVELS_LEFT.with(|levels| {
            if let Some(left) = levels.get() {
                levels.set(Some(left + 1));
            }
        });
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let _level =
            NestingLevel::enter().ok_or_else(|| D::Error::custom("value nesting limit exceeded"))?;
        Ok(match WireValue::deserialize(deserializer)? {
            WireValue::Box(values) => Self::Box(values),
            WireValue::Dict(items) => Self::Dict(items),
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty_dict()
    }
}

impl Value {
    pub fn empty_box() -> Self {
        Self::Box(Vec::new())
    }

    pub fn empty_dict() -> Self {
        Self::Dict(Vec::new())
    }

    /// Single-element box, the usual shape of a reward.
    pub fn scalar(value: f64) -> Self {
        Self::Box(vec![value])
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        Self::Box(values.into_iter().collect())
    }

    /// Builds a dict from `(key, value)` pairs, rejecting repeated keys.
    pub fn dict_from<K, I>(entries: I) -> Result<Self, ValueError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut dict = Self::empty_dict();
        for (key, value) in entries {
            dict.insert(key, value)?;
        }
        Ok(dict)
    }

    pub fn is_box(&self) -> bool {
        matches!(self, Self::Box(_))
    }

    pub fn is_dict(&self) -> bool {
        matches!(self, Self::Dict(_))
    }

    pub fn as_box(&self) -> Option<&[f64]> {
        match self {
            Self::Box(values) => Some(values),
            Self::Dict(_) => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[DictItem]> {
        match self {
            Self::Dict(items) => Some(items),
            Self::Box(_) => None,
        }
    }

    /// Looks up `key` in a dict. Always `None` for a box.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|item| item.key == key)
            .map(|item| &item.value)
    }

    /// Appends `key` to a dict, preserving insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), ValueError> {
        let Self::Dict(items) = self else {
            return Err(ValueError::NotADict);
        };
        let key = key.into();
        if items.iter().any(|item| item.key == key) {
            return Err(ValueError::DuplicateKey(key));
        }
        items.push(DictItem { key, value });
        Ok(())
    }

    /// Number of numbers in a box, or number of entries in a dict.
    pub fn len(&self) -> usize {
        match self {
            Self::Box(values) => values.len(),
            Self::Dict(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nesting depth; a box or an empty dict has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending: Vec<(&Value, usize)> = vec![(self, 1)];
        while let Some((value, level)) = pending.pop() {
            deepest = deepest.max(level);
            if let Self::Dict(items) = value {
                pending.extend(items.iter().map(|item| (&item.value, level + 1)));
            }
        }
        deepest
    }

    /// Checks key uniqueness at every nesting level.
    pub fn validate(&self) -> Result<(), ValueError> {
        let mut pending: Vec<&Value> = vec![self];
        while let Some(value) = pending.pop() {
            if let Self::Dict(items) = value {
                for (idx, item) in items.iter().enumerate() {
                    if items[..idx].iter().any(|earlier| earlier.key == item.key) {
                        return Err(ValueError::DuplicateKey(item.key.clone()));
                    }
                    pending.push(&item.value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_preserves_insertion_order() {
        let value = Value::dict_from([
            ("b", Value::scalar(2.0)),
            ("a", Value::scalar(1.0)),
        ])
        .unwrap();

        let keys: Vec<&str> = value
            .as_dict()
            .unwrap()
            .iter()
            .map(|item| item.key.as_str())
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut value = Value::empty_dict();
        value.insert("obs", Value::empty_box()).unwrap();
        let err = value.insert("obs", Value::scalar(1.0)).unwrap_err();
        assert_eq!(err, ValueError::DuplicateKey("obs".to_string()));
        assert_eq!(value.len(), 1);
    }

    #[test]
    fn test_insert_into_box_fails() {
        let mut value = Value::from_values([1.0, 2.0]);
        assert_eq!(
            value.insert("x", Value::empty_box()),
            Err(ValueError::NotADict)
        );
    }

    #[test]
    fn test_get_nested_lookup() {
        let inner = Value::dict_from([("speed", Value::from_values([3.0, 4.0]))]).unwrap();
        let outer = Value::dict_from([("vehicle", inner)]).unwrap();

        let speed = outer.get("vehicle").and_then(|v| v.get("speed"));
        assert_eq!(speed.and_then(Value::as_box), Some(&[3.0, 4.0][..]));
        assert!(outer.get("missing").is_none());
        assert!(Value::scalar(1.0).get("anything").is_none());
    }

    #[test]
    fn test_validate_finds_nested_duplicate() {
        let nested = Value::Dict(vec![
            DictItem::new("x", Value::empty_box()),
            DictItem::new("x", Value::scalar(0.0)),
        ]);
        let outer = Value::Dict(vec![DictItem::new("group", nested)]);
        assert_eq!(
            outer.validate(),
            Err(ValueError::DuplicateKey("x".to_string()))
        );
    }

    #[test]
    fn test_depth_and_emptiness() {
        assert_eq!(Value::empty_box().depth(), 1);
        assert_eq!(Value::empty_dict().depth(), 1);
        let nested = Value::dict_from([(
            "a",
            Value::dict_from([("b", Value::empty_box())]).unwrap(),
        )])
        .unwrap();
        assert_eq!(nested.depth(), 3);
        assert!(Value::empty_box().is_empty());
        assert!(!nested.is_empty());
    }

    fn chain(depth: usize) -> Value {
        let mut value = Value::empty_box();
        for _ in 1..depth {
            value = Value::Dict(vec![DictItem::new("", value)]);
        }
        value
    }

    #[test]
    fn test_depth_of_long_chain() {
        assert_eq!(chain(1).depth(), 1);
        assert_eq!(chain(5_000).depth(), 5_000);
    }

    #[test]
    fn test_depth_limit_scope() {
        let bytes = serde_pickle::to_vec(&chain(4), serde_pickle::SerOptions::new()).unwrap();
        let decode = || serde_pickle::from_slice::<Value>(&bytes, serde_pickle::DeOptions::new());

        let (decoded, hit) = with_depth_limit(4, decode);
        assert_eq!(decoded.unwrap(), chain(4));
        assert!(!hit);

        let (decoded, hit) = with_depth_limit(3, decode);
        assert!(decoded.is_err());
        assert!(hit);

        // Outside a scope decoding is unbounded again.
        assert!(decode().is_ok());
        assert_eq!(LEVELS_LEFT.with(Cell::get), None);
    }
}
