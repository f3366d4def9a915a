//! Experience batches exchanged with the replay service and actors.
//!
//! Transitions travel as the positional JSON array `[s, a, r, s_, done]`.
//! Reward and done columns are accepted either flat or as single-column
//! matrices, and done flags as booleans or numbers.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{LearnerError, Result};

/// Column of scalars as it may appear on the wire
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Column {
    Flat(Vec<Scalar>),
    Nested(Vec<Vec<Scalar>>),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f32),
    Flag(bool),
}

impl Scalar {
    fn value(self) -> f32 {
        match self {
            Scalar::Number(v) => v,
            Scalar::Flag(true) => 1.0,
            Scalar::Flag(false) => 0.0,
        }
    }
}

impl Column {
    fn into_values(self, what: &str) -> std::result::Result<Vec<f32>, String> {
        match self {
            Column::Flat(values) => Ok(values.into_iter().map(Scalar::value).collect()),
            Column::Nested(rows) => rows
                .into_iter()
                .map(|row| match row.as_slice() {
                    [single] => Ok(single.value()),
                    _ => Err(format!(
                        "{what} rows must hold exactly one value, got {}",
                        row.len()
                    )),
                })
                .collect(),
        }
    }
}

fn column<'de, D>(deserializer: D, what: &str) -> std::result::Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Column::deserialize(deserializer)?
        .into_values(what)
        .map_err(de::Error::custom)
}

fn weights_column<'de, D>(deserializer: D) -> std::result::Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    column(deserializer, "is_weights")
}

/// Column-oriented set of transitions `(s, a, r, s_, done)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transitions {
    pub state: Vec<Vec<f32>>,
    pub action: Vec<Vec<f32>>,
    pub reward: Vec<f32>,
    pub next_state: Vec<Vec<f32>>,
    pub done: Vec<f32>,
}

impl Transitions {
    /// Number of transitions
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Check that every column has one entry per transition
    pub fn validate(&self) -> Result<()> {
        let expected = self.len();
        let columns = [
            ("action", self.action.len()),
            ("reward", self.reward.len()),
            ("next_state", self.next_state.len()),
            ("done", self.done.len()),
        ];
        for (what, actual) in columns {
            if actual != expected {
                return Err(LearnerError::LengthMismatch {
                    what,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct TransitionsRef<'a>(
    &'a [Vec<f32>],
    &'a [Vec<f32>],
    &'a [f32],
    &'a [Vec<f32>],
    &'a [f32],
);

#[derive(Deserialize)]
struct TransitionsWire(Vec<Vec<f32>>, Vec<Vec<f32>>, Column, Vec<Vec<f32>>, Column);

impl Serialize for Transitions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        TransitionsRef(
            &self.state,
            &self.action,
            &self.reward,
            &self.next_state,
            &self.done,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transitions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let TransitionsWire(state, action, reward, next_state, done) =
            TransitionsWire::deserialize(deserializer)?;
        Ok(Self {
            state,
            action,
            reward: reward.into_values("reward").map_err(de::Error::custom)?,
            next_state,
            done: done.into_values("done").map_err(de::Error::custom)?,
        })
    }
}

/// A prioritized batch sampled from the replay service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Batch {
    #[serde(rename = "trans")]
    pub transitions: Transitions,
    #[serde(deserialize_with = "weights_column")]
    pub is_weights: Vec<f32>,
    /// Opaque replay-slot identifiers, echoed back verbatim
    pub points: Vec<Value>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Enforce the equal-length invariant across every field
    pub fn validate(&self) -> Result<()> {
        self.transitions.validate()?;
        let expected = self.transitions.len();
        for (what, actual) in [
            ("is_weights", self.is_weights.len()),
            ("points", self.points.len()),
        ] {
            if actual != expected {
                return Err(LearnerError::LengthMismatch {
                    what,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Outcome of a sample request
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// The replay buffer is not warm yet
    NotReady,
    Ready(Batch),
}

impl Sample {
    /// Decode a `/sample` response body.
    ///
    /// Empty bodies and falsy JSON values (`null`, `false`, `0`, `{}`, `[]`,
    /// `""`) mean the buffer is not ready. Anything else must be a well-formed batch.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Sample::NotReady);
        }

        let value: Value = serde_json::from_slice(body)?;
        let falsy = match &value {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Number(n) => n.as_f64() == Some(0.0),
        };
        if falsy {
            return Ok(Sample::NotReady);
        }

        let batch: Batch = serde_json::from_value(value)?;
        batch.validate()?;
        if batch.is_empty() {
            return Ok(Sample::NotReady);
        }
        Ok(Sample::Ready(batch))
    }
}

/// New priorities for the transitions of one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityUpdate {
    pub points: Vec<Value>,
    pub td_errors: Vec<f32>,
}

impl PriorityUpdate {
    pub fn new(points: Vec<Value>, td_errors: Vec<f32>) -> Result<Self> {
        if points.len() != td_errors.len() {
            return Err(LearnerError::LengthMismatch {
                what: "td_errors",
                expected: points.len(),
                actual: td_errors.len(),
            });
        }
        Ok(Self { points, td_errors })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
