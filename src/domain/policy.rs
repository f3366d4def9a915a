use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::error::{LearnerError, Result};

/// Dense row-major array of policy parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(LearnerError::LengthMismatch {
                what: "tensor values",
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    pub fn vector(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Borrowed view serialising one axis at a time as nested arrays
struct Nested<'a> {
    shape: &'a [usize],
    values: &'a [f32],
}

impl Serialize for Nested<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.shape.split_first() {
            None => serializer.serialize_f32(self.values.first().copied().unwrap_or_default()),
            Some((&len, rest)) => {
                let stride: usize = rest.iter().product();
                let mut seq = serializer.serialize_seq(Some(len))?;
                for i in 0..len {
                    seq.serialize_element(&Nested {
                        shape: rest,
                        values: &self.values[i * stride..(i + 1) * stride],
                    })?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Nested {
            shape: &self.shape,
            values: &self.values,
        }
        .serialize(serializer)
    }
}

/// Ordered policy parameters at one training step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PolicyVariables(pub Vec<Tensor>);

impl PolicyVariables {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
