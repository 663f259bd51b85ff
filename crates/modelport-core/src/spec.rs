use serde::{Deserialize, Serialize};

use crate::{DType, Shape};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IOName(pub String);

impl IOName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IOName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorRole {
    Input,
    Weight,
    Output,
}

/// Declared contract of one named tensor. `shape: None` is the unresolved
/// state: legal for outputs whose shape is only knowable after execution.
#[derive(Clone, Debug)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    pub shape: Option<Shape>,
    pub role: TensorRole,
}

impl TensorSpec {
    pub fn input(name: impl Into<String>, dtype: DType, shape: Option<Shape>) -> Self {
        Self {
            name: IOName(name.into()),
            dtype,
            shape,
            role: TensorRole::Input,
        }
    }

    pub fn weight(name: impl Into<String>) -> Self {
        // Weight tensors are implicitly float32 and carry no declared shape.
        Self {
            name: IOName(name.into()),
            dtype: DType::F32,
            shape: None,
            role: TensorRole::Weight,
        }
    }

    pub fn output(name: impl Into<String>, dtype: DType, shape: Option<Shape>) -> Self {
        Self {
            name: IOName(name.into()),
            dtype,
            shape,
            role: TensorRole::Output,
        }
    }
}

/// Full signature of a loaded model. Names are unique within the input set
/// and within the output set independently.
#[derive(Clone, Debug, Default)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub weights: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ModelSpec {
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.name.as_str() == name)
    }

    pub fn weight_index(&self, name: &str) -> Option<usize> {
        self.weights.iter().position(|s| s.name.as_str() == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|s| s.name.as_str() == name)
    }
}
