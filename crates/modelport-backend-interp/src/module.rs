//! The interpreter module container: a `TIM1`-tagged bincode file holding
//! the tensor table, the instruction list and the I/O index lists. Tensor
//! indices are the interpreter's only addressing scheme; names exist for
//! callers, indices for execution.

use std::path::Path;

use serde::{Deserialize, Serialize};

use modelport_core::{DType, Result, RuntimeError};

pub const MAGIC: [u8; 4] = *b"TIM1";

const BACKEND: &str = "interpreter";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorDecl {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Constant payload baked into the module; `None` for activations and
    /// I/O tensors.
    #[serde(default)]
    pub constant: Option<Vec<f32>>,
}

/// One interpreter step over tensor indices.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Instruction {
    Add { lhs: usize, rhs: usize, out: usize },
    Mul { lhs: usize, rhs: usize, out: usize },
    MatMul { lhs: usize, rhs: usize, out: usize },
    Relu { src: usize, out: usize },
    Softmax { src: usize, out: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterpreterModule {
    pub tensors: Vec<TensorDecl>,
    pub instructions: Vec<Instruction>,
    /// Input tensor indices in the module's declaration order.
    pub inputs: Vec<usize>,
    /// Output tensor indices in the module's declaration order.
    pub outputs: Vec<usize>,
}

impl InterpreterModule {
    pub fn read(path: &Path) -> Result<InterpreterModule> {
        let raw = std::fs::read(path)?;
        if raw.len() < MAGIC.len() || raw[..MAGIC.len()] != MAGIC {
            return Err(RuntimeError::backend(
                BACKEND,
                format!("{} is not an interpreter module", path.display()),
            ));
        }
        let module: InterpreterModule =
            bincode::deserialize(&raw[MAGIC.len()..]).map_err(|e| {
                RuntimeError::backend(BACKEND, format!("corrupt interpreter module: {e}"))
            })?;
        module.validate()?;
        Ok(module)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let body = bincode::serialize(self)
            .map_err(|e| RuntimeError::backend(BACKEND, e.to_string()))?;
        let mut raw = Vec::with_capacity(MAGIC.len() + body.len());
        raw.extend_from_slice(&MAGIC);
        raw.extend_from_slice(&body);
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let count = self.tensors.len();
        let check = |index: usize| -> Result<()> {
            if index >= count {
                return Err(RuntimeError::backend(
                    BACKEND,
                    format!("module references tensor {index} but only {count} are declared"),
                ));
            }
            Ok(())
        };
        for index in self.inputs.iter().chain(&self.outputs) {
            check(*index)?;
        }
        for instruction in &self.instructions {
            match *instruction {
                Instruction::Add { lhs, rhs, out }
                | Instruction::Mul { lhs, rhs, out }
                | Instruction::MatMul { lhs, rhs, out } => {
                    check(lhs)?;
                    check(rhs)?;
                    check(out)?;
                }
                Instruction::Relu { src, out } | Instruction::Softmax { src, out } => {
                    check(src)?;
                    check(out)?;
                }
            }
        }
        for decl in &self.tensors {
            if let Some(constant) = &decl.constant {
                let numel: usize = decl.shape.iter().product::<usize>().max(1);
                if constant.len() != numel {
                    return Err(RuntimeError::backend(
                        BACKEND,
                        format!(
                            "constant '{}' has {} values for shape {:?}",
                            decl.name,
                            constant.len(),
                            decl.shape
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
