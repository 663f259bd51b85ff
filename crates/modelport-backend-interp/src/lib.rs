//! Adapter over the embedded tensor interpreter: load the module once,
//! allocate every buffer once, then drive execution through the
//! interpreter's own index tables. Name→index tables keep the module's
//! declaration order — the interpreter addresses tensors positionally and
//! callers must see the same order it declares.

pub mod module;

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use modelport_core::{
    Adapter, DType, ModelSpec, Result, RuntimeError, RuntimeOptions, Shape, ShapePolicy, Tensor,
    TensorSpec,
};

use module::{Instruction, InterpreterModule};

const BACKEND: &str = "interpreter";

pub struct InterpreterModel {
    module: InterpreterModule,
    /// One f32 buffer per declared tensor, allocated at load and reused
    /// across runs.
    buffers: Vec<Vec<f32>>,
    /// (name, buffer index) tables in declaration order.
    input_table: Vec<(String, usize)>,
    output_table: Vec<(String, usize)>,
    spec: ModelSpec,
    float32_accepts_any: bool,
    bindings: HashMap<String, Tensor>,
}

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product::<usize>().max(1)
}

impl InterpreterModel {
    pub fn open(path: &Path, options: RuntimeOptions) -> Result<InterpreterModel> {
        let module = InterpreterModule::read(path)?;
        debug!(
            backend = BACKEND,
            tensors = module.tensors.len(),
            instructions = module.instructions.len(),
            "interpreter module loaded"
        );

        let mut buffers = Vec::with_capacity(module.tensors.len());
        for decl in &module.tensors {
            match &decl.constant {
                Some(values) => buffers.push(values.clone()),
                None => buffers.push(vec![0.0; numel_of(&decl.shape)]),
            }
        }

        let table = |indices: &[usize]| -> Vec<(String, usize)> {
            indices
                .iter()
                .map(|i| (module.tensors[*i].name.clone(), *i))
                .collect()
        };
        let input_table = table(&module.inputs);
        let output_table = table(&module.outputs);

        let inputs = input_table
            .iter()
            .map(|(name, i)| {
                let decl = &module.tensors[*i];
                TensorSpec::input(name.clone(), decl.dtype, Some(Shape::from_slice(&decl.shape)))
            })
            .collect();
        // Interpreter shapes are static; outputs are resolved from load.
        let outputs = output_table
            .iter()
            .map(|(name, i)| {
                let decl = &module.tensors[*i];
                TensorSpec::output(name.clone(), decl.dtype, Some(Shape::from_slice(&decl.shape)))
            })
            .collect();

        Ok(InterpreterModel {
            module,
            buffers,
            input_table,
            output_table,
            spec: ModelSpec {
                inputs,
                weights: Vec::new(),
                outputs,
            },
            float32_accepts_any: options.float32_accepts_any,
            bindings: HashMap::new(),
        })
    }

    fn input_buffer_index(&self, name: &str) -> Result<usize> {
        self.input_table
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, i)| *i)
            .ok_or_else(|| {
                RuntimeError::backend(
                    BACKEND,
                    format!(
                        "invalid input tensor name '{name}'; input tensor names: {:?}",
                        self.input_table.iter().map(|(n, _)| n).collect::<Vec<_>>()
                    ),
                )
            })
    }

    fn as_f32(&self, name: &str, declared: DType, data: &Tensor) -> Result<Vec<f32>> {
        if data.dtype == declared {
            return data.to_f32_vec();
        }
        if declared == DType::F32 && self.float32_accepts_any && data.dtype.is_numeric() {
            // Legacy rule: widen any numeric data into the f32 buffer.
            return Ok(match data.dtype {
                DType::F64 => data.to_f64_vec()?.into_iter().map(|v| v as f32).collect(),
                DType::U8 => data.bytes.iter().map(|v| *v as f32).collect(),
                DType::I8 => data.bytes.iter().map(|v| *v as i8 as f32).collect(),
                DType::U32 => data.to_u32_vec()?.into_iter().map(|v| v as f32).collect(),
                DType::U64 => data.to_u64_vec()?.into_iter().map(|v| v as f32).collect(),
                DType::I32 => data.to_i32_vec()?.into_iter().map(|v| v as f32).collect(),
                DType::I64 => data.to_i64_vec()?.into_iter().map(|v| v as f32).collect(),
                _ => unreachable!("numeric dtypes covered"),
            });
        }
        Err(RuntimeError::TypeMismatch {
            backend: BACKEND,
            name: name.to_string(),
            expected: declared.name(),
            supplied: data.dtype.name(),
        })
    }

    fn step(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::Add { lhs, rhs, out } => self.binary(lhs, rhs, out, |x, y| x + y),
            Instruction::Mul { lhs, rhs, out } => self.binary(lhs, rhs, out, |x, y| x * y),
            Instruction::MatMul { lhs, rhs, out } => self.matmul(lhs, rhs, out),
            Instruction::Relu { src, out } => self.unary(src, out, |x| x.max(0.0)),
            Instruction::Softmax { src, out } => self.softmax(src, out),
        }
    }

    fn binary(
        &mut self,
        lhs: usize,
        rhs: usize,
        out: usize,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<()> {
        if self.buffers[lhs].len() != self.buffers[rhs].len() {
            return Err(RuntimeError::backend(
                BACKEND,
                format!("tensors {lhs} and {rhs} disagree on element count"),
            ));
        }
        let result: Vec<f32> = self.buffers[lhs]
            .iter()
            .zip(&self.buffers[rhs])
            .map(|(x, y)| f(*x, *y))
            .collect();
        self.buffers[out] = result;
        Ok(())
    }

    fn unary(&mut self, src: usize, out: usize, f: impl Fn(f32) -> f32) -> Result<()> {
        let result: Vec<f32> = self.buffers[src].iter().map(|x| f(*x)).collect();
        self.buffers[out] = result;
        Ok(())
    }

    fn matmul(&mut self, lhs: usize, rhs: usize, out: usize) -> Result<()> {
        let (lshape, rshape) = (
            &self.module.tensors[lhs].shape,
            &self.module.tensors[rhs].shape,
        );
        let (&[m, k], &[k2, n]) = (lshape.as_slice(), rshape.as_slice()) else {
            return Err(RuntimeError::backend(
                BACKEND,
                format!("MatMul needs two 2-d tensors, got {lshape:?} and {rshape:?}"),
            ));
        };
        if k != k2 {
            return Err(RuntimeError::backend(
                BACKEND,
                format!("MatMul inner dimensions {k} and {k2} differ"),
            ));
        }
        let mut result = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += self.buffers[lhs][i * k + p] * self.buffers[rhs][p * n + j];
                }
                result[i * n + j] = acc;
            }
        }
        self.buffers[out] = result;
        Ok(())
    }

    fn softmax(&mut self, src: usize, out: usize) -> Result<()> {
        let max = self.buffers[src]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = self.buffers[src].iter().map(|x| (x - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        self.buffers[out] = exps.into_iter().map(|e| e / total).collect();
        Ok(())
    }
}

impl Adapter for InterpreterModel {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn shape_policy(&self) -> ShapePolicy {
        ShapePolicy::Fixed
    }

    fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()> {
        let index = self.input_buffer_index(name)?;
        let decl = &self.module.tensors[index];
        let declared_numel = numel_of(&decl.shape);
        if data.numel() != declared_numel {
            return Err(RuntimeError::Shape {
                backend: BACKEND,
                name: name.to_string(),
                requested: data.shape.dims().to_vec(),
                expected: declared_numel,
            });
        }
        let values = self.as_f32(name, decl.dtype, data)?;
        self.buffers[index] = values;
        self.bindings.insert(name.to_string(), data.clone());
        Ok(())
    }

    fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>> {
        self.input_buffer_index(name)?;
        let Some(bound) = self.bindings.get(name) else {
            return Ok(None);
        };
        match shape {
            Some(requested) => {
                let reshaped = bound.reshaped(requested.clone()).map_err(|_| {
                    RuntimeError::Shape {
                        backend: BACKEND,
                        name: name.to_string(),
                        requested: requested.dims().to_vec(),
                        expected: bound.numel(),
                    }
                })?;
                Ok(Some(reshaped))
            }
            None => Ok(Some(bound.clone())),
        }
    }

    fn execute(&mut self) -> Result<()> {
        for (name, _) in &self.input_table {
            if !self.bindings.contains_key(name) {
                return Err(RuntimeError::Unsupported {
                    backend: BACKEND,
                    operation: format!("execute() before input '{name}' is bound"),
                });
            }
        }
        for instruction in self.module.instructions.clone() {
            self.step(instruction)?;
        }
        Ok(())
    }

    fn get_output(&mut self, index: usize) -> Result<Tensor> {
        let count = self.output_table.len();
        let Some((_, buffer_index)) = self.output_table.get(index) else {
            return Err(RuntimeError::Index {
                backend: BACKEND,
                kind: "output",
                index,
                count,
            });
        };
        let decl = &self.module.tensors[*buffer_index];
        Ok(Tensor::from_f32(
            Shape::from_slice(&decl.shape),
            &self.buffers[*buffer_index],
        ))
    }

    fn close(&mut self) {
        self.bindings.clear();
    }
}
