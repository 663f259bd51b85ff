use crate::{DType, Device, ModelSpec, Result, RuntimeError, Shape, Tensor};

/// Per-load configuration supplied by the caller or a surrounding config
/// source. Defaults: cpu device 0, legacy float32 rule on.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeOptions {
    pub device: Device,
    /// Legacy compatibility rule: a float32-declared input accepts data of
    /// any numeric dtype. Turn off to enforce exact dtype equality
    /// everywhere.
    pub float32_accepts_any: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            float32_accepts_any: true,
        }
    }
}

/// How output shapes behave for a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapePolicy {
    /// Shapes are resolved once at load and never change.
    Fixed,
    /// Shapes depend on input content; the cache is invalid after every
    /// `execute()` and must be re-queried.
    PerExecution,
}

/// The uniform capability set every backend adapter implements. One
/// concrete adapter per loaded model, fixed at construction; dispatch over
/// adapters happens through a closed enum in the runtime crate, never by
/// probing.
pub trait Adapter: Send {
    fn backend_name(&self) -> &'static str;

    /// Declared signature. Output specs carry `shape: None` until resolved.
    fn spec(&self) -> &ModelSpec;

    fn shape_policy(&self) -> ShapePolicy;

    /// Bind a named input. Dtype checking follows the adapter's declared
    /// contract and the `float32_accepts_any` option it was loaded with.
    fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()>;

    /// Read back the last bound value for `name`, reshaped to `shape` when
    /// given. Returns `None` when the input was never bound.
    fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>>;

    /// Run the model. Blocks until native computation finishes; all
    /// required inputs must have been bound at least once.
    fn execute(&mut self) -> Result<()>;

    fn get_output(&mut self, index: usize) -> Result<Tensor>;

    /// Release native resources. Idempotent; called again by drop glue.
    fn close(&mut self);

    fn list_inputs(&self) -> Vec<String> {
        self.spec()
            .inputs
            .iter()
            .map(|s| s.name.as_str().to_string())
            .collect()
    }

    fn list_outputs(&self) -> Vec<String> {
        self.spec()
            .outputs
            .iter()
            .map(|s| s.name.as_str().to_string())
            .collect()
    }

    fn input_dtype(&self, index: usize) -> Result<DType> {
        let inputs = &self.spec().inputs;
        inputs
            .get(index)
            .map(|s| s.dtype)
            .ok_or(RuntimeError::Index {
                backend: self.backend_name(),
                kind: "input",
                index,
                count: inputs.len(),
            })
    }

    fn output_dtype(&self, index: usize) -> Result<DType> {
        let outputs = &self.spec().outputs;
        outputs
            .get(index)
            .map(|s| s.dtype)
            .ok_or(RuntimeError::Index {
                backend: self.backend_name(),
                kind: "output",
                index,
                count: outputs.len(),
            })
    }

    /// Resolved output shape, or `None` while still unresolved. Never an
    /// error before the first `execute()` on dynamic-shape backends.
    fn output_shape(&self, index: usize) -> Result<Option<Shape>> {
        let outputs = &self.spec().outputs;
        outputs
            .get(index)
            .map(|s| s.shape.clone())
            .ok_or(RuntimeError::Index {
                backend: self.backend_name(),
                kind: "output",
                index,
                count: outputs.len(),
            })
    }
}
