//! The public façade: one handle exclusively owning one backend adapter,
//! dispatched through a closed enum whose discriminant is fixed when the
//! artifact is inspected.

use std::path::Path;

use tracing::{info_span, Span};

use modelport_backend_graph::FrozenGraphModel;
use modelport_backend_interp::InterpreterModel;
use modelport_backend_native::NativeModel;
use modelport_backend_tree::TreeEnsembleModel;
use modelport_core::{
    Adapter, DType, IOName, ModelSpec, Result, RuntimeError, RuntimeOptions, Shape, ShapePolicy,
    Tensor,
};

/// Exactly one backend per loaded model. No probing happens after
/// construction; every call is a match on this discriminant.
pub enum AdapterKind {
    Native(NativeModel),
    FrozenGraph(FrozenGraphModel),
    Interpreter(InterpreterModel),
    DecisionTree(TreeEnsembleModel),
}

impl AdapterKind {
    fn adapter(&self) -> &dyn Adapter {
        match self {
            AdapterKind::Native(m) => m,
            AdapterKind::FrozenGraph(m) => m,
            AdapterKind::Interpreter(m) => m,
            AdapterKind::DecisionTree(m) => m,
        }
    }

    fn adapter_mut(&mut self) -> &mut dyn Adapter {
        match self {
            AdapterKind::Native(m) => m,
            AdapterKind::FrozenGraph(m) => m,
            AdapterKind::Interpreter(m) => m,
            AdapterKind::DecisionTree(m) => m,
        }
    }
}

pub struct ModelHandle {
    adapter: AdapterKind,
    backend: &'static str,
    /// Scoped logging sink, created once per handle and never shared.
    span: Span,
    closed: bool,
}

impl ModelHandle {
    /// Load with defaults from the ambient config source.
    pub fn load(model_path: &Path) -> Result<ModelHandle> {
        Self::load_with(model_path, RuntimeOptions::default())
    }

    pub fn load_with(model_path: &Path, options: RuntimeOptions) -> Result<ModelHandle> {
        crate::inspector::load(model_path, options)
    }

    pub(crate) fn from_adapter(adapter: AdapterKind, model_path: &Path) -> ModelHandle {
        let backend = adapter.adapter().backend_name();
        let span = info_span!("model", backend, path = %model_path.display());
        ModelHandle {
            adapter,
            backend,
            span,
            closed: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn spec(&self) -> &ModelSpec {
        self.adapter.adapter().spec()
    }

    pub fn shape_policy(&self) -> ShapePolicy {
        self.adapter.adapter().shape_policy()
    }

    pub fn list_inputs(&self) -> Vec<String> {
        self.adapter.adapter().list_inputs()
    }

    pub fn list_outputs(&self) -> Vec<String> {
        self.adapter.adapter().list_outputs()
    }

    pub fn input_dtype(&self, index: usize) -> Result<DType> {
        self.adapter.adapter().input_dtype(index)
    }

    pub fn output_dtype(&self, index: usize) -> Result<DType> {
        self.adapter.adapter().output_dtype(index)
    }

    pub fn output_shape(&self, index: usize) -> Result<Option<Shape>> {
        self.adapter.adapter().output_shape(index)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RuntimeError::backend(self.backend, "model handle is closed"));
        }
        Ok(())
    }

    pub fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.span.enter();
        self.adapter.adapter_mut().set_input(name, data)
    }

    pub fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>> {
        self.ensure_open()?;
        let _guard = self.span.enter();
        self.adapter.adapter().get_input(name, shape)
    }

    pub fn execute(&mut self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.span.enter();
        self.adapter.adapter_mut().execute()
    }

    pub fn get_output(&mut self, index: usize) -> Result<Tensor> {
        self.ensure_open()?;
        let _guard = self.span.enter();
        self.adapter.adapter_mut().get_output(index)
    }

    /// Bind every given input, execute, fetch every output in the
    /// adapter's declared order.
    pub fn run(&mut self, inputs: &[(IOName, Tensor)]) -> Result<Vec<(IOName, Tensor)>> {
        for (name, data) in inputs {
            self.set_input(name.as_str(), data)?;
        }
        self.execute()?;
        let names = self.list_outputs();
        let mut outputs = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            outputs.push((IOName(name), self.get_output(index)?));
        }
        Ok(outputs)
    }

    /// Release the adapter's native resources. Safe to invoke more than
    /// once; drop glue calls it again.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let _guard = self.span.enter();
        self.adapter.adapter_mut().close();
        self.closed = true;
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.close();
    }
}
