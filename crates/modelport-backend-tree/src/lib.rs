//! Adapter for tree-ensemble artifacts. The ensemble itself runs inside
//! the native engine; this wrapper narrows the surface to what a tree
//! model actually is: exactly one dense 2-D numeric input and one logical
//! output, with output shapes re-resolved after every run because the row
//! count rides in on the input.

pub mod densify;

use std::path::Path;

use tracing::debug;

use modelport_backend_native::{NativeBackendKind, NativeModel};
use modelport_core::{
    Adapter, ModelSpec, Result, RuntimeError, RuntimeOptions, Shape, ShapePolicy, Tensor,
};

use densify::DenseMatrix;

const BACKEND: &str = "decision_tree";

pub struct TreeEnsembleModel {
    inner: NativeModel,
    input_name: String,
}

impl TreeEnsembleModel {
    pub fn open(dir: &Path, options: RuntimeOptions) -> Result<TreeEnsembleModel> {
        Self::from_native(NativeModel::open(dir, options)?)
    }

    /// Wrap an already-opened engine handle that reported itself as a tree
    /// ensemble.
    pub fn from_native(inner: NativeModel) -> Result<TreeEnsembleModel> {
        if inner.backend_kind() != NativeBackendKind::TreeEnsemble {
            return Err(RuntimeError::backend(
                BACKEND,
                format!(
                    "engine reported backend kind '{}', not a tree ensemble",
                    inner.backend_kind().as_str()
                ),
            ));
        }
        let [input] = inner.spec().inputs.as_slice() else {
            return Err(RuntimeError::backend(
                BACKEND,
                format!(
                    "tree ensembles accept exactly one input, engine declared {}",
                    inner.spec().inputs.len()
                ),
            ));
        };
        let input_name = input.name.as_str().to_string();
        debug!(backend = BACKEND, input = input_name.as_str(), "tree ensemble opened");
        Ok(TreeEnsembleModel { inner, input_name })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Bind a densified matrix as the sole input. The matrix goes through
    /// verbatim; `NaN` cells mean "feature absent" to the traversal.
    pub fn set_matrix(&mut self, matrix: &DenseMatrix) -> Result<()> {
        let name = self.input_name.clone();
        self.inner.set_input(&name, &matrix.to_tensor())
    }

    /// Densified-matrix-in, prediction-out convenience: bind, execute,
    /// fetch the single output.
    pub fn predict(&mut self, matrix: &DenseMatrix) -> Result<Tensor> {
        self.set_matrix(matrix)?;
        self.inner.execute()?;
        self.inner.get_output(0)
    }
}

impl Adapter for TreeEnsembleModel {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn spec(&self) -> &ModelSpec {
        self.inner.spec()
    }

    fn shape_policy(&self) -> ShapePolicy {
        ShapePolicy::PerExecution
    }

    fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()> {
        if name != self.input_name {
            return Err(RuntimeError::backend(
                BACKEND,
                format!(
                    "'{name}' is not a valid input name; the only input is '{}'",
                    self.input_name
                ),
            ));
        }
        // Forwarded verbatim; the engine validates the matrix rank.
        self.inner.set_input(name, data)
    }

    fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>> {
        self.inner.get_input(name, shape)
    }

    fn execute(&mut self) -> Result<()> {
        self.inner.execute()
    }

    fn get_output(&mut self, index: usize) -> Result<Tensor> {
        self.inner.get_output(index)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
