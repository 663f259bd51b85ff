//! Adapter for frozen dataflow graphs: a single serialized graph document
//! with no I/O manifest, or a SavedModel-style directory holding one next
//! to its `variables/`. The I/O contract is inferred from the topology and
//! execution runs through an in-crate session.

pub mod session;
pub mod topology;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modelport_core::{
    Adapter, DType, Device, ModelSpec, Result, RuntimeError, RuntimeOptions, Shape, ShapePolicy,
    Tensor, TensorSpec,
};

use session::GraphSession;
use topology::GraphTopology;

const BACKEND: &str = "frozen_graph";

/// Edge names with this prefix are control edges: ordering constraints
/// that carry no tensor.
pub const CONTROL_EDGE_PREFIX: &str = "^";

fn default_arity() -> usize {
    1
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Constant payload, stored widened; cast to the node dtype on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub op: String,
    /// Producer names; `^name` marks a control edge.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Number of output ports the op declares.
    #[serde(default = "default_arity")]
    pub output_arity: usize,
    #[serde(default)]
    pub attrs: NodeAttrs,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphDoc {
    pub nodes: Vec<GraphNode>,
}

pub struct FrozenGraphModel {
    session: GraphSession,
    topology: GraphTopology,
    spec: ModelSpec,
    float32_accepts_any: bool,
    bindings: HashMap<String, Tensor>,
    /// Last run's fetched tensors, in the sorted output order.
    results: Vec<Tensor>,
}

impl FrozenGraphModel {
    /// Load a frozen graph file. The same entry serves the SavedModel
    /// directory variant; callers hand in the graph file it contains.
    pub fn open(graph_file: &Path, options: RuntimeOptions) -> Result<FrozenGraphModel> {
        if options.device != Device::Cpu {
            warn!(
                backend = BACKEND,
                device = %options.device,
                "device selection is not supported; parameters ignored"
            );
        }
        let raw = std::fs::read(graph_file)?;
        let doc: GraphDoc = serde_json::from_slice(&raw).map_err(|e| {
            RuntimeError::backend(BACKEND, format!("invalid graph document: {e}"))
        })?;

        let topology = topology::analyze(&doc);
        debug!(
            backend = BACKEND,
            inputs = topology.inputs.len(),
            outputs = topology.outputs.len(),
            "frozen graph loaded"
        );
        let session = GraphSession::new(doc)?;

        let inputs = topology
            .inputs
            .iter()
            .map(|name| {
                let node = session.node(name).expect("input node exists");
                let dtype = node.attrs.dtype.unwrap_or(DType::F32);
                let shape = node.attrs.shape.as_ref().map(|d| Shape::from_slice(d));
                TensorSpec::input(name.clone(), dtype, shape)
            })
            .collect();
        let outputs = topology
            .outputs
            .iter()
            // Dtypes and shapes resolve on the first run.
            .map(|name| TensorSpec::output(name.clone(), DType::F32, None))
            .collect();

        Ok(FrozenGraphModel {
            session,
            topology,
            spec: ModelSpec {
                inputs,
                weights: Vec::new(),
                outputs,
            },
            float32_accepts_any: options.float32_accepts_any,
            bindings: HashMap::new(),
            results: Vec::new(),
        })
    }

    fn declared_dtype(&self, name: &str) -> Result<DType> {
        match self.spec.input_index(name) {
            Some(i) => Ok(self.spec.inputs[i].dtype),
            None => Err(RuntimeError::backend(
                BACKEND,
                format!(
                    "invalid input tensor name '{name}'; input tensor names: {:?}",
                    self.topology.inputs
                ),
            )),
        }
    }
}

impl Adapter for FrozenGraphModel {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn shape_policy(&self) -> ShapePolicy {
        // Output shapes follow the fed input shapes.
        ShapePolicy::PerExecution
    }

    fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()> {
        let declared = self.declared_dtype(name)?;
        let matches = data.dtype == declared
            || (declared == DType::F32 && self.float32_accepts_any && data.dtype.is_numeric());
        if !matches {
            return Err(RuntimeError::TypeMismatch {
                backend: BACKEND,
                name: name.to_string(),
                expected: declared.name(),
                supplied: data.dtype.name(),
            });
        }
        self.bindings.insert(name.to_string(), data.clone());
        Ok(())
    }

    fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>> {
        self.declared_dtype(name)?;
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
        self.results = self
            .session
            .run(&self.bindings, &self.topology.outputs)?;
        for (spec, result) in self.spec.outputs.iter_mut().zip(&self.results) {
            spec.dtype = result.dtype;
            spec.shape = Some(result.shape.clone());
        }
        Ok(())
    }

    fn get_output(&mut self, index: usize) -> Result<Tensor> {
        let count = self.spec.outputs.len();
        if index >= count {
            return Err(RuntimeError::Index {
                backend: BACKEND,
                kind: "output",
                index,
                count,
            });
        }
        match self.results.get(index) {
            Some(result) => Ok(result.clone()),
            None => Err(RuntimeError::Unsupported {
                backend: BACKEND,
                operation: "get_output() before execute() resolves output shapes".to_string(),
            }),
        }
    }

    fn close(&mut self) {
        // The session owns no native resources; dropping bound tensors is
        // all teardown means here.
        self.bindings.clear();
        self.results.clear();
    }
}
