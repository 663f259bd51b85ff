//! Adapter for compiled model artifacts: a directory holding a shared
//! library, a serialized graph (`model.json`) and a parameter blob
//! (`model.params`). The library is opened at load time and driven through
//! the flat C ABI in [`abi`]; all tensor traffic crosses that boundary as
//! raw little-endian buffers.

pub mod abi;
#[cfg(feature = "stub-engine")]
pub mod stub;

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_longlong, c_void};
use std::path::Path;
use std::ptr;

use bytes::Bytes;
use libloading::Library;
use tracing::{debug, warn};

use modelport_core::{
    Adapter, DType, ModelSpec, Result, RuntimeError, RuntimeOptions, Shape, ShapePolicy, Tensor,
    TensorSpec,
};

use abi::{Handle, NativeVtable, Status, STATUS_OK};

const BACKEND: &str = "native";

/// API versions of the engine contract this adapter understands.
pub const MIN_API_VERSION: u32 = 1;
pub const MAX_API_VERSION: u32 = 1;

/// Backend kind the engine reports about itself once opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeBackendKind {
    GraphExecutor,
    Vm,
    TreeEnsemble,
}

impl NativeBackendKind {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "graph_executor" => NativeBackendKind::GraphExecutor,
            "vm" => NativeBackendKind::Vm,
            "tree_ensemble" => NativeBackendKind::TreeEnsemble,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NativeBackendKind::GraphExecutor => "graph_executor",
            NativeBackendKind::Vm => "vm",
            NativeBackendKind::TreeEnsemble => "tree_ensemble",
        }
    }

    fn shape_policy(self) -> ShapePolicy {
        match self {
            NativeBackendKind::GraphExecutor => ShapePolicy::Fixed,
            NativeBackendKind::Vm | NativeBackendKind::TreeEnsemble => ShapePolicy::PerExecution,
        }
    }
}

struct InputBinding {
    shape: Shape,
    bytes: Bytes,
}

pub struct NativeModel {
    vtable: NativeVtable,
    // Keeps the engine's code mapped for the lifetime of the vtable.
    _library: Option<Library>,
    handle: Handle,
    kind: NativeBackendKind,
    spec: ModelSpec,
    options: RuntimeOptions,
    bindings: HashMap<String, InputBinding>,
    /// (element count, resolved shape) per output; rebuilt whenever the
    /// shape cache is invalidated and re-queried.
    output_extents: Vec<(usize, Shape)>,
    shapes_resolved: bool,
}

// The raw handle is exclusively owned; the engine contract allows moving a
// handle between threads as long as calls stay serialized, which `&mut self`
// enforces.
unsafe impl Send for NativeModel {}

fn find_shared_library(dir: &Path) -> Result<std::path::PathBuf> {
    let ext = std::env::consts::DLL_EXTENSION;
    let mut matches: Vec<std::path::PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let candidate = entry?.path();
        let is_lib = candidate
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == ext);
        if candidate.is_file() && is_lib {
            matches.push(candidate);
        }
    }
    matches.sort();
    match matches.len() {
        0 => Err(RuntimeError::configuration(format!(
            "no compiled library (*.{ext}) found under {}",
            dir.display()
        ))),
        1 => Ok(matches.remove(0)),
        _ => Err(RuntimeError::configuration(format!(
            "multiple compiled libraries found under {}: {matches:?}",
            dir.display()
        ))),
    }
}

fn last_error_string(vtable: &NativeVtable) -> String {
    let raw = unsafe { (vtable.last_error)() };
    if raw.is_null() {
        return "unknown engine error".to_string();
    }
    unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
}

fn check(vtable: &NativeVtable, status: Status) -> Result<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(RuntimeError::backend(BACKEND, last_error_string(vtable)))
    }
}

/// Widen any numeric tensor to a contiguous f32 buffer. This backs the
/// legacy rule for float32-declared inputs and the implicit-float32 weight
/// contract.
fn numeric_as_f32(data: &Tensor) -> Result<Vec<f32>> {
    Ok(match data.dtype {
        DType::F32 => data.to_f32_vec()?,
        DType::F64 => data.to_f64_vec()?.into_iter().map(|v| v as f32).collect(),
        DType::U8 => data.bytes.iter().map(|v| *v as f32).collect(),
        DType::I8 => data.bytes.iter().map(|v| *v as i8 as f32).collect(),
        DType::U32 => data.to_u32_vec()?.into_iter().map(|v| v as f32).collect(),
        DType::U64 => data.to_u64_vec()?.into_iter().map(|v| v as f32).collect(),
        DType::I32 => data.to_i32_vec()?.into_iter().map(|v| v as f32).collect(),
        DType::I64 => data.to_i64_vec()?.into_iter().map(|v| v as f32).collect(),
        DType::OpaqueJson => {
            return Err(RuntimeError::TypeMismatch {
                backend: BACKEND,
                name: String::new(),
                expected: DType::F32.name(),
                supplied: DType::OpaqueJson.name(),
            })
        }
    })
}

fn f32_bytes(values: &[f32]) -> Bytes {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(buf)
}

impl NativeModel {
    /// Open the compiled artifact directory: load the shared library,
    /// resolve the vtable, create the engine handle and introspect the
    /// model signature.
    pub fn open(dir: &Path, options: RuntimeOptions) -> Result<NativeModel> {
        let lib_path = find_shared_library(dir)?;
        debug!(lib = %lib_path.display(), "loading native engine library");
        let library = unsafe { Library::new(&lib_path) }
            .map_err(|e| RuntimeError::backend(BACKEND, e.to_string()))?;
        let vtable = unsafe { NativeVtable::from_library(&library) }
            .map_err(|e| RuntimeError::backend(BACKEND, e.to_string()))?;
        Self::from_vtable(vtable, Some(library), dir, options)
    }

    /// Build a model over an already-resolved vtable. Used by `open` and by
    /// in-process engines (the reference stub engine, embedded builds).
    pub fn from_vtable(
        vtable: NativeVtable,
        library: Option<Library>,
        dir: &Path,
        options: RuntimeOptions,
    ) -> Result<NativeModel> {
        // Engines predating the version symbol are contract version 1.
        let api_version = vtable.api_version.map(|f| unsafe { f() }).unwrap_or(1);
        if !(MIN_API_VERSION..=MAX_API_VERSION).contains(&api_version) {
            return Err(RuntimeError::UnsupportedModelVersion {
                backend: BACKEND,
                found: api_version,
                min: MIN_API_VERSION,
                max: MAX_API_VERSION,
            });
        }

        let path_c = CString::new(dir.to_string_lossy().as_bytes())
            .map_err(|_| RuntimeError::configuration("model path contains a NUL byte"))?;
        let mut handle: Handle = ptr::null_mut();
        let status = unsafe {
            (vtable.create)(
                &mut handle,
                path_c.as_ptr(),
                options.device.kind_mask(),
                options.device.device_id(),
            )
        };
        check(&vtable, status)?;

        let mut model = NativeModel {
            vtable,
            _library: library,
            handle,
            kind: NativeBackendKind::GraphExecutor,
            spec: ModelSpec::default(),
            options,
            bindings: HashMap::new(),
            output_extents: Vec::new(),
            shapes_resolved: false,
        };

        let backend_raw = model.query_str(model.vtable.backend)?;
        model.kind = NativeBackendKind::parse(&backend_raw).ok_or_else(|| {
            RuntimeError::backend(
                BACKEND,
                format!("engine reported unknown backend kind '{backend_raw}'"),
            )
        })?;
        debug!(backend = backend_raw.as_str(), "native engine opened");

        model.introspect_signature()?;
        if model.kind.shape_policy() == ShapePolicy::Fixed {
            model.resolve_output_shapes()?;
        }
        Ok(model)
    }

    fn query_str(&mut self, f: abi::GetStrFn) -> Result<String> {
        let mut raw: *const std::os::raw::c_char = ptr::null();
        let status = unsafe { f(&mut self.handle, &mut raw) };
        check(&self.vtable, status)?;
        if raw.is_null() {
            return Err(RuntimeError::backend(
                BACKEND,
                "engine returned a null string",
            ));
        }
        Ok(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
    }

    fn query_count(&mut self, f: abi::GetCountFn) -> Result<usize> {
        let mut count: c_int = 0;
        let status = unsafe { f(&mut self.handle, &mut count) };
        check(&self.vtable, status)?;
        Ok(count.max(0) as usize)
    }

    fn query_name_at(&mut self, f: abi::NameAtFn, index: usize) -> Result<String> {
        let mut raw: *const std::os::raw::c_char = ptr::null();
        let status = unsafe { f(&mut self.handle, index as c_int, &mut raw) };
        check(&self.vtable, status)?;
        if raw.is_null() {
            return Err(RuntimeError::backend(BACKEND, "engine returned a null name"));
        }
        Ok(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
    }

    fn query_dtype_at(&mut self, f: Option<abi::NameAtFn>, index: usize) -> Result<DType> {
        // Engines without dtype introspection declare everything float32.
        let Some(f) = f else { return Ok(DType::F32) };
        let raw = self.query_name_at(f, index)?;
        DType::parse(&raw).ok_or_else(|| {
            RuntimeError::backend(
                BACKEND,
                format!("model has input or output dtype '{raw}' which is not supported"),
            )
        })
    }

    fn introspect_signature(&mut self) -> Result<()> {
        let num_inputs = self.query_count(self.vtable.num_inputs)?;
        let num_weights = self.query_count(self.vtable.num_weights)?;

        let mut inputs = Vec::with_capacity(num_inputs);
        for i in 0..num_inputs {
            let name = self.query_name_at(self.vtable.input_name, i)?;
            let dtype = self.query_dtype_at(self.vtable.input_dtype, i)?;
            inputs.push(TensorSpec::input(name, dtype, None));
        }

        let mut weights = Vec::with_capacity(num_weights);
        for i in 0..num_weights {
            let name = self.query_name_at(self.vtable.weight_name, i)?;
            weights.push(TensorSpec::weight(name));
        }

        self.spec.inputs = inputs;
        self.spec.weights = weights;
        self.refresh_output_specs()?;
        Ok(())
    }

    /// Re-query the output count and dtypes. The engine addresses outputs
    /// by index; specs carry positional names for the façade.
    fn refresh_output_specs(&mut self) -> Result<()> {
        let num_outputs = self.query_count(self.vtable.num_outputs)?;
        let mut outputs = Vec::with_capacity(num_outputs);
        for i in 0..num_outputs {
            let dtype = self.query_dtype_at(self.vtable.output_dtype, i)?;
            outputs.push(TensorSpec::output(format!("output{i}"), dtype, None));
        }
        self.spec.outputs = outputs;
        Ok(())
    }

    /// Query element count, rank and dims for every output and stamp the
    /// resolved shapes into the signature. Repeatable: dynamic-shape
    /// backends run this after every `execute()`.
    fn resolve_output_shapes(&mut self) -> Result<()> {
        self.refresh_output_specs()?;
        let count = self.spec.outputs.len();
        let mut extents = Vec::with_capacity(count);
        for i in 0..count {
            let mut size: c_longlong = 0;
            let mut dim: c_int = 0;
            let status = unsafe {
                (self.vtable.output_size_dim)(&mut self.handle, i as c_int, &mut size, &mut dim)
            };
            check(&self.vtable, status)?;

            let mut dims = vec![0 as c_longlong; dim.max(0) as usize];
            let status = unsafe {
                (self.vtable.output_shape)(&mut self.handle, i as c_int, dims.as_mut_ptr())
            };
            check(&self.vtable, status)?;

            let shape =
                Shape::from_slice(&dims.iter().map(|d| (*d).max(0) as usize).collect::<Vec<_>>());
            self.spec.outputs[i].shape = Some(shape.clone());
            extents.push((size.max(0) as usize, shape));
        }
        self.output_extents = extents;
        self.shapes_resolved = true;
        Ok(())
    }

    fn declared_input_dtype(&self, name: &str) -> Result<DType> {
        if self.spec.weight_index(name).is_some() {
            // Weight tensors are implicitly float32 and unchecked.
            return Ok(DType::F32);
        }
        match self.spec.input_index(name) {
            Some(i) => Ok(self.spec.inputs[i].dtype),
            None => Err(RuntimeError::backend(
                BACKEND,
                format!("'{name}' is not a valid input name"),
            )),
        }
    }

    /// Marshal one named buffer across the ABI: shape as i64 dims, data as
    /// a contiguous pointer borrowed for the call's duration.
    fn set_input_raw(&mut self, name: &str, shape: &Shape, bytes: &Bytes) -> Result<()> {
        let name_c = CString::new(name)
            .map_err(|_| RuntimeError::backend(BACKEND, "input name contains a NUL byte"))?;
        let dims = shape.as_i64();
        let status = unsafe {
            (self.vtable.set_input)(
                &mut self.handle,
                name_c.as_ptr(),
                dims.as_ptr(),
                bytes.as_ptr() as *const c_void,
                dims.len() as c_int,
            )
        };
        check(&self.vtable, status)
    }

    pub fn backend_kind(&self) -> NativeBackendKind {
        self.kind
    }
}

impl Adapter for NativeModel {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn shape_policy(&self) -> ShapePolicy {
        self.kind.shape_policy()
    }

    fn set_input(&mut self, name: &str, data: &Tensor) -> Result<()> {
        let declared = self.declared_input_dtype(name)?;

        let (shape, bytes) = match declared {
            DType::OpaqueJson => {
                // Data-transformed inputs cross the boundary as one
                // serialized JSON document; the shape is its byte length.
                let doc = if data.dtype == DType::OpaqueJson {
                    data.bytes.clone()
                } else {
                    let values = numeric_as_f32(data)?;
                    Bytes::from(serde_json::to_vec(&values).expect("serialize f32 slice"))
                };
                (Shape::from_slice(&[doc.len()]), doc)
            }
            DType::F32 if self.options.float32_accepts_any => {
                // Legacy rule: float32-declared inputs take any numeric
                // data, converted to a private contiguous f32 copy.
                (data.shape.clone(), f32_bytes(&numeric_as_f32(data)?))
            }
            _ => {
                if data.dtype != declared {
                    return Err(RuntimeError::TypeMismatch {
                        backend: BACKEND,
                        name: name.to_string(),
                        expected: declared.name(),
                        supplied: data.dtype.name(),
                    });
                }
                (data.shape.clone(), data.bytes.clone())
            }
        };

        self.set_input_raw(name, &shape, &bytes)?;
        self.bindings
            .insert(name.to_string(), InputBinding { shape, bytes });
        Ok(())
    }

    fn get_input(&self, name: &str, shape: Option<&Shape>) -> Result<Option<Tensor>> {
        let declared = self.declared_input_dtype(name)?;
        let recorded = self.bindings.get(name);
        let shape = match (shape, recorded) {
            (Some(requested), Some(binding)) => {
                if requested.numel() != binding.shape.numel() {
                    return Err(RuntimeError::Shape {
                        backend: BACKEND,
                        name: name.to_string(),
                        requested: requested.dims().to_vec(),
                        expected: binding.shape.numel(),
                    });
                }
                requested.clone()
            }
            (Some(requested), None) => requested.clone(),
            (None, Some(binding)) => binding.shape.clone(),
            (None, None) => return Ok(None),
        };

        let name_c = CString::new(name)
            .map_err(|_| RuntimeError::backend(BACKEND, "input name contains a NUL byte"))?;
        let mut buf = vec![0u8; shape.numel() * declared.width()];
        let mut handle = self.handle;
        let status = unsafe {
            (self.vtable.get_input)(&mut handle, name_c.as_ptr(), buf.as_mut_ptr() as *mut c_void)
        };
        check(&self.vtable, status)?;
        Ok(Some(Tensor::new(declared, shape, Bytes::from(buf))?))
    }

    fn execute(&mut self) -> Result<()> {
        for input in &self.spec.inputs {
            if !self.bindings.contains_key(input.name.as_str()) {
                return Err(RuntimeError::Unsupported {
                    backend: BACKEND,
                    operation: format!("execute() before input '{}' is bound", input.name.as_str()),
                });
            }
        }

        if self.shape_policy() == ShapePolicy::PerExecution {
            // Whatever was resolved before is stale the moment we run.
            self.shapes_resolved = false;
        }
        let status = unsafe { (self.vtable.run)(&mut self.handle) };
        check(&self.vtable, status)?;
        if self.shape_policy() == ShapePolicy::PerExecution {
            self.resolve_output_shapes()?;
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
        if !self.shapes_resolved {
            return Err(RuntimeError::Unsupported {
                backend: BACKEND,
                operation: "get_output() before execute() resolves output shapes".to_string(),
            });
        }

        let dtype = self.spec.outputs[index].dtype;
        let (numel, shape) = self.output_extents[index].clone();
        let mut buf = vec![0u8; numel * dtype.width()];
        let status = unsafe {
            (self.vtable.get_output)(
                &mut self.handle,
                index as c_int,
                buf.as_mut_ptr() as *mut c_void,
            )
        };
        check(&self.vtable, status)?;
        Tensor::new(dtype, shape, Bytes::from(buf))
    }

    fn close(&mut self) {
        if self.handle.is_null() {
            return;
        }
        let status = unsafe { (self.vtable.delete)(&mut self.handle) };
        if status != STATUS_OK {
            warn!(
                backend = BACKEND,
                error = %last_error_string(&self.vtable),
                "engine handle release failed"
            );
        }
        self.handle = ptr::null_mut();
    }
}

impl Drop for NativeModel {
    fn drop(&mut self) {
        self.close();
    }
}
