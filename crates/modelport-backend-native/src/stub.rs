//! In-process reference engine speaking the same C ABI as a compiled
//! artifact library. It exists so the marshalling layer can be exercised
//! end to end — raw pointers, status codes, last-error register and all —
//! without shipping a compiled artifact. The engine reads a `model.json`
//! descriptor from the artifact directory:
//!
//! ```json
//! {
//!   "backend": "graph_executor",
//!   "inputs": [{"name": "data1", "dtype": "float32", "shape": [2]}, ...],
//!   "weights": ["w0"]
//! }
//! ```
//!
//! `graph_executor` and `vm` models compute pairwise sums: output `i` is
//! `input[2i] + input[2i+1]`, elementwise f32. `tree_ensemble` models take
//! one `[rows, features]` matrix named `data` and emit `[rows, 3]` logits
//! `[0.1*s, 0.3*s, 0.05*p]` where `s` sums the present (non-NaN) features
//! of the row and `p` counts them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_longlong, c_void};
use std::path::Path;

use serde::Deserialize;

use crate::abi::{Handle, NativeVtable, Status, STATUS_OK};

const STATUS_FAIL: Status = 1;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::new("").unwrap());
}

fn fail(message: impl Into<String>) -> Status {
    let message = CString::new(message.into()).unwrap_or_else(|_| CString::new("error").unwrap());
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
    STATUS_FAIL
}

#[derive(Deserialize)]
struct TensorDecl {
    name: String,
    #[serde(default = "default_dtype")]
    dtype: String,
    #[serde(default)]
    shape: Option<Vec<i64>>,
}

fn default_dtype() -> String {
    "float32".to_string()
}

#[derive(Deserialize)]
struct ModelDescriptor {
    backend: String,
    inputs: Vec<TensorDecl>,
    #[serde(default)]
    weights: Vec<String>,
}

struct Bound {
    shape: Vec<i64>,
    bytes: Vec<u8>,
}

struct StubModel {
    backend: CString,
    input_names: Vec<CString>,
    input_dtypes: Vec<CString>,
    declared_shapes: Vec<Option<Vec<i64>>>,
    weight_names: Vec<CString>,
    bound: HashMap<String, Bound>,
    /// Present pre-run only for graph_executor models (declared shapes,
    /// zero data); rebuilt by every run.
    outputs: Vec<Bound>,
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

impl StubModel {
    fn load(dir: &Path) -> Result<StubModel, String> {
        let descriptor_path = dir.join("model.json");
        let raw = std::fs::read(&descriptor_path)
            .map_err(|e| format!("cannot read {}: {e}", descriptor_path.display()))?;
        let descriptor: ModelDescriptor =
            serde_json::from_slice(&raw).map_err(|e| format!("invalid model.json: {e}"))?;
        match descriptor.backend.as_str() {
            "graph_executor" | "vm" | "tree_ensemble" => {}
            other => return Err(format!("unknown backend '{other}' in model.json")),
        }

        let mut model = StubModel {
            backend: CString::new(descriptor.backend.clone()).unwrap(),
            input_names: Vec::new(),
            input_dtypes: Vec::new(),
            declared_shapes: Vec::new(),
            weight_names: Vec::new(),
            bound: HashMap::new(),
            outputs: Vec::new(),
        };
        for decl in &descriptor.inputs {
            model.input_names.push(CString::new(decl.name.clone()).unwrap());
            model.input_dtypes.push(CString::new(decl.dtype.clone()).unwrap());
            model.declared_shapes.push(decl.shape.clone());
        }
        for name in &descriptor.weights {
            model.weight_names.push(CString::new(name.clone()).unwrap());
        }

        if descriptor.backend == "graph_executor" {
            // Static-shape engine: outputs are sized from declared inputs
            // before anything runs.
            for pair in model.declared_shapes.chunks(2) {
                let shape = pair[0]
                    .clone()
                    .ok_or_else(|| "graph_executor inputs must declare shapes".to_string())?;
                let numel: i64 = shape.iter().product::<i64>().max(1);
                model.outputs.push(Bound {
                    shape,
                    bytes: vec![0u8; numel as usize * 4],
                });
            }
        }
        Ok(model)
    }

    fn backend_str(&self) -> &str {
        self.backend.to_str().unwrap_or_default()
    }

    fn num_outputs(&self) -> usize {
        if self.backend_str() == "tree_ensemble" {
            1
        } else {
            self.input_names.len() / 2
        }
    }

    fn input_position(&self, name: &str) -> Option<usize> {
        self.input_names
            .iter()
            .position(|n| n.to_str() == Ok(name))
    }

    fn is_weight(&self, name: &str) -> bool {
        self.weight_names.iter().any(|n| n.to_str() == Ok(name))
    }

    fn run(&mut self) -> Result<(), String> {
        if self.backend_str() == "tree_ensemble" {
            let data = self
                .bound
                .get("data")
                .ok_or_else(|| "input 'data' was never set".to_string())?;
            if data.shape.len() != 2 {
                return Err(format!(
                    "tree ensemble expects a 2-d matrix, got rank {}",
                    data.shape.len()
                ));
            }
            let (rows, cols) = (data.shape[0] as usize, data.shape[1] as usize);
            let values = decode_f32(&data.bytes);
            let mut logits = Vec::with_capacity(rows * 3);
            for r in 0..rows {
                let row = &values[r * cols..(r + 1) * cols];
                let present: Vec<f32> = row.iter().copied().filter(|v| !v.is_nan()).collect();
                let s: f32 = present.iter().sum();
                let p = present.len() as f32;
                logits.extend_from_slice(&[0.1 * s, 0.3 * s, 0.05 * p]);
            }
            self.outputs = vec![Bound {
                shape: vec![rows as i64, 3],
                bytes: encode_f32(&logits),
            }];
            return Ok(());
        }

        let mut outputs = Vec::with_capacity(self.num_outputs());
        for pair in self.input_names.chunks(2) {
            let [a, b] = pair else {
                return Err("pairwise model needs an even number of inputs".to_string());
            };
            let a_name = a.to_str().unwrap_or_default();
            let b_name = b.to_str().unwrap_or_default();
            let lhs = self
                .bound
                .get(a_name)
                .ok_or_else(|| format!("input '{a_name}' was never set"))?;
            let rhs = self
                .bound
                .get(b_name)
                .ok_or_else(|| format!("input '{b_name}' was never set"))?;
            if lhs.bytes.len() != rhs.bytes.len() {
                return Err(format!(
                    "inputs '{a_name}' and '{b_name}' disagree on element count"
                ));
            }
            let sum: Vec<f32> = decode_f32(&lhs.bytes)
                .into_iter()
                .zip(decode_f32(&rhs.bytes))
                .map(|(x, y)| x + y)
                .collect();
            outputs.push(Bound {
                shape: lhs.shape.clone(),
                bytes: encode_f32(&sum),
            });
        }
        self.outputs = outputs;
        Ok(())
    }
}

unsafe fn model_mut<'a>(handle: *mut Handle) -> Result<&'a mut StubModel, Status> {
    if handle.is_null() || (*handle).is_null() {
        return Err(fail("null model handle"));
    }
    Ok(&mut *((*handle) as *mut StubModel))
}

unsafe extern "C" fn create(
    handle: *mut Handle,
    path: *const c_char,
    _device_kind: c_int,
    _device_id: c_int,
) -> Status {
    if handle.is_null() || path.is_null() {
        return fail("null argument to create");
    }
    let path = Path::new(match CStr::from_ptr(path).to_str() {
        Ok(p) => p,
        Err(_) => return fail("model path is not valid utf-8"),
    });
    match StubModel::load(path) {
        Ok(model) => {
            *handle = Box::into_raw(Box::new(model)) as Handle;
            STATUS_OK
        }
        Err(message) => fail(message),
    }
}

unsafe extern "C" fn delete(handle: *mut Handle) -> Status {
    if handle.is_null() || (*handle).is_null() {
        return fail("delete on a null handle");
    }
    drop(Box::from_raw((*handle) as *mut StubModel));
    *handle = std::ptr::null_mut();
    STATUS_OK
}

unsafe extern "C" fn last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

unsafe extern "C" fn api_version() -> u32 {
    crate::MAX_API_VERSION
}

/// A version the adapter does not understand; handed to tests that cover
/// the version gate.
pub unsafe extern "C" fn unsupported_api_version() -> u32 {
    crate::MAX_API_VERSION + 1
}

unsafe extern "C" fn backend(handle: *mut Handle, out: *mut *const c_char) -> Status {
    match model_mut(handle) {
        Ok(model) => {
            *out = model.backend.as_ptr();
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn num_inputs(handle: *mut Handle, out: *mut c_int) -> Status {
    match model_mut(handle) {
        Ok(model) => {
            *out = model.input_names.len() as c_int;
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn num_weights(handle: *mut Handle, out: *mut c_int) -> Status {
    match model_mut(handle) {
        Ok(model) => {
            *out = model.weight_names.len() as c_int;
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn num_outputs(handle: *mut Handle, out: *mut c_int) -> Status {
    match model_mut(handle) {
        Ok(model) => {
            *out = model.num_outputs() as c_int;
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn input_name(handle: *mut Handle, index: c_int, out: *mut *const c_char) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.input_names.get(index as usize) {
            Some(name) => {
                *out = name.as_ptr();
                STATUS_OK
            }
            None => fail(format!("input index {index} out of range")),
        },
        Err(status) => status,
    }
}

unsafe extern "C" fn weight_name(handle: *mut Handle, index: c_int, out: *mut *const c_char) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.weight_names.get(index as usize) {
            Some(name) => {
                *out = name.as_ptr();
                STATUS_OK
            }
            None => fail(format!("weight index {index} out of range")),
        },
        Err(status) => status,
    }
}

unsafe extern "C" fn input_dtype(handle: *mut Handle, index: c_int, out: *mut *const c_char) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.input_dtypes.get(index as usize) {
            Some(dtype) => {
                *out = dtype.as_ptr();
                STATUS_OK
            }
            None => fail(format!("input index {index} out of range")),
        },
        Err(status) => status,
    }
}

unsafe extern "C" fn output_dtype(handle: *mut Handle, index: c_int, out: *mut *const c_char) -> Status {
    thread_local! {
        static F32: CString = CString::new("float32").unwrap();
    }
    match model_mut(handle) {
        Ok(model) => {
            if (index as usize) >= model.num_outputs() {
                return fail(format!("output index {index} out of range"));
            }
            F32.with(|dtype| *out = dtype.as_ptr());
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn set_input(
    handle: *mut Handle,
    name: *const c_char,
    shape: *const c_longlong,
    data: *const c_void,
    ndim: c_int,
) -> Status {
    let model = match model_mut(handle) {
        Ok(model) => model,
        Err(status) => return status,
    };
    let name = match CStr::from_ptr(name).to_str() {
        Ok(n) => n.to_string(),
        Err(_) => return fail("input name is not valid utf-8"),
    };
    let position = model.input_position(&name);
    if position.is_none() && !model.is_weight(&name) {
        return fail(format!("'{name}' is not a valid input name"));
    }

    let dims = std::slice::from_raw_parts(shape, ndim.max(0) as usize).to_vec();
    let numel: i64 = dims.iter().product::<i64>().max(1);
    let width = match position {
        Some(i) if model.input_dtypes[i].to_str() == Ok("json") => 1,
        Some(i) => match model.input_dtypes[i].to_str() {
            Ok("float64") | Ok("int64") | Ok("uint64") => 8,
            Ok("uint8") | Ok("int8") => 1,
            _ => 4,
        },
        None => 4,
    };
    let bytes = std::slice::from_raw_parts(data as *const u8, numel as usize * width).to_vec();
    model.bound.insert(name, Bound { shape: dims, bytes });
    STATUS_OK
}

unsafe extern "C" fn get_input(handle: *mut Handle, name: *const c_char, out: *mut c_void) -> Status {
    let model = match model_mut(handle) {
        Ok(model) => model,
        Err(status) => return status,
    };
    let name = match CStr::from_ptr(name).to_str() {
        Ok(n) => n,
        Err(_) => return fail("input name is not valid utf-8"),
    };
    match model.bound.get(name) {
        Some(binding) => {
            std::ptr::copy_nonoverlapping(
                binding.bytes.as_ptr(),
                out as *mut u8,
                binding.bytes.len(),
            );
            STATUS_OK
        }
        None => fail(format!("input '{name}' was never set")),
    }
}

unsafe extern "C" fn run(handle: *mut Handle) -> Status {
    let model = match model_mut(handle) {
        Ok(model) => model,
        Err(status) => return status,
    };
    match model.run() {
        Ok(()) => STATUS_OK,
        Err(message) => fail(message),
    }
}

unsafe extern "C" fn output_size_dim(
    handle: *mut Handle,
    index: c_int,
    size: *mut c_longlong,
    dim: *mut c_int,
) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.outputs.get(index as usize) {
            Some(output) => {
                *size = output.shape.iter().product::<i64>().max(1);
                *dim = output.shape.len() as c_int;
                STATUS_OK
            }
            None => fail(format!("output index {index} is not resolved")),
        },
        Err(status) => status,
    }
}

unsafe extern "C" fn output_shape(handle: *mut Handle, index: c_int, out: *mut c_longlong) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.outputs.get(index as usize) {
            Some(output) => {
                std::ptr::copy_nonoverlapping(output.shape.as_ptr(), out, output.shape.len());
                STATUS_OK
            }
            None => fail(format!("output index {index} is not resolved")),
        },
        Err(status) => status,
    }
}

unsafe extern "C" fn get_output(handle: *mut Handle, index: c_int, out: *mut c_void) -> Status {
    match model_mut(handle) {
        Ok(model) => match model.outputs.get(index as usize) {
            Some(output) => {
                std::ptr::copy_nonoverlapping(
                    output.bytes.as_ptr(),
                    out as *mut u8,
                    output.bytes.len(),
                );
                STATUS_OK
            }
            None => fail(format!("output index {index} is not resolved")),
        },
        Err(status) => status,
    }
}

/// The reference engine's full entry-point table.
pub fn vtable() -> NativeVtable {
    NativeVtable {
        create,
        delete,
        last_error,
        api_version: Some(api_version),
        backend,
        num_inputs,
        num_weights,
        num_outputs,
        input_name,
        weight_name,
        input_dtype: Some(input_dtype),
        output_dtype: Some(output_dtype),
        set_input,
        get_input,
        run,
        output_size_dim,
        output_shape,
        get_output,
    }
}
