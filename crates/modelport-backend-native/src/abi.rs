//! The flat C-ABI surface of a compiled execution engine, expressed as a
//! vtable of raw function pointers. The table is resolved either from a
//! shared library shipped inside the artifact or injected directly (the
//! in-process reference engine used by the test-suite).

use std::os::raw::{c_char, c_int, c_longlong, c_void};

use libloading::Library;

/// Engine status code; zero is success, anything else means "fetch the
/// last-error register".
pub type Status = c_int;
pub const STATUS_OK: Status = 0;

/// Opaque engine handle. Passed by reference on every call, matching the
/// engine's `handle*` convention.
pub type Handle = *mut c_void;

pub const SYM_CREATE: &[u8] = b"MpCreateModel\0";
pub const SYM_DELETE: &[u8] = b"MpDeleteModel\0";
pub const SYM_LAST_ERROR: &[u8] = b"MpGetLastError\0";
pub const SYM_API_VERSION: &[u8] = b"MpGetApiVersion\0";
pub const SYM_BACKEND: &[u8] = b"MpGetBackend\0";
pub const SYM_NUM_INPUTS: &[u8] = b"MpGetNumInputs\0";
pub const SYM_NUM_WEIGHTS: &[u8] = b"MpGetNumWeights\0";
pub const SYM_NUM_OUTPUTS: &[u8] = b"MpGetNumOutputs\0";
pub const SYM_INPUT_NAME: &[u8] = b"MpGetInputName\0";
pub const SYM_WEIGHT_NAME: &[u8] = b"MpGetWeightName\0";
pub const SYM_INPUT_DTYPE: &[u8] = b"MpGetInputDtype\0";
pub const SYM_OUTPUT_DTYPE: &[u8] = b"MpGetOutputDtype\0";
pub const SYM_SET_INPUT: &[u8] = b"MpSetInput\0";
pub const SYM_GET_INPUT: &[u8] = b"MpGetInput\0";
pub const SYM_RUN: &[u8] = b"MpRunModel\0";
pub const SYM_OUTPUT_SIZE_DIM: &[u8] = b"MpGetOutputSizeDim\0";
pub const SYM_OUTPUT_SHAPE: &[u8] = b"MpGetOutputShape\0";
pub const SYM_GET_OUTPUT: &[u8] = b"MpGetOutput\0";

pub type CreateFn = unsafe extern "C" fn(*mut Handle, *const c_char, c_int, c_int) -> Status;
pub type DeleteFn = unsafe extern "C" fn(*mut Handle) -> Status;
pub type LastErrorFn = unsafe extern "C" fn() -> *const c_char;
pub type ApiVersionFn = unsafe extern "C" fn() -> u32;
pub type GetStrFn = unsafe extern "C" fn(*mut Handle, *mut *const c_char) -> Status;
pub type GetCountFn = unsafe extern "C" fn(*mut Handle, *mut c_int) -> Status;
pub type NameAtFn = unsafe extern "C" fn(*mut Handle, c_int, *mut *const c_char) -> Status;
pub type SetInputFn = unsafe extern "C" fn(
    *mut Handle,
    *const c_char,
    *const c_longlong,
    *const c_void,
    c_int,
) -> Status;
pub type GetInputFn = unsafe extern "C" fn(*mut Handle, *const c_char, *mut c_void) -> Status;
pub type RunFn = unsafe extern "C" fn(*mut Handle) -> Status;
pub type OutputSizeDimFn =
    unsafe extern "C" fn(*mut Handle, c_int, *mut c_longlong, *mut c_int) -> Status;
pub type OutputShapeFn = unsafe extern "C" fn(*mut Handle, c_int, *mut c_longlong) -> Status;
pub type GetOutputFn = unsafe extern "C" fn(*mut Handle, c_int, *mut c_void) -> Status;

/// Resolved engine entry points. Optional members cover symbols older
/// engine builds do not export; their absence selects a documented default
/// instead of a load failure.
#[derive(Clone, Copy)]
pub struct NativeVtable {
    pub create: CreateFn,
    pub delete: DeleteFn,
    pub last_error: LastErrorFn,
    pub api_version: Option<ApiVersionFn>,
    pub backend: GetStrFn,
    pub num_inputs: GetCountFn,
    pub num_weights: GetCountFn,
    pub num_outputs: GetCountFn,
    pub input_name: NameAtFn,
    pub weight_name: NameAtFn,
    pub input_dtype: Option<NameAtFn>,
    pub output_dtype: Option<NameAtFn>,
    pub set_input: SetInputFn,
    pub get_input: GetInputFn,
    pub run: RunFn,
    pub output_size_dim: OutputSizeDimFn,
    pub output_shape: OutputShapeFn,
    pub get_output: GetOutputFn,
}

impl NativeVtable {
    /// Resolve every entry point from an opened library. The returned
    /// pointers are valid for as long as the library stays loaded; the
    /// caller keeps the `Library` alive next to the table.
    ///
    /// # Safety
    /// The library must actually export functions with these signatures;
    /// a library exporting same-named symbols of other shapes is undefined
    /// behavior, as with any dlopen-based ABI.
    pub unsafe fn from_library(lib: &Library) -> Result<NativeVtable, libloading::Error> {
        Ok(NativeVtable {
            create: *lib.get::<CreateFn>(SYM_CREATE)?,
            delete: *lib.get::<DeleteFn>(SYM_DELETE)?,
            last_error: *lib.get::<LastErrorFn>(SYM_LAST_ERROR)?,
            api_version: lib.get::<ApiVersionFn>(SYM_API_VERSION).ok().map(|s| *s),
            backend: *lib.get::<GetStrFn>(SYM_BACKEND)?,
            num_inputs: *lib.get::<GetCountFn>(SYM_NUM_INPUTS)?,
            num_weights: *lib.get::<GetCountFn>(SYM_NUM_WEIGHTS)?,
            num_outputs: *lib.get::<GetCountFn>(SYM_NUM_OUTPUTS)?,
            input_name: *lib.get::<NameAtFn>(SYM_INPUT_NAME)?,
            weight_name: *lib.get::<NameAtFn>(SYM_WEIGHT_NAME)?,
            input_dtype: lib.get::<NameAtFn>(SYM_INPUT_DTYPE).ok().map(|s| *s),
            output_dtype: lib.get::<NameAtFn>(SYM_OUTPUT_DTYPE).ok().map(|s| *s),
            set_input: *lib.get::<SetInputFn>(SYM_SET_INPUT)?,
            get_input: *lib.get::<GetInputFn>(SYM_GET_INPUT)?,
            run: *lib.get::<RunFn>(SYM_RUN)?,
            output_size_dim: *lib.get::<OutputSizeDimFn>(SYM_OUTPUT_SIZE_DIM)?,
            output_shape: *lib.get::<OutputShapeFn>(SYM_OUTPUT_SHAPE)?,
            get_output: *lib.get::<GetOutputFn>(SYM_GET_OUTPUT)?,
        })
    }
}
