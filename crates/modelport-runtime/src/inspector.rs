//! Artifact inspection: map a filesystem path to exactly one backend
//! adapter. Selection is a priority-ordered signature scan over the
//! artifact's files; the native path additionally honors the engine's own
//! post-hoc backend report to promote tree ensembles to their wrapper.

use std::path::Path;

use tracing::{info, warn};

use modelport_backend_graph::FrozenGraphModel;
use modelport_backend_interp::InterpreterModel;
use modelport_backend_native::abi::NativeVtable;
use modelport_backend_native::{NativeBackendKind, NativeModel};
use modelport_backend_tree::TreeEnsembleModel;
use modelport_core::{Device, ModelArtifact, Result, RuntimeOptions};

use crate::{AdapterKind, ModelHandle};

fn warn_device_ignored(backend: &str, options: &RuntimeOptions) {
    if options.device != Device::Cpu {
        warn!(
            backend,
            device = %options.device,
            "device selection is not supported by this backend; parameters ignored"
        );
    }
}

fn wrap_native(native: NativeModel, model_path: &Path) -> Result<ModelHandle> {
    let kind = if native.backend_kind() == NativeBackendKind::TreeEnsemble {
        AdapterKind::DecisionTree(TreeEnsembleModel::from_native(native)?)
    } else {
        AdapterKind::Native(native)
    };
    Ok(ModelHandle::from_adapter(kind, model_path))
}

/// Select and construct the one adapter for this artifact.
pub fn load(model_path: &Path, options: RuntimeOptions) -> Result<ModelHandle> {
    let artifact = ModelArtifact::locate(model_path)?;
    let handle = match &artifact {
        ModelArtifact::FrozenGraphFile(graph_file)
        | ModelArtifact::SavedModelDir { graph_file, .. } => {
            let model = FrozenGraphModel::open(graph_file, options)?;
            ModelHandle::from_adapter(AdapterKind::FrozenGraph(model), model_path)
        }
        ModelArtifact::InterpreterFile(module_file) => {
            warn_device_ignored("interpreter", &options);
            let model = InterpreterModel::open(module_file, options)?;
            ModelHandle::from_adapter(AdapterKind::Interpreter(model), model_path)
        }
        ModelArtifact::NativeDir(dir) => {
            let native = NativeModel::open(dir, options)?;
            wrap_native(native, model_path)?
        }
    };
    info!(
        backend = handle.backend_name(),
        path = %model_path.display(),
        "model loaded"
    );
    Ok(handle)
}

/// Native-artifact load over an injected engine vtable, for embedded
/// engines that are linked in rather than shipped as a shared library
/// inside the artifact.
pub fn load_with_vtable(
    model_path: &Path,
    options: RuntimeOptions,
    vtable: NativeVtable,
) -> Result<ModelHandle> {
    let native = NativeModel::from_vtable(vtable, None, model_path, options)?;
    wrap_native(native, model_path)
}
