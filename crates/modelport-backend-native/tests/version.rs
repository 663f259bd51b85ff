use modelport_backend_native::abi::NativeVtable;
use modelport_backend_native::{stub, NativeModel};
use modelport_core::{RuntimeError, RuntimeOptions};

#[test]
fn newer_engine_contract_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("model.json"),
        serde_json::json!({
            "backend": "graph_executor",
            "inputs": [
                {"name": "a", "dtype": "float32", "shape": [1]},
                {"name": "b", "dtype": "float32", "shape": [1]},
            ],
        })
        .to_string(),
    )
    .unwrap();

    let vtable = NativeVtable {
        api_version: Some(stub::unsupported_api_version),
        ..stub::vtable()
    };
    let err = NativeModel::from_vtable(vtable, None, dir.path(), RuntimeOptions::default())
        .err()
        .expect("load must fail");
    match err {
        RuntimeError::UnsupportedModelVersion { found, max, .. } => {
            assert_eq!(found, max + 1);
        }
        other => panic!("expected UnsupportedModelVersion, got {other}"),
    }
}

#[test]
fn missing_library_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.json"), "{}").unwrap();
    std::fs::write(dir.path().join("model.params"), b"").unwrap();
    let err = NativeModel::open(dir.path(), RuntimeOptions::default())
        .err()
        .expect("open must fail without a compiled library");
    assert!(matches!(err, RuntimeError::Configuration { .. }), "{err}");
}

#[test]
fn create_failure_reports_the_engine_message() {
    // Directory without model.json: the engine's own error comes back.
    let dir = tempfile::tempdir().unwrap();
    let err = NativeModel::from_vtable(stub::vtable(), None, dir.path(), RuntimeOptions::default())
        .err()
        .expect("create must fail");
    match err {
        RuntimeError::Backend { message, .. } => {
            assert!(message.contains("model.json"), "verbatim engine message: {message}");
        }
        other => panic!("expected Backend, got {other}"),
    }
}
