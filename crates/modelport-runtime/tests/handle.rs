use std::path::Path;

use anyhow::Result;
use modelport_backend_native::stub;
use modelport_core::{Device, IOName, RuntimeError, RuntimeOptions, Shape, Tensor};
use modelport_runtime::{inspector, ModelHandle};

fn write_frozen_graph(dir: &Path) {
    let doc = serde_json::json!({
        "nodes": [
            {"name": "x", "op": "Placeholder",
             "attrs": {"dtype": "float32", "shape": [2]}},
            {"name": "y", "op": "Square", "inputs": ["x"]},
        ]
    });
    std::fs::write(dir.join("model.graph.json"), doc.to_string()).unwrap();
}

fn write_interpreter_module(dir: &Path) {
    use modelport_backend_interp::module::{Instruction, InterpreterModule, TensorDecl};
    let module = InterpreterModule {
        tensors: vec![
            TensorDecl {
                name: "x".to_string(),
                dtype: modelport_core::DType::F32,
                shape: vec![2],
                constant: None,
            },
            TensorDecl {
                name: "y".to_string(),
                dtype: modelport_core::DType::F32,
                shape: vec![2],
                constant: None,
            },
        ],
        instructions: vec![Instruction::Add { lhs: 0, rhs: 0, out: 1 }],
        inputs: vec![0],
        outputs: vec![1],
    };
    module.write(&dir.join("model.tim")).unwrap();
}

#[test]
fn frozen_graph_signature_selects_the_graph_adapter() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_frozen_graph(dir.path());

    let mut handle = ModelHandle::load(dir.path())?;
    assert_eq!(handle.backend_name(), "frozen_graph");

    let outputs = handle.run(&[(
        IOName("x".to_string()),
        Tensor::from_f32(Shape::from_slice(&[2]), &[3.0, 4.0]),
    )])?;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0.as_str(), "y");
    assert_eq!(outputs[0].1.to_f32_vec()?, vec![9.0, 16.0]);
    Ok(())
}

#[test]
fn interpreter_signature_selects_the_interpreter_adapter() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_interpreter_module(dir.path());

    let mut handle = ModelHandle::load(dir.path())?;
    assert_eq!(handle.backend_name(), "interpreter");

    handle.set_input("x", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]))?;
    handle.execute()?;
    assert_eq!(handle.get_output(0)?.to_f32_vec()?, vec![2.0, 4.0]);
    Ok(())
}

#[test]
fn native_engine_reporting_tree_ensemble_is_promoted() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("model.json"),
        serde_json::json!({
            "backend": "tree_ensemble",
            "inputs": [{"name": "data", "dtype": "float32"}],
        })
        .to_string(),
    )
    .unwrap();

    let handle =
        inspector::load_with_vtable(dir.path(), RuntimeOptions::default(), stub::vtable())?;
    assert_eq!(handle.backend_name(), "decision_tree");
    Ok(())
}

#[test]
fn native_engine_reporting_graph_executor_stays_native() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("model.json"),
        serde_json::json!({
            "backend": "graph_executor",
            "inputs": [
                {"name": "a", "dtype": "float32", "shape": [2]},
                {"name": "b", "dtype": "float32", "shape": [2]},
            ],
        })
        .to_string(),
    )
    .unwrap();

    let mut handle =
        inspector::load_with_vtable(dir.path(), RuntimeOptions::default(), stub::vtable())?;
    assert_eq!(handle.backend_name(), "native");

    let outputs = handle.run(&[
        (
            IOName("a".to_string()),
            Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]),
        ),
        (
            IOName("b".to_string()),
            Tensor::from_f32(Shape::from_slice(&[2]), &[10.0, 20.0]),
        ),
    ])?;
    assert_eq!(outputs[0].1.to_f32_vec()?, vec![11.0, 22.0]);
    Ok(())
}

#[test]
fn ambiguous_artifacts_are_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_frozen_graph(dir.path());
    write_interpreter_module(dir.path());

    let err = ModelHandle::load(dir.path()).err().expect("load must fail");
    assert!(matches!(err, RuntimeError::Configuration { .. }), "{err}");
}

#[test]
fn teardown_through_the_facade_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_frozen_graph(dir.path());

    let mut handle = ModelHandle::load(dir.path())?;
    handle.close();
    handle.close();

    let err = handle
        .set_input("x", &Tensor::from_f32(Shape::from_slice(&[2]), &[0.0, 0.0]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Backend { .. }));
    drop(handle);
    Ok(())
}

#[test]
fn device_parameters_are_ignored_by_deviceless_backends() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_frozen_graph(dir.path());

    // Requesting a GPU on a backend without device selection only warns.
    let options = RuntimeOptions {
        device: Device::Gpu { device_id: 0 },
        ..RuntimeOptions::default()
    };
    let handle = ModelHandle::load_with(dir.path(), options)?;
    assert_eq!(handle.backend_name(), "frozen_graph");
    Ok(())
}

#[test]
fn every_listed_name_round_trips_through_the_facade() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_interpreter_module(dir.path());
    let mut handle = ModelHandle::load(dir.path())?;

    for name in handle.list_inputs() {
        handle.set_input(&name, &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 1.0]))?;
    }
    handle.execute()?;
    for index in 0..handle.list_outputs().len() {
        handle.get_output(index)?;
    }
    Ok(())
}
