use std::path::Path;

use anyhow::Result;
use modelport_backend_graph::FrozenGraphModel;
use modelport_core::{Adapter, DType, RuntimeError, RuntimeOptions, Shape, Tensor};

/// mm = matmul(a, matmul(a, b)); output1 = square(mm);
/// output2 = argmax(flatten(mm)).
fn matmul_graph() -> serde_json::Value {
    serde_json::json!({
        "nodes": [
            {"name": "a", "op": "Placeholder",
             "attrs": {"dtype": "float32", "shape": [2, 2]}},
            {"name": "b", "op": "Const",
             "attrs": {"dtype": "float32", "shape": [2, 2], "values": [0, 1, 1, 0]}},
            {"name": "mm1", "op": "MatMul", "inputs": ["a", "b"]},
            {"name": "mm", "op": "MatMul", "inputs": ["a", "mm1"]},
            {"name": "output1", "op": "Square", "inputs": ["mm"]},
            {"name": "flat", "op": "Flatten", "inputs": ["mm"]},
            {"name": "output2", "op": "ArgMax", "inputs": ["flat"]},
        ]
    })
}

fn write_graph(dir: &Path, doc: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("model.graph.json");
    std::fs::write(&path, doc.to_string()).unwrap();
    path
}

#[test]
fn matmul_square_argmax() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;

    assert_eq!(model.list_inputs(), vec!["a"]);
    assert_eq!(model.list_outputs(), vec!["output1", "output2"]);

    model.set_input(
        "a",
        &Tensor::from_f32(Shape::from_slice(&[2, 2]), &[4.0, 1.0, 3.0, 2.0]),
    )?;
    model.execute()?;

    let out1 = model.get_output(0)?;
    assert_eq!(out1.shape.dims(), &[2, 2]);
    assert_eq!(out1.to_f32_vec()?, vec![36.0, 361.0, 49.0, 324.0]);

    let out2 = model.get_output(1)?;
    assert_eq!(out2.dtype, DType::I64);
    assert_eq!(out2.to_i64_vec()?, vec![1]);
    Ok(())
}

#[test]
fn output_order_is_stable_across_calls_and_loads() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());

    let model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;
    let first = model.list_outputs();
    for _ in 0..3 {
        assert_eq!(model.list_outputs(), first);
    }
    let fresh = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;
    assert_eq!(fresh.list_outputs(), first);

    let mut sorted = first.clone();
    sorted.sort();
    assert_eq!(first, sorted, "outputs come back lexicographically sorted");
    Ok(())
}

#[test]
fn output_shapes_are_unresolved_until_run() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;

    assert_eq!(model.output_shape(0)?, None);
    assert!(matches!(
        model.get_output(0),
        Err(RuntimeError::Unsupported { .. })
    ));

    model.set_input(
        "a",
        &Tensor::from_f32(Shape::from_slice(&[2, 2]), &[1.0, 0.0, 0.0, 1.0]),
    )?;
    model.execute()?;
    assert_eq!(model.output_shape(0)?.unwrap().dims(), &[2, 2]);
    Ok(())
}

#[test]
fn control_anchor_is_not_promoted_to_output() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(
        dir.path(),
        &serde_json::json!({
            "nodes": [
                {"name": "x", "op": "Placeholder",
                 "attrs": {"dtype": "float32", "shape": [2]}},
                {"name": "warmup", "op": "Identity", "inputs": ["x"]},
                {"name": "y", "op": "Square", "inputs": ["x", "^warmup"]},
            ]
        }),
    );
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;
    assert_eq!(model.list_outputs(), vec!["y"]);

    model.set_input("x", &Tensor::from_f32(Shape::from_slice(&[2]), &[2.0, 3.0]))?;
    model.execute()?;
    assert_eq!(model.get_output(0)?.to_f32_vec()?, vec![4.0, 9.0]);
    Ok(())
}

#[test]
fn unknown_input_name_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;
    let err = model
        .set_input("nope", &Tensor::from_f32(Shape::from_slice(&[1]), &[0.0]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Backend { .. }));
    Ok(())
}

#[test]
fn get_input_round_trips_with_shape_override() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;

    assert!(model.get_input("a", None)?.is_none());
    model.set_input(
        "a",
        &Tensor::from_f32(Shape::from_slice(&[2, 2]), &[1.0, 2.0, 3.0, 4.0]),
    )?;
    let read = model
        .get_input("a", Some(&Shape::from_slice(&[4])))?
        .unwrap();
    assert_eq!(read.shape.dims(), &[4]);
    assert!(matches!(
        model.get_input("a", Some(&Shape::from_slice(&[5]))),
        Err(RuntimeError::Shape { .. })
    ));
    Ok(())
}

#[test]
fn execute_without_bound_placeholder_fails() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let graph = write_graph(dir.path(), &matmul_graph());
    let mut model = FrozenGraphModel::open(&graph, RuntimeOptions::default())?;
    assert!(matches!(
        model.execute(),
        Err(RuntimeError::Unsupported { .. })
    ));
    Ok(())
}
