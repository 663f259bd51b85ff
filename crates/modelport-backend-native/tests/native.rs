use std::path::Path;

use anyhow::{Context, Result};
use modelport_backend_native::{stub, NativeBackendKind, NativeModel};
use modelport_core::{Adapter, DType, RuntimeError, RuntimeOptions, Shape, ShapePolicy, Tensor};

fn write_descriptor(dir: &Path, descriptor: serde_json::Value) {
    std::fs::write(dir.join("model.json"), descriptor.to_string()).unwrap();
}

fn open(dir: &Path, options: RuntimeOptions) -> modelport_core::Result<NativeModel> {
    NativeModel::from_vtable(stub::vtable(), None, dir, options)
}

/// 4-input/2-output pairwise-add model: output0 = data1 + data2,
/// output1 = data3 + data4.
fn adder_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "graph_executor",
            "inputs": [
                {"name": "data1", "dtype": "float32", "shape": [2]},
                {"name": "data2", "dtype": "float32", "shape": [2]},
                {"name": "data3", "dtype": "float32", "shape": [3]},
                {"name": "data4", "dtype": "float32", "shape": [3]},
            ],
        }),
    );
    dir
}

fn tree_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "tree_ensemble",
            "inputs": [{"name": "data", "dtype": "float32"}],
        }),
    );
    dir
}

#[test]
fn four_input_two_output_addition() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    assert_eq!(model.backend_kind(), NativeBackendKind::GraphExecutor);

    model.set_input("data1", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]))?;
    model.set_input("data2", &Tensor::from_f32(Shape::from_slice(&[2]), &[3.0, 4.0]))?;
    model.set_input(
        "data3",
        &Tensor::from_f32(Shape::from_slice(&[3]), &[5.0, 6.0, 7.0]),
    )?;
    model.set_input(
        "data4",
        &Tensor::from_f32(Shape::from_slice(&[3]), &[8.0, 9.0, 10.0]),
    )?;
    model.execute()?;

    let out0 = model.get_output(0)?;
    assert_eq!(out0.shape.dims(), &[2]);
    assert_eq!(out0.to_f32_vec()?, vec![4.0, 6.0]);

    let out1 = model.get_output(1)?;
    assert_eq!(out1.shape.dims(), &[3]);
    assert_eq!(out1.to_f32_vec()?, vec![13.0, 15.0, 17.0]);
    Ok(())
}

#[test]
fn listed_input_names_are_accepted_for_binding() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;

    let names = model.list_inputs();
    assert_eq!(names, vec!["data1", "data2", "data3", "data4"]);
    for name in &names {
        let len = if name == "data1" || name == "data2" { 2 } else { 3 };
        let data = Tensor::from_f32(Shape::from_slice(&[len]), &vec![1.0; len]);
        model
            .set_input(name, &data)
            .with_context(|| format!("binding listed input {name}"))?;
    }
    model.execute()?;
    for index in 0..model.list_outputs().len() {
        model.get_output(index)?;
    }
    Ok(())
}

#[test]
fn dynamic_shape_resolution_follows_row_count() -> Result<()> {
    let dir = tree_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    assert_eq!(model.shape_policy(), ShapePolicy::PerExecution);

    // Unresolved before the first execute; a query is not a crash.
    assert_eq!(model.output_shape(0)?, None);

    let matrix = Tensor::from_f32(
        Shape::from_slice(&[3, 2]),
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    );
    model.set_input("data", &matrix)?;
    model.execute()?;
    assert_eq!(
        model.output_shape(0)?.unwrap().dims(),
        &[3, 3],
        "leading dimension reflects the 3 bound rows"
    );

    // Re-running with a different row count re-resolves the cache.
    let matrix = Tensor::from_f32(Shape::from_slice(&[1, 2]), &[1.0, 2.0]);
    model.set_input("data", &matrix)?;
    model.execute()?;
    assert_eq!(model.output_shape(0)?.unwrap().dims(), &[1, 3]);
    Ok(())
}

#[test]
fn dtype_enforcement_with_legacy_float32_rule() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "vm",
            "inputs": [
                {"name": "scores", "dtype": "float32"},
                {"name": "ids", "dtype": "int32"},
            ],
        }),
    );
    let mut model = open(dir.path(), RuntimeOptions::default())?;

    // float32-declared inputs accept any numeric data.
    model.set_input("scores", &Tensor::from_i64(Shape::from_slice(&[2]), &[7, 8]))?;

    // Non-float32 inputs demand an exact dtype match.
    let err = model
        .set_input("ids", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]))
        .unwrap_err();
    match err {
        RuntimeError::TypeMismatch {
            name,
            expected,
            supplied,
            ..
        } => {
            assert_eq!(name, "ids");
            assert_eq!(expected, "int32");
            assert_eq!(supplied, "float32");
        }
        other => panic!("expected TypeMismatch, got {other}"),
    }
    model.set_input("ids", &Tensor::from_i32(Shape::from_slice(&[2]), &[1, 2]))?;
    Ok(())
}

#[test]
fn strict_mode_disables_the_legacy_rule() -> Result<()> {
    let dir = adder_dir();
    let options = RuntimeOptions {
        float32_accepts_any: false,
        ..RuntimeOptions::default()
    };
    let mut model = open(dir.path(), options)?;
    let err = model
        .set_input("data1", &Tensor::from_i64(Shape::from_slice(&[2]), &[1, 2]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    Ok(())
}

#[test]
fn teardown_is_idempotent() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    model.close();
    model.close();
    drop(model); // drop glue closes a third time
    Ok(())
}

#[test]
fn execute_requires_every_input_bound() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    model.set_input("data1", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]))?;
    let err = model.execute().unwrap_err();
    assert!(matches!(err, RuntimeError::Unsupported { .. }), "{err}");
    Ok(())
}

#[test]
fn engine_errors_carry_the_last_error_message() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "vm",
            "inputs": [
                {"name": "a", "dtype": "float32"},
                {"name": "b", "dtype": "float32"},
            ],
        }),
    );
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    model.set_input("a", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0]))?;
    model.set_input("b", &Tensor::from_f32(Shape::from_slice(&[3]), &[1.0, 2.0, 3.0]))?;
    let err = model.execute().unwrap_err();
    match err {
        RuntimeError::Backend { message, .. } => {
            assert_eq!(message, "inputs 'a' and 'b' disagree on element count");
        }
        other => panic!("expected Backend, got {other}"),
    }
    Ok(())
}

#[test]
fn get_input_reads_back_the_last_binding() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    assert!(model.get_input("data1", None)?.is_none());

    model.set_input("data1", &Tensor::from_f32(Shape::from_slice(&[2]), &[1.5, 2.5]))?;
    let read = model.get_input("data1", None)?.unwrap();
    assert_eq!(read.shape.dims(), &[2]);
    assert_eq!(read.to_f32_vec()?, vec![1.5, 2.5]);

    // Override with a compatible shape.
    let read = model
        .get_input("data1", Some(&Shape::from_slice(&[2, 1])))?
        .unwrap();
    assert_eq!(read.shape.dims(), &[2, 1]);

    // Incompatible override is a shape error.
    let err = model
        .get_input("data1", Some(&Shape::from_slice(&[3])))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Shape { .. }));
    Ok(())
}

#[test]
fn weights_are_implicitly_float32_and_unchecked() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "vm",
            "inputs": [
                {"name": "a", "dtype": "float32"},
                {"name": "b", "dtype": "float32"},
            ],
            "weights": ["w0"],
        }),
    );
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    assert_eq!(model.spec().weights.len(), 1);

    // Integer data into a weight converts rather than mismatching.
    model.set_input("w0", &Tensor::from_i32(Shape::from_slice(&[2]), &[3, 4]))?;
    let read = model.get_input("w0", None)?.unwrap();
    assert_eq!(read.dtype, DType::F32);
    assert_eq!(read.to_f32_vec()?, vec![3.0, 4.0]);
    Ok(())
}

#[test]
fn opaque_json_inputs_cross_as_serialized_documents() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(
        dir.path(),
        serde_json::json!({
            "backend": "vm",
            "inputs": [
                {"name": "payload", "dtype": "json"},
                {"name": "rest", "dtype": "float32"},
            ],
        }),
    );
    let mut model = open(dir.path(), RuntimeOptions::default())?;

    let doc = serde_json::json!({"features": [1.0, 2.0]});
    model.set_input("payload", &Tensor::from_json(&doc))?;
    let read = model.get_input("payload", None)?.unwrap();
    assert_eq!(read.dtype, DType::OpaqueJson);
    let parsed: serde_json::Value = serde_json::from_slice(&read.bytes)?;
    assert_eq!(parsed, doc);
    Ok(())
}

#[test]
fn output_index_out_of_range() -> Result<()> {
    let dir = adder_dir();
    let mut model = open(dir.path(), RuntimeOptions::default())?;
    for (name, len) in [("data1", 2), ("data2", 2), ("data3", 3), ("data4", 3)] {
        model.set_input(name, &Tensor::from_f32(Shape::from_slice(&[len]), &vec![0.0; len]))?;
    }
    model.execute()?;
    let err = model.get_output(2).unwrap_err();
    match err {
        RuntimeError::Index { index, count, .. } => {
            assert_eq!((index, count), (2, 2));
        }
        other => panic!("expected Index, got {other}"),
    }
    Ok(())
}
