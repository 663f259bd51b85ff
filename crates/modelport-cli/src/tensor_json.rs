//! JSON <-> tensor conversion for the CLI surface:
//! `{"dtype": "float32", "shape": [2, 2], "values": [1, 2, 3, 4]}`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use modelport_core::{DType, Shape, Tensor};

#[derive(Deserialize)]
struct TensorDoc {
    #[serde(default = "default_dtype")]
    dtype: String,
    shape: Vec<usize>,
    #[serde(default)]
    values: Vec<serde_json::Value>,
    /// Opaque-json payload; used instead of `values` when dtype is "json".
    #[serde(default)]
    json: Option<serde_json::Value>,
}

fn default_dtype() -> String {
    "float32".to_string()
}

pub fn tensor_from_json(value: &serde_json::Value) -> Result<Tensor> {
    let doc: TensorDoc = serde_json::from_value(value.clone()).context("malformed tensor")?;
    let dtype = DType::parse(&doc.dtype)
        .with_context(|| format!("unknown dtype '{}'", doc.dtype))?;
    let shape = Shape::from_slice(&doc.shape);

    if dtype == DType::OpaqueJson {
        let payload = doc.json.context("json-dtype tensors need a 'json' field")?;
        return Ok(Tensor::from_json(&payload));
    }
    if doc.values.len() != shape.numel() {
        bail!(
            "{} values for shape {} ({} elements)",
            doc.values.len(),
            shape,
            shape.numel()
        );
    }

    let floats = || -> Result<Vec<f64>> {
        doc.values
            .iter()
            .map(|v| v.as_f64().context("non-numeric value"))
            .collect()
    };
    Ok(match dtype {
        DType::F32 => {
            let cast: Vec<f32> = floats()?.into_iter().map(|v| v as f32).collect();
            Tensor::from_f32(shape, &cast)
        }
        DType::F64 => Tensor::from_f64(shape, &floats()?),
        DType::U8 => {
            let cast: Vec<u8> = floats()?.into_iter().map(|v| v as u8).collect();
            Tensor::from_u8(shape, &cast)
        }
        DType::I8 => {
            let cast: Vec<i8> = floats()?.into_iter().map(|v| v as i8).collect();
            Tensor::from_i8(shape, &cast)
        }
        DType::U32 => {
            let cast: Vec<u32> = floats()?.into_iter().map(|v| v as u32).collect();
            Tensor::from_u32(shape, &cast)
        }
        DType::U64 => {
            let cast: Vec<u64> = floats()?.into_iter().map(|v| v as u64).collect();
            Tensor::from_u64(shape, &cast)
        }
        DType::I32 => {
            let cast: Vec<i32> = floats()?.into_iter().map(|v| v as i32).collect();
            Tensor::from_i32(shape, &cast)
        }
        DType::I64 => {
            let cast: Vec<i64> = floats()?.into_iter().map(|v| v as i64).collect();
            Tensor::from_i64(shape, &cast)
        }
        DType::OpaqueJson => unreachable!("handled above"),
    })
}

pub fn tensor_to_json(tensor: &Tensor) -> Result<serde_json::Value> {
    let values: Vec<serde_json::Value> = match tensor.dtype {
        DType::F32 => tensor.to_f32_vec()?.into_iter().map(Into::into).collect(),
        DType::F64 => tensor.to_f64_vec()?.into_iter().map(Into::into).collect(),
        DType::U8 => tensor.bytes.iter().map(|v| (*v).into()).collect(),
        DType::I8 => tensor.bytes.iter().map(|v| (*v as i8).into()).collect(),
        DType::U32 => tensor.to_u32_vec()?.into_iter().map(Into::into).collect(),
        DType::U64 => tensor.to_u64_vec()?.into_iter().map(Into::into).collect(),
        DType::I32 => tensor.to_i32_vec()?.into_iter().map(Into::into).collect(),
        DType::I64 => tensor.to_i64_vec()?.into_iter().map(Into::into).collect(),
        DType::OpaqueJson => {
            let payload: serde_json::Value = serde_json::from_slice(&tensor.bytes)?;
            return Ok(serde_json::json!({
                "dtype": "json",
                "json": payload,
            }));
        }
    };
    Ok(serde_json::json!({
        "dtype": tensor.dtype.name(),
        "shape": tensor.shape.dims().to_vec(),
        "values": values,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_float_tensor() {
        let doc = serde_json::json!({
            "dtype": "float32",
            "shape": [2, 2],
            "values": [4.0, 1.0, 3.0, 2.0],
        });
        let tensor = tensor_from_json(&doc).unwrap();
        assert_eq!(tensor.shape.dims(), &[2, 2]);
        let back = tensor_to_json(&tensor).unwrap();
        assert_eq!(back["values"], doc["values"]);
    }

    #[test]
    fn value_count_must_match_shape() {
        let doc = serde_json::json!({
            "dtype": "float32",
            "shape": [3],
            "values": [1.0],
        });
        assert!(tensor_from_json(&doc).is_err());
    }
}
