use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Result, RuntimeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu { device_id: u32 },
    OpenCl { device_id: u32 },
}

impl Device {
    /// Bitmask value the native engine expects for this device kind.
    pub fn kind_mask(&self) -> i32 {
        match self {
            Device::Cpu => 1,
            Device::Gpu { .. } => 2,
            Device::OpenCl { .. } => 4,
        }
    }

    pub fn device_id(&self) -> i32 {
        match self {
            Device::Cpu => 0,
            Device::Gpu { device_id } | Device::OpenCl { device_id } => *device_id as i32,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu { device_id } => write!(f, "gpu:{device_id}"),
            Device::OpenCl { device_id } => write!(f, "opencl:{device_id}"),
        }
    }
}

/// Closed element-type table. Every tensor crossing an adapter boundary
/// carries one of these tags; there is no open-ended dtype string anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "uint64")]
    U64,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    /// Serialized-JSON payload for data-transformed inputs; width is one
    /// byte and the shape is the byte length of the document.
    #[serde(rename = "json")]
    OpaqueJson,
}

impl DType {
    /// Native storage width in bytes.
    pub fn width(self) -> usize {
        match self {
            DType::U8 | DType::I8 | DType::OpaqueJson => 1,
            DType::F32 | DType::U32 | DType::I32 => 4,
            DType::F64 | DType::U64 | DType::I64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::U8 => "uint8",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::I8 => "int8",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::OpaqueJson => "json",
        }
    }

    pub fn parse(raw: &str) -> Option<DType> {
        Some(match raw {
            "float32" => DType::F32,
            "float64" => DType::F64,
            "uint8" => DType::U8,
            "uint32" => DType::U32,
            "uint64" => DType::U64,
            "int8" => DType::I8,
            "int32" => DType::I32,
            "int64" => DType::I64,
            "json" => DType::OpaqueJson,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DType::OpaqueJson)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Dims widened to the signed 64-bit form the C ABI expects.
    pub fn as_i64(&self) -> Vec<i64> {
        self.0.iter().map(|d| *d as i64).collect()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// A dense tensor: dtype + shape over a contiguous little-endian buffer.
/// Storage is always CPU-resident; adapters copy across device boundaries
/// themselves when their engine needs it.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Shape,
    pub bytes: Bytes,
}

macro_rules! typed_tensor {
    ($from:ident, $to:ident, $ty:ty, $dtype:expr, $width:expr) => {
        pub fn $from(shape: Shape, data: &[$ty]) -> Tensor {
            let mut buf = Vec::with_capacity(data.len() * $width);
            for v in data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Tensor {
                dtype: $dtype,
                shape,
                bytes: Bytes::from(buf),
            }
        }

        pub fn $to(&self) -> Result<Vec<$ty>> {
            if self.dtype != $dtype {
                return Err(RuntimeError::TypeMismatch {
                    backend: "tensor",
                    name: String::new(),
                    expected: $dtype.name(),
                    supplied: self.dtype.name(),
                });
            }
            Ok(self
                .bytes
                .chunks_exact($width)
                .map(|b| <$ty>::from_le_bytes(b.try_into().expect("chunk width")))
                .collect())
        }
    };
}

impl Tensor {
    pub fn new(dtype: DType, shape: Shape, bytes: Bytes) -> Result<Tensor> {
        let expected = shape.numel() * dtype.width();
        if dtype.is_numeric() && bytes.len() != expected {
            return Err(RuntimeError::Backend {
                backend: "tensor",
                message: format!(
                    "buffer of {} bytes does not match shape {} of dtype {}",
                    bytes.len(),
                    shape,
                    dtype
                ),
            });
        }
        Ok(Tensor {
            dtype,
            shape,
            bytes,
        })
    }

    typed_tensor!(from_f32, to_f32_vec, f32, DType::F32, 4);
    typed_tensor!(from_f64, to_f64_vec, f64, DType::F64, 8);
    typed_tensor!(from_u32, to_u32_vec, u32, DType::U32, 4);
    typed_tensor!(from_u64, to_u64_vec, u64, DType::U64, 8);
    typed_tensor!(from_i32, to_i32_vec, i32, DType::I32, 4);
    typed_tensor!(from_i64, to_i64_vec, i64, DType::I64, 8);

    pub fn from_u8(shape: Shape, data: &[u8]) -> Tensor {
        Tensor {
            dtype: DType::U8,
            shape,
            bytes: Bytes::copy_from_slice(data),
        }
    }

    pub fn from_i8(shape: Shape, data: &[i8]) -> Tensor {
        let buf: Vec<u8> = data.iter().map(|v| *v as u8).collect();
        Tensor {
            dtype: DType::I8,
            shape,
            bytes: Bytes::from(buf),
        }
    }

    /// Serialize an arbitrary JSON document as an opaque-json tensor; the
    /// shape is the single dimension holding the document's byte length.
    pub fn from_json(value: &serde_json::Value) -> Tensor {
        let doc = value.to_string().into_bytes();
        Tensor {
            dtype: DType::OpaqueJson,
            shape: Shape::from_slice(&[doc.len()]),
            bytes: Bytes::from(doc),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Same buffer under a different shape; the element count must agree.
    pub fn reshaped(&self, shape: Shape) -> Result<Tensor> {
        if shape.numel() != self.shape.numel() {
            return Err(RuntimeError::Shape {
                backend: "tensor",
                name: String::new(),
                requested: shape.dims().to_vec(),
                expected: self.shape.numel(),
            });
        }
        Ok(Tensor {
            dtype: self.dtype,
            shape,
            bytes: self.bytes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_widths_match_table() {
        assert_eq!(DType::F32.width(), 4);
        assert_eq!(DType::F64.width(), 8);
        assert_eq!(DType::U8.width(), 1);
        assert_eq!(DType::I64.width(), 8);
        assert_eq!(DType::OpaqueJson.width(), 1);
    }

    #[test]
    fn dtype_names_round_trip() {
        for dtype in [
            DType::F32,
            DType::F64,
            DType::U8,
            DType::U32,
            DType::U64,
            DType::I8,
            DType::I32,
            DType::I64,
            DType::OpaqueJson,
        ] {
            assert_eq!(DType::parse(dtype.name()), Some(dtype));
        }
        assert_eq!(DType::parse("float16"), None);
    }

    #[test]
    fn f32_tensor_round_trip() {
        let t = Tensor::from_f32(Shape::from_slice(&[2, 2]), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.byte_len(), 16);
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reshape_rejects_numel_mismatch() {
        let t = Tensor::from_i64(Shape::from_slice(&[4]), &[1, 2, 3, 4]);
        assert!(t.reshaped(Shape::from_slice(&[2, 2])).is_ok());
        assert!(matches!(
            t.reshaped(Shape::from_slice(&[3])),
            Err(RuntimeError::Shape { .. })
        ));
    }

    #[test]
    fn json_tensor_shape_is_byte_length() {
        let t = Tensor::from_json(&serde_json::json!([1, 2, 3]));
        assert_eq!(t.dtype, DType::OpaqueJson);
        assert_eq!(t.shape.dims(), &[t.byte_len()]);
    }
}
