//! Densification of the two legacy textual wire formats into the dense
//! matrix a tree ensemble consumes. Absent features become `NaN`, which
//! the tree traversal treats as "missing" — deliberately distinct from an
//! explicit 0.0.

use modelport_core::{Result, RuntimeError, Shape, Tensor};

const BACKEND: &str = "decision_tree";

fn err(message: impl Into<String>) -> RuntimeError {
    RuntimeError::backend(BACKEND, message)
}

/// Legacy wire formats accepted at the preprocessing boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Sparse `col:value` tokens per line; tokens without a colon (labels)
    /// are skipped.
    LibSvm,
    /// Delimited rows; the delimiter is sniffed from the first line.
    Csv,
}

impl WireFormat {
    pub fn from_content_type(content_type: &str) -> Option<WireFormat> {
        match content_type {
            "text/libsvm" | "text/x-libsvm" => Some(WireFormat::LibSvm),
            "text/csv" => Some(WireFormat::Csv),
            _ => None,
        }
    }
}

/// Row-major dense matrix; absent cells hold `NaN`.
#[derive(Clone, Debug)]
pub struct DenseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f32>,
}

impl DenseMatrix {
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    pub fn to_tensor(&self) -> Tensor {
        Tensor::from_f32(Shape::from_slice(&[self.rows, self.cols]), &self.values)
    }
}

pub fn densify(payload: &str, format: WireFormat) -> Result<DenseMatrix> {
    match format {
        WireFormat::LibSvm => densify_libsvm(payload),
        WireFormat::Csv => densify_csv(payload),
    }
}

/// Parse sparse triplets, then scatter them into a `NaN`-prefilled matrix
/// sized `rows x (max column + 1)`.
pub fn densify_libsvm(payload: &str) -> Result<DenseMatrix> {
    let lines: Vec<&str> = payload.trim_end().split('\n').collect();
    let mut triplets: Vec<(usize, usize, f32)> = Vec::new();
    let mut cols = 0usize;

    for (row, line) in lines.iter().enumerate() {
        for token in line.split(' ') {
            let Some((col, value)) = token.split_once(':') else {
                continue; // label or empty token
            };
            let col: usize = col
                .parse()
                .map_err(|_| err(format!("invalid column index '{col}' on line {row}")))?;
            let value: f32 = value
                .parse()
                .map_err(|_| err(format!("invalid value '{value}' on line {row}")))?;
            cols = cols.max(col + 1);
            triplets.push((row, col, value));
        }
    }

    let rows = lines.len();
    let mut matrix = DenseMatrix {
        rows,
        cols,
        values: vec![f32::NAN; rows * cols],
    };
    for (row, col, value) in triplets {
        matrix.values[row * cols + col] = value;
    }
    Ok(matrix)
}

/// Pick the candidate delimiter that splits the first line most often.
fn sniff_delimiter(first_line: &str) -> u8 {
    const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b' '];
    let mut best = b',';
    let mut best_count = 0usize;
    for candidate in CANDIDATES {
        let count = first_line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

pub fn densify_csv(payload: &str) -> Result<DenseMatrix> {
    let trimmed = payload.trim_end();
    let first_line = trimmed.split('\n').next().unwrap_or_default();
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_reader(trimmed.as_bytes());

    let mut values: Vec<f32> = Vec::new();
    let mut rows = 0usize;
    let mut cols = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| err(format!("invalid csv payload: {e}")))?;
        if rows == 0 {
            cols = record.len();
        } else if record.len() != cols {
            return Err(err(format!(
                "row {rows} has {} fields, expected {cols}",
                record.len()
            )));
        }
        for field in record.iter() {
            let value: f32 = field
                .trim()
                .parse()
                .map_err(|_| err(format!("invalid numeric field '{field}' on row {rows}")))?;
            values.push(value);
        }
        rows += 1;
    }
    Ok(DenseMatrix { rows, cols, values })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libsvm_scatters_into_nan_prefilled_matrix() {
        let matrix = densify_libsvm("1 0:2.5 2:1.0\n0 1:0.5\n").unwrap();
        assert_eq!((matrix.rows, matrix.cols), (2, 3));
        assert_eq!(matrix.get(0, 0), 2.5);
        assert!(matrix.get(0, 1).is_nan());
        assert_eq!(matrix.get(0, 2), 1.0);
        assert!(matrix.get(1, 0).is_nan());
        assert_eq!(matrix.get(1, 1), 0.5);
        assert!(matrix.get(1, 2).is_nan());
    }

    #[test]
    fn explicit_zero_is_not_missing() {
        let matrix = densify_libsvm("0:0.0\n").unwrap();
        assert_eq!(matrix.get(0, 0), 0.0);
        assert!(!matrix.get(0, 0).is_nan());
    }

    #[test]
    fn empty_libsvm_row_stays_all_nan() {
        let matrix = densify_libsvm("0:1.0\n0\n").unwrap();
        assert_eq!(matrix.rows, 2);
        assert!(matrix.get(1, 0).is_nan());
    }

    #[test]
    fn csv_sniffs_commas_and_semicolons() {
        let comma = densify_csv("1.0,2.0\n3.0,4.0\n").unwrap();
        assert_eq!((comma.rows, comma.cols), (2, 2));
        assert_eq!(comma.values, vec![1.0, 2.0, 3.0, 4.0]);

        let semi = densify_csv("1.0;2.0\n3.0;4.0\n").unwrap();
        assert_eq!(semi.values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn csv_rejects_ragged_rows() {
        assert!(densify_csv("1.0,2.0\n3.0\n").is_err());
    }

    #[test]
    fn content_types_map_to_formats() {
        assert_eq!(
            WireFormat::from_content_type("text/libsvm"),
            Some(WireFormat::LibSvm)
        );
        assert_eq!(
            WireFormat::from_content_type("text/x-libsvm"),
            Some(WireFormat::LibSvm)
        );
        assert_eq!(
            WireFormat::from_content_type("text/csv"),
            Some(WireFormat::Csv)
        );
        assert_eq!(WireFormat::from_content_type("application/json"), None);
    }
}
