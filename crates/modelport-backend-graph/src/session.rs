//! Execution session over a loaded graph: feed placeholders by name,
//! evaluate fetched nodes with memoized recursion over the data edges.

use std::collections::HashMap;

use modelport_core::{DType, Result, RuntimeError, Shape, Tensor};

use crate::{GraphDoc, GraphNode, CONTROL_EDGE_PREFIX};

const BACKEND: &str = "frozen_graph";

fn err(message: impl Into<String>) -> RuntimeError {
    RuntimeError::backend(BACKEND, message)
}

pub struct GraphSession {
    nodes: Vec<GraphNode>,
    by_name: HashMap<String, usize>,
}

impl GraphSession {
    pub fn new(doc: GraphDoc) -> Result<GraphSession> {
        let mut by_name = HashMap::with_capacity(doc.nodes.len());
        for (index, node) in doc.nodes.iter().enumerate() {
            if by_name.insert(node.name.clone(), index).is_some() {
                return Err(err(format!("duplicate node name '{}'", node.name)));
            }
        }
        for node in &doc.nodes {
            for edge in &node.inputs {
                let producer = edge.strip_prefix(CONTROL_EDGE_PREFIX).unwrap_or(edge);
                if !by_name.contains_key(producer) {
                    return Err(err(format!(
                        "node '{}' references unknown node '{producer}'",
                        node.name
                    )));
                }
            }
        }
        Ok(GraphSession {
            nodes: doc.nodes,
            by_name,
        })
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.by_name.get(name).map(|i| &self.nodes[*i])
    }

    /// Evaluate `fetches` against the given feeds, in the given order.
    pub fn run(
        &self,
        feeds: &HashMap<String, Tensor>,
        fetches: &[String],
    ) -> Result<Vec<Tensor>> {
        let mut memo: HashMap<&str, Tensor> = HashMap::new();
        fetches
            .iter()
            .map(|name| self.eval(name, feeds, &mut memo, &mut Vec::new()))
            .collect()
    }

    fn eval<'a>(
        &'a self,
        name: &str,
        feeds: &HashMap<String, Tensor>,
        memo: &mut HashMap<&'a str, Tensor>,
        stack: &mut Vec<&'a str>,
    ) -> Result<Tensor> {
        if let Some(value) = memo.get(name) {
            return Ok(value.clone());
        }
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| err(format!("unknown node '{name}'")))?;
        let node = &self.nodes[index];
        if stack.contains(&node.name.as_str()) {
            return Err(err(format!("cycle through node '{name}'")));
        }
        stack.push(&node.name);

        let mut operands = Vec::new();
        for edge in &node.inputs {
            if edge.starts_with(CONTROL_EDGE_PREFIX) {
                continue; // ordering only, no value
            }
            operands.push(self.eval(edge, feeds, memo, stack)?);
        }
        let value = apply(node, &operands, feeds)?;
        stack.pop();
        memo.insert(&node.name, value.clone());
        Ok(value)
    }
}

fn apply(node: &GraphNode, operands: &[Tensor], feeds: &HashMap<String, Tensor>) -> Result<Tensor> {
    match node.op.as_str() {
        "Placeholder" => feeds.get(&node.name).cloned().ok_or_else(|| {
            RuntimeError::Unsupported {
                backend: BACKEND,
                operation: format!("execute() before input '{}' is bound", node.name),
            }
        }),
        "Const" => const_tensor(node),
        "Identity" | "Assign" => operands
            .first()
            .cloned()
            .ok_or_else(|| err(format!("'{}' has no operand", node.name))),
        "Add" => elementwise(node, operands, |x, y| x + y),
        "Sub" => elementwise(node, operands, |x, y| x - y),
        "Mul" => elementwise(node, operands, |x, y| x * y),
        "MatMul" => matmul(node, operands),
        "Square" => unary(node, operands, |x| x * x),
        "Relu" => unary(node, operands, |x| x.max(0.0)),
        "Flatten" => {
            let input = single(node, operands)?;
            input.reshaped(Shape::from_slice(&[input.numel()]))
        }
        "ArgMax" => argmax(node, operands),
        "NoOp" => Err(err(format!(
            "'{}' (NoOp) produces no tensor and cannot be a data operand",
            node.name
        ))),
        other => Err(err(format!(
            "unsupported op kind '{other}' at node '{}'",
            node.name
        ))),
    }
}

fn const_tensor(node: &GraphNode) -> Result<Tensor> {
    let dtype = node.attrs.dtype.unwrap_or(DType::F32);
    let dims = node
        .attrs
        .shape
        .as_ref()
        .ok_or_else(|| err(format!("Const '{}' is missing a shape", node.name)))?;
    let values = node
        .attrs
        .values
        .as_ref()
        .ok_or_else(|| err(format!("Const '{}' is missing values", node.name)))?;
    let shape = Shape::from_slice(dims);
    if values.len() != shape.numel() {
        return Err(err(format!(
            "Const '{}' has {} values for shape {shape}",
            node.name,
            values.len()
        )));
    }
    Ok(match dtype {
        DType::I64 => {
            let cast: Vec<i64> = values.iter().map(|v| *v as i64).collect();
            Tensor::from_i64(shape, &cast)
        }
        _ => {
            let cast: Vec<f32> = values.iter().map(|v| *v as f32).collect();
            Tensor::from_f32(shape, &cast)
        }
    })
}

fn single<'t>(node: &GraphNode, operands: &'t [Tensor]) -> Result<&'t Tensor> {
    match operands {
        [input] => Ok(input),
        _ => Err(err(format!(
            "'{}' ({}) expects one operand, got {}",
            node.name,
            node.op,
            operands.len()
        ))),
    }
}

fn unary(node: &GraphNode, operands: &[Tensor], f: impl Fn(f32) -> f32) -> Result<Tensor> {
    let input = single(node, operands)?;
    let values: Vec<f32> = input.to_f32_vec()?.into_iter().map(f).collect();
    Ok(Tensor::from_f32(input.shape.clone(), &values))
}

fn elementwise(
    node: &GraphNode,
    operands: &[Tensor],
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor> {
    let [lhs, rhs] = operands else {
        return Err(err(format!(
            "'{}' ({}) expects two operands, got {}",
            node.name,
            node.op,
            operands.len()
        )));
    };
    if lhs.shape != rhs.shape {
        return Err(err(format!(
            "'{}' ({}) operand shapes {} and {} differ",
            node.name, node.op, lhs.shape, rhs.shape
        )));
    }
    let values: Vec<f32> = lhs
        .to_f32_vec()?
        .into_iter()
        .zip(rhs.to_f32_vec()?)
        .map(|(x, y)| f(x, y))
        .collect();
    Ok(Tensor::from_f32(lhs.shape.clone(), &values))
}

fn matmul(node: &GraphNode, operands: &[Tensor]) -> Result<Tensor> {
    let [lhs, rhs] = operands else {
        return Err(err(format!("'{}' (MatMul) expects two operands", node.name)));
    };
    let (&[m, k], &[k2, n]) = (lhs.shape.dims(), rhs.shape.dims()) else {
        return Err(err(format!(
            "'{}' (MatMul) needs two 2-d operands, got {} and {}",
            node.name, lhs.shape, rhs.shape
        )));
    };
    if k != k2 {
        return Err(err(format!(
            "'{}' (MatMul) inner dimensions {k} and {k2} differ",
            node.name
        )));
    }
    let a = lhs.to_f32_vec()?;
    let b = rhs.to_f32_vec()?;
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for p in 0..k {
                acc += a[i * k + p] * b[p * n + j];
            }
            out[i * n + j] = acc;
        }
    }
    Ok(Tensor::from_f32(Shape::from_slice(&[m, n]), &out))
}

/// Index of the maximum element over the flattened input; scalar i64.
fn argmax(node: &GraphNode, operands: &[Tensor]) -> Result<Tensor> {
    let input = single(node, operands)?;
    let values = input.to_f32_vec()?;
    if values.is_empty() {
        return Err(err(format!("'{}' (ArgMax) over an empty tensor", node.name)));
    }
    let mut best = 0usize;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    Ok(Tensor::from_i64(Shape::scalar(), &[best as i64]))
}
