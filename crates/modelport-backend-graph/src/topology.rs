//! I/O contract inference for frozen dataflow graphs. The serialized graph
//! carries no manifest; inputs and outputs are derived from the topology
//! alone.

use std::collections::BTreeSet;

use crate::{GraphDoc, CONTROL_EDGE_PREFIX};

/// Op kinds that never qualify as model outputs.
const EXCLUDED_OUTPUT_OPS: [&str; 4] = ["Const", "Assign", "NoOp", "Placeholder"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphTopology {
    /// Placeholder nodes in declaration order.
    pub inputs: Vec<String>,
    /// Zero-consumer nodes, lexicographically sorted so fetch order is
    /// stable across runs and fresh loads.
    pub outputs: Vec<String>,
}

/// Infer the I/O contract:
/// - a node is an input iff it is a placeholder with no producer edges and
///   exactly one output port;
/// - output candidates are single-output-port nodes outside the exclusion
///   set;
/// - any node consumed by a data edge *or* a control edge is pruned. Both
///   edge kinds are swept in the same pass — a control-dependency anchor
///   must not survive as an output.
pub fn analyze(doc: &GraphDoc) -> GraphTopology {
    let mut inputs = Vec::new();
    let mut candidates: BTreeSet<&str> = BTreeSet::new();

    for node in &doc.nodes {
        if node.output_arity != 1 {
            continue;
        }
        if node.op == "Placeholder" && node.inputs.is_empty() {
            inputs.push(node.name.clone());
        }
        if !EXCLUDED_OUTPUT_OPS.contains(&node.op.as_str()) {
            candidates.insert(node.name.as_str());
        }
    }

    for node in &doc.nodes {
        for edge in &node.inputs {
            let producer = edge.strip_prefix(CONTROL_EDGE_PREFIX).unwrap_or(edge);
            candidates.remove(producer);
        }
    }

    GraphTopology {
        inputs,
        // BTreeSet iteration is already lexicographic.
        outputs: candidates.into_iter().map(str::to_string).collect(),
    }
}
