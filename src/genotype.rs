//! Discretizing the continuous architecture into a genotype

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DartsError, Result};
use crate::search::{ArchitectureWeights, OperationKind};

/// One kept edge of the final cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenotypeEdge {
    /// State index: 0 and 1 are the cell inputs, `i + 2` is node `i`
    pub input: usize,
    pub op: OperationKind,
    /// Selection score: edge weight times operation weight
    pub weight: f64,
}

/// Discrete cell derived from the search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    /// Kept edges per intermediate node, sorted by input
    pub nodes: Vec<Vec<GenotypeEdge>>,
    /// States concatenated into the cell output
    pub concat: Vec<usize>,
}

impl Genotype {
    pub fn num_edges(&self) -> usize {
        self.nodes.iter().map(Vec::len).sum()
    }

    /// Count how often each operation was picked
    pub fn op_counts(&self) -> Vec<(OperationKind, usize)> {
        let mut counts: Vec<(OperationKind, usize)> = Vec::new();
        for edge in self.nodes.iter().flatten() {
            match counts.iter_mut().find(|(op, _)| *op == edge.op) {
                Some((_, n)) => *n += 1,
                None => counts.push((edge.op, 1)),
            }
        }
        counts
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn state_name(index: usize) -> String {
    match index {
        0 => "c_{k-2}".to_string(),
        1 => "c_{k-1}".to_string(),
        i => format!("node{}", i - 2),
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (node, edges) in self.nodes.iter().enumerate() {
            write!(f, "node{}:", node)?;
            if edges.is_empty() {
                write!(f, " (none)")?;
            }
            for (i, edge) in edges.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(
                    f,
                    "{}{} <- {} ({:.3})",
                    sep,
                    edge.op,
                    state_name(edge.input),
                    edge.weight
                )?;
            }
            writeln!(f)?;
        }
        let concat: Vec<String> = self.concat.iter().map(|&i| state_name(i)).collect();
        write!(f, "output: {}", concat.join(" + "))
    }
}

/// Keep the `edges_per_node` strongest incoming edges of every node.
///
/// An edge's strength is its normalized edge weight times the probability of
/// its best non-zero operation. Ties go to the lower input index.
pub fn derive_genotype(
    weights: &ArchitectureWeights,
    operations: &[OperationKind],
    edges_per_node: usize,
) -> Result<Genotype> {
    if operations.len() != weights.num_ops() {
        return Err(DartsError::shape(
            format!("{} operations", weights.num_ops()),
            format!("{} operations", operations.len()),
        ));
    }
    if edges_per_node == 0 {
        return Err(DartsError::invalid_parameter(
            "edges_per_node",
            0,
            "must be at least 1",
        ));
    }

    let mut nodes = Vec::with_capacity(weights.num_nodes());
    for node in 0..weights.num_nodes() {
        let edge_weights = weights.edge_weights(node);
        let mut candidates: Vec<GenotypeEdge> = Vec::new();

        for input in 0..ArchitectureWeights::inputs_of(node) {
            let probs = weights.op_weights(node, input);
            let best = probs
                .iter()
                .enumerate()
                .filter(|(i, _)| operations[*i] != OperationKind::Zero)
                .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)));

            if let Some((op_idx, &p)) = best {
                candidates.push(GenotypeEdge {
                    input,
                    op: operations[op_idx],
                    weight: edge_weights[input] * p,
                });
            }
        }

        // Stable sort keeps lower inputs first on equal scores
        candidates.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        candidates.truncate(edges_per_node);
        candidates.sort_by_key(|e| e.input);
        nodes.push(candidates);
    }

    Ok(Genotype {
        nodes,
        concat: vec![weights.num_nodes() + 1],
    })
}
