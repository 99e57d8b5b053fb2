//! Per-token attribution totals and candidate tree edges.

use std::collections::{BTreeMap, HashMap};

use crate::{
    error::{AttributionError, Result},
    store::{AttributionRecord, AttributionStore},
    tree::{self, AttributionGraph, LayerEdges, Vertex, CLASS_LABEL},
};

/// Accumulates records one at a time and builds the [`AttributionGraph`].
///
/// Token identities are numbered by first appearance across the records. The
/// class-token row and column (index 0 of the score axes) are stripped before
/// anything is summed.
#[derive(Debug, Clone)]
pub struct TokenAttribution {
    tau: f32,
    token_ids: HashMap<String, usize>,
    token_names: Vec<String>,
    totals: Vec<f64>,
    root: Option<(usize, f64)>,
    layers: Vec<LayerEdges>,
    records: usize,
}

impl TokenAttribution {
    pub fn new(tau: f32) -> Self {
        Self {
            tau,
            token_ids: HashMap::new(),
            token_names: Vec::new(),
            totals: Vec::new(),
            root: None,
            layers: Vec::new(),
            records: 0,
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }

    fn token_id(&mut self, name: &str) -> usize {
        if let Some(&id) = self.token_ids.get(name) {
            return id;
        }
        let id = self.token_names.len();
        self.token_ids.insert(name.to_string(), id);
        self.token_names.push(name.to_string());
        self.totals.push(0.0);
        id
    }

    /// Folds one record into the running totals and edge sets.
    pub fn add_record(&mut self, record: &AttributionRecord) -> Result<()> {
        let [depth, heads, q, k] = match record.shape.as_slice() {
            &[depth, heads, q, k] => [depth, heads, q, k],
            other => {
                return Err(AttributionError::Shape(format!(
                    "attributions must be (layers, heads, q, k), got {other:?}"
                )))
            }
        };
        if q != k || q == 0 {
            return Err(AttributionError::Shape(format!(
                "attribution scores must be square and non-empty, got {q}x{k}"
            )));
        }
        let tokens = q - 1;
        if record.metadata.len() != tokens {
            return Err(AttributionError::Shape(format!(
                "{} token names for {tokens} attributed tokens",
                record.metadata.len()
            )));
        }
        if self.layers.is_empty() {
            self.layers = vec![LayerEdges::new(); depth];
        } else if self.layers.len() != depth {
            return Err(AttributionError::Shape(format!(
                "record has {depth} layers, earlier records had {}",
                self.layers.len()
            )));
        }

        let by_layer = sum_heads_without_class(&record.attrs, depth, heads, q);
        let ids = record
            .metadata
            .iter()
            .map(|name| self.token_id(name))
            .collect::<Vec<_>>();

        let mut token_attrs = vec![0f64; tokens];
        for layer in &by_layer {
            for (i, total) in token_attrs.iter_mut().enumerate() {
                *total += (0..tokens)
                    .filter(|&j| j != i)
                    .map(|j| f64::from(layer[i * tokens + j]))
                    .sum::<f64>();
            }
        }
        for (&id, &value) in ids.iter().zip(&token_attrs) {
            self.totals[id] += value;
        }

        let best = token_attrs
            .iter()
            .copied()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, value)| match best {
                Some((_, top)) if value <= top => best,
                _ if value.is_nan() => best,
                _ => Some((i, value)),
            });
        if let Some((index, value)) = best {
            if self.root.map_or(true, |(_, top)| value > top) {
                self.root = Some((ids[index], value));
            }
        }

        for (l, layer) in by_layer.iter().enumerate() {
            let tau = if l + 1 == depth { 0.0 } else { self.tau };
            let max = layer.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if !(max.is_finite() && max > 0.0) {
                log::debug!("record {}: layer {l} has no positive attribution", self.records);
                continue;
            }
            for i in 0..tokens {
                for j in 0..tokens {
                    if layer[i * tokens + j] / max > tau {
                        self.layers[l].insert((ids[i], ids[j]));
                    }
                }
            }
        }
        self.records += 1;
        Ok(())
    }

    /// Reconstructs the dependency tree from everything added so far.
    pub fn finish(self) -> Result<AttributionGraph> {
        let (root, _) = self.root.ok_or(AttributionError::EmptyStore)?;
        let walk_from = self.layers.len().checked_sub(2);
        let (vertices, edges) = tree::reconstruct(root, self.token_names.len(), &self.layers, walk_from)?;

        let mut token_names = self
            .token_names
            .into_iter()
            .enumerate()
            .map(|(id, name)| (Vertex::Token(id), name))
            .collect::<BTreeMap<_, _>>();
        token_names.insert(Vertex::Class, CLASS_LABEL.to_string());
        log::info!(
            "token attribution over {} records: {} tokens, {} tree vertices",
            self.records,
            self.totals.len(),
            vertices.len()
        );
        Ok(AttributionGraph {
            token_names,
            token_attrs: self.totals,
            root,
            vertices,
            edges,
        })
    }
}

/// `(layers, heads, q, q)` flat scores to per-layer `(q-1) x (q-1)` head sums.
fn sum_heads_without_class(attrs: &[f32], depth: usize, heads: usize, q: usize) -> Vec<Vec<f32>> {
    let tokens = q - 1;
    (0..depth)
        .map(|l| {
            let mut summed = vec![0f32; tokens * tokens];
            for h in 0..heads {
                let base = (l * heads + h) * q * q;
                for i in 0..tokens {
                    for j in 0..tokens {
                        summed[i * tokens + j] += attrs[base + (i + 1) * q + (j + 1)];
                    }
                }
            }
            summed
        })
        .collect()
}

/// Runs [`TokenAttribution`] over every record of a store.
pub fn token_attribution(store: &AttributionStore, tau: f32) -> Result<AttributionGraph> {
    let mut builder = TokenAttribution::new(tau);
    for index in 0..store.len()? {
        builder.add_record(&store.record(index)?)?;
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-layer, one-head record over `names` with the given token scores.
    fn record(names: &[&str], scores: &[&[f32]]) -> AttributionRecord {
        let q = names.len() + 1;
        let mut attrs = vec![0f32; q * q];
        for (i, row) in scores.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                attrs[(i + 1) * q + j + 1] = *value;
            }
        }
        // Class row and column must be ignored.
        attrs[0] = 100.0;
        attrs[1] = 100.0;
        attrs[q] = 100.0;
        AttributionRecord {
            metadata: names.iter().map(|n| n.to_string()).collect(),
            shape: vec![1, 1, q, q],
            attrs,
        }
    }

    #[test]
    fn totals_skip_the_diagonal_and_class_token() -> Result<()> {
        let mut builder = TokenAttribution::new(0.4);
        builder.add_record(&record(&["a", "b"], &[&[5.0, 1.0], &[2.0, 7.0]]))?;
        builder.add_record(&record(&["b", "c"], &[&[0.0, 3.0], &[0.5, 0.0]]))?;
        let graph = builder.finish()?;
        assert_eq!(graph.token_attrs, vec![1.0, 5.0, 0.5]);
        assert_eq!(graph.label(Vertex::Token(1)), "b");
        assert_eq!(graph.label(Vertex::Class), CLASS_LABEL);
        // b scored 3.0 in the second record, beating a's 1.0 and b's earlier 2.0.
        assert_eq!(graph.root, 1);
        Ok(())
    }

    #[test]
    fn first_maximum_wins_the_root() -> Result<()> {
        let mut builder = TokenAttribution::new(0.4);
        builder.add_record(&record(&["x", "y"], &[&[0.0, 2.0], &[2.0, 0.0]]))?;
        builder.add_record(&record(&["y", "z"], &[&[0.0, 2.0], &[2.0, 0.0]]))?;
        assert_eq!(builder.finish()?.root, 0);
        Ok(())
    }

    #[test]
    fn zero_layers_contribute_no_edges() -> Result<()> {
        let mut builder = TokenAttribution::new(0.0);
        let mut two_layer = record(&["a", "b"], &[&[0.0, 1.0], &[0.0, 0.0]]);
        let q = 3;
        // Second layer all zeros; first layer carries the scores.
        two_layer.attrs.extend(vec![0f32; q * q]);
        two_layer.shape = vec![2, 1, q, q];
        builder.add_record(&two_layer)?;
        let graph = builder.finish()?;
        graph.check_tree()?;
        assert_eq!(graph.parent(Vertex::Token(1)), Some(Vertex::Token(0)));
        Ok(())
    }

    #[test]
    fn malformed_records_are_rejected() {
        let mut builder = TokenAttribution::new(0.4);
        let mut bad = record(&["a", "b"], &[&[0.0, 1.0], &[1.0, 0.0]]);
        bad.metadata.pop();
        assert!(matches!(builder.add_record(&bad), Err(AttributionError::Shape(_))));
        assert!(matches!(builder.finish(), Err(AttributionError::EmptyStore)));
    }
}
