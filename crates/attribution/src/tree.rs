//! Token dependency tree reconstruction.
//!
//! Candidate edges are gathered per layer. Walking from the deepest walked
//! layer towards the input, a vertex that has appeared in the tree may adopt
//! every candidate child that has not. Each token therefore gets at most one
//! parent, and a class-token sentinel parents the root.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::error::{AttributionError, Result};

/// Label used for the class-token sentinel.
pub const CLASS_LABEL: &str = "[CLS]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Vertex {
    /// The class-token sentinel, parent of the tree root.
    Class,
    /// A token identity, indexed by first appearance in the dataset.
    Token(usize),
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::Class => f.write_str(CLASS_LABEL),
            Vertex::Token(id) => write!(f, "#{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexState {
    NotAppear,
    Appear,
    /// Appeared and already adopted at least one child.
    Fixed,
}

/// Directed `(parent, child)` token edges of one layer.
pub type LayerEdges = BTreeSet<(usize, usize)>;

/// Walks `layers` from `walk_from` down to layer 0, starting from `root`.
///
/// Returns the reached vertices (including [`Vertex::Class`]) and the tree
/// edges as `(parent, child)` pairs.
pub fn reconstruct(
    root: usize,
    num_tokens: usize,
    layers: &[LayerEdges],
    walk_from: Option<usize>,
) -> Result<(BTreeSet<Vertex>, BTreeSet<(Vertex, Vertex)>)> {
    if root >= num_tokens {
        return Err(AttributionError::Shape(format!(
            "root token {root} out of range for {num_tokens} tokens"
        )));
    }
    let mut state = vec![VertexState::NotAppear; num_tokens];
    state[root] = VertexState::Appear;
    let mut edges = BTreeSet::new();

    let walk = walk_from.map_or(0, |top| top.min(layers.len().saturating_sub(1)) + 1);
    for (layer, candidates) in layers.iter().enumerate().take(walk).rev() {
        let mut queue = state
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != VertexState::NotAppear)
            .map(|(id, _)| id)
            .collect::<VecDeque<_>>();
        let before = edges.len();
        while let Some(parent) = queue.pop_front() {
            for &(_, child) in candidates.range((parent, 0)..=(parent, usize::MAX)) {
                if child == parent || child >= num_tokens {
                    continue;
                }
                if state[child] != VertexState::NotAppear {
                    continue;
                }
                match state[parent] {
                    VertexState::Appear => state[parent] = VertexState::Fixed,
                    VertexState::Fixed => {}
                    VertexState::NotAppear => continue,
                }
                state[child] = VertexState::Appear;
                edges.insert((Vertex::Token(parent), Vertex::Token(child)));
                queue.push_back(child);
            }
        }
        log::debug!("layer {layer}: {} tree edges added", edges.len() - before);
    }

    let has_parent = edges.iter().map(|(_, child)| *child).collect::<BTreeSet<_>>();
    let mut vertices = BTreeSet::from([Vertex::Class]);
    for (id, s) in state.iter().enumerate() {
        if *s == VertexState::NotAppear {
            continue;
        }
        let vertex = Vertex::Token(id);
        vertices.insert(vertex);
        if !has_parent.contains(&vertex) {
            edges.insert((Vertex::Class, vertex));
        }
    }
    Ok((vertices, edges))
}

/// Result of the token-attribution analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionGraph {
    /// Vertex labels; [`Vertex::Class`] maps to [`CLASS_LABEL`].
    pub token_names: BTreeMap<Vertex, String>,
    /// Total attribution per token id over the whole dataset.
    pub token_attrs: Vec<f64>,
    pub root: usize,
    pub vertices: BTreeSet<Vertex>,
    /// `(parent, child)` pairs.
    pub edges: BTreeSet<(Vertex, Vertex)>,
}

impl AttributionGraph {
    pub fn label(&self, vertex: Vertex) -> &str {
        self.token_names
            .get(&vertex)
            .map(String::as_str)
            .unwrap_or("?")
    }

    pub fn parent(&self, vertex: Vertex) -> Option<Vertex> {
        self.edges
            .iter()
            .find(|(_, child)| *child == vertex)
            .map(|(parent, _)| *parent)
    }

    /// Token ids sorted by descending total attribution.
    pub fn ranked_tokens(&self) -> Vec<(usize, f64)> {
        let mut ranked = self.token_attrs.iter().copied().enumerate().collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    /// Verifies the graph is a single tree hanging from [`Vertex::Class`].
    pub fn check_tree(&self) -> Result<()> {
        let fail = |message: String| Err(AttributionError::Shape(message));
        if !self.vertices.contains(&Vertex::Class) {
            return fail("class vertex missing".into());
        }
        let mut parents: BTreeMap<Vertex, Vertex> = BTreeMap::new();
        for &(parent, child) in &self.edges {
            if !self.vertices.contains(&parent) || !self.vertices.contains(&child) {
                return fail(format!("edge {parent} -> {child} leaves the vertex set"));
            }
            if child == Vertex::Class {
                return fail("class vertex has a parent".into());
            }
            if parent == child {
                return fail(format!("self edge on {child}"));
            }
            if parents.insert(child, parent).is_some() {
                return fail(format!("{child} has more than one parent"));
            }
        }
        if parents.len() + 1 != self.vertices.len() {
            return fail(format!(
                "{} of {} token vertices have a parent",
                parents.len(),
                self.vertices.len() - 1
            ));
        }
        if self.parent(Vertex::Token(self.root)) != Some(Vertex::Class) {
            return fail(format!("root {} does not hang from the class vertex", self.root));
        }
        // With one parent per vertex, reaching the class vertex from everywhere
        // rules out cycles.
        for &vertex in &self.vertices {
            let mut current = vertex;
            let mut steps = 0;
            while let Some(&parent) = parents.get(&current) {
                current = parent;
                steps += 1;
                if steps > self.vertices.len() {
                    return fail(format!("cycle through {vertex}"));
                }
            }
            if current != Vertex::Class {
                return fail(format!("{vertex} is not connected to the class vertex"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(edges: &[(usize, usize)]) -> LayerEdges {
        edges.iter().copied().collect()
    }

    fn graph(root: usize, num_tokens: usize, layers: &[LayerEdges]) -> Result<AttributionGraph> {
        let (vertices, edges) = reconstruct(root, num_tokens, layers, layers.len().checked_sub(2))?;
        let mut token_names = (0..num_tokens)
            .map(|id| (Vertex::Token(id), format!("t{id}")))
            .collect::<BTreeMap<_, _>>();
        token_names.insert(Vertex::Class, CLASS_LABEL.to_string());
        Ok(AttributionGraph {
            token_names,
            token_attrs: vec![0.0; num_tokens],
            root,
            vertices,
            edges,
        })
    }

    #[test]
    fn grows_from_the_root_through_lower_layers() -> Result<()> {
        // Layer 2 is the final layer and is never walked.
        let layers = [
            layer(&[(1, 3), (2, 3)]),
            layer(&[(0, 1), (0, 2), (1, 0)]),
            layer(&[(0, 3)]),
        ];
        let graph = graph(0, 4, &layers)?;
        graph.check_tree()?;
        assert_eq!(graph.parent(Vertex::Token(0)), Some(Vertex::Class));
        assert_eq!(graph.parent(Vertex::Token(1)), Some(Vertex::Token(0)));
        assert_eq!(graph.parent(Vertex::Token(2)), Some(Vertex::Token(0)));
        // Both 1 and 2 could adopt 3; the lower id is expanded first.
        assert_eq!(graph.parent(Vertex::Token(3)), Some(Vertex::Token(1)));
        Ok(())
    }

    #[test]
    fn children_found_in_a_layer_expand_within_it() -> Result<()> {
        let layers = [layer(&[(0, 1), (1, 2), (2, 3)]), layer(&[])];
        let graph = graph(0, 4, &layers)?;
        graph.check_tree()?;
        assert_eq!(graph.vertices.len(), 5);
        assert_eq!(graph.parent(Vertex::Token(3)), Some(Vertex::Token(2)));
        Ok(())
    }

    #[test]
    fn unreached_tokens_stay_out_of_the_tree() -> Result<()> {
        let layers = [layer(&[(1, 2), (0, 0)]), layer(&[(0, 1)])];
        let graph = graph(0, 3, &layers)?;
        graph.check_tree()?;
        assert_eq!(
            graph.vertices,
            BTreeSet::from([Vertex::Class, Vertex::Token(0)])
        );
        assert_eq!(graph.edges, BTreeSet::from([(Vertex::Class, Vertex::Token(0))]));
        Ok(())
    }

    #[test]
    fn single_layer_stacks_yield_only_the_root() -> Result<()> {
        let graph = graph(1, 2, &[layer(&[(1, 0)])])?;
        graph.check_tree()?;
        assert_eq!(graph.edges.len(), 1);
        Ok(())
    }

    #[test]
    fn check_tree_rejects_double_parents() -> Result<()> {
        let mut graph = graph(0, 3, &[layer(&[(0, 1), (0, 2)]), layer(&[])])?;
        graph.edges.insert((Vertex::Token(2), Vertex::Token(1)));
        assert!(graph.check_tree().is_err());
        Ok(())
    }
}
