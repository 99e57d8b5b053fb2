//! Graphviz rendering of an [`AttributionGraph`].

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::tree::AttributionGraph;

fn quote(label: &str) -> String {
    format!("\"{}\"", label.replace('\\', "\\\\").replace('"', "\\\""))
}

/// DOT source with one node per distinct label and edges pointing child to parent.
pub fn to_dot(graph: &AttributionGraph) -> String {
    let mut dot = String::from("digraph attribution {\n    rankdir=BT;\n");
    let mut nodes = BTreeSet::new();
    for &vertex in &graph.vertices {
        nodes.insert(graph.label(vertex));
    }
    for label in &nodes {
        let _ = writeln!(dot, "    {};", quote(label));
    }
    let mut seen = BTreeSet::new();
    for &(parent, child) in &graph.edges {
        let pair = (graph.label(child), graph.label(parent));
        if seen.insert(pair) {
            let _ = writeln!(dot, "    {} -> {};", quote(pair.0), quote(pair.1));
        }
    }
    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Vertex, CLASS_LABEL};
    use std::collections::BTreeMap;

    fn graph() -> AttributionGraph {
        let mut token_names = BTreeMap::new();
        token_names.insert(Vertex::Class, CLASS_LABEL.to_string());
        token_names.insert(Vertex::Token(0), "root".to_string());
        token_names.insert(Vertex::Token(1), "say \"hi\"".to_string());
        AttributionGraph {
            token_names,
            token_attrs: vec![2.0, 1.0],
            root: 0,
            vertices: [Vertex::Class, Vertex::Token(0), Vertex::Token(1)].into_iter().collect(),
            edges: [
                (Vertex::Class, Vertex::Token(0)),
                (Vertex::Token(0), Vertex::Token(1)),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn edges_point_from_child_to_parent() {
        let dot = to_dot(&graph());
        assert!(dot.starts_with("digraph attribution {\n    rankdir=BT;\n"));
        assert!(dot.contains("    \"root\" -> \"[CLS]\";\n"));
        assert!(dot.contains("    \"say \\\"hi\\\"\" -> \"root\";\n"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn shared_labels_collapse_to_one_node() {
        let mut graph = graph();
        graph.token_names.insert(Vertex::Token(1), "root".to_string());
        let dot = to_dot(&graph);
        assert_eq!(dot.matches("    \"root\";\n").count(), 1);
        assert_eq!(dot.matches("->").count(), 2);
    }
}
