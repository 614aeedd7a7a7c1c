//! Read-only index over a MapSpec's nodes and edges.
use std::collections::{HashMap, HashSet};

use crate::mapspec::{Edge, MapSpec, MapSpecNode};
use crate::schema::SchemaPath;

#[derive(Debug, Clone)]
pub enum Endpoint<'a> {
    Node(&'a MapSpecNode),
    Terminal(SchemaPath),
}

#[derive(Debug)]
pub struct FunctoidGraph<'a> {
    nodes: HashMap<&'a str, &'a MapSpecNode>,
    /// Edges into each node, in port order.
    inputs: HashMap<&'a str, Vec<&'a Edge>>,
    /// Outgoing edges per node, in document order.
    outputs: HashMap<&'a str, Vec<&'a Edge>>,
    /// Edges ending at a terminal, in document order.
    target_edges: Vec<(SchemaPath, &'a Edge)>,
}

impl<'a> FunctoidGraph<'a> {
    pub fn new(spec: &'a MapSpec) -> Self {
        let nodes: HashMap<&str, &MapSpecNode> = spec.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut inputs: HashMap<&str, Vec<(usize, &Edge)>> = HashMap::new();
        let mut outputs: HashMap<&str, Vec<&Edge>> = HashMap::new();
        let mut target_edges = Vec::new();

        for (index, edge) in spec.edges.iter().enumerate() {
            if nodes.contains_key(edge.source.as_str()) {
                outputs.entry(edge.source.as_str()).or_default().push(edge);
            }
            if nodes.contains_key(edge.target.as_str()) {
                inputs.entry(edge.target.as_str()).or_default().push((index, edge));
            } else {
                let raw = edge.target_handle.as_deref().unwrap_or(&edge.target);
                target_edges.push((SchemaPath::parse(raw), edge));
            }
        }

        let inputs = inputs
            .into_iter()
            .map(|(id, mut edges)| {
                edges.sort_by_key(|(index, edge)| (port_rank(edge.target_handle.as_deref()), *index));
                (id, edges.into_iter().map(|(_, e)| e).collect())
            })
            .collect();

        Self { nodes, inputs, outputs, target_edges }
    }

    pub fn node(&self, id: &str) -> Option<&'a MapSpecNode> {
        self.nodes.get(id).copied()
    }

    pub fn inputs(&self, id: &str) -> &[&'a Edge] {
        self.inputs.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn consumers(&self, id: &str) -> usize {
        self.outputs.get(id).map_or(0, Vec::len)
    }

    /// Does any path downstream of `id` end at a target below an array
    /// indicator?
    pub fn feeds_array_target(&self, id: &str) -> bool {
        let mut pending = vec![id];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            for edge in self.outputs.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                if self.nodes.contains_key(edge.target.as_str()) {
                    pending.push(edge.target.as_str());
                } else {
                    let raw = edge.target_handle.as_deref().unwrap_or(&edge.target);
                    if SchemaPath::parse(raw).split_first_items().is_some() {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn target_edges(&self) -> &[(SchemaPath, &'a Edge)] {
        &self.target_edges
    }

    /// A node id wins; anything else is a terminal path, carried either in
    /// the handle (editor schema nodes) or in the id itself.
    pub fn source_endpoint(&self, edge: &'a Edge) -> Endpoint<'a> {
        match self.node(&edge.source) {
            Some(node) => Endpoint::Node(node),
            None => Endpoint::Terminal(SchemaPath::parse(edge.source_handle.as_deref().unwrap_or(&edge.source))),
        }
    }
}

/// Ordering key of an input port.
///
/// Named ports come first (`left`/`a`/`condition`/`value` < `right`/`b`/`then`
/// < `else`/`c`), numbered ports sort by their trailing digits, unknown names
/// after that and unlabelled edges last.
pub fn port_rank(handle: Option<&str>) -> u32 {
    let Some(handle) = handle else { return u32::MAX };
    let lower = handle.to_ascii_lowercase();
    let token = lower.rsplit(['-', '_', ':']).next().unwrap_or(&lower);
    match token {
        "left" | "a" | "condition" | "cond" | "value" | "input" | "in" | "x" => return 0,
        "right" | "b" | "then" | "y" => return 1,
        "else" | "c" => return 2,
        _ => {}
    }
    let digits: String = lower
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(u32::MAX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_ranks() {
        assert_eq!(port_rank(Some("left")), 0);
        assert_eq!(port_rank(Some("input-right")), 1);
        assert_eq!(port_rank(Some("else")), 2);
        assert_eq!(port_rank(Some("input-3")), 3);
        assert_eq!(port_rank(Some("in10")), 10);
        assert!(port_rank(Some("mystery")) < port_rank(None));
    }

    #[test]
    fn indexes_inputs_consumers_and_targets() {
        let spec: MapSpec = serde_json::from_value(json!({
            "nodes": [{ "id": "m", "kind": "Binary.Subtract" }],
            "edges": [
                { "source": "body.b", "target": "m", "targetHandle": "right" },
                { "source": "body.a", "target": "m", "targetHandle": "left" },
                { "source": "m", "target": "out.diff" },
                { "source": "m", "target": "target-schema", "targetHandle": "$.out.copy" },
                { "source": "source-schema", "sourceHandle": "body.c", "target": "out.c" }
            ]
        }))
        .unwrap();
        let graph = FunctoidGraph::new(&spec);

        let ordered: Vec<&str> = graph.inputs("m").iter().map(|e| e.source.as_str()).collect();
        assert_eq!(ordered, ["body.a", "body.b"]);
        assert_eq!(graph.consumers("m"), 2);

        let targets: Vec<String> = graph.target_edges().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(targets, ["out.diff", "out.copy", "out.c"]);

        assert!(!graph.feeds_array_target("m"));

        match graph.source_endpoint(graph.target_edges()[2].1) {
            Endpoint::Terminal(path) => assert_eq!(path.to_string(), "body.c"),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn array_targets_are_found_through_intermediate_nodes() {
        let spec: MapSpec = serde_json::from_value(json!({
            "nodes": [
                { "id": "sum", "kind": "Aggregate.Sum" },
                { "id": "round", "kind": "Math.Round" }
            ],
            "edges": [
                { "source": "in.items[].price", "target": "sum" },
                { "source": "sum", "target": "out.total" },
                { "source": "sum", "target": "round" },
                { "source": "round", "target": "out.lines[].share" }
            ]
        }))
        .unwrap();
        let graph = FunctoidGraph::new(&spec);
        assert!(graph.feeds_array_target("sum"));
        assert!(graph.feeds_array_target("round"));
    }
}
