//! Binding graph between bound states
//!
//! Nodes are `(element, state)` pairs. Edges are directed and carry a pure
//! translation from the source unit into the target unit. A bidirectional
//! binding is a reciprocal pair of edges; any longer cycle is rejected when
//! the graph is built.
//!
//! A cascade walks the graph breadth-first from the state that changed.
//! Each node is updated at most once per cascade and the walk never fires
//! back towards the node a value came from, so reciprocal pairs stay finite.

use std::collections::{HashMap, VecDeque};

use meshlight_core::{
    level_to_unsigned, unsigned_to_level, BindValue, BoundState, ElementId, MeshError, MeshResult,
};
use tracing::trace;

/// Edge translation function
pub type Translate = fn(BindValue) -> Option<BindValue>;

/// Graph node identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub element: ElementId,
    pub state: BoundState,
}

impl BindingKey {
    pub fn new(element: ElementId, state: BoundState) -> Self {
        BindingKey { element, state }
    }
}

#[derive(Clone, Copy)]
struct Edge {
    from: usize,
    to: usize,
    translate: Translate,
}

/// Collects nodes and edges, then validates them into a [`BindingGraph`]
#[derive(Default)]
pub struct BindingGraphBuilder {
    nodes: Vec<BindingKey>,
    edges: Vec<(BindingKey, BindingKey, Translate)>,
}

impl BindingGraphBuilder {
    pub fn new() -> Self {
        BindingGraphBuilder::default()
    }

    /// Register a bound state
    pub fn node(&mut self, key: BindingKey) -> &mut Self {
        if !self.nodes.contains(&key) {
            self.nodes.push(key);
        }
        self
    }

    /// Add a directed edge
    pub fn edge(&mut self, from: BindingKey, to: BindingKey, translate: Translate) -> &mut Self {
        self.edges.push((from, to, translate));
        self
    }

    /// Add both directions of a binding
    pub fn bidirectional(
        &mut self,
        a: BindingKey,
        b: BindingKey,
        a_to_b: Translate,
        b_to_a: Translate,
    ) -> &mut Self {
        self.edge(a, b, a_to_b).edge(b, a, b_to_a)
    }

    /// Validate endpoints and cycles
    pub fn build(&self) -> MeshResult<BindingGraph> {
        let index: HashMap<BindingKey, usize> =
            self.nodes.iter().enumerate().map(|(i, key)| (*key, i)).collect();

        let mut edges = Vec::with_capacity(self.edges.len());
        for (from, to, translate) in &self.edges {
            let (Some(&f), Some(&t)) = (index.get(from), index.get(to)) else {
                return Err(MeshError::DanglingBinding(format!("{:?} -> {:?}", from, to)));
            };
            if f == t {
                return Err(MeshError::BindingCycle(format!("{:?} bound to itself", from)));
            }
            edges.push(Edge {
                from: f,
                to: t,
                translate: *translate,
            });
        }

        let mut outgoing = vec![Vec::new(); self.nodes.len()];
        for (i, edge) in edges.iter().enumerate() {
            outgoing[edge.from].push(i);
        }

        let graph = BindingGraph {
            nodes: self.nodes.clone(),
            index,
            edges,
            outgoing,
        };

        if let Some((from, to)) = graph.find_long_cycle() {
            return Err(MeshError::BindingCycle(format!(
                "{:?} -> {:?} closes a cycle",
                graph.nodes[from], graph.nodes[to]
            )));
        }

        Ok(graph)
    }
}

/// Validated binding graph
#[derive(Default)]
pub struct BindingGraph {
    nodes: Vec<BindingKey>,
    index: HashMap<BindingKey, usize>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
}

impl BindingGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, key: BindingKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Targets directly bound from `key`
    pub fn targets(&self, key: BindingKey) -> Vec<BindingKey> {
        match self.index.get(&key) {
            Some(&i) => self.outgoing[i]
                .iter()
                .map(|&e| self.nodes[self.edges[e].to])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Propagate a change of `origin` to every bound state.
    ///
    /// `apply` writes the translated value into the target state and returns
    /// the value actually stored (after clamping), or `None` when the target
    /// did not take it; the walk does not continue past such a node.
    /// Returns the number of nodes updated.
    ///
    /// One call walks the whole closure breadth-first rather than resolving
    /// a single edge per invocation. The edge leading back to the node a
    /// value came from is skipped and each node is written at most once, so
    /// a cycle in the graph ends the walk instead of re-entering it.
    pub fn cascade<F>(&self, origin: BindingKey, value: BindValue, mut apply: F) -> usize
    where
        F: FnMut(BindingKey, BindValue) -> Option<BindValue>,
    {
        let Some(&start) = self.index.get(&origin) else {
            return 0;
        };

        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;

        let mut queue = VecDeque::new();
        queue.push_back((start, value, None::<usize>));
        let mut updated = 0;

        while let Some((node, value, came_from)) = queue.pop_front() {
            for &e in &self.outgoing[node] {
                let edge = self.edges[e];
                if Some(edge.to) == came_from || visited[edge.to] {
                    continue;
                }
                let Some(translated) = (edge.translate)(value) else {
                    continue;
                };

                visited[edge.to] = true;
                let key = self.nodes[edge.to];
                trace!(from = ?self.nodes[node], to = ?key, value = ?translated, "binding");

                if let Some(stored) = apply(key, translated) {
                    updated += 1;
                    queue.push_back((edge.to, stored, Some(node)));
                }
            }
        }

        updated
    }

    /// Find an edge closing a simple cycle of length 3 or more.
    ///
    /// Edge u -> v closes such a cycle iff some w != v, reachable from v
    /// without passing through u, has an edge back to u.
    fn find_long_cycle(&self) -> Option<(usize, usize)> {
        for edge in &self.edges {
            let (u, v) = (edge.from, edge.to);
            let mut seen = vec![false; self.nodes.len()];
            seen[u] = true;
            seen[v] = true;
            let mut queue = VecDeque::from([v]);

            while let Some(w) = queue.pop_front() {
                for &e in &self.outgoing[w] {
                    let next = self.edges[e].to;
                    if next == u && w != v {
                        return Some((u, v));
                    }
                    if !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }
}

/// Power/Lightness Actual -> Generic OnOff
pub fn to_onoff(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::PowerActual(v) | BindValue::LightnessActual(v) => Some(BindValue::OnOff(v > 0)),
        _ => None,
    }
}

/// Any bound state -> Generic Level
pub fn to_level(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::OnOff(on) => Some(BindValue::Level(if on { i16::MAX } else { i16::MIN })),
        BindValue::PowerActual(v)
        | BindValue::LightnessActual(v)
        | BindValue::Hue(v)
        | BindValue::Saturation(v) => Some(BindValue::Level(unsigned_to_level(v))),
        _ => None,
    }
}

/// Level or OnOff -> Power Actual. OnOff passes through: the target
/// resolves "on" to its Default or Last value.
pub fn to_power_actual(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::Level(l) => Some(BindValue::PowerActual(level_to_unsigned(l))),
        BindValue::OnOff(_) => Some(value),
        _ => None,
    }
}

/// Level, OnOff or HSL Lightness -> Lightness Actual
pub fn to_lightness_actual(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::Level(l) => Some(BindValue::LightnessActual(level_to_unsigned(l))),
        BindValue::HslLightness(v) => Some(BindValue::LightnessActual(v)),
        BindValue::OnOff(_) => Some(value),
        _ => None,
    }
}

/// Lightness Actual -> HSL Lightness
pub fn to_hsl_lightness(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::LightnessActual(v) => Some(BindValue::HslLightness(v)),
        _ => None,
    }
}

/// Level -> HSL Hue
pub fn to_hue(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::Level(l) => Some(BindValue::Hue(level_to_unsigned(l))),
        _ => None,
    }
}

/// Level -> HSL Saturation
pub fn to_saturation(value: BindValue) -> Option<BindValue> {
    match value {
        BindValue::Level(l) => Some(BindValue::Saturation(level_to_unsigned(l))),
        _ => None,
    }
}
