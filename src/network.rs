use crate::error::{Result, TearError};
use crate::math::J;
use num_complex::Complex64;
use std::collections::HashMap;

/// Partition flag of a bus that has not been assigned to a sub-area.
pub const UNSET: i32 = -1;

/// Bus is a node in the network graph. Static loads are expected to have
/// been converted to constant impedance and included in `y_shunt`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,

    /// Total shunt admittance to ground (p.u.).
    pub y_shunt: Complex64,

    /// In-service status. Out-of-service buses are skipped by traversal
    /// and by the nodal solves.
    pub active: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, y_shunt: Complex64) -> Self {
        Self {
            id: id.into(),
            y_shunt,
            active: true,
        }
    }
}

/// Branch is a π-model line or transformer between two buses.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,

    /// From and to bus indices into the owning network.
    pub from: usize,
    pub to: usize,

    /// Series admittance (p.u.).
    pub y_series: Complex64,

    /// Total line charging susceptance (p.u.).
    pub b_charging: f64,

    /// Transformer off nominal turns ratio on the from side.
    pub tap: f64,

    pub active: bool,
}

impl Edge {
    /// The four entries of the branch admittance matrix:
    ///
    /// ```text
    /// | If |   | Yff  Yft |   | Vf |
    /// |    | = |          | * |    |
    /// | It |   | Ytf  Ytt |   | Vt |
    /// ```
    pub fn stamp(&self) -> (Complex64, Complex64, Complex64, Complex64) {
        let y_s = self.y_series;
        let t = self.tap;

        let y_tt = y_s + J * (self.b_charging / 2.0);
        let y_ff = y_tt / (t * t);
        let y_ft = -y_s / t;
        let y_tf = -y_s / t;

        (y_ff, y_ft, y_tf, y_tt)
    }

    /// Splits the π-model into the series element that carries the
    /// from->to current and the shunt remainders left at each end.
    ///
    /// Returns `(y_series, y_from_shunt, y_to_shunt)`. Stamping the three
    /// parts separately reproduces `stamp()` exactly.
    pub fn torn_parts(&self) -> (Complex64, Complex64, Complex64) {
        let (y_ff, y_ft, _, y_tt) = self.stamp();
        let y_s = -y_ft;
        (y_s, y_ff - y_s, y_tt - y_s)
    }
}

/// Graph view the partitioner runs against.
///
/// Nodes and edges are addressed by index. Partition flags are kept in a
/// side table owned by the implementor, not in the node entities.
pub trait Topology {
    fn node_count(&self) -> usize;
    fn node_id(&self, node: usize) -> &str;
    fn node_active(&self, node: usize) -> bool;
    fn edge_index(&self, id: &str) -> Option<usize>;
    fn edge_ends(&self, edge: usize) -> (usize, usize);
    fn incident_edges(&self, node: usize) -> &[usize];

    /// Bus at the other end of `edge` as seen from `node`.
    fn opposite(&self, edge: usize, node: usize) -> Result<usize>;

    fn is_active(&self, edge: usize) -> bool;
    fn set_active(&mut self, edge: usize, active: bool);

    fn flag(&self, node: usize) -> i32;
    fn set_flag(&mut self, node: usize, flag: i32);
}

/// Network is an arena of buses and branches with id lookup.
#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    incident: Vec<Vec<usize>>,
    flags: Vec<i32>,

    node_ids: HashMap<String, usize>,
    edge_ids: HashMap<String, usize>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<usize> {
        if self.node_ids.contains_key(&node.id) {
            return Err(TearError::Configuration(format!(
                "duplicate bus id \"{}\"",
                node.id
            )));
        }
        let i = self.nodes.len();
        self.node_ids.insert(node.id.clone(), i);
        self.nodes.push(node);
        self.incident.push(Vec::new());
        self.flags.push(UNSET);
        Ok(i)
    }

    /// Adds a line with series impedance `r + jx` and total charging `b`.
    pub fn add_line(&mut self, id: &str, from: &str, to: &str, r: f64, x: f64, b: f64) -> Result<usize> {
        self.add_branch(id, from, to, r, x, b, 1.0)
    }

    /// Adds a transformer with off nominal ratio `tap` on the from side.
    pub fn add_transformer(&mut self, id: &str, from: &str, to: &str, r: f64, x: f64, tap: f64) -> Result<usize> {
        self.add_branch(id, from, to, r, x, 0.0, tap)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_branch(
        &mut self,
        id: &str,
        from: &str,
        to: &str,
        r: f64,
        x: f64,
        b: f64,
        tap: f64,
    ) -> Result<usize> {
        if r == 0.0 && x == 0.0 {
            return Err(TearError::Configuration(format!(
                "branch \"{}\" has zero impedance",
                id
            )));
        }
        let f = self.require_node(from)?;
        let t = self.require_node(to)?;
        let tap = if tap == 0.0 { 1.0 } else { tap }; // default tap ratio = 1
        self.add_edge(Edge {
            id: id.to_string(),
            from: f,
            to: t,
            y_series: Complex64::new(1.0, 0.0) / Complex64::new(r, x),
            b_charging: b,
            tap,
            active: true,
        })
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<usize> {
        if self.edge_ids.contains_key(&edge.id) {
            return Err(TearError::Configuration(format!(
                "duplicate branch id \"{}\"",
                edge.id
            )));
        }
        if edge.from >= self.nodes.len() || edge.to >= self.nodes.len() {
            return Err(TearError::Configuration(format!(
                "branch \"{}\" references an unknown bus",
                edge.id
            )));
        }
        let i = self.edges.len();
        self.edge_ids.insert(edge.id.clone(), i);
        self.incident[edge.from].push(i);
        if edge.to != edge.from {
            self.incident[edge.to].push(i);
        }
        self.edges.push(edge);
        Ok(i)
    }

    fn require_node(&self, id: &str) -> Result<usize> {
        self.node_index(id)
            .ok_or_else(|| TearError::Configuration(format!("unknown bus id \"{}\"", id)))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn edge(&self, i: usize) -> &Edge {
        &self.edges[i]
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.node_ids.get(id).copied()
    }

    /// Partition flag of the bus with the given id.
    pub fn flag_of(&self, id: &str) -> Option<i32> {
        self.node_index(id).map(|i| self.flags[i])
    }

    pub fn set_node_active(&mut self, i: usize, active: bool) {
        self.nodes[i].active = active;
    }

    pub fn set_branch_active(&mut self, i: usize, active: bool) {
        self.edges[i].active = active;
    }

    pub fn branch(&self, id: &str) -> Option<&Edge> {
        self.edge_ids.get(id).map(|&i| &self.edges[i])
    }
}

impl Topology for Network {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_id(&self, node: usize) -> &str {
        &self.nodes[node].id
    }

    fn node_active(&self, node: usize) -> bool {
        self.nodes[node].active
    }

    fn edge_index(&self, id: &str) -> Option<usize> {
        self.edge_ids.get(id).copied()
    }

    fn edge_ends(&self, edge: usize) -> (usize, usize) {
        let e = &self.edges[edge];
        (e.from, e.to)
    }

    fn incident_edges(&self, node: usize) -> &[usize] {
        &self.incident[node]
    }

    fn opposite(&self, edge: usize, node: usize) -> Result<usize> {
        let e = &self.edges[edge];
        if e.from == node {
            Ok(e.to)
        } else if e.to == node {
            Ok(e.from)
        } else {
            Err(TearError::Topology(format!(
                "branch \"{}\" is not connected to bus \"{}\"",
                e.id, self.nodes[node].id
            )))
        }
    }

    fn is_active(&self, edge: usize) -> bool {
        self.edges[edge].active
    }

    fn set_active(&mut self, edge: usize, active: bool) {
        self.edges[edge].active = active;
    }

    fn flag(&self, node: usize) -> i32 {
        self.flags[node]
    }

    fn set_flag(&mut self, node: usize, flag: i32) {
        self.flags[node] = flag;
    }
}
