use crate::error::{Result, TearError};
use crate::network::{Topology, UNSET};
use crate::ybus::AdmittanceSystem;
use derive_builder::Builder;
use num_complex::Complex64;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A branch switched out to tear the network into sub-areas.
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingBranch {
    pub branch_id: String,

    /// Sub-area flags of the from and to side buses.
    pub from_area_flag: i32,
    pub to_area_flag: i32,

    /// Series current from the from side to the to side, set by the
    /// cutting current step.
    pub current: Option<Complex64>,
}

impl CuttingBranch {
    pub fn new(branch_id: impl Into<String>) -> Self {
        Self::with_flags(branch_id, UNSET, UNSET)
    }

    pub fn with_flags(branch_id: impl Into<String>, from_flag: i32, to_flag: i32) -> Self {
        Self {
            branch_id: branch_id.into(),
            from_area_flag: from_flag,
            to_area_flag: to_flag,
            current: None,
        }
    }
}

impl fmt::Display for CuttingBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "branch {} (sub-area {} -> {})",
            self.branch_id, self.from_area_flag, self.to_area_flag
        )?;
        if let Some(cur) = self.current {
            write!(f, ", current {}", crate::debug::format_complex(&cur))?;
        }
        Ok(())
    }
}

/// A maximal connected piece of the network once the cutting branches are
/// removed.
pub struct SubArea {
    /// Canonical flag: the smallest raw flag consolidated into the area.
    pub flag: i32,

    /// Buses at the sub-area end of at least one cutting branch.
    pub interface_node_ids: Vec<String>,

    pub(crate) system: Option<AdmittanceSystem>,

    // Voltage response of every local bus to a unit injection at each
    // interface bus, one column per interface bus.
    pub(crate) sensitivity: Vec<Vec<Complex64>>,

    /// Norton equivalent impedance matrix seen from the interface buses,
    /// `equivalent_impedance[i][j]` is the voltage at interface bus `i`
    /// per unit current injected at interface bus `j`.
    pub equivalent_impedance: Vec<Vec<Complex64>>,
}

impl SubArea {
    pub fn new(flag: i32, interface_node_ids: &[&str]) -> Self {
        Self {
            flag,
            interface_node_ids: interface_node_ids.iter().map(|s| s.to_string()).collect(),
            system: None,
            sensitivity: Vec::new(),
            equivalent_impedance: Vec::new(),
        }
    }

    pub fn interface_index(&self, id: &str) -> Option<usize> {
        self.interface_node_ids.iter().position(|i| i == id)
    }
}

impl fmt::Display for SubArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub-area {}, interface buses [{}]",
            self.flag,
            self.interface_node_ids.join(", ")
        )
    }
}

impl fmt::Debug for SubArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubArea")
            .field("flag", &self.flag)
            .field("interface_node_ids", &self.interface_node_ids)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Builder)]
#[builder(default)]
pub struct PartitionOpt {
    /// Fail on malformed topology met during the flood fill instead of
    /// logging it and skipping the branch.
    pub strict_traversal: bool,

    /// Accept cutting branches with both ends in the same sub-area.
    pub allow_internal_cuts: bool,
}

// Disjoint sets over raw flags 1..=n. The numerically smaller root wins.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..=n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut x = x;
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let (ra, rb) = (self.find(a), self.find(b));
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
        lo
    }
}

/// Finds the sub-areas separated by the cutting branches.
///
/// Every cutting branch is switched out of service and stays out after
/// return. On success every in-service bus carries the flag of its
/// sub-area and each cutting branch the flags of its two sides. The
/// sub-areas are returned in ascending flag order.
pub fn partition<T: Topology + ?Sized>(
    net: &mut T,
    cutting_branches: &mut [CuttingBranch],
    opt: &PartitionOpt,
) -> Result<Vec<SubArea>> {
    let edges = resolve_branches(net, cutting_branches)?;
    for (cbra, &e) in cutting_branches.iter().zip(&edges) {
        let (f, t) = net.edge_ends(e);
        for bus in [f, t] {
            if !net.node_active(bus) {
                return Err(TearError::Configuration(format!(
                    "cutting branch \"{}\" ends at out-of-service bus \"{}\"",
                    cbra.branch_id,
                    net.node_id(bus)
                )));
            }
        }
    }

    for i in 0..net.node_count() {
        net.set_flag(i, UNSET);
    }

    // seed the cutting branch ends with raw flags 1, 2, 3...
    let mut n_flags = 0;
    for (cbra, &e) in cutting_branches.iter_mut().zip(&edges) {
        net.set_active(e, false);
        cbra.from_area_flag = UNSET;
        cbra.to_area_flag = UNSET;
        cbra.current = None;

        let (f, t) = net.edge_ends(e);
        if net.flag(f) == UNSET {
            n_flags += 1;
            net.set_flag(f, n_flags);
            cbra.from_area_flag = n_flags;
        }
        if net.flag(t) == UNSET {
            n_flags += 1;
            net.set_flag(t, n_flags);
            cbra.to_area_flag = n_flags;
        }
    }

    let mut visited = vec![false; net.node_count()];
    let mut pairs = BTreeSet::new();
    for &e in &edges {
        let (f, t) = net.edge_ends(e);
        flood_fill(net, f, &mut visited, &mut pairs, opt)?;
        flood_fill(net, t, &mut visited, &mut pairs, opt)?;
    }
    log::debug!(
        "{} raw flags, equivalent pairs: {:?}",
        n_flags,
        pairs
    );

    // consolidate the raw flags
    let mut uf = UnionFind::new(n_flags as usize);
    for &(a, b) in &pairs {
        uf.union(a as usize, b as usize);
    }

    let mut unresolved = Vec::new();
    for i in 0..net.node_count() {
        if !net.node_active(i) {
            continue;
        }
        let flag = net.flag(i);
        if flag == UNSET {
            unresolved.push(net.node_id(i).to_string());
        } else {
            let root = uf.find(flag as usize) as i32;
            net.set_flag(i, root);
        }
    }
    if !unresolved.is_empty() {
        return Err(TearError::PartitionIncomplete { nodes: unresolved });
    }

    let mut interfaces: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (cbra, &e) in cutting_branches.iter_mut().zip(&edges) {
        let (f, t) = net.edge_ends(e);
        cbra.from_area_flag = net.flag(f);
        cbra.to_area_flag = net.flag(t);

        if cbra.from_area_flag == cbra.to_area_flag && !opt.allow_internal_cuts {
            return Err(TearError::PartitionIncomplete {
                nodes: vec![net.node_id(f).to_string(), net.node_id(t).to_string()],
            });
        }

        for bus in [f, t] {
            let ids = interfaces.entry(net.flag(bus)).or_default();
            let id = net.node_id(bus);
            if !ids.iter().any(|i| i == id) {
                ids.push(id.to_string());
            }
        }
    }

    let subareas: Vec<SubArea> = interfaces
        .into_iter()
        .map(|(flag, ids)| SubArea {
            flag,
            interface_node_ids: ids,
            system: None,
            sensitivity: Vec::new(),
            equivalent_impedance: Vec::new(),
        })
        .collect();

    log::debug!(
        "{} sub-areas from {} cutting branches",
        subareas.len(),
        cutting_branches.len()
    );
    for subarea in &subareas {
        log::trace!("{}", subarea);
    }

    Ok(subareas)
}

/// Puts the cutting branches back in service.
pub fn reconnect<T: Topology + ?Sized>(net: &mut T, cutting_branches: &[CuttingBranch]) -> Result<()> {
    for e in resolve_branches(net, cutting_branches)? {
        net.set_active(e, true);
    }
    Ok(())
}

pub(crate) fn resolve_branches<T: Topology + ?Sized>(
    net: &T,
    cutting_branches: &[CuttingBranch],
) -> Result<Vec<usize>> {
    let mut edges: Vec<usize> = Vec::with_capacity(cutting_branches.len());
    for cbra in cutting_branches {
        let e = net.edge_index(&cbra.branch_id).ok_or_else(|| {
            TearError::Configuration(format!(
                "cutting branch \"{}\" not found in the network",
                cbra.branch_id
            ))
        })?;
        if edges.contains(&e) {
            return Err(TearError::Configuration(format!(
                "cutting branch \"{}\" listed more than once",
                cbra.branch_id
            )));
        }
        edges.push(e);
    }
    Ok(edges)
}

// Spreads the flag of `start` over in-service branches to every unflagged
// bus. Meeting a bus with a different flag proves both flags denote the
// same sub-area; the pair is recorded smaller flag first.
fn flood_fill<T: Topology + ?Sized>(
    net: &mut T,
    start: usize,
    visited: &mut [bool],
    pairs: &mut BTreeSet<(i32, i32)>,
    opt: &PartitionOpt,
) -> Result<()> {
    if visited[start] {
        return Ok(());
    }
    visited[start] = true;

    let mut stack = vec![start];
    while let Some(bus) = stack.pop() {
        let flag = net.flag(bus);
        let branches = net.incident_edges(bus).to_vec();
        for e in branches {
            if !net.is_active(e) {
                continue;
            }
            let opt_bus = match net.opposite(e, bus) {
                Ok(b) => b,
                Err(err) if !opt.strict_traversal => {
                    log::warn!("sub-area search skipped a branch: {}", err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !net.node_active(opt_bus) {
                continue;
            }

            let opt_flag = net.flag(opt_bus);
            if opt_flag == UNSET {
                net.set_flag(opt_bus, flag);
                visited[opt_bus] = true;
                stack.push(opt_bus);
            } else if opt_flag != flag {
                pairs.insert((flag.min(opt_flag), flag.max(opt_flag)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::network::{Network, Node};

    fn network(buses: &[&str], lines: &[(&str, &str)]) -> Network {
        let mut net = Network::new();
        for &id in buses {
            net.add_node(Node::new(id, cmplx!(0.1))).unwrap();
        }
        for &(f, t) in lines {
            let id = format!("{}->{}(1)", f, t);
            net.add_line(&id, f, t, 0.01, 0.1, 0.0).unwrap();
        }
        net
    }

    fn cuts(ids: &[&str]) -> Vec<CuttingBranch> {
        ids.iter().map(|&id| CuttingBranch::new(id)).collect()
    }

    #[test]
    fn union_find_keeps_smallest_root() {
        let mut uf = UnionFind::new(6);
        uf.union(5, 6);
        uf.union(4, 6);
        assert_eq!(uf.find(6), 4);
        uf.union(2, 5);
        assert_eq!(uf.find(4), 2);
        assert_eq!(uf.find(6), 2);
        assert_eq!(uf.find(3), 3);
        // path compressed
        assert_eq!(uf.parent[6], 2);
    }

    // a-b-c-d with the middle branch cut
    #[test]
    fn chain_cut_in_two() -> anyhow::Result<()> {
        let mut net = network(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let mut cbra = cuts(&["b->c(1)"]);
        let areas = partition(&mut net, &mut cbra, &PartitionOpt::default())?;

        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].flag, 1);
        assert_eq!(areas[0].interface_node_ids, vec!["b"]);
        assert_eq!(areas[1].flag, 2);
        assert_eq!(areas[1].interface_node_ids, vec!["c"]);
        assert_eq!(net.flag_of("a"), Some(1));
        assert_eq!(net.flag_of("d"), Some(2));
        assert_eq!((cbra[0].from_area_flag, cbra[0].to_area_flag), (1, 2));
        assert!(!net.branch("b->c(1)").unwrap().active);
        Ok(())
    }

    // Ring a-b-c-d-e-f-a cut at b-c and e-f: raw flags 1..4 seed b, c, e, f
    // and consolidate to {1 (a, b, f), 2 (c, d, e)}.
    #[test]
    fn ring_consolidates_to_smallest_flags() -> anyhow::Result<()> {
        let mut net = network(
            &["a", "b", "c", "d", "e", "f"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "e"), ("e", "f"), ("f", "a")],
        );
        let mut cbra = cuts(&["b->c(1)", "e->f(1)"]);
        let areas = partition(&mut net, &mut cbra, &PartitionOpt::default())?;

        assert_eq!(areas.len(), 2);
        for id in ["a", "b", "f"] {
            assert_eq!(net.flag_of(id), Some(1), "bus {}", id);
        }
        for id in ["c", "d", "e"] {
            assert_eq!(net.flag_of(id), Some(2), "bus {}", id);
        }
        assert_eq!(areas[0].interface_node_ids, vec!["b", "f"]);
        assert_eq!(areas[1].interface_node_ids, vec!["c", "e"]);
        assert_eq!((cbra[1].from_area_flag, cbra[1].to_area_flag), (2, 1));
        Ok(())
    }

    #[test]
    fn assignment_independent_of_cut_order() -> anyhow::Result<()> {
        let lines = [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e"), ("e", "f"), ("f", "a"), ("c", "g")];
        let buses = ["a", "b", "c", "d", "e", "f", "g"];

        let mut net1 = network(&buses, &lines);
        let mut cbra1 = cuts(&["b->c(1)", "e->f(1)", "c->g(1)"]);
        partition(&mut net1, &mut cbra1, &PartitionOpt::default())?;

        let mut net2 = network(&buses, &lines);
        let mut cbra2 = cuts(&["c->g(1)", "e->f(1)", "b->c(1)"]);
        partition(&mut net2, &mut cbra2, &PartitionOpt::default())?;

        for x in buses {
            for y in buses {
                assert_eq!(
                    net1.flag_of(x) == net1.flag_of(y),
                    net2.flag_of(x) == net2.flag_of(y),
                    "buses {} and {}",
                    x,
                    y
                );
            }
        }
        Ok(())
    }

    #[test]
    fn unknown_cutting_branch() {
        let mut net = network(&["a", "b"], &[("a", "b")]);
        let mut cbra = cuts(&["a->b(1)", "x->y(1)"]);
        let err = partition(&mut net, &mut cbra, &PartitionOpt::default()).unwrap_err();
        assert!(matches!(err, TearError::Configuration(_)));
        // nothing switched out
        assert!(net.branch("a->b(1)").unwrap().active);
    }

    #[test]
    fn repeated_cutting_branch() {
        let mut net = network(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let mut cbra = cuts(&["a->b(1)", "b->c(1)", "a->b(1)"]);
        let err = partition(&mut net, &mut cbra, &PartitionOpt::default()).unwrap_err();
        assert!(matches!(err, TearError::Configuration(_)));
        assert!(net.branch("a->b(1)").unwrap().active);
        assert!(net.branch("b->c(1)").unwrap().active);
    }

    #[test]
    fn cut_at_out_of_service_bus_switches_nothing_out() {
        let mut net = network(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        net.set_node_active(3, false);
        let mut cbra = cuts(&["a->b(1)", "c->d(1)"]);
        let err = partition(&mut net, &mut cbra, &PartitionOpt::default()).unwrap_err();
        assert!(matches!(err, TearError::Configuration(_)));
        assert!(net.branch("a->b(1)").unwrap().active);
        assert!(net.branch("c->d(1)").unwrap().active);
    }

    #[test]
    fn unreachable_bus_is_reported() {
        let mut net = network(&["a", "b", "c", "z"], &[("a", "b"), ("b", "c")]);
        let mut cbra = cuts(&["a->b(1)"]);
        match partition(&mut net, &mut cbra, &PartitionOpt::default()) {
            Err(TearError::PartitionIncomplete { nodes }) => assert_eq!(nodes, vec!["z"]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn out_of_service_bus_is_ignored() -> anyhow::Result<()> {
        let mut net = network(&["a", "b", "c", "z"], &[("a", "b"), ("b", "c"), ("c", "z")]);
        net.set_node_active(3, false);
        let mut cbra = cuts(&["a->b(1)"]);
        let areas = partition(&mut net, &mut cbra, &PartitionOpt::default())?;
        assert_eq!(areas.len(), 2);
        assert_eq!(net.flag_of("z"), Some(UNSET));
        Ok(())
    }

    // a-b-c triangle: cutting a-b alone does not separate anything
    #[test]
    fn redundant_cut() -> anyhow::Result<()> {
        let lines = [("a", "b"), ("b", "c"), ("c", "a")];
        let mut net = network(&["a", "b", "c"], &lines);
        let mut cbra = cuts(&["a->b(1)"]);
        let err = partition(&mut net, &mut cbra, &PartitionOpt::default()).unwrap_err();
        assert!(matches!(err, TearError::PartitionIncomplete { .. }));

        let opt = PartitionOptBuilder::default().allow_internal_cuts(true).build()?;
        let areas = partition(&mut net, &mut cbra, &opt)?;
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].interface_node_ids, vec!["a", "b"]);
        assert_eq!((cbra[0].from_area_flag, cbra[0].to_area_flag), (1, 1));
        Ok(())
    }

    #[test]
    fn reconnect_restores_cut_branches() -> anyhow::Result<()> {
        let mut net = network(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let mut cbra = cuts(&["a->b(1)"]);
        partition(&mut net, &mut cbra, &PartitionOpt::default())?;
        assert!(!net.branch("a->b(1)").unwrap().active);
        reconnect(&mut net, &cbra)?;
        assert!(net.branch("a->b(1)").unwrap().active);
        Ok(())
    }

    // Network whose incident lists claim branch `bad` at a bus it does not
    // touch.
    struct Malformed {
        net: Network,
        bad_bus: usize,
        bad_branch: usize,
        incident: Vec<usize>,
    }

    impl Topology for Malformed {
        fn node_count(&self) -> usize {
            self.net.node_count()
        }
        fn node_id(&self, node: usize) -> &str {
            self.net.node_id(node)
        }
        fn node_active(&self, node: usize) -> bool {
            self.net.node_active(node)
        }
        fn edge_index(&self, id: &str) -> Option<usize> {
            self.net.edge_index(id)
        }
        fn edge_ends(&self, edge: usize) -> (usize, usize) {
            self.net.edge_ends(edge)
        }
        fn incident_edges(&self, node: usize) -> &[usize] {
            if node == self.bad_bus {
                &self.incident
            } else {
                self.net.incident_edges(node)
            }
        }
        fn opposite(&self, edge: usize, node: usize) -> Result<usize> {
            self.net.opposite(edge, node)
        }
        fn is_active(&self, edge: usize) -> bool {
            self.net.is_active(edge)
        }
        fn set_active(&mut self, edge: usize, active: bool) {
            self.net.set_active(edge, active)
        }
        fn flag(&self, node: usize) -> i32 {
            self.net.flag(node)
        }
        fn set_flag(&mut self, node: usize, flag: i32) {
            self.net.set_flag(node, flag)
        }
    }

    fn malformed() -> Malformed {
        // a-b | c-d, with c also listing the branch a->b(1)
        let net = network(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let bad_branch = net.edge_index("a->b(1)").unwrap();
        let mut incident = net.incident_edges(2).to_vec();
        incident.push(bad_branch);
        Malformed {
            net,
            bad_bus: 2,
            bad_branch,
            incident,
        }
    }

    #[test]
    fn malformed_branch_is_skipped_by_default() -> anyhow::Result<()> {
        let mut topo = malformed();
        assert!(topo.opposite(topo.bad_branch, topo.bad_bus).is_err());

        let mut cbra = cuts(&["b->c(1)"]);
        let areas = partition(&mut topo, &mut cbra, &PartitionOpt::default())?;
        assert_eq!(areas.len(), 2);
        assert_eq!(topo.net.flag_of("a"), Some(1));
        assert_eq!(topo.net.flag_of("d"), Some(2));
        Ok(())
    }

    #[test]
    fn malformed_branch_fails_strict_traversal() -> anyhow::Result<()> {
        let mut topo = malformed();
        let mut cbra = cuts(&["b->c(1)"]);
        let opt = PartitionOptBuilder::default().strict_traversal(true).build()?;
        let err = partition(&mut topo, &mut cbra, &opt).unwrap_err();
        assert!(matches!(err, TearError::Topology(_)));
        Ok(())
    }

    #[test]
    fn repartition_is_idempotent() -> anyhow::Result<()> {
        let lines = [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e"), ("e", "f"), ("f", "a")];
        let mut net = network(&["a", "b", "c", "d", "e", "f"], &lines);
        let mut cbra = cuts(&["b->c(1)", "e->f(1)"]);

        let first = partition(&mut net, &mut cbra, &PartitionOpt::default())?;
        let flags1: Vec<Option<i32>> = ["a", "b", "c", "d", "e", "f"].iter().map(|id| net.flag_of(id)).collect();
        let second = partition(&mut net, &mut cbra, &PartitionOpt::default())?;
        let flags2: Vec<Option<i32>> = ["a", "b", "c", "d", "e", "f"].iter().map(|id| net.flag_of(id)).collect();

        assert_eq!(flags1, flags2);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.flag, b.flag);
            assert_eq!(a.interface_node_ids, b.interface_node_ids);
        }
        Ok(())
    }
}
