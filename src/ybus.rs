use crate::debug::format_rect_vec;
use crate::error::{Result, TearError};
use crate::network::{Network, Node};
use num_complex::Complex64;
use num_traits::Zero;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use spsolve::Solver;
use std::collections::{BTreeMap, HashMap};

/// Complex bus voltages keyed by bus id.
pub type VoltageMap = HashMap<String, Complex64>;

/// Sparse nodal admittance equations `Y V = I` over a subset of the
/// network buses.
///
/// Local equation `i` belongs to bus `nodes()[i]`.
pub struct AdmittanceSystem {
    nodes: Vec<usize>,
    local: HashMap<usize, usize>,
    y: CSC<usize, Complex64>,
    b: Vec<Complex64>,
}

impl AdmittanceSystem {
    /// Builds the admittance matrix of the buses in `nodes`.
    ///
    /// Every in-service branch with both ends in the subset is stamped in
    /// full. For each `torn` branch only the shunt remainders of its
    /// π-model are stamped, at whichever ends fall in the subset; the series
    /// element is left for the coupling equations.
    pub fn build(net: &Network, nodes: &[usize], torn: &[usize]) -> Self {
        let n = nodes.len();
        let local: HashMap<usize, usize> =
            nodes.iter().enumerate().map(|(i, &k)| (k, i)).collect();

        let mut acc: BTreeMap<(usize, usize), Complex64> = BTreeMap::new();
        let mut add = |i: usize, j: usize, v: Complex64| {
            *acc.entry((i, j)).or_default() += v;
        };

        for (i, &k) in nodes.iter().enumerate() {
            add(i, i, net.node(k).y_shunt);
        }
        for br in net.edges().iter().filter(|br| br.active) {
            if let (Some(&f), Some(&t)) = (local.get(&br.from), local.get(&br.to)) {
                let (y_ff, y_ft, y_tf, y_tt) = br.stamp();
                add(f, f, y_ff);
                add(f, t, y_ft);
                add(t, f, y_tf);
                add(t, t, y_tt);
            }
        }
        for &e in torn {
            let br = net.edge(e);
            let (_, y_f, y_t) = br.torn_parts();
            if let Some(&f) = local.get(&br.from) {
                add(f, f, y_f);
            }
            if let Some(&t) = local.get(&br.to) {
                add(t, t, y_t);
            }
        }

        let mut y = Coo::with_size(n, n);
        for ((i, j), v) in acc {
            y.push(i, j, v);
        }

        Self {
            nodes: nodes.to_vec(),
            local,
            y: y.to_csc(),
            b: vec![Complex64::default(); n],
        }
    }

    pub fn dim(&self) -> usize {
        self.nodes.len()
    }

    /// Network bus indices in local equation order.
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn local_index(&self, node: usize) -> Option<usize> {
        self.local.get(&node).copied()
    }

    /// Sets the current injection at a network bus. Buses outside the
    /// subset are ignored.
    pub fn set_injection(&mut self, node: usize, current: Complex64) {
        if let Some(&i) = self.local.get(&node) {
            self.b[i] = current;
        }
    }

    /// Solves for the bus voltages with the current injection vector.
    pub fn solve(&self, solver: &dyn Solver<usize, Complex64>, context: &str) -> Result<Vec<Complex64>> {
        let mut x = self.b.clone();
        self.solve_rhs(solver, &mut x, context)?;
        Ok(x)
    }

    /// Voltages resulting from a unit current injected at local equation `i`
    /// (one column of the inverse admittance matrix).
    pub fn solve_unit(&self, solver: &dyn Solver<usize, Complex64>, i: usize, context: &str) -> Result<Vec<Complex64>> {
        let mut x = vec![Complex64::default(); self.dim()];
        x[i] = Complex64::new(1.0, 0.0);
        self.solve_rhs(solver, &mut x, context)?;
        Ok(x)
    }

    fn solve_rhs(
        &self,
        solver: &dyn Solver<usize, Complex64>,
        rhs: &mut Vec<Complex64>,
        context: &str,
    ) -> Result<()> {
        if rhs.is_empty() {
            return Ok(());
        }
        solver
            .solve(
                self.y.cols(),
                self.y.rowidx(),
                self.y.colptr(),
                self.y.values(),
                rhs,
                false,
            )
            .map_err(|e| TearError::Solver {
                context: context.to_string(),
                reason: e.to_string(),
            })?;
        check_finite(rhs, context)
    }
}

fn check_finite(x: &[Complex64], context: &str) -> Result<()> {
    if x.iter().all(|z| z.re.is_finite() && z.im.is_finite()) {
        Ok(())
    } else {
        Err(TearError::Solver {
            context: context.to_string(),
            reason: "non-finite solution, admittance matrix is singular".to_string(),
        })
    }
}

/// Solves a small dense complex system `A x = b` through the sparse solver.
pub fn solve_dense(
    a: &[Vec<Complex64>],
    b: &[Complex64],
    solver: &dyn Solver<usize, Complex64>,
    context: &str,
) -> Result<Vec<Complex64>> {
    let n = b.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut coo = Coo::with_size(n, n);
    for (i, row) in a.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if !v.is_zero() {
                coo.push(i, j, v);
            }
        }
    }
    let a_mat: CSC<usize, Complex64> = coo.to_csc();

    let mut x = b.to_vec();
    solver
        .solve(
            a_mat.cols(),
            a_mat.rowidx(),
            a_mat.colptr(),
            a_mat.values(),
            &mut x,
            false,
        )
        .map_err(|e| TearError::Solver {
            context: context.to_string(),
            reason: e.to_string(),
        })?;
    check_finite(&x, context)?;
    Ok(x)
}

/// Solves the full, uncut network `Y V = I` in one piece.
///
/// All in-service branches between in-service buses are included, so this
/// must be called before the cutting branches are switched out (or after
/// they have been reconnected).
pub fn solve_monolithic<F>(
    net: &Network,
    injection: F,
    solver: &dyn Solver<usize, Complex64>,
) -> Result<VoltageMap>
where
    F: Fn(&Node) -> Complex64,
{
    let nodes: Vec<usize> = (0..net.nodes().len())
        .filter(|&i| net.node(i).active)
        .collect();

    let mut sys = AdmittanceSystem::build(net, &nodes, &[]);
    for &k in &nodes {
        sys.set_injection(k, injection(net.node(k)));
    }
    let v = sys.solve(solver, "full network")?;
    log::trace!("V (full): {}", format_rect_vec(&v));

    Ok(nodes
        .iter()
        .zip(v)
        .map(|(&k, v)| (net.node(k).id.clone(), v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::math::cequals;
    use spsolve::rlu::RLU;

    // 1 --[z]-- 2, shunt y2 at bus 2, current i injected at bus 1.
    //   V2 = i / y2,  V1 = V2 + i * z
    #[test]
    fn two_bus_solution_matches_hand_calc() -> anyhow::Result<()> {
        let mut net = Network::new();
        net.add_node(Node::new("1", cmplx!()))?;
        net.add_node(Node::new("2", cmplx!(0.8, -0.6)))?;
        net.add_line("1->2(1)", "1", "2", 0.02, 0.1, 0.0)?;

        let i = cmplx!(1.0, -0.2);
        let v = solve_monolithic(
            &net,
            |n| if n.id == "1" { i } else { cmplx!() },
            &RLU::default(),
        )?;

        let v2 = i / cmplx!(0.8, -0.6);
        let v1 = v2 + i * cmplx!(0.02, 0.1);
        assert!(cequals(v["2"], v2, 1e-12));
        assert!(cequals(v["1"], v1, 1e-12));
        Ok(())
    }

    #[test]
    fn torn_branch_keeps_only_shunt_parts() -> anyhow::Result<()> {
        let mut net = Network::new();
        net.add_node(Node::new("1", cmplx!(0.1)))?;
        net.add_node(Node::new("2", cmplx!(0.1)))?;
        let e = net.add_line("1->2(1)", "1", "2", 0.0, 0.1, 0.4)?;
        net.set_branch_active(e, false);

        // bus 1 alone: shunt 0.1 plus half the line charging
        let mut sys = AdmittanceSystem::build(&net, &[0], &[e]);
        assert_eq!(sys.dim(), 1);
        sys.set_injection(0, cmplx!(1.0));
        sys.set_injection(1, cmplx!(5.0)); // outside the subset
        let v = sys.solve(&RLU::default(), "bus 1")?;
        assert!(cequals(v[0], cmplx!(1.0) / cmplx!(0.1, 0.2), 1e-12));
        Ok(())
    }

    #[test]
    fn floating_subset_is_a_solver_error() {
        let mut net = Network::new();
        net.add_node(Node::new("1", cmplx!())).unwrap();
        net.add_node(Node::new("2", cmplx!())).unwrap();
        net.add_line("1->2(1)", "1", "2", 0.0, 0.1, 0.0).unwrap();

        let mut sys = AdmittanceSystem::build(&net, &[0, 1], &[]);
        sys.set_injection(0, cmplx!(1.0));
        let result = sys.solve(&RLU::default(), "floating");
        assert!(matches!(result, Err(TearError::Solver { .. })));
    }

    #[test]
    fn dense_solve() -> anyhow::Result<()> {
        let a = vec![
            vec![cmplx!(2.0), cmplx!(1.0)],
            vec![cmplx!(5.0), cmplx!(7.0)],
        ];
        let x = solve_dense(&a, &[cmplx!(11.0), cmplx!(13.0)], &RLU::default(), "2x2")?;
        assert!(cequals(x[0], cmplx!(64.0 / 9.0), 1e-10));
        assert!(cequals(x[1], cmplx!(-29.0 / 9.0), 1e-10));
        Ok(())
    }
}
