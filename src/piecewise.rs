use crate::debug::{format_complex, format_voltage_map};
use crate::error::{Result, TearError};
use crate::network::{Network, Node, Topology};
use crate::partition::{resolve_branches, CuttingBranch, SubArea};
use crate::ybus::{solve_dense, AdmittanceSystem, VoltageMap};
use num_complex::Complex64;
use spsolve::Solver;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Stage {
    Initial,
    OpenCircuit,
    CuttingCurrent,
    Reconstructed,
}

// Cutting branch resolved against the network and the sub-area list.
struct Cut {
    from: usize,
    to: usize,
    from_area: usize,
    to_area: usize,
    z_series: Complex64,
}

/// Solves the network equations `Y V = I` piecewise: each sub-area on its
/// own, then the currents in the cutting branches, then the superposition
/// of both.
///
/// The steps must be run in order:
///
///   1. `open_circuit_step`
///   2. `cutting_current_step`
///   3. `voltage_reconstruction_step`
pub struct PiecewiseSolver<'a> {
    net: &'a Network,
    subareas: Vec<SubArea>,
    torn: Vec<usize>,
    solver: &'a dyn Solver<usize, Complex64>,

    open_circuit: VoltageMap,
    voltage: VoltageMap,
    stage: Stage,
}

impl<'a> PiecewiseSolver<'a> {
    /// The buses of the network must carry the flags of `subareas` and the
    /// cutting branches must be out of service, as left by `partition`.
    pub fn new(
        net: &'a Network,
        subareas: Vec<SubArea>,
        cutting_branches: &[CuttingBranch],
        solver: &'a dyn Solver<usize, Complex64>,
    ) -> Result<Self> {
        let torn = resolve_branches(net, cutting_branches)?;
        for (cbra, &e) in cutting_branches.iter().zip(&torn) {
            if net.is_active(e) {
                return Err(TearError::Configuration(format!(
                    "cutting branch \"{}\" is still in service",
                    cbra.branch_id
                )));
            }
        }

        Ok(Self {
            net,
            subareas,
            torn,
            solver,
            open_circuit: VoltageMap::new(),
            voltage: VoltageMap::new(),
            stage: Stage::Initial,
        })
    }

    pub fn subareas(&self) -> &[SubArea] {
        &self.subareas
    }

    pub fn subarea(&self, flag: i32) -> Option<&SubArea> {
        self.subareas.iter().find(|a| a.flag == flag)
    }

    /// Bus voltages after the most recent step.
    pub fn voltage(&self) -> &VoltageMap {
        &self.voltage
    }

    /// Bus voltages with all cutting branches open.
    pub fn open_circuit_voltage(&self) -> &VoltageMap {
        &self.open_circuit
    }

    /// Runs all three steps.
    pub fn solve<F>(&mut self, injection: F, cutting_branches: &mut [CuttingBranch]) -> Result<&VoltageMap>
    where
        F: Fn(&Node) -> Complex64,
    {
        self.open_circuit_step(injection)?;
        self.cutting_current_step(cutting_branches)?;
        self.voltage_reconstruction_step(cutting_branches)
    }

    /// Step 1: solves every sub-area in isolation with the bus current
    /// injections given by `injection`, treating the cutting branches as
    /// open.
    pub fn open_circuit_step<F>(&mut self, injection: F) -> Result<&VoltageMap>
    where
        F: Fn(&Node) -> Complex64,
    {
        let net = self.net;
        self.stage = Stage::Initial;
        self.open_circuit.clear();

        for area in self.subareas.iter_mut() {
            let nodes: Vec<usize> = (0..net.node_count())
                .filter(|&i| net.node_active(i) && net.flag(i) == area.flag)
                .collect();
            if nodes.is_empty() {
                return Err(TearError::Configuration(format!(
                    "sub-area {} has no buses",
                    area.flag
                )));
            }

            let mut sys = AdmittanceSystem::build(net, &nodes, &self.torn);
            for &k in &nodes {
                sys.set_injection(k, injection(net.node(k)));
            }
            let v = sys.solve(self.solver, &format!("sub-area {}", area.flag))?;
            log::debug!("sub-area {}: {} buses solved", area.flag, nodes.len());

            for (&k, v) in nodes.iter().zip(v) {
                self.open_circuit.insert(net.node(k).id.clone(), v);
            }
            area.system = Some(sys);
            area.sensitivity.clear();
            area.equivalent_impedance.clear();
        }

        let missing: Vec<String> = net
            .nodes()
            .iter()
            .filter(|n| n.active && !self.open_circuit.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(TearError::PartitionIncomplete { nodes: missing });
        }
        log::trace!("Voc: {}", format_voltage_map(&self.open_circuit, false));

        self.voltage = self.open_circuit.clone();
        self.stage = Stage::OpenCircuit;
        Ok(&self.voltage)
    }

    /// Step 2: computes the current flowing through every cutting branch.
    ///
    /// Each sub-area is reduced to its Norton equivalent at the interface
    /// buses, then the cutting branch currents are solved simultaneously
    /// from the open-circuit voltage differences across the cuts. The
    /// currents are written to `cutting_branches`, positive from the from
    /// side to the to side.
    pub fn cutting_current_step(&mut self, cutting_branches: &mut [CuttingBranch]) -> Result<()> {
        if self.stage < Stage::OpenCircuit {
            return Err(TearError::Sequence(
                "cutting branch currents need the open-circuit voltages".to_string(),
            ));
        }
        let net = self.net;

        for area in self.subareas.iter_mut() {
            let context = format!("sub-area {} equivalent", area.flag);
            let sys = area
                .system
                .as_ref()
                .ok_or_else(|| TearError::Sequence(format!("sub-area {} not solved", area.flag)))?;

            let mut locals = Vec::with_capacity(area.interface_node_ids.len());
            for id in &area.interface_node_ids {
                let local = net
                    .node_index(id)
                    .and_then(|k| sys.local_index(k))
                    .ok_or_else(|| {
                        TearError::Configuration(format!(
                            "interface bus \"{}\" is not in sub-area {}",
                            id, area.flag
                        ))
                    })?;
                locals.push(local);
            }

            let mut columns = Vec::with_capacity(locals.len());
            for &i in &locals {
                columns.push(sys.solve_unit(self.solver, i, &context)?);
            }
            area.equivalent_impedance = locals
                .iter()
                .map(|&r| columns.iter().map(|col| col[r]).collect())
                .collect();
            area.sensitivity = columns;
        }

        let cuts = self.resolve_cuts(cutting_branches)?;
        let nc = cuts.len();

        //   V_p - V_q = z_b * I_b   for every cut b = (p, q), with
        //   V = Voc + Z * (injections of all cut currents)
        let mut a = vec![vec![Complex64::default(); nc]; nc];
        let mut rhs = Vec::with_capacity(nc);
        for (b, cb) in cuts.iter().enumerate() {
            for (b2, cb2) in cuts.iter().enumerate() {
                let entering = self.z(cb.from, cb.from_area, cb2.to, cb2.to_area)
                    - self.z(cb.to, cb.to_area, cb2.to, cb2.to_area);
                let leaving = self.z(cb.from, cb.from_area, cb2.from, cb2.from_area)
                    - self.z(cb.to, cb.to_area, cb2.from, cb2.from_area);
                a[b][b2] = leaving - entering;
            }
            a[b][b] += cb.z_series;

            let v_from = self.open_circuit_at(cb.from)?;
            let v_to = self.open_circuit_at(cb.to)?;
            rhs.push(v_from - v_to);
        }

        let currents = solve_dense(&a, &rhs, self.solver, "cutting branch coupling")?;
        for ((cbra, cut), cur) in cutting_branches.iter_mut().zip(&cuts).zip(currents) {
            cbra.from_area_flag = self.subareas[cut.from_area].flag;
            cbra.to_area_flag = self.subareas[cut.to_area].flag;
            cbra.current = Some(cur);
            log::debug!("cutting branch {}: {}", cbra.branch_id, format_complex(&cur));
        }

        self.stage = Stage::CuttingCurrent;
        Ok(())
    }

    /// Step 3: superposes the voltage change caused by the cutting branch
    /// currents on the open-circuit voltages.
    pub fn voltage_reconstruction_step(&mut self, cutting_branches: &[CuttingBranch]) -> Result<&VoltageMap> {
        if self.stage < Stage::CuttingCurrent {
            return Err(TearError::Sequence(
                "voltage reconstruction needs the cutting branch currents".to_string(),
            ));
        }
        let net = self.net;
        let cuts = self.resolve_cuts(cutting_branches)?;

        // net current injected at each interface bus, per sub-area
        let mut injections: Vec<Vec<Complex64>> = self
            .subareas
            .iter()
            .map(|a| vec![Complex64::default(); a.interface_node_ids.len()])
            .collect();
        for (cbra, cut) in cutting_branches.iter().zip(&cuts) {
            let cur = cbra.current.ok_or_else(|| {
                TearError::Sequence(format!("no current for cutting branch {}", cbra.branch_id))
            })?;
            let i = self.interface_position(cut.from_area, cut.from)?;
            injections[cut.from_area][i] -= cur;
            let j = self.interface_position(cut.to_area, cut.to)?;
            injections[cut.to_area][j] += cur;
        }

        self.voltage = self.open_circuit.clone();
        for (area, inj) in self.subareas.iter().zip(&injections) {
            let sys = area
                .system
                .as_ref()
                .ok_or_else(|| TearError::Sequence(format!("sub-area {} not solved", area.flag)))?;
            for (i, &k) in sys.nodes().iter().enumerate() {
                let dv: Complex64 = area
                    .sensitivity
                    .iter()
                    .zip(inj)
                    .map(|(col, &cur)| col[i] * cur)
                    .sum();
                if let Some(v) = self.voltage.get_mut(&net.node(k).id) {
                    *v += dv;
                }
            }
        }
        log::trace!("V: {}", format_voltage_map(&self.voltage, true));

        self.stage = Stage::Reconstructed;
        Ok(&self.voltage)
    }

    fn resolve_cuts(&self, cutting_branches: &[CuttingBranch]) -> Result<Vec<Cut>> {
        let net = self.net;
        resolve_branches(net, cutting_branches)?
            .into_iter()
            .map(|e| {
                let br = net.edge(e);
                let (y_s, _, _) = br.torn_parts();
                Ok(Cut {
                    from: br.from,
                    to: br.to,
                    from_area: self.area_of(br.from)?,
                    to_area: self.area_of(br.to)?,
                    z_series: Complex64::new(1.0, 0.0) / y_s,
                })
            })
            .collect()
    }

    fn open_circuit_at(&self, bus: usize) -> Result<Complex64> {
        let id = self.net.node_id(bus);
        self.open_circuit.get(id).copied().ok_or_else(|| {
            TearError::Sequence(format!("no open-circuit voltage at bus \"{}\"", id))
        })
    }

    fn area_of(&self, bus: usize) -> Result<usize> {
        let flag = self.net.flag(bus);
        self.subareas
            .iter()
            .position(|a| a.flag == flag)
            .ok_or_else(|| {
                TearError::Configuration(format!(
                    "bus \"{}\" flag {} matches no sub-area",
                    self.net.node_id(bus),
                    flag
                ))
            })
    }

    fn interface_position(&self, area: usize, bus: usize) -> Result<usize> {
        let subarea = &self.subareas[area];
        let id = self.net.node_id(bus);
        subarea.interface_index(id).ok_or_else(|| {
            TearError::Configuration(format!(
                "bus \"{}\" is not an interface bus of sub-area {}",
                id, subarea.flag
            ))
        })
    }

    // Voltage at bus `x` per unit current injected at interface bus `y`.
    // Zero when the two buses lie in different sub-areas.
    fn z(&self, x: usize, x_area: usize, y: usize, y_area: usize) -> Complex64 {
        if x_area != y_area {
            return Complex64::default();
        }
        let area = &self.subareas[x_area];
        let col = area.interface_index(self.net.node_id(y));
        let row = area.system.as_ref().and_then(|sys| sys.local_index(x));
        match (col, row) {
            (Some(c), Some(r)) => area.sensitivity[c][r],
            _ => Complex64::default(),
        }
    }
}
