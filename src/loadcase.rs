use crate::network::{Network, Node};
use anyhow::{format_err, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

fn default_base_mva() -> f64 {
    100.0
}

fn default_status() -> bool {
    true
}

/// Network case as read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCase {
    #[serde(rename = "baseMVA", alias = "base_mva", default = "default_base_mva")]
    pub base_mva: f64,

    pub buses: Vec<CaseBus>,
    pub branches: Vec<CaseBranch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseBus {
    pub id: String,

    /// Real and reactive power demand (MW, MVAr).
    #[serde(default)]
    pub pd: f64,
    #[serde(default)]
    pub qd: f64,

    /// Shunt conductance and susceptance (MW, MVAr at V = 1.0 p.u.).
    #[serde(default)]
    pub gs: f64,
    #[serde(default)]
    pub bs: f64,

    /// Current injection (p.u.) as `[re, im]`.
    #[serde(default)]
    pub injection: [f64; 2],

    #[serde(default = "default_status")]
    pub status: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseBranch {
    /// Defaults to `"{from}->{to}(1)"`.
    #[serde(default)]
    pub id: Option<String>,

    pub from: String,
    pub to: String,

    #[serde(default)]
    pub r: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub b: f64,

    /// Off nominal turns ratio (0 = 1.0).
    #[serde(default)]
    pub tap: f64,

    #[serde(default = "default_status")]
    pub status: bool,
}

impl CaseBranch {
    pub fn branch_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}->{}(1)", self.from, self.to),
        }
    }
}

impl NetworkCase {
    /// Builds the network graph. Loads are converted to constant
    /// impedance at nominal voltage and lumped with the bus shunts.
    pub fn to_network(&self) -> Result<Network> {
        if self.base_mva <= 0.0 {
            return Err(format_err!("base MVA must be positive: {}", self.base_mva));
        }
        let mut net = Network::new();
        for bus in &self.buses {
            let y_shunt = Complex64::new(bus.gs + bus.pd, bus.bs - bus.qd) / self.base_mva;
            let i = net.add_node(Node::new(bus.id.clone(), y_shunt))?;
            if !bus.status {
                net.set_node_active(i, false);
            }
        }
        for br in &self.branches {
            let e = net.add_branch(&br.branch_id(), &br.from, &br.to, br.r, br.x, br.b, br.tap)?;
            if !br.status {
                net.set_branch_active(e, false);
            }
        }
        log::info!(
            "case: {} buses, {} branches",
            net.nodes().len(),
            net.edges().len()
        );
        Ok(net)
    }

    /// Bus current injections keyed by bus id.
    pub fn injections(&self) -> HashMap<String, Complex64> {
        self.buses
            .iter()
            .map(|bus| {
                (
                    bus.id.clone(),
                    Complex64::new(bus.injection[0], bus.injection[1]),
                )
            })
            .collect()
    }
}

/// Reads a network case from a JSON file.
pub fn load_case(case_path: &Path) -> Result<NetworkCase> {
    let file = File::open(case_path)
        .map_err(|err| format_err!("unable to open {}: {}", case_path.display(), err))?;
    let case: NetworkCase = serde_json::from_reader(BufReader::new(file))?;
    Ok(case)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::math::cequals;
    use crate::network::Topology;

    const CASE: &str = r#"{
        "baseMVA": 100.0,
        "buses": [
            {"id": "1", "injection": [1.5, -0.2]},
            {"id": "2", "pd": 20.0, "qd": 10.0, "bs": 5.0},
            {"id": "3", "status": false}
        ],
        "branches": [
            {"from": "1", "to": "2", "r": 0.01, "x": 0.1, "b": 0.02},
            {"id": "T1", "from": "2", "to": "3", "x": 0.2, "tap": 0.95, "status": false}
        ]
    }"#;

    #[test]
    fn builds_network_from_json() -> Result<()> {
        let case: NetworkCase = serde_json::from_str(CASE)?;
        let net = case.to_network()?;

        assert_eq!(net.nodes().len(), 3);
        let bus2 = net.node(net.node_index("2").unwrap());
        assert!(cequals(bus2.y_shunt, cmplx!(0.2, -0.05), 1e-12));
        assert!(!net.node(2).active);

        let e = net.edge_index("1->2(1)").unwrap();
        assert!(net.is_active(e));
        let t = net.branch("T1").unwrap();
        assert!(!t.active);
        assert_eq!(t.tap, 0.95);

        let inj = case.injections();
        assert_eq!(inj["1"], cmplx!(1.5, -0.2));
        assert_eq!(inj["2"], cmplx!());
        Ok(())
    }

    #[test]
    fn rejects_unknown_bus() {
        let case = NetworkCase {
            base_mva: 100.0,
            buses: vec![CaseBus {
                id: "1".to_string(),
                status: true,
                ..Default::default()
            }],
            branches: vec![CaseBranch {
                from: "1".to_string(),
                to: "9".to_string(),
                x: 0.1,
                status: true,
                ..Default::default()
            }],
        };
        assert!(case.to_network().is_err());
    }

    #[test]
    fn missing_file() {
        assert!(load_case(Path::new("no/such/case.json")).is_err());
    }
}
