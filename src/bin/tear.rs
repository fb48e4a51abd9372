use anyhow::{format_err, Result};
use clap::Parser;
use spsolve::rlu::RLU;
use std::path::PathBuf;
use tearing::debug::{format_complex, format_polar};
use tearing::math::norm_inf;
use tearing::{
    load_case, partition, solve_monolithic, CuttingBranch, PartitionOptBuilder, PiecewiseSolver,
};

/// Piecewise solution of network equations by tearing.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The input case file (JSON)
    #[arg(required = true)]
    input: PathBuf,

    /// Id of a branch to cut (repeatable)
    #[arg(short, long = "cut", required = true)]
    cuts: Vec<String>,

    /// Accept cutting branches with both ends in one sub-area.
    #[arg(long, default_value_t = false)]
    allow_internal_cuts: bool,

    /// Fail on malformed topology instead of skipping the branch.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Compare against a solution of the uncut network.
    #[arg(long, default_value_t = false)]
    verify: bool,

    /// Voltage tolerance used by --verify.
    #[arg(long, default_value_t = 1e-8)]
    tol: f64,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let case = load_case(&cli.input)?;
    let mut net = case.to_network()?;
    let injections = case.injections();
    let injection = |n: &tearing::Node| injections.get(&n.id).copied().unwrap_or_default();

    let solver = RLU::default();

    let reference = if cli.verify {
        Some(solve_monolithic(&net, injection, &solver)?)
    } else {
        None
    };

    let opt = PartitionOptBuilder::default()
        .strict_traversal(cli.strict)
        .allow_internal_cuts(cli.allow_internal_cuts)
        .build()?;

    let mut cutting: Vec<CuttingBranch> = cli.cuts.iter().map(CuttingBranch::new).collect();
    let subareas = partition(&mut net, &mut cutting, &opt)?;
    for area in &subareas {
        println!("{}", area);
    }

    let mut pw = PiecewiseSolver::new(&net, subareas, &cutting, &solver)?;
    let voltage = pw.solve(injection, &mut cutting)?;

    for cbra in &cutting {
        if let Some(current) = cbra.current {
            println!("{}: {}", cbra, format_complex(&current));
        }
    }
    for node in net.nodes().iter().filter(|n| n.active) {
        if let Some(v) = voltage.get(&node.id) {
            println!("{}: {}", node.id, format_polar(v));
        }
    }

    if let Some(reference) = reference {
        let mut diff = Vec::with_capacity(reference.len());
        for (id, v_ref) in &reference {
            let v = voltage
                .get(id)
                .ok_or_else(|| format_err!("no piecewise voltage for bus {}", id))?;
            diff.push(v - v_ref);
        }
        let max_err = norm_inf(&diff);
        log::info!("max voltage difference: {:e}", max_err);
        if max_err > cli.tol {
            return Err(format_err!(
                "piecewise solution differs from the full solution by {:e} (tol {:e})",
                max_err,
                cli.tol
            ));
        }
    }

    Ok(())
}
