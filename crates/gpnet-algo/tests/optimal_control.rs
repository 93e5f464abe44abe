//! Optimal control of gas networks with a compressor station.

use gpnet_algo::factory::{ComponentFactory, ComponentRecord};
use gpnet_algo::newton::NewtonConfig;
use gpnet_algo::optim::{
    ImplicitOptimizer, Optimizer, PenaltyConfig, PenaltyLbfgsSolver, ReducedOptimizer, TimeGrids,
};
use gpnet_algo::problem::NetworkProblem;
use gpnet_algo::{initial_state, TimeEvolver};
use gpnet_core::{Interpolating, TimeData};
use serde_json::json;

/// `RUST_LOG=gpnet_algo=debug` shows the penalty rounds.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compressor_into_sink() -> NetworkProblem {
    let records: Vec<ComponentRecord> = serde_json::from_value(json!([
        {"id": 1, "type": "Source", "params": {
            "boundary_type": "pressure",
            "boundary": [{"time": 0.0, "values": [60.0]}]
        }},
        {"id": 2, "type": "ConstraintSink", "params": {
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [10.0]}],
            "pressure_lower": 65.0,
            "pressure_upper": 100.0
        }},
        {"id": 3, "type": "Compressorstation", "from": 1, "to": 2, "params": {
            "initial_values": [
                {"x": 0.0, "values": [60.0, 10.0]},
                {"x": 1.0, "values": [61.0, 10.0]}
            ],
            "initial_control": [{"time": 0.0, "values": [1.0]}],
            "control_lower": 0.0,
            "control_upper": 20.0
        }}
    ]))
    .unwrap();
    NetworkProblem::from_records(&ComponentFactory::gas(), &records).unwrap()
}

fn compressor_pipe_sink() -> NetworkProblem {
    let records: Vec<ComponentRecord> = serde_json::from_value(json!([
        {"id": 1, "type": "Source", "params": {
            "boundary_type": "pressure",
            "boundary": [{"time": 0.0, "values": [60.0]}]
        }},
        {"id": 2, "type": "Innode"},
        {"id": 3, "type": "ConstraintSink", "params": {
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [100.0]}],
            "pressure_lower": 50.0,
            "pressure_upper": 80.0
        }},
        {"id": 4, "type": "Compressorstation", "from": 1, "to": 2, "params": {
            "initial_values": [
                {"x": 0.0, "values": [60.0, 100.0]},
                {"x": 1.0, "values": [62.0, 100.0]}
            ],
            "initial_control": [{"time": 0.0, "values": [2.0]}],
            "control_lower": 0.0,
            "control_upper": 30.0
        }},
        {"id": 5, "type": "Pipe", "from": 2, "to": 3, "params": {
            "length": 10000.0,
            "diameter": 0.5,
            "desired_delta_x": 5000.0,
            "initial_values": [
                {"x": 0.0, "values": [62.0, 100.0]},
                {"x": 10000.0, "values": [61.0, 100.0]}
            ]
        }}
    ]))
    .unwrap();
    NetworkProblem::from_records(&ComponentFactory::gas(), &records).unwrap()
}

fn reduced(problem: NetworkProblem, time: &TimeData) -> ReducedOptimizer<NetworkProblem> {
    let x0 = initial_state(&problem).unwrap();
    let grids = TimeGrids::uniform(time).unwrap();
    ReducedOptimizer::new(problem, grids, x0)
        .unwrap()
        .with_evolver(TimeEvolver::new(NewtonConfig::default().with_tolerance(1e-11)))
}

fn start(optimizer: &dyn Optimizer) -> Vec<f64> {
    let mut x = vec![0.0; optimizer.variable_count()];
    optimizer.initial_point(&mut x).unwrap();
    x
}

#[test]
fn reduced_jacobian_matches_finite_differences_through_a_pipe() {
    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let mut opt = reduced(compressor_pipe_sink(), &time);
    let x = vec![2.0, 3.0, 4.0, 5.0];
    let nnz = opt.jacobian_nnz();
    let (mut rows, mut cols) = (vec![0; nnz], vec![0; nnz]);
    opt.jacobian_indices(&mut rows, &mut cols).unwrap();
    let mut values = vec![0.0; nnz];
    opt.jacobian_values(&x, &mut values).unwrap();

    let m = opt.constraint_count();
    let h = 1e-3;
    for k in 0..nnz {
        let mut at = |shift: f64| {
            let mut y = x.clone();
            y[cols[k]] += shift;
            let mut g = vec![0.0; m];
            opt.constraints(&y, &mut g).unwrap();
            g[rows[k]]
        };
        let fd = (at(h) - at(-h)) / (2.0 * h);
        assert!(
            (values[k] - fd).abs() <= 1e-4 * (1.0 + fd.abs()),
            "entry ({}, {}): {} vs fd {fd}",
            rows[k],
            cols[k],
            values[k]
        );
    }
}

#[test]
fn jacobian_pattern_does_not_depend_on_controls() {
    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let mut opt = reduced(compressor_pipe_sink(), &time);
    let nnz = opt.jacobian_nnz();
    let mut first = vec![0.0; nnz];
    let mut second = vec![0.0; nnz];
    opt.jacobian_values(&[2.0, 2.0, 2.0, 2.0], &mut first).unwrap();
    let pattern = opt.constraint_jacobian().layout().clone();
    opt.jacobian_values(&[6.0, 1.0, 9.0, 4.0], &mut second).unwrap();
    assert_eq!(&pattern, opt.constraint_jacobian().layout());
    assert_eq!(opt.jacobian_nnz(), nnz);
}

#[test]
fn changing_the_last_control_resolves_only_the_last_step() {
    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let mut opt = reduced(compressor_pipe_sink(), &time);
    let mut x = vec![2.0, 3.0, 4.0, 5.0];
    opt.objective(&x).unwrap();
    let solved = opt.state_cache().solves();
    assert_eq!(solved, 3);

    opt.objective(&x).unwrap();
    assert_eq!(opt.state_cache().solves(), solved);

    x[3] = 6.0;
    opt.objective(&x).unwrap();
    assert_eq!(opt.state_cache().solves(), solved + 1);
}

#[test]
fn both_formulations_agree_at_the_initial_controls() {
    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let problem = compressor_pipe_sink();
    let x0 = initial_state(&problem).unwrap();
    let mut full = ImplicitOptimizer::new(problem, TimeGrids::uniform(&time).unwrap(), x0).unwrap();
    let mut small = reduced(compressor_pipe_sink(), &time);

    let z = start(&full);
    let u = start(&small);
    assert_eq!(&z[..u.len()], u.as_slice());

    let mut g_full = vec![0.0; full.constraint_count()];
    full.constraints(&z, &mut g_full).unwrap();
    let mut g_small = vec![0.0; small.constraint_count()];
    small.constraints(&u, &mut g_small).unwrap();
    let offset = g_full.len() - g_small.len();
    assert!(g_full[..offset].iter().all(|r| r.abs() < 1e-6));
    for (a, b) in g_full[offset..].iter().zip(&g_small) {
        assert!((a - b).abs() < 1e-6);
    }
    let objective_full = full.objective(&z).unwrap();
    let objective_small = small.objective(&u).unwrap();
    assert!((objective_full - objective_small).abs() < 1e-9);

    let states = small.state_trajectory(&u).unwrap();
    let states_full = full.state_trajectory(&z).unwrap();
    for i in 0..states.size() {
        for (a, b) in states.vector_at_index(i).iter().zip(states_full.vector_at_index(i)) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}

#[test]
fn penalty_solver_lifts_the_sink_pressure_to_its_bound() {
    init_logging();
    let time = TimeData::new(0.0, 3.0, 1.0).unwrap();
    let mut opt = reduced(compressor_into_sink(), &time);
    let solver = PenaltyLbfgsSolver::new(PenaltyConfig::default().with_max_iterations(1000));
    let solution = solver.solve(&mut opt).unwrap();

    // Weights 1, 1, 1/2 for t = 1, 2, 3; the control at t = 0 has no effect.
    for u in &solution.decision[1..] {
        assert!((u - 5.0).abs() < 1e-3, "{:?}", solution.decision);
    }
    assert!((solution.objective - 12.5).abs() < 1e-2);
    for pressure in &solution.constraints {
        assert!(*pressure > 65.0 - 1e-4);
    }
}

#[test]
fn penalty_solver_handles_the_full_space_formulation() {
    init_logging();
    let time = TimeData::new(0.0, 3.0, 1.0).unwrap();
    let problem = compressor_into_sink();
    let x0 = initial_state(&problem).unwrap();
    let mut opt = ImplicitOptimizer::new(problem, TimeGrids::uniform(&time).unwrap(), x0).unwrap();
    let solver = PenaltyLbfgsSolver::new(PenaltyConfig::default().with_max_iterations(2000));
    let solution = solver.solve(&mut opt).unwrap();

    let controls = opt.control_trajectory(&solution.decision).unwrap();
    for i in 1..controls.size() {
        assert!((controls.vector_at_index(i)[0] - 5.0).abs() < 1e-2);
    }
    assert!((solution.objective - 12.5).abs() < 5e-2);
}

#[cfg(feature = "solver-ipopt")]
#[test]
fn ipopt_finds_the_same_compressor_schedule() {
    use gpnet_algo::optim::{IpoptConfig, IpoptSolver};

    let time = TimeData::new(0.0, 3.0, 1.0).unwrap();
    let mut opt = reduced(compressor_into_sink(), &time);
    let solution = IpoptSolver::new(IpoptConfig::default()).solve(&mut opt).unwrap();
    for u in &solution.decision[1..] {
        assert!((u - 5.0).abs() < 1e-4);
    }
}
