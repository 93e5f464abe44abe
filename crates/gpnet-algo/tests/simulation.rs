//! Forward simulation of small gas and power networks built from records.

use gpnet_algo::factory::{ComponentFactory, ComponentRecord};
use gpnet_algo::model::StepContext;
use gpnet_algo::problem::{IndexRange, NetworkProblem, OptimizableProblem};
use gpnet_algo::{initial_state, TimeEvolver};
use gpnet_core::{ComponentId, Interpolating, InterpolatingVector, TimeData};
use serde_json::json;

fn records(value: serde_json::Value) -> Vec<ComponentRecord> {
    serde_json::from_value(value).unwrap()
}

fn gas_line() -> Vec<ComponentRecord> {
    records(json!([
        {"id": 1, "type": "Source", "params": {
            "boundary_type": "pressure",
            "boundary": [{"time": 0.0, "values": [60.0]}]
        }},
        {"id": 2, "type": "Sink", "params": {
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [100.0]}]
        }},
        {"id": 3, "type": "Pipe", "from": 1, "to": 2, "params": {
            "length": 10000.0,
            "diameter": 0.5,
            "desired_delta_x": 5000.0,
            "initial_values": [
                {"x": 0.0, "values": [60.0, 100.0]},
                {"x": 10000.0, "values": [59.0, 100.0]}
            ]
        }}
    ]))
}

fn simulate(problem: &NetworkProblem, time: &TimeData) -> InterpolatingVector {
    let x0 = initial_state(problem).unwrap();
    let controls = InterpolatingVector::new(time.time_points(), 0).unwrap();
    let mut states = InterpolatingVector::new(time.time_points(), x0.len()).unwrap();
    TimeEvolver::default()
        .simulate(problem, &x0, &controls, &mut states)
        .unwrap();
    states
}

fn max_step_residual(problem: &NetworkProblem, states: &InterpolatingVector) -> f64 {
    let mut residual = vec![0.0; problem.number_of_equations()];
    let mut worst: f64 = 0.0;
    for i in 1..states.size() {
        let ctx = StepContext {
            last_time: states.interpolation_point_at_index(i - 1),
            new_time: states.interpolation_point_at_index(i),
            last_state: states.vector_at_index(i - 1),
            new_state: states.vector_at_index(i),
            control: &[],
        };
        problem.evaluate(&mut residual, &ctx).unwrap();
        worst = residual.iter().fold(worst, |m, r| m.max(r.abs()));
    }
    worst
}

fn report_value(problem: &NetworkProblem, state: &[f64], id: usize, label: &str) -> f64 {
    problem
        .state_report(state)
        .into_iter()
        .find(|r| r.id == ComponentId::new(id))
        .and_then(|r| r.values.into_iter().find(|v| v.label == label))
        .map(|v| v.value)
        .unwrap()
}

#[test]
fn gas_line_settles_on_its_boundaries() {
    let problem = NetworkProblem::from_records(&ComponentFactory::gas(), &gas_line()).unwrap();
    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let states = simulate(&problem, &time);

    assert_eq!(states.size(), 4);
    assert!(max_step_residual(&problem, &states) < 1e-8);

    let last = states.vector_at_index(3);
    let inlet = report_value(&problem, last, 3, "pressure@0");
    let middle = report_value(&problem, last, 3, "pressure@5000");
    let outlet = report_value(&problem, last, 3, "pressure@10000");
    let outflow = report_value(&problem, last, 3, "flow@10000");
    assert!((inlet - 60.0).abs() < 1e-8);
    assert!(inlet > middle && middle > outlet, "{inlet} {middle} {outlet}");
    assert!((outflow - 100.0).abs() < 1e-8);
}

#[test]
fn state_segments_partition_the_index_space() {
    let problem = NetworkProblem::from_records(&ComponentFactory::gas(), &gas_line()).unwrap();
    let counts = problem.counts();
    let mut ranges: Vec<IndexRange> = problem
        .components()
        .filter_map(|(id, _)| problem.ranges(id))
        .map(|r| r.states)
        .filter(|r| !r.is_empty())
        .collect();
    ranges.sort_by_key(|r| r.start);

    let mut next = 0;
    for range in &ranges {
        assert_eq!(range.start, next);
        next = range.end;
    }
    assert_eq!(next, counts.states);
    assert_eq!(counts.equations, counts.states);
}

#[test]
fn building_twice_gives_the_same_layout() {
    let factory = ComponentFactory::gas();
    let first = NetworkProblem::from_records(&factory, &gas_line()).unwrap();
    let second = NetworkProblem::from_records(&factory, &gas_line()).unwrap();
    assert_eq!(first.state_labels(), second.state_labels());
    for id in 1..=3 {
        assert_eq!(
            first.ranges(ComponentId::new(id)),
            second.ranges(ComponentId::new(id))
        );
    }
}

#[test]
fn two_bus_power_flow_converges() {
    let records = records(json!([
        {"id": 1, "type": "Vphinode", "params": {"boundary": [{"time": 0.0, "values": [1.0, 0.0]}]}},
        {"id": 2, "type": "PQnode", "params": {"boundary": [{"time": 0.0, "values": [-0.5, -0.2]}]}},
        {"id": 3, "type": "Transmissionline", "from": 1, "to": 2,
         "params": {"conductance": 0.99, "susceptance": -9.9}}
    ]));
    let problem = NetworkProblem::from_records(&ComponentFactory::power(), &records).unwrap();
    let time = TimeData::new(0.0, 2.0, 1.0).unwrap();
    let states = simulate(&problem, &time);

    assert!(max_step_residual(&problem, &states) < 1e-8);
    let last = states.vector_at_index(states.size() - 1);
    let labels = problem.state_labels();
    let v2 = last[labels.iter().position(|l| l == "2:V").unwrap()];
    let phi2 = last[labels.iter().position(|l| l == "2:phi").unwrap()];
    assert!(v2 < 1.0 && v2 > 0.9, "V2 = {v2}");
    assert!(phi2 < 0.0, "phi2 = {phi2}");
}

#[test]
fn gas_fired_plant_draws_what_the_grid_needs() {
    let records = records(json!([
        {"id": 1, "type": "Source", "params": {
            "boundary_type": "pressure",
            "boundary": [{"time": 0.0, "values": [60.0]}]
        }},
        {"id": 2, "type": "Innode"},
        {"id": 3, "type": "Vphinode", "params": {"boundary": [{"time": 0.0, "values": [1.0, 0.0]}]}},
        {"id": 4, "type": "PQnode", "params": {"boundary": [{"time": 0.0, "values": [-0.5, -0.2]}]}},
        {"id": 5, "type": "Pipe", "from": 1, "to": 2, "params": {
            "length": 10000.0,
            "diameter": 0.5,
            "desired_delta_x": 5000.0,
            "initial_values": [
                {"x": 0.0, "values": [60.0, 100.0]},
                {"x": 10000.0, "values": [59.0, 100.0]}
            ]
        }},
        {"id": 6, "type": "Gaspowerconnection", "from": 2, "to": 3, "params": {
            "gas_to_power": 0.005,
            "initial_values": [59.0, 100.0]
        }},
        {"id": 7, "type": "Transmissionline", "from": 3, "to": 4,
         "params": {"conductance": 0.99, "susceptance": -9.9}}
    ]));
    assert!(NetworkProblem::from_records(&ComponentFactory::gas(), &records).is_err());
    let problem = NetworkProblem::from_records(&ComponentFactory::full(), &records).unwrap();
    let counts = problem.counts();
    assert_eq!(counts.equations, counts.states);

    let time = TimeData::new(0.0, 180.0, 60.0).unwrap();
    let states = simulate(&problem, &time);
    assert!(max_step_residual(&problem, &states) < 1e-8);

    let last = states.vector_at_index(states.size() - 1);
    let burnt = report_value(&problem, last, 6, "flow");
    let generated = report_value(&problem, last, 6, "generated_power");
    // the slack bus covers the 0.5 load plus line losses
    assert!(generated > 0.5 && generated < 0.51, "P = {generated}");
    assert!((generated - 0.005 * burnt).abs() < 1e-12);
    assert!((report_value(&problem, last, 5, "flow@10000") - burnt).abs() < 1e-8);
    assert!(
        (report_value(&problem, last, 5, "pressure@10000") - report_value(&problem, last, 6, "pressure"))
            .abs()
            < 1e-8
    );
}

#[test]
fn plant_must_end_at_a_power_bus() {
    let records = records(json!([
        {"id": 1, "type": "Source", "params": {
            "boundary_type": "pressure",
            "boundary": [{"time": 0.0, "values": [60.0]}]
        }},
        {"id": 2, "type": "Sink", "params": {
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [10.0]}]
        }},
        {"id": 3, "type": "Gaspowerconnection", "from": 1, "to": 2, "params": {
            "gas_to_power": 0.005,
            "initial_values": [60.0, 10.0]
        }}
    ]));
    let err = NetworkProblem::from_records(&ComponentFactory::full(), &records).unwrap_err();
    assert!(err.to_string().contains("power bus"), "{err}");
}
