//! Structural properties of the transition and observation matrices.

use approx::assert_abs_diff_eq;
use proptest::prelude::*;

use lymph_rust::{
    healthy_distribution, Graph, GraphSpec, ModalitySet, ObservationModel, StateSpace,
    TransitionMatrix,
};

fn chain_graph() -> Graph {
    Graph::new(
        GraphSpec::new()
            .tumor("T", &["I", "II", "III", "IV"])
            .lnl("I", &["II"])
            .lnl("II", &["III"])
            .lnl("III", &["IV"])
            .lnl("IV", &[]),
    )
    .unwrap()
}

fn probs(n: usize) -> impl Strategy<Value = Vec<f64>> {
    // include the exact boundaries alongside the interior
    prop::collection::vec(prop_oneof![Just(0.0), Just(1.0), 0.0f64..=1.0], n)
}

proptest! {
    #[test]
    fn rows_sum_to_one(p in probs(7)) {
        let graph = chain_graph();
        let space = StateSpace::for_graph(&graph).unwrap();
        let a = TransitionMatrix::build(&graph, &space, &p).unwrap();
        for i in 0..a.num_states() {
            let total: f64 = a.row(i).map(|(_, v)| v).sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn only_superset_transitions(p in probs(7)) {
        let graph = chain_graph();
        let space = StateSpace::for_graph(&graph).unwrap();
        let a = TransitionMatrix::build(&graph, &space, &p).unwrap();
        let dense = a.to_dense();
        for i in 0..space.num_states() {
            for j in 0..space.num_states() {
                if !space.state(j).is_superset_of(&space.state(i)) {
                    prop_assert_eq!(dense[[i, j]], 0.0);
                }
            }
        }
    }

    #[test]
    fn stored_entries_are_reachable(p in probs(7)) {
        let graph = chain_graph();
        let space = StateSpace::for_graph(&graph).unwrap();
        let a = TransitionMatrix::build(&graph, &space, &p).unwrap();
        for i in 0..space.num_states() {
            for (j, _) in a.row(i) {
                prop_assert!(space.is_reachable(&graph, space.state(i), space.state(j)));
            }
        }
    }

    #[test]
    fn observation_rows_sum_to_one(
        spec_a in 0.0f64..=1.0,
        sens_a in 0.0f64..=1.0,
        spec_b in 0.0f64..=1.0,
        sens_b in 0.0f64..=1.0,
    ) {
        let modalities =
            ModalitySet::from_pairs([("CT", [spec_a, sens_a]), ("MRI", [spec_b, sens_b])]).unwrap();
        let observation = ObservationModel::new(modalities, 3).unwrap();
        let space = StateSpace::new(3).unwrap();
        let b = observation.dense(&space).unwrap();
        for row in b.rows() {
            prop_assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn occupancy_round_trip() {
    let graph = chain_graph();
    let space = StateSpace::for_graph(&graph).unwrap();
    let a = TransitionMatrix::build(&graph, &space, &[0.3, 0.2, 0.1, 0.05, 0.4, 0.3, 0.2]).unwrap();
    let start = healthy_distribution(&space);

    let at_zero = a.occupancy(start.view(), 0).unwrap();
    assert_eq!(at_zero, start);

    let sequence = a.evolve(start.view(), 8).unwrap();
    for t in 0..8 {
        let direct = a.occupancy(start.view(), t).unwrap();
        let one_more = a.occupancy(direct.view(), 1).unwrap();
        for (x, y) in one_more.iter().zip(sequence.row(t + 1).iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(sequence.row(t).sum(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn certain_spread_without_logs() {
    let graph = chain_graph();
    let space = StateSpace::for_graph(&graph).unwrap();
    // everything spreads with certainty: one step from healthy involves
    // every LNL the tumor drains into directly
    let a = TransitionMatrix::build(&graph, &space, &[1.0; 7]).unwrap();
    let all = space.num_states() - 1;
    assert_eq!(a.get(0, all), 1.0);
    assert!(a.row(0).all(|(_, v)| v.is_finite()));

    let none = TransitionMatrix::build(&graph, &space, &[0.0; 7]).unwrap();
    assert_eq!(none.get(0, 0), 1.0);
    assert_eq!(none.nnz(), space.num_states());
}
