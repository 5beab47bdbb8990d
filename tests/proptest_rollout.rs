//! Property tests for the costmap lookup and the batched rollout.

use bev_mppi::config::{KinematicConfig, MapConfig};
use bev_mppi::dynamics::BatchDynamics;
use bev_mppi::state::{self, State, NX, STEERING, THROTTLE};
use bev_mppi::mppi::importance_weights;
use bev_mppi::{Costmap, KinematicBicycle};
use ndarray::{Array1, Array3};
use proptest::prelude::*;

fn arb_map() -> impl Strategy<Value = MapConfig> {
    (1usize..80, 0.05..1.0f64).prop_map(|(n, resolution)| MapConfig {
        size: n as f64 * resolution,
        resolution,
    })
}

fn arb_coord() -> impl Strategy<Value = f64> {
    prop_oneof![
        -50.0..50.0f64,
        prop::num::f64::ANY,
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

proptest! {
    /// Any position, finite or not, reads a cell inside the grid.
    #[test]
    fn lookup_never_leaves_the_grid(map in arb_map(), x in arb_coord(), y in arb_coord()) {
        let costmap = Costmap::zeros(&map).unwrap();
        let n = costmap.cells_per_side();
        let (row, col) = costmap.clamped_index(x, y);
        prop_assert!(row < n && col < n);
        prop_assert_eq!(costmap.cost_at(x, y), 0.0);
    }

    /// The strict lookup agrees with the clamped one wherever it succeeds.
    #[test]
    fn strict_lookup_is_consistent(x in -15.0..15.0f64, y in -15.0..15.0f64) {
        let map = MapConfig { size: 20.0, resolution: 0.4 };
        let costmap = Costmap::from_fn(&map, |cx, cy| cx + 100.0 * cy).unwrap();
        match costmap.index(x, y) {
            Some(idx) => {
                prop_assert_eq!(idx, costmap.clamped_index(x, y));
                prop_assert_eq!(costmap.try_cost(x, y).unwrap(), costmap.cost_at(x, y));
            }
            None => {
                prop_assert!(x.abs() >= 10.0 || y.abs() >= 10.0);
                prop_assert!(costmap.try_cost(x, y).is_err());
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Applied curvature and speed never change faster than the rate limits,
    /// whatever the commanded sequence and the previous action.
    #[test]
    fn rollout_respects_rate_limits(
        actions in prop::collection::vec(-1.0..=1.0f64, 8 * 12 * 2),
        prev in (-1.0..=1.0f64, -1.0..=1.0f64),
        yaw in -3.2..3.2f64,
    ) {
        let dynamics = KinematicBicycle::new(&KinematicConfig::default()).unwrap();
        let actions = Array3::from_shape_vec((8, 12, 2), actions).unwrap();
        let mut s = state::with_last_action(&State::zeros(), prev.0, prev.1);
        s[state::YAW] = yaw;
        let nominal = Array1::from_iter(s.iter().copied());
        let states = nominal.broadcast((1, 8, 12, NX)).unwrap().to_owned();
        let out = dynamics.rollout(states, actions.view()).unwrap();

        let (cm, vm) = (dynamics.curvature_max(), dynamics.wheelspeed_max());
        let anchor = dynamics.anchor(&s).applied;
        for lane in out.index_axis(ndarray::Axis(0), 0).outer_iter() {
            let (mut c_prev, mut v_prev) = (anchor[0], anchor[1]);
            for row in lane.outer_iter() {
                prop_assert!(row.iter().all(|v| v.is_finite()));
                let (c, v) = (row[STEERING] * cm, row[THROTTLE] * vm);
                prop_assert!((c - c_prev).abs() <= dynamics.curvature_rate() + 1e-9);
                prop_assert!((v - v_prev).abs() <= dynamics.speed_rate() + 1e-9);
                prop_assert!(row[STEERING].abs() <= 1.0 + 1e-12);
                prop_assert!(row[THROTTLE].abs() <= 1.0 + 1e-12);
                c_prev = c;
                v_prev = v;
            }
        }
    }
}

proptest! {
    /// Weights form a distribution and favour cheaper samples.
    #[test]
    fn weights_are_a_distribution(
        costs in prop::collection::vec(0.0..1e6f64, 1..200),
        lambda in 1e-3..10.0f64,
    ) {
        let costs = Array1::from_vec(costs);
        let w = importance_weights(costs.view(), lambda).unwrap();
        prop_assert!((w.sum() - 1.0).abs() < 1e-9);
        prop_assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
        let best = costs.iter().enumerate().fold(0, |b, (i, c)| if *c < costs[b] { i } else { b });
        prop_assert!(w.iter().all(|v| *v <= w[best] + 1e-12));
    }
}
