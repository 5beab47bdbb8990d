use bev_mppi::config::{Config, MapConfig};
use bev_mppi::state::{self, Goal, State, X};
use bev_mppi::{Costmap, KinematicBicycle, LearnedDynamics, Mppi, Phase, TerrainCost, TickOutcome, TransitionModel};
use ndarray::{Array2, ArrayView2};

fn controller(config: &Config) -> Mppi {
    Mppi::new(
        config,
        Box::new(KinematicBicycle::new(&config.dynamics).unwrap()),
        Box::new(TerrainCost::new(&config.cost)),
    )
    .unwrap()
}

#[test]
fn drives_toward_a_goal_on_flat_ground() {
    let config = Config::default();
    let plant = KinematicBicycle::new(&config.dynamics).unwrap();
    let mut mppi = controller(&config);
    mppi.set_costmap(Costmap::zeros(&config.map).unwrap()).unwrap();

    let mut x = State::zeros();
    let mut carry = plant.anchor(&x);
    for tick in 0..20 {
        mppi.set_goal(Goal::new(10.0, 0.0) - state::position(&x));
        let u = mppi.forward(&x).unwrap();
        assert_eq!(mppi.last_outcome(), Some(TickOutcome::Optimized));
        if tick == 0 {
            assert!(u[[0, 1]] > 0.0, "throttle {}", u[[0, 1]]);
            assert!(u[[0, 0]].abs() < 0.1, "steering {}", u[[0, 0]]);
        }
        x = plant.step(&x, &mut carry, u[[0, 0]], u[[0, 1]]);
        assert_eq!(mppi.last_action(), u.row(0));
    }
    assert!(x[X] > 0.0);
    assert!(x[state::Y].abs() < 0.5);
}

#[test]
fn steers_out_of_a_costly_strip() {
    let config = Config::default();
    let mut mppi = controller(&config);
    // y in [0, res) のセルだけコスト 1
    let res = config.map.resolution;
    let strip = Costmap::from_fn(&config.map, |_, y| if (0.0..res).contains(&y) { 1.0 } else { 0.0 }).unwrap();
    mppi.set_costmap(strip).unwrap();
    mppi.set_goal(Goal::new(10.0, 0.0));

    let u = mppi.forward(&State::zeros()).unwrap();
    assert_eq!(mppi.last_outcome(), Some(TickOutcome::Optimized));
    assert!(u[[0, 0]] < -0.01, "steering {}", u[[0, 0]]);
}

#[test]
fn same_seed_same_commands() {
    let mut config = Config::default();
    config.mppi.num_samples = 128;
    config.mppi.seed = 7;
    let mut a = controller(&config);
    let mut b = controller(&config);
    for mppi in [&mut a, &mut b] {
        mppi.set_goal(Goal::new(5.0, 2.0));
    }
    for _ in 0..5 {
        assert_eq!(a.forward(&State::zeros()).unwrap(), b.forward(&State::zeros()).unwrap());
    }
    assert_eq!(a.nominal(), b.nominal());
}

#[test]
fn reset_between_episodes() {
    let mut config = Config::default();
    config.mppi.num_samples = 128;
    let mut mppi = controller(&config);
    mppi.set_goal(Goal::new(10.0, 0.0));
    for _ in 0..5 {
        mppi.forward(&State::zeros()).unwrap();
    }
    assert!(mppi.nominal().iter().any(|v| *v != 0.0));

    mppi.reset();
    assert!(mppi.nominal().iter().all(|v| *v == 0.0));
    assert!(mppi.last_action().iter().all(|v| *v == 0.0));
    assert_eq!(mppi.last_outcome(), None);
    // goal はリセット後も残る
    assert_eq!(mppi.phase(), Phase::Ready);
    assert!(mppi.forward(&State::zeros()).is_ok());
}

#[test]
fn costmap_geometry_from_config() {
    let mut config = Config::default();
    config.map = MapConfig {
        size: 12.8,
        resolution: 0.2,
    };
    let mut mppi = controller(&config);
    let costmap = Costmap::from_u8(&vec![0u8; 64 * 64], &config.map).unwrap();
    mppi.set_costmap(costmap).unwrap();
    assert_eq!(mppi.costmap().cells_per_side(), 64);
}

/// Kinematic step with a per-bin lateral slip.
struct Slippery(KinematicBicycle);

impl TransitionModel for Slippery {
    fn step(&self, states: ArrayView2<'_, f64>, actions: ArrayView2<'_, f64>, bin: usize) -> Array2<f64> {
        let mut next = states.to_owned();
        for (mut row, u) in next.outer_iter_mut().zip(actions.outer_iter()) {
            let s = State::from_iterator(row.iter().copied());
            let mut carry = self.0.anchor(&s);
            let mut s = self.0.step(&s, &mut carry, u[0], u[1]);
            s[state::Y] += 0.01 * bin as f64;
            row.iter_mut().zip(s.iter()).for_each(|(dst, src)| *dst = *src);
        }
        next
    }
}

#[test]
fn distributional_rollouts_with_variance_penalty() {
    let mut config = Config::default();
    config.mppi.num_samples = 64;
    config.mppi.horizon = 8;
    config.mppi.rollout_samples = 3;
    config.mppi.rollout_var_cost = 1.0;
    let bicycle = KinematicBicycle::new(&config.dynamics).unwrap();
    let mut mppi = Mppi::new(
        &config,
        Box::new(LearnedDynamics::new(Slippery(bicycle), 2)),
        Box::new(TerrainCost::new(&config.cost)),
    )
    .unwrap();
    mppi.set_goal(Goal::new(10.0, 0.0));
    let u = mppi.forward(&State::zeros()).unwrap();
    assert_eq!(u.dim(), (1, 2));
    assert_eq!(mppi.rollout_states().dim(), (3, 64, 8, 17));
    assert_eq!(mppi.last_outcome(), Some(TickOutcome::Optimized));
    assert!(mppi.rollout_states()[[2, 0, 0, state::Y]] > mppi.rollout_states()[[0, 0, 0, state::Y]]);
}
