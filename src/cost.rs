//! Running and terminal cost of rolled-out trajectories.

use crate::config::CostConfig;
use crate::costmap::Costmap;
use crate::state::{Goal, VX, X, Y};
use ndarray::{Array2, Array3, ArrayView4, Axis, Zip};

pub trait CostFunction: Send + Sync {
    /// Returns the M x K x T running cost and the M x K terminal cost.
    fn evaluate(
        &self,
        states: ArrayView4<'_, f64>,
        costmap: &Costmap,
        goal: &Goal,
    ) -> (Array3<f64>, Array2<f64>);
}

/// Terrain lookup plus a speed penalty while driving, distance to goal at
/// the end of the horizon.
#[derive(Debug, Clone)]
pub struct TerrainCost {
    map_weight: f64,
    speed_weight: f64,
    speed_target: f64,
    speed_cap: f64,
    goal_weight: f64,
}

impl TerrainCost {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            map_weight: config.map_weight,
            speed_weight: config.speed_weight,
            speed_target: config.speed_target,
            speed_cap: config.speed_cap,
            goal_weight: config.goal_weight,
        }
    }

    fn running(&self, x: f64, y: f64, vx: f64, costmap: &Costmap) -> f64 {
        let state_cost = costmap.cost_at(x, y);
        let vel_cost = (vx - self.speed_target).clamp(0.0, self.speed_cap);
        self.map_weight * state_cost + self.speed_weight * vel_cost
    }
}

impl Default for TerrainCost {
    fn default() -> Self {
        Self::new(&CostConfig::default())
    }
}

impl CostFunction for TerrainCost {
    fn evaluate(
        &self,
        states: ArrayView4<'_, f64>,
        costmap: &Costmap,
        goal: &Goal,
    ) -> (Array3<f64>, Array2<f64>) {
        let (m, k, t, _) = states.dim();

        let mut running = Array3::zeros((m, k, t));
        Zip::from(&mut running)
            .and(states.lanes(Axis(3)))
            .par_for_each(|c, s| *c = self.running(s[X], s[Y], s[VX], costmap));

        // ホライゾン終端でのゴールまでの距離
        let mut terminal = Array2::zeros((m, k));
        if t > 0 {
            let last = states.index_axis(Axis(2), t - 1);
            Zip::from(&mut terminal)
                .and(last.lanes(Axis(2)))
                .par_for_each(|c, s| {
                    *c = self.goal_weight * (s[X] - goal[0]).hypot(s[Y] - goal[1]);
                });
        }
        (running, terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::state::NX;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    fn map() -> MapConfig {
        MapConfig {
            size: 20.0,
            resolution: 0.4,
        }
    }

    #[test]
    fn running_cost_reads_the_map_and_speed() {
        let costmap = Costmap::from_fn(&map(), |x, _| if x > 2.0 { 0.8 } else { 0.0 }).unwrap();
        let mut states = Array4::<f64>::zeros((1, 2, 3, NX));
        for t in 0..3 {
            states[[0, 1, t, X]] = 3.0;
            states[[0, 1, t, VX]] = 4.0 + t as f64 * 2.0;
        }
        let cost = TerrainCost::default();
        let (running, terminal) = cost.evaluate(states.view(), &costmap, &Goal::zeros());
        assert_eq!(running.dim(), (1, 2, 3));
        assert_eq!(terminal.dim(), (1, 2));
        assert!(running.index_axis(Axis(1), 0).iter().all(|c| *c == 0.0));
        // vx = 4, 6, 8 -> excess 0, 1, 3
        assert_abs_diff_eq!(running[[0, 1, 0]], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(running[[0, 1, 1]], 10.8, epsilon = 1e-12);
        assert_abs_diff_eq!(running[[0, 1, 2]], 30.8, epsilon = 1e-12);
    }

    #[test]
    fn speed_excess_saturates() {
        let costmap = Costmap::zeros(&map()).unwrap();
        let mut states = Array4::<f64>::zeros((1, 1, 1, NX));
        states[[0, 0, 0, VX]] = 100.0;
        let (running, _) = TerrainCost::default().evaluate(states.view(), &costmap, &Goal::zeros());
        assert_abs_diff_eq!(running[[0, 0, 0]], 100.0, epsilon = 1e-12);
    }

    #[test]
    fn terminal_cost_is_distance_to_goal() {
        let costmap = Costmap::zeros(&map()).unwrap();
        let mut states = Array4::<f64>::zeros((2, 1, 4, NX));
        states[[0, 0, 3, X]] = 7.0;
        states[[1, 0, 3, X]] = 10.0;
        states[[1, 0, 3, Y]] = 4.0;
        states[[1, 0, 2, Y]] = 100.0;
        let goal = Goal::new(10.0, 0.0);
        let (_, terminal) = TerrainCost::default().evaluate(states.view(), &costmap, &goal);
        assert_abs_diff_eq!(terminal[[0, 0]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(terminal[[1, 0]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn trajectories_off_the_map_read_the_border() {
        let costmap = Costmap::from_fn(&map(), |x, _| if x > 9.0 { 1.0 } else { 0.0 }).unwrap();
        let mut states = Array4::<f64>::zeros((1, 1, 1, NX));
        states[[0, 0, 0, X]] = 1e6;
        let (running, _) = TerrainCost::default().evaluate(states.view(), &costmap, &Goal::zeros());
        assert_abs_diff_eq!(running[[0, 0, 0]], 1.0);
    }
}
