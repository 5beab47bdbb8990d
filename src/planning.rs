//! Waypoint follower feeding the controller its goal vector.

use crate::config::PlanningConfig;
use crate::error::{MppiError, Result};
use crate::state::Goal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalUpdate {
    /// Active waypoint in world coordinates
    pub goal: Goal,
    /// Active waypoint relative to the vehicle
    pub relative: Goal,
    pub terminate: bool,
}

#[derive(Debug, Clone)]
pub struct WaypointTracker {
    waypoints: Vec<Goal>,
    current: usize,
    lookahead: f64,
    tolerance: f64,
}

impl WaypointTracker {
    pub fn new(waypoints: Vec<Goal>, lookahead: f64, tolerance: f64) -> Result<Self> {
        if waypoints.is_empty() {
            return Err(MppiError::config("waypoint list is empty"));
        }
        if !(lookahead >= 0.0 && tolerance >= 0.0) {
            return Err(MppiError::config(format!(
                "lookahead {lookahead} and tolerance {tolerance} must be non-negative"
            )));
        }
        Ok(Self {
            waypoints,
            current: 0,
            lookahead,
            tolerance,
        })
    }

    pub fn from_config(waypoints: Vec<Goal>, config: &PlanningConfig) -> Result<Self> {
        Self::new(waypoints, config.lookahead, config.goal_tolerance)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn waypoints(&self) -> &[Goal] {
        &self.waypoints
    }

    pub fn update(&mut self, position: &Goal) -> GoalUpdate {
        let last = self.waypoints.len() - 1;
        // lookahead 内か、経路方向に通り過ぎた中間点は飛ばす
        while self.current < last && self.passed(self.current, position) {
            self.current += 1;
        }
        let goal = self.waypoints[self.current];
        let relative = goal - position;
        let terminate = self.current == last && relative.norm() < self.tolerance;
        GoalUpdate {
            goal,
            relative,
            terminate,
        }
    }

    fn passed(&self, i: usize, position: &Goal) -> bool {
        let (wp, next) = (self.waypoints[i], self.waypoints[i + 1]);
        (wp - position).norm() < self.lookahead || (position - wp).dot(&(next - wp)) > 0.0
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn route() -> Vec<Goal> {
        vec![Goal::new(10.0, 0.0), Goal::new(30.0, 0.0), Goal::new(30.0, 30.0)]
    }

    #[test]
    fn empty_route_is_rejected() {
        assert!(matches!(
            WaypointTracker::new(vec![], 1.0, 1.0),
            Err(MppiError::Configuration(_))
        ));
        assert!(WaypointTracker::new(route(), -1.0, 1.0).is_err());
    }

    #[test]
    fn skips_waypoints_inside_lookahead() {
        let mut tracker = WaypointTracker::new(route(), 15.0, 2.0).unwrap();
        let update = tracker.update(&Goal::zeros());
        assert_eq!(tracker.current(), 1);
        assert_abs_diff_eq!(update.relative, Goal::new(30.0, 0.0));
        assert!(!update.terminate);

        let update = tracker.update(&Goal::new(20.0, 0.0));
        assert_eq!(tracker.current(), 2);
        assert_abs_diff_eq!(update.relative, Goal::new(10.0, 30.0));
    }

    #[test]
    fn terminates_near_the_final_waypoint() {
        let mut tracker = WaypointTracker::new(route(), 15.0, 2.0).unwrap();
        let update = tracker.update(&Goal::new(30.0, 29.0));
        assert_eq!(tracker.current(), 2);
        assert!(update.terminate);

        tracker.reset();
        assert_eq!(tracker.current(), 0);
    }

    #[test]
    fn skips_waypoints_left_behind() {
        let route = vec![Goal::new(10.0, 0.0), Goal::new(30.0, 0.0), Goal::new(90.0, 0.0)];
        let mut tracker = WaypointTracker::new(route, 5.0, 1.0).unwrap();
        let update = tracker.update(&Goal::new(60.0, 0.0));
        assert_eq!(tracker.current(), 2);
        assert_abs_diff_eq!(update.relative, Goal::new(30.0, 0.0));
        assert!(!update.terminate);
    }

    #[test]
    fn final_waypoint_is_never_skipped() {
        let mut tracker = WaypointTracker::new(vec![Goal::new(5.0, 0.0)], 15.0, 1.0).unwrap();
        let update = tracker.update(&Goal::zeros());
        assert_eq!(update.goal, Goal::new(5.0, 0.0));
        assert!(!update.terminate);
    }
}
