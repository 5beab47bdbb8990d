//! Configuration loading for the controller and its collaborators.
//!
//! Every section carries defaults, so a TOML file only needs to name the
//! values it changes.

use crate::error::{MppiError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mppi: MppiConfig,
    pub dynamics: KinematicConfig,
    pub cost: CostConfig,
    pub map: MapConfig,
    pub actuation: ActuationConfig,
    pub planning: PlanningConfig,
}

/// How the nominal control sequence is filled at construction and on reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlInit {
    #[default]
    Zero,
    Random,
}

/// Sampling and update parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MppiConfig {
    /// K, number of sampled control sequences
    pub num_samples: usize,
    /// T, horizon length in steps
    pub horizon: usize,
    /// M, state rollouts per control sequence (1 for deterministic dynamics)
    pub rollout_samples: usize,
    /// nu
    pub control_dim: usize,
    /// Temperature. Larger values allow more exploration.
    pub lambda: f64,
    /// Control noise covariance, nu x nu
    pub noise_sigma: Vec<Vec<f64>>,
    pub noise_mu: Vec<f64>,
    pub u_min: Vec<f64>,
    pub u_max: Vec<f64>,
    /// Action appended to the end of the sequence on every shift
    pub u_init: Vec<f64>,
    pub init: ControlInit,
    pub u_per_command: usize,
    pub sample_null_action: bool,
    /// Use |noise| in the perturbation cost
    pub noise_abs_cost: bool,
    /// Weight of the cross-rollout cost variance, 0 disables it
    pub rollout_var_cost: f64,
    pub rollout_var_discount: f64,
    pub seed: u64,
}

impl Default for MppiConfig {
    fn default() -> Self {
        Self {
            num_samples: 512,
            horizon: 16,
            rollout_samples: 1,
            control_dim: 2,
            lambda: 0.1,
            noise_sigma: vec![vec![0.05 * 0.05, 0.0], vec![0.0, 0.2 * 0.2]],
            noise_mu: vec![0.0, 0.0],
            u_min: vec![-1.0, -1.0],
            u_max: vec![1.0, 1.0],
            u_init: vec![0.0, 0.0],
            init: ControlInit::Zero,
            u_per_command: 1,
            sample_null_action: false,
            noise_abs_cost: false,
            rollout_var_cost: 0.0,
            rollout_var_discount: 0.95,
            seed: 0,
        }
    }
}

impl MppiConfig {
    pub fn sigma_matrix(&self) -> Result<na::DMatrix<f64>> {
        let nu = self.control_dim;
        if self.noise_sigma.len() != nu || self.noise_sigma.iter().any(|r| r.len() != nu) {
            return Err(MppiError::config(format!(
                "noise_sigma must be {nu}x{nu}"
            )));
        }
        Ok(na::DMatrix::from_fn(nu, nu, |i, j| self.noise_sigma[i][j]))
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 || self.horizon == 0 || self.rollout_samples == 0 {
            return Err(MppiError::config(
                "num_samples, horizon and rollout_samples must be positive",
            ));
        }
        if self.control_dim == 0 {
            return Err(MppiError::config("control_dim must be positive"));
        }
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(MppiError::config(format!(
                "lambda must be finite and > 0, got {}",
                self.lambda
            )));
        }
        self.sigma_matrix()?;
        let nu = self.control_dim;
        for (name, v) in [
            ("noise_mu", &self.noise_mu),
            ("u_min", &self.u_min),
            ("u_max", &self.u_max),
            ("u_init", &self.u_init),
        ] {
            if v.len() != nu {
                return Err(MppiError::config(format!(
                    "{name} has length {}, expected {nu}",
                    v.len()
                )));
            }
        }
        if self.u_min.iter().chain(&self.u_max).any(|v| !v.is_finite()) {
            return Err(MppiError::config("control bounds must be finite"));
        }
        if self.u_min.iter().zip(&self.u_max).any(|(lo, hi)| lo > hi) {
            return Err(MppiError::config("u_min must not exceed u_max"));
        }
        if self.u_per_command == 0 || self.u_per_command > self.horizon {
            return Err(MppiError::config(format!(
                "u_per_command must be within 1..={}",
                self.horizon
            )));
        }
        if !(self.rollout_var_cost >= 0.0) {
            return Err(MppiError::config("rollout_var_cost must be >= 0"));
        }
        if !(self.rollout_var_discount > 0.0 && self.rollout_var_discount <= 1.0) {
            return Err(MppiError::config("rollout_var_discount must be in (0, 1]"));
        }
        Ok(())
    }
}

/// How the kinematic model turns a command sequence into applied
/// curvature and speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateModel {
    /// Applied values integrate the clamped step-to-step change of the
    /// scaled command. Steering is scaled by the curvature rate.
    #[default]
    Difference,
    /// Applied values slew toward the scaled command. Steering is scaled
    /// by the full-lock curvature.
    Tracking,
}

/// Constants of the rate-limited kinematic car model.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KinematicConfig {
    /// lf + lr [m]
    pub wheelbase: f64,
    /// [rad]
    pub steering_max: f64,
    /// [m/s]
    pub wheelspeed_max: f64,
    /// [s]
    pub dt: f64,
    pub gravity: f64,
    /// Full-lock curvature can be reached in 1/(gain*dt) steps
    pub curvature_rate_gain: f64,
    /// Overrides curvature_max * gain * dt
    pub max_curvature_rate: Option<f64>,
    /// Overrides gravity * dt
    pub max_speed_rate: Option<f64>,
    pub rate_model: RateModel,
}

impl Default for KinematicConfig {
    fn default() -> Self {
        Self {
            wheelbase: 0.48,
            steering_max: 30.0_f64.to_radians(),
            wheelspeed_max: 17.0,
            dt: 0.02,
            gravity: 9.8,
            curvature_rate_gain: 20.0,
            max_curvature_rate: None,
            max_speed_rate: None,
            rate_model: RateModel::Difference,
        }
    }
}

impl KinematicConfig {
    pub fn curvature_max(&self) -> f64 {
        self.steering_max.tan() / self.wheelbase
    }

    /// Largest change of applied curvature per step [1/m]
    pub fn curvature_rate(&self) -> f64 {
        self.max_curvature_rate
            .unwrap_or(self.curvature_max() * self.curvature_rate_gain * self.dt)
    }

    /// Largest change of applied speed per step [m/s]
    pub fn speed_rate(&self) -> f64 {
        self.max_speed_rate.unwrap_or(self.gravity * self.dt)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("wheelbase", self.wheelbase),
            ("steering_max", self.steering_max),
            ("wheelspeed_max", self.wheelspeed_max),
            ("dt", self.dt),
            ("curvature_rate", self.curvature_rate()),
            ("speed_rate", self.speed_rate()),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(MppiError::config(format!("{name} must be > 0, got {v}")));
            }
        }
        if self.steering_max >= std::f64::consts::FRAC_PI_2 {
            return Err(MppiError::config("steering_max must be below 90 degrees"));
        }
        Ok(())
    }
}

/// Weights of the terrain / speed / goal cost.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub map_weight: f64,
    pub speed_weight: f64,
    /// Forward speed above which the speed penalty starts [m/s]
    pub speed_target: f64,
    /// Saturation of the speed excess [m/s]
    pub speed_cap: f64,
    pub goal_weight: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            map_weight: 1.0,
            speed_weight: 10.0,
            speed_target: 5.0,
            speed_cap: 10.0,
            goal_weight: 1.0,
        }
    }
}

/// Geometry of the vehicle-centred costmap.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Edge length [m]
    pub size: f64,
    /// [m/cell]
    pub resolution: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            size: 20.0,
            resolution: 0.4,
        }
    }
}

impl MapConfig {
    pub fn cells_per_side(&self) -> usize {
        (self.size / self.resolution).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.size > 0.0 && self.resolution > 0.0) {
            return Err(MppiError::config("map size and resolution must be > 0"));
        }
        if self.cells_per_side() == 0 {
            return Err(MppiError::config("map must span at least one cell"));
        }
        // 中心合わせのため整数セルのみ
        let cells = self.size / self.resolution;
        if (cells - cells.round()).abs() > 1e-6 {
            return Err(MppiError::config(format!(
                "map size {} is not a whole number of {} m cells",
                self.size, self.resolution
            )));
        }
        Ok(())
    }
}

/// Wheel-speed loop of the actuation layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub speed_max: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub feedforward_gain: f64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            speed_max: 20.0,
            kp: 1.0,
            ki: 0.05,
            kd: 0.0,
            feedforward_gain: 0.0,
        }
    }
}

/// Waypoint following.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Waypoints closer than this are skipped [m]
    pub lookahead: f64,
    /// Distance to the final waypoint that ends the run [m]
    pub goal_tolerance: f64,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            lookahead: 15.0,
            goal_tolerance: 2.0,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        self.mppi.validate()?;
        self.dynamics.validate()?;
        self.map.validate()?;
        if !(self.actuation.speed_max > 0.0) {
            return Err(MppiError::config("actuation.speed_max must be > 0"));
        }
        if !(self.planning.lookahead >= 0.0 && self.planning.goal_tolerance >= 0.0) {
            return Err(MppiError::config("planning distances must be >= 0"));
        }
        Ok(())
    }
}
