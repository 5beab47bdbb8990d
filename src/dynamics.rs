//! Batched forward models.
//!
//! A model receives the nominal state broadcast to M x K x T x 17 together
//! with K x T x nu candidate actions and returns the rolled-out states.
//! Row `t` of every lane holds the state *after* applying action `t`.

use crate::config::{KinematicConfig, RateModel};
use crate::error::{MppiError, Result};
use crate::state::{self, State, GZ, NX, STEERING, THROTTLE, VX, X, Y, YAW};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView3, Axis};

pub trait BatchDynamics: Send + Sync {
    /// nu expected by [`BatchDynamics::rollout`].
    fn control_dim(&self) -> usize;

    fn rollout(&self, states: Array4<f64>, actions: ArrayView3<'_, f64>) -> Result<Array4<f64>>;
}

fn check_shapes(states: &Array4<f64>, actions: &ArrayView3<'_, f64>, nu: usize) -> Result<()> {
    let (_, k, t, nx) = states.dim();
    let (ka, ta, nua) = actions.dim();
    if nx != NX || k != ka || t != ta || nua != nu {
        return Err(MppiError::config(format!(
            "rollout shape mismatch: states {:?}, actions {:?}, expected nu = {nu}",
            states.shape(),
            actions.shape()
        )));
    }
    Ok(())
}

/// Command of the previous step and the curvature / speed it produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateState {
    pub command: [f64; 2],
    /// [1/m, m/s]
    pub applied: [f64; 2],
}

/// Car model whose two inputs are rate-limited curvature and speed
/// commands.
///
/// With [`RateModel::Difference`] the applied curvature and speed follow
/// the step-to-step change of the scaled command, clamped to
/// `curvature_rate` / `speed_rate`, so a held command holds the applied
/// value. With [`RateModel::Tracking`] they slew toward the scaled command.
/// Either way the first step is anchored to the action stored in the
/// state's history slots, and the applied values saturate at full lock and
/// `wheelspeed_max`.
#[derive(Debug, Clone)]
pub struct KinematicBicycle {
    curvature_max: f64,
    wheelspeed_max: f64,
    curvature_rate: f64,
    speed_rate: f64,
    dt: f64,
    rate_model: RateModel,
}

impl KinematicBicycle {
    pub fn new(config: &KinematicConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            curvature_max: config.curvature_max(),
            wheelspeed_max: config.wheelspeed_max,
            curvature_rate: config.curvature_rate(),
            speed_rate: config.speed_rate(),
            dt: config.dt,
            rate_model: config.rate_model,
        })
    }

    pub fn curvature_max(&self) -> f64 {
        self.curvature_max
    }

    pub fn wheelspeed_max(&self) -> f64 {
        self.wheelspeed_max
    }

    pub fn curvature_rate(&self) -> f64 {
        self.curvature_rate
    }

    pub fn speed_rate(&self) -> f64 {
        self.speed_rate
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn rate_model(&self) -> RateModel {
        self.rate_model
    }

    /// Physical value of a normalized command, per channel.
    pub fn command_scale(&self) -> [f64; 2] {
        match self.rate_model {
            RateModel::Difference => [self.curvature_rate, self.wheelspeed_max],
            RateModel::Tracking => [self.curvature_max, self.wheelspeed_max],
        }
    }

    /// Treats the history slots as the previous command, fully applied.
    pub fn anchor(&self, state: &State) -> RateState {
        let command = [state[STEERING], state[THROTTLE]];
        let scale = self.command_scale();
        RateState {
            command,
            applied: [
                (command[0] * scale[0]).clamp(-self.curvature_max, self.curvature_max),
                (command[1] * scale[1]).clamp(-self.wheelspeed_max, self.wheelspeed_max),
            ],
        }
    }

    fn advance(&self, s: &mut State, carry: &mut RateState, steering: f64, throttle: f64) {
        let command = [steering, throttle];
        let scale = self.command_scale();
        let rate = [self.curvature_rate, self.speed_rate];
        let max = [self.curvature_max, self.wheelspeed_max];
        let mut applied = carry.applied;
        for i in 0..2 {
            // 前ステップからの変化量を制限
            let delta = match self.rate_model {
                RateModel::Difference => (command[i] - carry.command[i]) * scale[i],
                RateModel::Tracking => command[i] * scale[i] - carry.applied[i],
            };
            applied[i] = (carry.applied[i] + delta.clamp(-rate[i], rate[i])).clamp(-max[i], max[i]);
        }
        let [c, v] = applied;

        s[YAW] += v * c * self.dt;
        s[X] += v * s[YAW].cos() * self.dt;
        s[Y] += v * s[YAW].sin() * self.dt;
        s[VX] = v;
        s[GZ] = v * c;
        s[STEERING] = c / self.curvature_max;
        s[THROTTLE] = v / self.wheelspeed_max;
        *carry = RateState { command, applied };
    }

    /// Advance a single state by one step. `carry` starts from
    /// [`KinematicBicycle::anchor`] and is updated in place, so repeated
    /// calls reproduce a rollout lane.
    pub fn step(&self, state: &State, carry: &mut RateState, steering: f64, throttle: f64) -> State {
        let mut s = *state;
        self.advance(&mut s, carry, steering, throttle);
        s
    }
}

impl BatchDynamics for KinematicBicycle {
    fn control_dim(&self) -> usize {
        2
    }

    fn rollout(&self, mut states: Array4<f64>, actions: ArrayView3<'_, f64>) -> Result<Array4<f64>> {
        check_shapes(&states, &actions, 2)?;
        for mut bin in states.outer_iter_mut() {
            bin.axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(actions.axis_iter(Axis(0)).into_par_iter())
                .for_each(|(mut lane, seq)| {
                    let mut s = state::from_lane(lane.row(0));
                    let mut carry = self.anchor(&s);
                    for (t, u) in seq.outer_iter().enumerate() {
                        self.advance(&mut s, &mut carry, u[0], u[1]);
                        state::write_lane(&s, lane.row_mut(t));
                    }
                });
        }
        Ok(states)
    }
}

/// Opaque one-step model: K x 17 states and K x nu actions to K x 17 next
/// states. `sample` is the distributional bin being rolled out, so a
/// stochastic model can draw a different realisation per bin.
pub trait TransitionModel: Send + Sync {
    fn step(&self, states: ArrayView2<'_, f64>, actions: ArrayView2<'_, f64>, sample: usize) -> Array2<f64>;
}

/// Learned (or any black-box) transition iterated over the horizon.
pub struct LearnedDynamics<T> {
    model: T,
    control_dim: usize,
}

impl<T: TransitionModel> LearnedDynamics<T> {
    pub fn new(model: T, control_dim: usize) -> Self {
        Self { model, control_dim }
    }
}

impl<T: TransitionModel> BatchDynamics for LearnedDynamics<T> {
    fn control_dim(&self) -> usize {
        self.control_dim
    }

    fn rollout(&self, mut states: Array4<f64>, actions: ArrayView3<'_, f64>) -> Result<Array4<f64>> {
        check_shapes(&states, &actions, self.control_dim)?;
        let (m, k, t, _) = states.dim();
        for bin in 0..m {
            let mut current = states.slice(s![bin, .., 0, ..]).to_owned();
            for step in 0..t {
                let next = self
                    .model
                    .step(current.view(), actions.slice(s![.., step, ..]), bin);
                if next.dim() != (k, NX) {
                    return Err(MppiError::config(format!(
                        "transition model returned {:?}, expected ({k}, {NX})",
                        next.dim()
                    )));
                }
                states.slice_mut(s![bin, .., step, ..]).assign(&next);
                current = next;
            }
        }
        Ok(states)
    }
}
