use crate::config::{Config, ControlInit, MapConfig, MppiConfig};
use crate::cost::CostFunction;
use crate::costmap::Costmap;
use crate::dynamics::BatchDynamics;
use crate::error::{MppiError, Result};
use crate::sampling::NoiseSampler;
use crate::state::{Goal, State, NX, STEERING, THROTTLE};
use log::{debug, info, warn};
use ndarray::{s, Array, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis, Dimension, Zip};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

/// Controller life cycle. `forward` is only accepted once a goal or a
/// costmap has been injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Ready,
    Stepping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Optimized,
    /// Rollout or cost went non-finite; the previous sequence was kept and
    /// the last good command returned.
    Degraded,
}

/// Samples, rollouts and costs of one tick, kept only if the tick succeeds.
struct Batch {
    noise: Array3<f64>,
    states: Array4<f64>,
    cost_total: Array1<f64>,
}

// MPPI (Model Predictive Path Integral) controller
pub struct Mppi<R: Rng = Xoshiro256PlusPlus> {
    config: MppiConfig,
    map: MapConfig,
    sampler: NoiseSampler<R>,
    dynamics: Box<dyn BatchDynamics>,
    cost: Box<dyn CostFunction>,
    costmap: Costmap,
    goal: Goal,
    // T x nu
    u: Array2<f64>,
    u_init: Array1<f64>,
    u_min: Array1<f64>,
    u_max: Array1<f64>,
    last_action: Array1<f64>,
    last_command: Array2<f64>,
    phase: Phase,
    outcome: Option<TickOutcome>,
    // 直近のサンプリング結果
    noise: Array3<f64>,
    states: Array4<f64>,
    cost_total: Array1<f64>,
    omega: Array1<f64>,
}

impl Mppi<Xoshiro256PlusPlus> {
    /// Controller seeded from `config.mppi.seed`.
    pub fn new(
        config: &Config,
        dynamics: Box<dyn BatchDynamics>,
        cost: Box<dyn CostFunction>,
    ) -> Result<Self> {
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.mppi.seed);
        Self::with_rng(config, dynamics, cost, rng)
    }
}

impl<R: Rng> Mppi<R> {
    pub fn with_rng(
        config: &Config,
        dynamics: Box<dyn BatchDynamics>,
        cost: Box<dyn CostFunction>,
        rng: R,
    ) -> Result<Self> {
        let c = config.mppi.clone();
        c.validate()?;
        config.map.validate()?;
        if dynamics.control_dim() != c.control_dim {
            return Err(MppiError::config(format!(
                "dynamics expects {} control channels, configured {}",
                dynamics.control_dim(),
                c.control_dim
            )));
        }
        let sampler = NoiseSampler::new(
            c.sigma_matrix()?,
            na::DVector::from_vec(c.noise_mu.clone()),
            c.sample_null_action,
            rng,
        )?;
        let (k, t, m, nu) = (c.num_samples, c.horizon, c.rollout_samples, c.control_dim);
        let u_min = Array1::from_vec(c.u_min.clone());
        let u_max = Array1::from_vec(c.u_max.clone());
        let mut u_init = Array1::from_vec(c.u_init.clone());
        clamp_last_axis(&mut u_init, &u_min, &u_max);

        let mut mppi = Self {
            costmap: Costmap::zeros(&config.map)?,
            map: config.map.clone(),
            sampler,
            dynamics,
            cost,
            goal: Goal::zeros(),
            u: Array2::zeros((t, nu)),
            u_init,
            u_min,
            u_max,
            last_action: Array1::zeros(nu),
            last_command: Array2::zeros((c.u_per_command, nu)),
            phase: Phase::Idle,
            outcome: None,
            noise: Array3::zeros((k, t, nu)),
            states: Array4::zeros((m, k, t, NX)),
            cost_total: Array1::zeros(k),
            omega: Array1::zeros(k),
            config: c,
        };
        mppi.u = mppi.initial_sequence();
        info!(
            "mppi: K = {k}, T = {t}, M = {m}, nu = {nu}, lambda = {}",
            mppi.config.lambda
        );
        Ok(mppi)
    }

    fn initial_sequence(&mut self) -> Array2<f64> {
        let (t, nu) = (self.config.horizon, self.config.control_dim);
        let mut u = match self.config.init {
            ControlInit::Zero => Array2::zeros((t, nu)),
            ControlInit::Random => self.sampler.standard_normal(t, nu),
        };
        clamp_last_axis(&mut u, &self.u_min, &self.u_max);
        u
    }

    fn mark_ready(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Ready;
        }
    }

    /// Vehicle-relative goal for the coming tick.
    pub fn set_goal(&mut self, goal: Goal) {
        self.goal = goal;
        self.mark_ready();
    }

    /// Takes ownership of the costmap, so the producer cannot touch it
    /// while a tick reads it.
    pub fn set_costmap(&mut self, costmap: Costmap) -> Result<()> {
        if !costmap.matches(&self.map) {
            return Err(MppiError::config(format!(
                "costmap is {} cells at {} m/cell, expected {} cells at {} m/cell",
                costmap.cells_per_side(),
                costmap.resolution(),
                self.map.cells_per_side(),
                self.map.resolution
            )));
        }
        self.costmap = costmap;
        self.mark_ready();
        Ok(())
    }

    /// Overrides the remembered action with what the actuator really applied.
    pub fn set_applied_action(&mut self, action: &[f64]) -> Result<()> {
        if action.len() != self.config.control_dim {
            return Err(MppiError::config(format!(
                "applied action has length {}, expected {}",
                action.len(),
                self.config.control_dim
            )));
        }
        self.last_action = Array1::from_vec(action.to_vec());
        Ok(())
    }

    pub fn set_dynamics(&mut self, dynamics: Box<dyn BatchDynamics>) -> Result<()> {
        if dynamics.control_dim() != self.config.control_dim {
            return Err(MppiError::config("dynamics control dimension mismatch"));
        }
        self.dynamics = dynamics;
        Ok(())
    }

    pub fn set_cost(&mut self, cost: Box<dyn CostFunction>) {
        self.cost = cost;
    }

    /// Clear controller state after finishing a trial.
    pub fn reset(&mut self) {
        self.u = self.initial_sequence();
        self.last_action.fill(0.0);
        self.last_command.fill(0.0);
        self.outcome = None;
        info!("mppi: reset");
    }

    /// One control tick. Returns the first `u_per_command` actions of the
    /// optimized sequence.
    ///
    /// A numerically broken tick is not an error: the sequence from the
    /// previous tick is kept and the last good command is returned.
    pub fn forward(&mut self, state: &State) -> Result<Array2<f64>> {
        if self.phase != Phase::Ready {
            return Err(MppiError::config(format!(
                "forward called in phase {:?}; set a goal or costmap first",
                self.phase
            )));
        }
        self.phase = Phase::Stepping;
        let previous = self.u.clone();

        // 1ステップシフト
        self.shift();
        // 前回の指令を状態に埋め込む
        let mut state = *state;
        if let Some(&steering) = self.last_action.get(0) {
            state[STEERING] = steering;
        }
        if let Some(&throttle) = self.last_action.get(1) {
            state[THROTTLE] = throttle;
        }

        let result = self.command(&state);
        self.phase = Phase::Ready;
        match result {
            Ok(()) => {
                self.last_command = self.u.slice(s![..self.config.u_per_command, ..]).to_owned();
                self.last_action = self.last_command.row(0).to_owned();
                self.outcome = Some(TickOutcome::Optimized);
                Ok(self.last_command.clone())
            }
            Err(e) => {
                self.u = previous;
                if e.is_recoverable() {
                    warn!("mppi: degraded tick, keeping previous sequence: {e}");
                    self.outcome = Some(TickOutcome::Degraded);
                    Ok(self.last_command.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn shift(&mut self) {
        let t = self.u.nrows();
        let tail = self.u.slice(s![1.., ..]).to_owned();
        self.u.slice_mut(s![..t - 1, ..]).assign(&tail);
        self.u.row_mut(t - 1).assign(&self.u_init);
    }

    fn command(&mut self, state: &State) -> Result<()> {
        let batch = self.compute_total_cost_batch(state)?;
        let omega = importance_weights(batch.cost_total.view(), self.config.lambda)?;

        // 重み付け平均
        let (t, nu) = self.u.dim();
        let noise = &batch.noise;
        let du = (0..noise.len_of(Axis(0)))
            .into_par_iter()
            .map(|i| &noise.index_axis(Axis(0), i) * omega[i])
            .reduce(|| Array2::zeros((t, nu)), |acc, x| acc + x);
        let mut u = &self.u + &du;
        clamp_last_axis(&mut u, &self.u_min, &self.u_max);

        // u が 不正値の場合は更新しない
        if !u.iter().all(|v| v.is_finite()) {
            return Err(MppiError::NumericInstability {
                stage: "update",
                detail: "updated control sequence is not finite".into(),
            });
        }

        debug!(
            "mppi: min cost {:.4}, effective samples {:.1}, u0 {:?}",
            batch.cost_total.fold(f64::INFINITY, |a, &c| a.min(c)),
            1.0 / omega.iter().map(|w| w * w).sum::<f64>(),
            u.row(0).to_vec()
        );
        // 成功した tick の結果だけを残す
        self.u = u;
        self.noise = batch.noise;
        self.states = batch.states;
        self.cost_total = batch.cost_total;
        self.omega = omega;
        Ok(())
    }

    fn compute_total_cost_batch(&mut self, state: &State) -> Result<Batch> {
        let (k, t, m) = (
            self.config.num_samples,
            self.config.horizon,
            self.config.rollout_samples,
        );

        // ノイズは毎回引き直す
        let noise = self.sampler.sample(k, t);
        let mut perturbed = &noise + &self.u;
        clamp_last_axis(&mut perturbed, &self.u_min, &self.u_max);
        let noise = &perturbed - &self.u;

        let nominal = Array1::from_iter(state.iter().copied());
        let broadcast = nominal
            .broadcast((m, k, t, NX))
            .ok_or_else(|| MppiError::config("cannot broadcast state"))?
            .to_owned();
        let states = self.dynamics.rollout(broadcast, perturbed.view())?;
        if states.dim() != (m, k, t, NX) {
            return Err(MppiError::config(format!(
                "dynamics returned {:?}, expected ({m}, {k}, {t}, {NX})",
                states.dim()
            )));
        }
        if let Some(i) = states.iter().position(|v| !v.is_finite()) {
            return Err(MppiError::NumericInstability {
                stage: "rollout",
                detail: format!("non-finite state at flat index {i}"),
            });
        }

        let (running, terminal) = self.cost.evaluate(states.view(), &self.costmap, &self.goal);
        if running.dim() != (m, k, t) || terminal.dim() != (m, k) {
            return Err(MppiError::config(format!(
                "cost returned {:?} / {:?}, expected ({m}, {k}, {t}) / ({m}, {k})",
                running.dim(),
                terminal.dim()
            )));
        }

        let mean_over_bins = |a: Array2<f64>| {
            a.mean_axis(Axis(0))
                .ok_or_else(|| MppiError::config("rollout_samples must be positive"))
        };
        let mut cost_total = mean_over_bins(running.sum_axis(Axis(2)))? + mean_over_bins(terminal)?;
        if self.config.rollout_var_cost > 0.0 && m > 1 {
            cost_total += &rollout_variance_cost(
                running.view(),
                self.config.rollout_var_discount,
                self.config.rollout_var_cost,
            );
        }

        // 入力変化のコスト
        cost_total += &perturbation_cost(
            noise.view(),
            self.u.view(),
            self.sampler.sigma_inv(),
            self.config.lambda,
            self.config.noise_abs_cost,
        );

        if let Some(i) = cost_total.iter().position(|c| !c.is_finite()) {
            return Err(MppiError::NumericInstability {
                stage: "cost",
                detail: format!("sample {i} has cost {}", cost_total[i]),
            });
        }
        Ok(Batch {
            noise,
            states,
            cost_total,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_outcome(&self) -> Option<TickOutcome> {
        self.outcome
    }

    /// Current nominal sequence, T x nu.
    pub fn nominal(&self) -> ArrayView2<'_, f64> {
        self.u.view()
    }

    pub fn last_action(&self) -> ArrayView1<'_, f64> {
        self.last_action.view()
    }

    /// States of the most recent successful rollout, M x K x T x 17.
    pub fn rollout_states(&self) -> ArrayView4<'_, f64> {
        self.states.view()
    }

    /// Effective noise of the most recent successful tick, K x T x nu.
    pub fn noise(&self) -> ArrayView3<'_, f64> {
        self.noise.view()
    }

    pub fn costs(&self) -> ArrayView1<'_, f64> {
        self.cost_total.view()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.omega.view()
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn costmap(&self) -> &Costmap {
        &self.costmap
    }

    pub fn config(&self) -> &MppiConfig {
        &self.config
    }
}

/// Softmin over sample costs with temperature `lambda`.
///
/// The minimum cost is subtracted before exponentiating, so the best
/// sample always gets exp(0) and the normaliser is at least 1.
pub fn importance_weights(costs: ArrayView1<'_, f64>, lambda: f64) -> Result<Array1<f64>> {
    if !(lambda.is_finite() && lambda > 0.0) {
        return Err(MppiError::config(format!("lambda must be > 0, got {lambda}")));
    }
    if costs.is_empty() {
        return Err(MppiError::config("no samples to weight"));
    }
    if costs.iter().any(|c| !c.is_finite()) {
        return Err(MppiError::NumericInstability {
            stage: "weights",
            detail: "non-finite cost".into(),
        });
    }
    let beta = costs.fold(f64::INFINITY, |a, &c| a.min(c));
    // 重みの計算
    let mut omega = costs.to_owned();
    omega.par_mapv_inplace(|c| (-(c - beta) / lambda).exp());
    // 正規化項
    let eta = omega.sum();
    if eta == 0.0 || !eta.is_finite() {
        return Err(MppiError::NumericInstability {
            stage: "weights",
            detail: format!("normaliser is {eta}"),
        });
    }
    omega /= eta;
    Ok(omega)
}

/// lambda * sum_t U_t . (noise_t Sigma^-1) for every sample.
fn perturbation_cost(
    noise: ArrayView3<'_, f64>,
    u: ArrayView2<'_, f64>,
    sigma_inv: &na::DMatrix<f64>,
    lambda: f64,
    abs: bool,
) -> Array1<f64> {
    let nu = u.ncols();
    let cost: Vec<f64> = (0..noise.len_of(Axis(0)))
        .into_par_iter()
        .map(|k| {
            noise
                .index_axis(Axis(0), k)
                .outer_iter()
                .zip(u.outer_iter())
                .map(|(n_t, u_t)| {
                    let mut c = 0.0;
                    for i in 0..nu {
                        for j in 0..nu {
                            let e = if abs { n_t[j].abs() } else { n_t[j] };
                            c += u_t[i] * lambda * e * sigma_inv[(j, i)];
                        }
                    }
                    c
                })
                .sum::<f64>()
        })
        .collect();
    Array1::from_vec(cost)
}

/// weight * sum_t discount^t * Var_m(running[m, k, t]) for every sample.
fn rollout_variance_cost(running: ArrayView3<'_, f64>, discount: f64, weight: f64) -> Array1<f64> {
    let t = running.len_of(Axis(2));
    let var = running.var_axis(Axis(0), 0.0);
    let discounts = Array1::from_shape_fn(t, |i| discount.powi(i as i32));
    var.dot(&discounts) * weight
}

fn clamp_last_axis<D: Dimension>(a: &mut Array<f64, D>, lo: &Array1<f64>, hi: &Array1<f64>) {
    let axis = Axis(a.ndim() - 1);
    for lane in a.lanes_mut(axis) {
        Zip::from(lane)
            .and(lo)
            .and(hi)
            .for_each(|v, &l, &h| *v = v.clamp(l, h));
    }
}
