//! Normalized controller output to vehicle steering / throttle / brake.

use crate::config::ActuationConfig;
use advanced_pid::{PidConfig, PidController, VelPid};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommand {
    /// [-1, 1], simulator sign convention
    pub steering: f64,
    /// [0, 1]
    pub throttle: f64,
    /// [0, 1]
    pub brake: f64,
}

impl ActuatorCommand {
    fn split(steering: f64, throttle: f64) -> Self {
        let steering = -steering.clamp(-1.0, 1.0);
        let th = throttle.clamp(-1.0, 1.0);
        // 負のスロットルはブレーキ
        if th < 0.0 {
            Self {
                steering,
                throttle: 0.0,
                brake: -th,
            }
        } else {
            Self {
                steering,
                throttle: th,
                brake: 0.0,
            }
        }
    }
}

/// Optionally closes a wheel-speed loop around the speed channel.
pub struct Actuator {
    config: ActuationConfig,
    pid: VelPid,
}

impl Actuator {
    pub fn new(config: &ActuationConfig) -> Self {
        Self {
            config: config.clone(),
            pid: Self::make_pid(config),
        }
    }

    fn make_pid(config: &ActuationConfig) -> VelPid {
        VelPid::new(PidConfig::new(config.kp, config.ki, config.kd).with_limits(-1.0, 1.0))
    }

    /// Pass the normalized throttle/brake channel straight through.
    pub fn open_loop(&self, steering: f64, throttle: f64) -> ActuatorCommand {
        ActuatorCommand::split(steering, throttle)
    }

    /// Treat the second channel as a wheel-speed set-point in units of
    /// `speed_max` and track it with the PID plus feed-forward.
    pub fn speed_control(&mut self, steering: f64, speed: f64, wheelspeed: f64, dt: f64) -> ActuatorCommand {
        let target = speed.clamp(-1.0, 1.0);
        let actual = wheelspeed / self.config.speed_max;
        let th = self.pid.update(target, actual, dt) + self.config.feedforward_gain * target;
        ActuatorCommand::split(steering, th)
    }

    pub fn reset(&mut self) {
        self.pid = Self::make_pid(&self.config);
    }
}
