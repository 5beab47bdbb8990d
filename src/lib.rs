extern crate nalgebra as na;

pub mod actuation;
pub mod config;
pub mod cost;
pub mod costmap;
pub mod dynamics;
pub mod error;
pub mod mppi;
pub mod planning;
pub mod sampling;
pub mod state;

pub use actuation::{Actuator, ActuatorCommand};
pub use config::Config;
pub use cost::{CostFunction, TerrainCost};
pub use costmap::Costmap;
pub use dynamics::{BatchDynamics, KinematicBicycle, LearnedDynamics, RateState, TransitionModel};
pub use error::{MppiError, Result};
pub use mppi::{Mppi, Phase, TickOutcome};
pub use planning::{GoalUpdate, WaypointTracker};
pub use state::{Goal, State};
