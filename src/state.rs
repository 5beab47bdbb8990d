//! Vehicle state layout shared by telemetry, dynamics and cost.

/// Number of slots in the state vector.
pub const NX: usize = 17;

// 状態ベクトルの並び
pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;
pub const ROLL: usize = 3;
pub const PITCH: usize = 4;
pub const YAW: usize = 5;
/// body-frame velocity
pub const VX: usize = 6;
pub const VY: usize = 7;
pub const VZ: usize = 8;
/// body-frame acceleration
pub const AX: usize = 9;
pub const AY: usize = 10;
pub const AZ: usize = 11;
/// angular rate
pub const GX: usize = 12;
pub const GY: usize = 13;
pub const GZ: usize = 14;
/// last applied normalized steering
pub const STEERING: usize = 15;
/// last applied normalized throttle/brake
pub const THROTTLE: usize = 16;

/// Position, attitude, body velocity, acceleration, angular rate, last action.
pub type State = na::SVector<f64, NX>;

/// Goal displacement from the vehicle, in the controller's frame.
pub type Goal = na::Vector2<f64>;

/// Shift the position so that `origin` becomes (0, 0, 0).
pub fn recentered(state: &State, origin: &na::Vector3<f64>) -> State {
    let mut s = *state;
    s[X] -= origin[0];
    s[Y] -= origin[1];
    s[Z] -= origin[2];
    s
}

/// Copy of `state` with the history slots set to the given action.
pub fn with_last_action(state: &State, steering: f64, throttle: f64) -> State {
    let mut s = *state;
    s[STEERING] = steering;
    s[THROTTLE] = throttle;
    s
}

pub fn position(state: &State) -> na::Vector2<f64> {
    na::Vector2::new(state[X], state[Y])
}

/// Read a state out of a contiguous ndarray lane.
pub(crate) fn from_lane(lane: ndarray::ArrayView1<'_, f64>) -> State {
    State::from_iterator(lane.iter().copied())
}

pub(crate) fn write_lane(state: &State, mut lane: ndarray::ArrayViewMut1<'_, f64>) {
    lane.iter_mut().zip(state.iter()).for_each(|(dst, src)| *dst = *src);
}
