extern crate nalgebra as na;
use anyhow::Context;
use bev_mppi::state::{self, VX, X, Y, YAW};
use bev_mppi::{Actuator, Config, Costmap, Goal, KinematicBicycle, Mppi, State, TerrainCost, TickOutcome, WaypointTracker};
use std::path::Path;

// cargo run --example closed_loop --release [config.toml]

const SIM_TIME: f64 = 60.0;

// 障害物 (x, y, 半径)
const OBSTACLES: [(f64, f64, f64); 4] = [(18.0, 1.0, 2.5), (32.0, -3.0, 3.0), (45.0, 6.0, 2.0), (70.0, 4.0, 4.0)];

fn terrain(x: f64, y: f64) -> f64 {
    OBSTACLES
        .iter()
        .map(|&(ox, oy, r)| (-((x - ox).powi(2) + (y - oy).powi(2)) / (r * r)).exp())
        .sum::<f64>()
        .min(1.0)
}

fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()?;

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        None if Path::new("config/mppi.toml").exists() => Config::load("config/mppi.toml")?,
        None => Config::default(),
    };

    let plant = KinematicBicycle::new(&config.dynamics)?;
    let mut mppi = Mppi::new(
        &config,
        Box::new(KinematicBicycle::new(&config.dynamics)?),
        Box::new(TerrainCost::new(&config.cost)),
    )?;
    let mut actuator = Actuator::new(&config.actuation);
    let waypoints = vec![Goal::new(30.0, 0.0), Goal::new(60.0, 10.0), Goal::new(90.0, 0.0)];
    let mut tracker = WaypointTracker::from_config(waypoints, &config.planning)?;

    // ログファイルの作成
    std::fs::create_dir_all("logs/mppi")?;
    let file_path = format!(
        "logs/mppi/closed_loop_{}.csv",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    );
    let mut wtr = csv::Writer::from_path(&file_path).with_context(|| format!("opening {file_path}"))?;
    wtr.write_record([
        "t", "x", "y", "yaw", "vx", "steering", "throttle", "cmd_steering", "cmd_throttle", "cmd_brake",
        "min_cost", "terrain", "outcome",
    ])?;

    let dt = plant.dt();
    let mut x = State::zeros();
    let mut carry = plant.anchor(&x);
    let now = std::time::Instant::now();
    let mut t = 0.0;
    while t < SIM_TIME {
        let update = tracker.update(&state::position(&x));
        if update.terminate {
            println!("reached the final waypoint at t = {t:.2}");
            break;
        }

        // 車両中心に座標を取り直す
        let origin = na::Vector3::new(x[X], x[Y], x[state::Z]);
        let costmap = Costmap::from_fn(&config.map, |cx, cy| terrain(cx + origin[0], cy + origin[1]))?;
        mppi.set_costmap(costmap)?;
        mppi.set_goal(update.relative);

        let u = mppi.forward(&state::recentered(&x, &origin))?;
        let (steering, throttle) = (u[[0, 0]], u[[0, 1]]);
        let cmd = actuator.speed_control(steering, throttle, x[VX], dt);

        // 低レベル追従は理想とみなす
        x = plant.step(&x, &mut carry, steering, throttle);

        let min_cost = mppi.costs().fold(f64::INFINITY, |a, &c| a.min(c));
        let outcome = match mppi.last_outcome() {
            Some(TickOutcome::Degraded) => "degraded",
            _ => "optimized",
        };
        if (t / dt).round() as usize % 50 == 0 {
            println!(
                "t: {:.2}, u: [{:6.3}, {:6.3}], x: [{:7.2}, {:6.2}, {:5.2}, {:5.2}], goal: {}",
                t,
                steering,
                throttle,
                x[X],
                x[Y],
                x[YAW],
                x[VX],
                tracker.current()
            );
        }

        wtr.write_record(&[
            t.to_string(),
            x[X].to_string(),
            x[Y].to_string(),
            x[YAW].to_string(),
            x[VX].to_string(),
            steering.to_string(),
            throttle.to_string(),
            cmd.steering.to_string(),
            cmd.throttle.to_string(),
            cmd.brake.to_string(),
            min_cost.to_string(),
            terrain(x[X], x[Y]).to_string(),
            outcome.to_string(),
        ])?;
        wtr.flush()?;

        t += dt;
    }
    println!("elapsed: {:.2} sec, log: {file_path}", now.elapsed().as_secs_f64());
    Ok(())
}
