//! `mvr` – runs the control cycle against the simulated drive.
//!
//! 1. Loads `~/.mvr/config.toml`, writing the defaults on first run.
//! 2. Starts the simulated receiver thread and the packet queue.
//! 3. Registers the demo behaviors: `Stop` (100, inactive), `SpeedCap` (75)
//!    and `Wander` (50), plus a user task that logs the pose.
//! 4. Ticks on the main thread until **Ctrl-C**, then commands a stop before
//!    exiting.

mod config;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use colored::Colorize;
use mvr_hal::{SimCommandSink, SimDrive, SimMotorHandler, SimPacketSource, packet_channel};
use mvr_runtime::{
    ConstantVelocity, ControlCycle, CycleContext, SpeedCap, StopBehavior, TaskScope, init_tracing,
};
use tracing::{info, warn};

fn main() {
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    println!();

    let _telemetry = init_tracing("mvr", cfg.log_format);

    // ── Simulated robot ───────────────────────────────────────────────────
    let drive = SimDrive::shared();
    let (packets_tx, packets_rx) = packet_channel(cfg.cycle.packet_queue_capacity);
    let source = SimPacketSource::spawn(Arc::clone(&drive), packets_tx, cfg.sim.packet_period());

    let sink = SimCommandSink::new(Arc::clone(&drive));
    let mut cycle = ControlCycle::new(cfg.cycle.clone(), Box::new(sink), packets_rx);
    cycle.add_packet_handler(Box::new(SimMotorHandler));

    // ── Behaviors ─────────────────────────────────────────────────────────
    cycle.add_behavior(Box::new(StopBehavior::new("Stop")), 100);
    cycle.robot().with(|core| core.deactivate_behavior("Stop"));
    cycle.add_behavior(
        Box::new(SpeedCap::new("SpeedCap", cfg.sim.speed_cap, cfg.sim.speed_cap)),
        75,
    );
    cycle.add_behavior(Box::new(ConstantVelocity::new("Wander", cfg.sim.wander_vel)), 50);

    // ── User tasks ────────────────────────────────────────────────────────
    let interval = cfg.sim.pose_log_interval();
    let mut last_logged: Option<Instant> = None;
    cycle.add_user_task("Pose Log", 10, move |ctx: &mut CycleContext, _: &TaskScope<'_>| {
        let now = ctx.now();
        if last_logged.is_some_and(|t| now.duration_since(t) < interval) {
            return;
        }
        last_logged = Some(now);
        let (state, stopped) = ctx.with_robot(|core| (*core.state(), core.is_stopped()));
        info!(
            tick = ctx.tick(),
            x = state.pose.x,
            y = state.pose.y,
            th = state.pose.th,
            vel = state.vel,
            stopped,
            "pose"
        );
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let stop = cycle.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        stop.store(true, Ordering::Release);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process another way");
    }

    println!("  {} Control cycle running every {} ms.", "▶".green().bold(), cfg.cycle.cycle_time_ms);
    println!("  Press {} to stop.\n", "Ctrl-C".bold().cyan());

    cycle.run();

    // One last tick so the zero-velocity commands reach the drive.
    cycle.robot().with(|core| core.stop());
    cycle.run_once();
    source.stop();

    let stats = cycle.stats();
    println!(
        "  {} Stopped after {} ticks ({} overruns, worst {:?}).",
        "✓".green().bold(),
        stats.ticks,
        stats.overruns,
        stats.max_tick
    );
}

fn print_banner() {
    println!();
    println!("{}", r#"   __  ____   _____ "#.bold().cyan());
    println!("{}", r#"  /  |/  / | / / _ \"#.bold().cyan());
    println!("{}", r#" / /|_/ /| |/ / , _/"#.bold().cyan());
    println!("{}", r#"/_/  /_/ |___/_/|_| "#.bold().cyan());
    println!();
    println!("  {} {}", "MVR".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Behavior arbitration and control cycle");
    println!();
}
