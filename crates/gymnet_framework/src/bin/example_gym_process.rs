// src/bin/example_gym_process.rs
//
// Entity side of the example wiring: every control interval, send ten example observation
// values and a unit reward to the agent and log the `example_action` it replies with.

use clap::Parser;

use gymnet_framework::prelude::*;
use gymnet_framework::utilities::observability::init_observability;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "example_gym_process",
    about = "Example simulated entity exchanging one observation/action per tick with a gym agent",
    version
)]
struct Args {
    /// Path to gymnet_config.json (created with defaults when missing).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of control intervals to simulate.
    #[arg(long, default_value_t = 10)]
    ticks: u64,

    /// Connection attempts before giving up, 200ms apart.
    #[arg(long, default_value_t = 25)]
    connect_attempts: u32,

    /// Print the prometheus exposition after the run.
    #[arg(long)]
    print_metrics: bool,
}

fn example_observation(_: SimTime) -> Observation {
    Observation::new(vec![1.0]).with_feature(
        "example_obskey",
        (0..10).map(f64::from).collect::<Vec<_>>(),
    )
}

fn log_actions(now: SimTime, actions: &InterpretedActions, origin: ActionOrigin) {
    for (key, outcome) in actions.iter() {
        match outcome {
            ActionOutcome::Values(values) => {
                log::info!("[{}] {:?} action `{}`: {:?}", now, origin, key, values)
            }
            ActionOutcome::Missing => log::info!("[{}] no action for `{}`", now, key),
            ActionOutcome::Malformed(reason) => {
                log::warn!("[{}] malformed action `{}`: {}", now, key, reason)
            }
        }
    }
}

fn connect_with_retries<T: Transport>(
    channel: &ConnectionChannel<T>,
    attempts: u32,
) -> Result<(), ChannelError> {
    let mut attempt = 1;
    loop {
        match channel.connect() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts.max(1) => {
                log::debug!("Connect attempt {} failed: {}", attempt, e);
                attempt += 1;
                thread::sleep(Duration::from_millis(200));
            }
            Err(e) => return Err(e),
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = GymConfigLoader::new_config(args.config)?;
    let metrics = init_observability(&config.logging_config)?;

    let transport = transport_factory(&config.transport_config)?;
    let channel = Arc::new(
        ConnectionChannel::new(transport, ChannelParams::from(&config.transport_config))
            .with_metrics(metrics.clone()),
    );
    connect_with_retries(&channel, args.connect_attempts)?;

    let mut entity = GymEntity::new(
        channel.clone(),
        example_observation,
        log_actions,
        &config.entity_config,
    )?;

    let mut kernel = EventQueueKernel::new();
    entity.initialize(&mut kernel)?;

    let limit = SimTime::from_nanos(
        config
            .entity_config
            .control_interval_ns
            .saturating_mul(args.ticks),
    );
    let mut failure: Option<EntityError> = None;
    kernel.run_until(limit, |kernel, handle| {
        if !entity.owns_timer(handle) {
            return;
        }
        match entity.handle_timer(kernel, handle) {
            Ok(report) => log::debug!(
                "tick {} at {}: {:?} -> {:?}",
                report.tick.index,
                report.tick.at,
                report.outcome,
                report.state
            ),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    });

    entity.terminate(&mut kernel);
    channel.disconnect();

    let stats = entity.stats();
    log::info!(
        "Simulation end at {}: {} ticks, {} exchanges, {} fallbacks, {} no-ops",
        kernel.now(),
        stats.ticks,
        stats.exchanges,
        stats.fallbacks,
        stats.no_ops
    );
    if let Some(reason) = entity.last_error() {
        log::warn!("Last failure: {}", reason);
    }
    if args.print_metrics {
        println!("{}", metrics.render()?);
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("example_gym_process: {}", e);
            ExitCode::FAILURE
        }
    }
}
