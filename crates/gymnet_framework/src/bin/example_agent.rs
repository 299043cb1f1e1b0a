// src/bin/example_agent.rs
//
// Agent side of the example wiring: accepts one gym entity and answers every observation with
// uniformly sampled values for each configured action key.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gymnet_framework::prelude::*;
use gymnet_framework::utilities::observability::logging::init_logging_from_params;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "example_agent",
    about = "Example agent answering gym observations with random actions",
    version
)]
struct Args {
    /// Path to gymnet_config.json (created with defaults when missing).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address; defaults to the configured transport address.
    #[arg(long)]
    bind: Option<String>,

    /// Values sampled per action key.
    #[arg(long, default_value_t = 2)]
    action_dim: usize,

    /// Lower bound of sampled action values.
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    low: f64,

    /// Upper bound of sampled action values.
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    high: f64,

    /// Stop after answering this many requests.
    #[arg(long)]
    max_requests: Option<u64>,

    /// RNG seed for reproducible actions.
    #[arg(long)]
    seed: Option<u64>,
}

struct RandomPolicy {
    rng: StdRng,
    action_keys: Vec<String>,
    action_dim: usize,
    low: f64,
    high: f64,
}

impl Policy for RandomPolicy {
    fn act(&mut self, request: &Request) -> Reply {
        log::info!(
            "request {}: observation {:?}, reward {:?}",
            request.id,
            request.observation(),
            request.reward()
        );

        let entries: Vec<(String, Value)> = self
            .action_keys
            .iter()
            .map(|key| {
                let values = (0..self.action_dim).map(|_| self.rng.random_range(self.low..=self.high));
                (key.clone(), Value::from_values(values.collect::<Vec<_>>()))
            })
            .collect();

        match Value::dict_from(entries) {
            Ok(action) => Reply::new(action),
            Err(e) => {
                log::warn!("Answering request {} with no action: {}", request.id, e);
                Reply::empty()
            }
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if args.low > args.high {
        return Err(format!("--low {} exceeds --high {}", args.low, args.high).into());
    }

    let config = GymConfigLoader::new_config(args.config)?;
    init_logging_from_params(&config.logging_config)?;

    if config.transport_config.transport != TransportType::TCP {
        log::warn!(
            "Configured transport is {}; the example agent only listens on TCP",
            config.transport_config.transport
        );
    }
    let address = args
        .bind
        .unwrap_or_else(|| config.transport_config.address.socket_address());
    let listener = AgentListener::bind(
        address.as_str(),
        ChannelParams::from(&config.transport_config),
    )?;

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut policy = RandomPolicy {
        rng,
        action_keys: config.entity_config.action_keys.clone(),
        action_dim: args.action_dim,
        low: args.low,
        high: args.high,
    };

    let mut session = listener.accept()?;
    let answered = session.serve(&mut policy, args.max_requests)?;
    log::info!("Answered {} requests", answered);
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("example_agent: {}", e);
            ExitCode::FAILURE
        }
    }
}
