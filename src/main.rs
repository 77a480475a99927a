use battleship_sessions::{
    init_logging, AiPlayer, BroadcastBus, Event, FiringOrder, FirstMove, Gateway, MemorySessionStore,
    ProbabilitySelector, RetryPolicy, RosterVariant, RulesConfig, ServerConfig, SessionRegistry,
    TrustingResolver,
};

use clap::{Args, Parser, ValueEnum};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides BATTLESHIP_LOG).
    #[arg(long, global = true)]
    log_level: Option<log::LevelFilter>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Roster {
    Classic,
    Russian,
}

#[derive(Args, Clone, Debug)]
struct RulesArgs {
    #[arg(long, value_enum, default_value_t = Roster::Classic)]
    roster: Roster,
    /// Keep firing until a miss instead of alternating every shot.
    #[arg(long)]
    until_miss: bool,
    /// One shot per surviving ship each turn.
    #[arg(long)]
    salvo: bool,
    /// Ships may not touch, not even diagonally.
    #[arg(long)]
    no_adjacent: bool,
    /// Draw the first mover at random instead of the session creator.
    #[arg(long)]
    random_first: bool,
}

impl From<&RulesArgs> for RulesConfig {
    fn from(args: &RulesArgs) -> Self {
        RulesConfig {
            roster: match args.roster {
                Roster::Classic => RosterVariant::Classic,
                Roster::Russian => RosterVariant::Russian,
            },
            firing_order: if args.until_miss {
                FiringOrder::UntilMiss
            } else {
                FiringOrder::Alternating
            },
            salvo_mode: args.salvo,
            no_adjacent_ships: args.no_adjacent,
            first_move: if args.random_first {
                FirstMove::Random
            } else {
                FirstMove::Creator
            },
        }
    }
}

#[derive(Parser)]
enum Commands {
    /// Serve game sessions over TCP.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// Seconds a disconnected player may stay away before forfeiting.
        #[arg(long, default_value_t = 60)]
        idle_grace_secs: u64,
        /// Seconds before a session with no connected players is reclaimed.
        #[arg(long, default_value_t = 600)]
        abandoned_ttl_secs: u64,
        /// Seconds a finished session stays resumable.
        #[arg(long, default_value_t = 30)]
        finished_ttl_secs: u64,
        /// Save attempts before an action is reported as unpersisted.
        #[arg(long, default_value_t = 4)]
        save_attempts: u32,
        #[arg(long, default_value_t = 3)]
        conflict_retries: u32,
        #[arg(long, default_value_t = 1_000_000)]
        max_frame_size: u32,
        #[arg(long, default_value_t = 256)]
        bus_capacity: usize,
    },
    /// Play an AI vs AI game on the local machine.
    Local {
        #[arg(long, help = "Fix RNG seed for reproducible games (e.g., --seed 12345)")]
        seed: Option<u64>,
        #[command(flatten)]
        rules: RulesArgs,
    },
}

fn seeded(seed: Option<u64>, offset: u64) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s.wrapping_add(offset)),
        None => {
            let mut seed_rng = rand::rng();
            SmallRng::from_rng(&mut seed_rng)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Commands::Serve {
            bind,
            idle_grace_secs,
            abandoned_ttl_secs,
            finished_ttl_secs,
            save_attempts,
            conflict_retries,
            max_frame_size,
            bus_capacity,
        } => {
            let config = ServerConfig {
                bind,
                idle_turn_grace: Duration::from_secs(idle_grace_secs),
                abandoned_ttl: Duration::from_secs(abandoned_ttl_secs),
                finished_ttl: Duration::from_secs(finished_ttl_secs),
                save_retry: RetryPolicy {
                    max_attempts: save_attempts,
                    ..RetryPolicy::default()
                },
                conflict_retries,
                max_frame_size,
                bus_capacity,
            };
            config.validate()?;
            serve(config).await?;
        }
        Commands::Local { seed, rules } => {
            if let Some(s) = seed {
                println!("Using fixed seed: {} (game will be reproducible)", s);
            }
            local_game(seed, RulesConfig::from(&rules)).await?;
        }
    }
    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemorySessionStore::new());
    let bus = Arc::new(BroadcastBus::new(config.bus_capacity));
    let reap_every = config.abandoned_ttl.min(config.finished_ttl).max(Duration::from_secs(1));
    let bind = config.bind.clone();
    let registry = SessionRegistry::new(store.clone(), bus, config);
    let gateway = Arc::new(Gateway::new(registry, Arc::new(TrustingResolver)));

    let shutdown = CancellationToken::new();
    let reaper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(reap_every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let reaped = store.reap();
                        if reaped > 0 {
                            log::info!("reaped {} expired sessions", reaped);
                        }
                    }
                }
            }
        })
    };

    let listener = TcpListener::bind(&bind).await?;
    log::info!("listening on {}", listener.local_addr()?);
    let server = tokio::spawn(Arc::clone(&gateway).listen(listener, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    shutdown.cancel();
    server.await??;
    reaper.await?;
    Ok(())
}

async fn local_game(seed: Option<u64>, rules: RulesConfig) -> anyhow::Result<()> {
    let registry = SessionRegistry::in_memory(ServerConfig::default());
    let info = registry.create("ai-1", "local", rules);
    let mut watcher = registry.bus().subscribe(&info.session_id).await?;
    let handle = registry.join(&info.session_id, "ai-2").await?;

    let p1 = AiPlayer::new("ai-1", ProbabilitySelector::new(seeded(seed, 0)), seeded(seed, 1));
    let p2 = AiPlayer::new("ai-2", ProbabilitySelector::new(seeded(seed, 2)), seeded(seed, 3));
    let game = tokio::spawn({
        let handle = Arc::clone(&handle);
        async move { tokio::try_join!(p1.run(Arc::clone(&handle)), p2.run(handle)) }
    });

    while let Ok(delta) = watcher.recv().await {
        for event in &delta.events {
            match event {
                Event::ShotResult {
                    shooter,
                    coord,
                    outcome,
                    ..
                } => println!("[{:>3}] {:?} fires at {}: {:?}", delta.version, shooter, coord, outcome),
                Event::TurnChanged { actor, shots_left } => {
                    println!("      turn -> {:?} ({} shots)", actor, shots_left)
                }
                Event::GameFinished { winner, reason, .. } => {
                    println!("Game over: {:?} wins ({:?})", winner, reason)
                }
                _ => {}
            }
        }
        if delta.finished().is_some() {
            break;
        }
    }

    let (summary, _) = game.await??;
    println!(
        "Turns: {}, shots A/B: {}/{}, hits A/B: {}/{}",
        summary.turns, summary.shots[0], summary.shots[1], summary.hits[0], summary.hits[1]
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_from_the_command_line() {
        let cli = Cli::try_parse_from(["battleship-server", "--log-level", "debug", "local", "--seed", "7"]).unwrap();
        assert_eq!(cli.log_level, Some(log::LevelFilter::Debug));
        assert!(matches!(cli.command, Commands::Local { seed: Some(7), .. }));

        assert!(Cli::try_parse_from(["battleship-server", "--log-level", "loud", "local"]).is_err());
    }
}
