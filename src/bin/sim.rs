use battleship_sessions::{AiPlayer, ProbabilitySelector, RulesConfig, ServerConfig, SessionRegistry};
use rand::{rngs::SmallRng, SeedableRng};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <seed1> <seed2>", args[0]);
        std::process::exit(1);
    }
    let seed1: u64 = args[1].parse()?;
    let seed2: u64 = args[2].parse()?;

    let registry = SessionRegistry::in_memory(ServerConfig::default());
    let info = registry.create("player1", "sim", RulesConfig::default());
    let handle = registry.join(&info.session_id, "player2").await?;

    let p1 = AiPlayer::new(
        "player1",
        ProbabilitySelector::new(SmallRng::seed_from_u64(seed1)),
        SmallRng::seed_from_u64(seed1.wrapping_add(1)),
    );
    let p2 = AiPlayer::new(
        "player2",
        ProbabilitySelector::new(SmallRng::seed_from_u64(seed2)),
        SmallRng::seed_from_u64(seed2.wrapping_add(1)),
    );

    let (summary, _) = tokio::try_join!(p1.run(Arc::clone(&handle)), p2.run(Arc::clone(&handle)))?;
    let version = handle.version().await;

    let winner = summary.winner.map(|side| match side.index() {
        0 => "player1",
        _ => "player2",
    });

    let result = json!({
        "player1": {"shots": summary.shots[0], "hits": summary.hits[0], "ships_sunk": summary.ships_sunk[0]},
        "player2": {"shots": summary.shots[1], "hits": summary.hits[1], "ships_sunk": summary.ships_sunk[1]},
        "turns": summary.turns,
        "version": version,
        "winner": winner,
        "reason": summary.reason.map(|r| format!("{:?}", r)),
    });

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
