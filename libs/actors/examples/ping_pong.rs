//! Ping-pong between two actors, plus an offline delivery and both sync
//! call styles.
//!
//! ```bash
//! RUST_LOG=actor_runtime=debug cargo run -p actor-runtime --example ping_pong
//! ```

use actor_runtime::{
    ActorBehavior, ActorContext, ActorSystem, ActorSystemConfig, HandlerResult, Handles,
    HandlesOffline, OfflineContext,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
struct Ball(u32);

struct Player {
    name: &'static str,
    volleys: Arc<AtomicU32>,
}

impl ActorBehavior for Player {
    fn on_shutdown(&mut self) {
        info!(player = self.name, "Leaving the table");
    }
}

impl Handles<Ball> for Player {
    fn handle(&mut self, ctx: &ActorContext, ball: &Ball) -> HandlerResult {
        self.volleys.fetch_add(1, Ordering::SeqCst);
        info!(player = self.name, from = %ctx.sender(), remaining = ball.0, "Hit");
        if ball.0 > 0 {
            ctx.reply(Ball(ball.0 - 1));
        }
        Ok(())
    }
}

impl Handles<String> for Player {
    fn handle(&mut self, ctx: &ActorContext, note: &String) -> HandlerResult {
        info!(player = self.name, from = %ctx.sender(), note = %note, "Note received");
        Ok(())
    }
}

impl HandlesOffline<Ball> for Player {
    fn handle_offline(&mut self, ctx: &OfflineContext, ball: &Ball) -> HandlerResult {
        info!(player = self.name, target = %ctx.target(), remaining = ball.0, "Ball went out of play");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ActorSystemConfig::new("table")
        .with_worker_count(2)
        .with_shutdown_poll_interval(Duration::from_millis(50));
    let system = ActorSystem::new(config)?;
    system.start()?;

    let volleys = Arc::new(AtomicU32::new(0));
    for name in ["ping", "pong"] {
        let player = system.create_actor(
            name,
            Player {
                name,
                volleys: Arc::clone(&volleys),
            },
        )?;
        player.route::<Ball>().route::<String>().route_offline::<Ball>();
    }

    system.send_async("pong", "ping", Ball(10));
    system.send_async("ping", "spectator", Ball(1));

    system.send_sync_orderly("main", "pong", "queued behind the rally".to_string());
    system.send_sync_predatory("main", "ping", "straight to the handler".to_string());

    std::thread::sleep(Duration::from_millis(200));
    system.shutdown();

    let stats = system.stats();
    info!(
        volleys = volleys.load(Ordering::SeqCst),
        enqueued = stats.messages_enqueued,
        offline = stats.offline_deliveries,
        grants = stats.dispatch_grants,
        "Match over"
    );
    Ok(())
}
