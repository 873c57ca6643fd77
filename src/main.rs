use std::future::IntoFuture;
use std::time::Duration;

use swarm_fleet::channels::ws::fleet_routes;
use swarm_fleet::config::FleetConfig;
use swarm_fleet::fleet::{FleetCoordinator, spawn_sweep_loop};

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port: u16 = std::env::var("SWARM_FLEET_PORT")
        .unwrap_or_else(|_| "8090".to_string())
        .parse()
        .unwrap_or(8090);

    let config = FleetConfig {
        heartbeat_timeout: Duration::from_millis(env_u64(
            "SWARM_FLEET_HEARTBEAT_TIMEOUT_MS",
            30_000,
        )),
        sweep_interval: Duration::from_millis(env_u64("SWARM_FLEET_SWEEP_INTERVAL_MS", 5_000)),
        max_task_failures: std::env::var("SWARM_FLEET_MAX_TASK_FAILURES")
            .ok()
            .and_then(|v| v.parse().ok()),
        ..FleetConfig::default()
    };

    eprintln!("🐝 Swarm Fleet v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker WS: ws://0.0.0.0:{}/ws/workers/{{id}}", port);
    eprintln!("   Task API:  http://0.0.0.0:{}/api/tasks", port);
    eprintln!("   Fleet API: http://0.0.0.0:{}/api/fleet", port);
    eprintln!(
        "   Heartbeat timeout: {}ms, sweep every {}ms\n",
        config.heartbeat_timeout.as_millis(),
        config.sweep_interval.as_millis()
    );

    let coordinator = FleetCoordinator::new(config);
    let sweep_handle = spawn_sweep_loop(coordinator.clone());

    let app = fleet_routes(coordinator);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Fleet server started");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    sweep_handle.abort();

    Ok(())
}
