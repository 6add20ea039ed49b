// crates/worker-sim/src/main.rs
use std::net::SocketAddr;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use noisescope_worker_sim::state::{SimBehavior, SimState};

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,noisescope_worker_sim=info".into()),
        )
        .init();

    let port = std::env::var("NOISESCOPE_SIM_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let step_delay = std::env::var("NOISESCOPE_SIM_STEP_DELAY_MS")
        .ok()
        .and_then(|ms| ms.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(5));

    let state = SimState::with_behavior(SimBehavior {
        step_delay,
        ..SimBehavior::default()
    });
    let app = noisescope_worker_sim::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Simulated worker listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
