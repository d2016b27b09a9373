use crate::commands::deploy::{self, Selection};
use crate::state::AppContext;
use crate::webserver::{self, Health};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_SCHEDULE: &str = "0 * * * * *";

/// Deploys every outdated image of `namespace` on a cron schedule until Ctrl-C, serving
/// health probes on `port` meanwhile.
pub async fn run(ctx: AppContext, namespace: String, schedule: &str, port: u16) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let health = Health::default();
    // runs never overlap, a tick arriving during a run is dropped
    let running = Arc::new(Mutex::new(()));

    info!("Executing job scheduler at cron schedule {}", schedule);
    let mut scheduler = JobScheduler::new().await?;

    let job_health = health.clone();
    let job = Job::new_async(schedule, move |_uuid, _l| {
        let ctx = ctx.clone();
        let namespace = namespace.clone();
        let health = job_health.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                warn!("Previous autodeploy run still in progress, skipping");
                return;
            };
            info!("Autodeploying namespace {}", namespace);
            match deploy::run(&ctx, &namespace, Selection::All).await {
                Ok(report) => {
                    info!("Autodeploy upgraded {} containers", report.outcomes.len());
                    health.record(true);
                }
                Err(e) => {
                    error!("Error running autodeploy job: {:#}", e);
                    health.record(false);
                }
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        signal.cancel();
    });

    let app = webserver::create_app(health);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
