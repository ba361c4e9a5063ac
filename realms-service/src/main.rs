#[macro_use]
extern crate tracing;

use std::sync::Arc;

use anyhow::Context as _;
use camino::Utf8PathBuf;

use realms_service::acl::always_allow;
use realms_service::api::{self, AppState};
use realms_service::config::Config;
use realms_service::log;
use realms_service::realm::aggregate::{PassivationSweep, RealmAggregate};
use realms_service::realm::index::{InMemoryRealmIndex, RealmIndex};
use realms_service::realm::journal::memory::{InMemoryJournal, InMemorySnapshotStore};
use realms_service::realm::projector::EventProjector;
use realms_service::realms::RealmsFacade;
use realms_service::wellknown::ReqwestHttpJson;

use iam_task::ShutdownHandle;

/// Parses `--config-path <path>` off the command line, the same flag name as the teacher's
/// service CLI, without the Windows-service register/unregister machinery this service has no
/// use for.
fn config_path() -> anyhow::Result<Utf8PathBuf> {
    let mut args = std::env::args();
    args.next().context("executable name is missing from the environment")?;

    while let Some(arg) = args.next() {
        if arg == "--config-path" {
            let path = args.next().context("missing value for --config-path")?;
            return Utf8PathBuf::from_path_buf(path.into()).map_err(|_| anyhow::anyhow!("--config-path is not valid UTF-8"));
        }
    }

    Ok(Utf8PathBuf::from("realms-service.json"))
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config_path = config_path()?;
    let _logger_guard = log::init(camino::Utf8Path::new("."), "info")?;

    let config = Config::load(&config_path).unwrap_or_else(|error| {
        warn!(%error, "using default configuration");
        Config::default()
    });

    info!(listener_url = %config.listener_url, "starting realms-service");

    let journal: Arc<dyn realms_service::realm::journal::EventJournal> = Arc::new(InMemoryJournal::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let index: Arc<InMemoryRealmIndex> = Arc::new(InMemoryRealmIndex::new());
    let aggregate = Arc::new(RealmAggregate::new(Arc::clone(&journal), snapshots));
    let http = Arc::new(ReqwestHttpJson::new(reqwest::Client::new()));

    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

    let projector = EventProjector::new(
        Arc::clone(&journal),
        Arc::clone(&index) as Arc<dyn RealmIndex>,
        (&config.indexing.retry).into(),
    );
    let _projector_task = iam_task::spawn_task(projector, shutdown_signal.clone());

    let passivation_sweep = PassivationSweep {
        aggregate: Arc::clone(&aggregate),
        interval: config.aggregate.passivation.lapsed_since_last_interaction,
    };
    let _passivation_task = iam_task::spawn_task(passivation_sweep, shutdown_signal.clone());

    let facade = Arc::new(RealmsFacade::new(
        aggregate,
        Arc::clone(&index) as Arc<dyn RealmIndex>,
        http,
        (&config.aggregate.retry).into(),
        always_allow(),
        config.aggregate.command_evaluation_timeout,
    ));

    let router = api::make_router(AppState { facade });

    let listener_addr = config.listener_url.strip_prefix("http://").unwrap_or(&config.listener_url);
    let listener = tokio::net::TcpListener::bind(listener_addr)
        .await
        .with_context(|| format!("failed to bind {listener_addr}"))?;

    info!(addr = %listener_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_handle.signal();
            shutdown_handle.all_closed().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
