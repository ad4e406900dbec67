pub mod commands;
pub mod computer;
pub mod datasets;
pub mod error;
pub mod file_manager;
pub mod intake;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod process_manager;
pub mod remote;
pub mod requester;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod utils;

use chrono::Utc;
use computer::MetricsComputer;
use datasets::DatasetRegistry;
use error::ServerError;
use file_manager::initialize_json_file;
use intake::{JsonModelCatalog, SpoolQueue};
use log::{info, warn};
use metrics::MetricRegistry;
use models::{ControlMessage, IntakeMessage};
use remote::{HttpInferencePlatform, InferencePlatform};
use requester::{Collaborators, Requester};
use scheduler::JobScheduler;
use scoring::{FileScoreSink, HttpScoreSink, ScoreSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::JobStore;
use utils::{
    get_control_queue_dir, get_datasets_json_path, get_intake_queue_dir, get_models_json_path,
    get_scores_json_path, get_snapshot_json_path, initialize_data_directories,
};

const RUNTIME_SHUTDOWN_SECS: u64 = 5;

fn initialize_app_data() -> Result<(), String> {
    // Create directory structure
    initialize_data_directories()?;

    // Registry exports start out empty
    let empty_vec: Vec<serde_json::Value> = vec![];

    initialize_json_file(&get_datasets_json_path(), &empty_vec)?;
    initialize_json_file(&get_models_json_path(), &empty_vec)?;

    Ok(())
}

/// Serve until Ctrl-C. Returns only process-level failures.
pub fn run() -> Result<(), ServerError> {
    let _log_guard = logging::init_logging().map_err(ServerError::Config)?;
    initialize_app_data().map_err(ServerError::Config)?;
    logging::cleanup_old_logs();

    let settings = commands::settings::get_settings().map_err(ServerError::Config)?;
    info!("Starting evalserver as {}", settings.server_id);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("evalserver-metrics")
        .max_blocking_threads(settings.worker_count())
        .build()
        .map_err(|e| ServerError::Config(format!("Failed to start runtime: {}", e)))?;

    // A corrupt or newer snapshot is fatal: never run on unknown state.
    let store = Arc::new(JobStore::new());
    let restored = store.restore_from(&get_snapshot_json_path())?;

    let platform: Arc<dyn InferencePlatform> = Arc::new(HttpInferencePlatform::new(&settings.platform));
    let datasets = Arc::new(DatasetRegistry::load(&get_datasets_json_path())?);
    if datasets.is_empty() {
        warn!("No datasets registered in {:?}", get_datasets_json_path());
    }

    let scheduler = JobScheduler::new(store.clone(), platform, datasets.clone(), &settings);
    if restored > 0 {
        scheduler.reconcile_at(Utc::now());
    }

    let computer = MetricsComputer::new(
        runtime.handle().clone(),
        datasets.clone(),
        Arc::new(MetricRegistry::default()),
        &settings,
    );

    let sink: Box<dyn ScoreSink> = match &settings.score_sink_url {
        Some(url) => Box::new(HttpScoreSink::new(
            url,
            Duration::from_secs(settings.platform.request_timeout_secs),
        )),
        None => Box::new(FileScoreSink::new(get_scores_json_path())),
    };
    let io = Collaborators {
        catalog: Box::new(JsonModelCatalog::new(get_models_json_path())),
        intake: Box::new(SpoolQueue::<IntakeMessage>::open(&get_intake_queue_dir())?),
        control: Box::new(SpoolQueue::<ControlMessage>::open(&get_control_queue_dir())?),
        sink,
    };

    let mut requester = Requester::new(settings, store, scheduler, computer, datasets, io)
        .with_snapshot_path(get_snapshot_json_path());

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            flag.store(false, Ordering::SeqCst);
        }
    });

    let result = requester.run(&running);
    drop(requester);
    runtime.shutdown_timeout(Duration::from_secs(RUNTIME_SHUTDOWN_SECS));
    result
}
