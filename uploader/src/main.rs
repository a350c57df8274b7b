mod config;
mod error;
mod events;
mod notifier;
mod publish;
mod registry;
mod server;
mod service;
mod session;
mod storage;
mod upload;

use crate::config::{Settings, UploadSettings};
use crate::error::UploaderError;
use crate::notifier::LogNotifier;
use crate::publish::Publisher;
use crate::registry::SessionRegistry;
use crate::server::start_webhook;
use crate::service::WebhookService;
use crate::storage::FileStorage;
use crate::upload::{ArchiveUploader, HttpUploader, Uploader};
use clap::Parser as ClapParser;
use std::sync::Arc;
use std::{fs, process};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(ClapParser, Debug)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "uploader.toml")]
    config: String,
}

fn main() {
    // Initialize tracing
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::Layer::default()
                .with_target(false)
                .with_thread_names(false)
                .with_ansi(true)
                .with_line_number(false)
                .with_file(false)
                .with_thread_ids(false),
        );
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set a global logger instance: {}", e);
        process::exit(1);
    }

    let cli = Cli::parse();
    let settings = match build_settings(cli.config.as_str()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let runtime = match common::runtime::build(settings.runtime.threads) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        error!("{}", e);
        process::exit(1);
    }

    info!("done");
}

async fn run(settings: Settings) -> Result<(), UploaderError> {
    let uploader: Arc<dyn Uploader + Send + Sync> = match &settings.upload {
        UploadSettings::Archive { path } => {
            info!("upload: archive into {}", path);
            Arc::new(ArchiveUploader::new(path))
        }
        UploadSettings::Http { url } => {
            info!("upload: http to {}", url);
            Arc::new(HttpUploader::new(url)?)
        }
    };

    let notifier = Arc::new(Notify::new());
    common::signal::run(notifier.clone());

    let storage = Arc::new(FileStorage::new(settings.storage.path.clone()));
    let (registry, queue) =
        SessionRegistry::new(settings.session.grace_period, Arc::new(LogNotifier));
    info!(
        "sessions: grace period {:?}, recordings under {}",
        settings.session.grace_period, settings.storage.path
    );

    let mut set = JoinSet::new();

    let publisher = Arc::new(Publisher::new(registry.clone(), storage, uploader));
    set.spawn(publisher.run(queue, notifier.clone()));

    let service = WebhookService::new(registry, &settings.http.path);
    let addr = settings.http.addr.clone();
    let notifier_clone = notifier.clone();
    set.spawn(async move {
        let result = start_webhook(notifier_clone.clone(), addr, service).await;
        if let Err(e) = result {
            notifier_clone.notify_waiters();
            error!("webhook server: {}", e);
        }
    });

    set.join_all().await;

    Ok(())
}

fn build_settings(config_path: &str) -> Result<Settings, UploaderError> {
    let data = fs::read_to_string(config_path).map_err(|_| {
        UploaderError::ConfigError(format!("Config file '{}' does not exist", config_path))
    })?;

    toml::from_str(&data)
        .map_err(|e| UploaderError::ConfigError(format!("Invalid configuration: {}", e)))
}
