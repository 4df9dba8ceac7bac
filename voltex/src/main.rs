//! voltex - Entry Point
//!
//! Self-hosted deployment control plane: builds git repositories into
//! containers on a private network and publishes them behind a reverse proxy.

use std::collections::HashMap;
use std::env;

use voltex::app::options::AppOptions;
use voltex::app::run::run;
use voltex::filesys::file::File;
use voltex::logs::{init_logging, LogOptions};
use voltex::storage::layout::StorageLayout;
use voltex::storage::settings::Settings;
use voltex::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Retrieve the settings file; a missing one means defaults
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => StorageLayout::default().settings_file(),
    };
    let (settings, settings_error) = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => (settings, None),
            Err(e) => {
                eprintln!("Unable to read settings file {}: {e}", settings_file.path().display());
                return;
            }
        }
    } else {
        (
            Settings::default(),
            Some(format!("No settings file at {}, using defaults", settings_file.path().display())),
        )
    };

    let options = match AppOptions::try_from(&settings) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Invalid settings in {}: {e}", settings_file.path().display());
            return;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: Some(options.layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    if let Some(message) = settings_error {
        warn!("{}", message);
    }

    info!("Running voltex {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run voltex: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                warn!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
