pub mod types;
pub mod config;
pub mod error;
pub mod deadline;
pub mod ranking;
pub mod store;
pub mod submission;
pub mod completion;
pub mod memory;
pub mod supabase;
pub mod results;
pub mod season;
pub mod server;

use config::*;
use error::AppError;
use memory::MemoryBackend;
use server::AppState;
use store::Services;
use supabase::SupabaseBackend;
use types::*;

use std::{fs, path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── Entry point ────────────────────────────────────────────────────────

pub fn run() -> Result<(), AppError> {
    let env_keys = load_env_file();

    // Initialize tracing with file output
    let logs_dir = log_dir();
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("F1 predictor starting");
    if !env_keys.is_empty() {
        info!("loaded {} from {}", env_keys.join(", "), env_file_path().display());
    }

    let config = load_config_inner().map_err(AppError::Config)?;
    log_env_warnings(&config);

    let services = build_services(&config)?;
    let static_dir = static_dir(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Config(format!("tokio runtime: {e}")))?;
    let result = runtime.block_on(server::serve(&config.bind_addr, AppState::new(services), static_dir));
    if let Err(e) = &result {
        error!("server stopped: {e}");
    }
    result
}

// ── Backend selection ──────────────────────────────────────────────────

pub fn build_services(config: &AppConfig) -> Result<Services, AppError> {
    match config.backend.trim() {
        BACKEND_SUPABASE => {
            let backend = SupabaseBackend::from_config(config)?;
            info!("using hosted backend at {}", config.supabase_url.trim());
            Ok(Services::from_backend(Arc::new(backend)))
        }
        BACKEND_MEMORY => {
            let backend = MemoryBackend::from_config(config)?;
            info!("using in-memory backend");
            Ok(Services::from_backend(Arc::new(backend)))
        }
        other => Err(AppError::Config(format!(
            "unknown backend \"{other}\", expected \"{BACKEND_MEMORY}\" or \"{BACKEND_SUPABASE}\""
        ))),
    }
}

fn static_dir(config: &AppConfig) -> Option<PathBuf> {
    let raw = config.static_dir.trim();
    if raw.is_empty() {
        return None;
    }
    let path = resolve_repo_path(raw);
    if path.is_dir() {
        Some(path)
    } else {
        error!("static dir {} does not exist, serving the API only", path.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_services_rejects_unknown_backend() {
        let config = AppConfig {
            backend: "firebase".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(build_services(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_supabase_backend_needs_url() {
        let config = AppConfig {
            backend: BACKEND_SUPABASE.to_string(),
            supabase_url: String::new(),
            supabase_anon_key: "anon".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(build_services(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_memory_backend_from_default_config() {
        assert!(build_services(&AppConfig::default()).is_ok());
    }
}
