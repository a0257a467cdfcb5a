use crate::types::*;
use chrono::Local;
use std::{
  env,
  fs,
  io::Write,
  path::PathBuf,
};

pub fn repo_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw);
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  if let Some(raw) = env_default("PREDICTOR_CONFIG_PATH") {
    return resolve_repo_path(&raw);
  }
  repo_root().join("config.json")
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  if config.backend.trim().is_empty() {
    config.backend = env_default("PREDICTOR_BACKEND").unwrap_or_else(|| BACKEND_MEMORY.to_string());
  }
  if config.supabase_url.trim().is_empty() {
    if let Some(value) = env_default("SUPABASE_URL") {
      config.supabase_url = value;
    }
  }
  if config.supabase_anon_key.trim().is_empty() {
    if let Some(value) = env_default("SUPABASE_ANON_KEY") {
      config.supabase_anon_key = value;
    }
  }
  if config.bind_addr.trim().is_empty() {
    config.bind_addr = env_default("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
  }
  if config.static_dir.trim().is_empty() {
    if let Some(value) = env_default("STATIC_DIR") {
      config.static_dir = value;
    }
  }
  config
}

pub fn load_config_inner() -> Result<AppConfig, String> {
  let path = config_path();
  if !path.is_file() {
    // Leave the env-backed fields empty so the environment can fill them.
    let blank = AppConfig {
      backend: String::new(),
      bind_addr: String::new(),
      ..AppConfig::default()
    };
    return Ok(apply_env_defaults(blank));
  }
  let data = fs::read_to_string(&path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_defaults(config))
}

pub fn env_file_path() -> PathBuf {
  match env::var("PREDICTOR_ENV_PATH") {
    Ok(raw) if !raw.trim().is_empty() => resolve_repo_path(raw.trim()),
    _ => repo_root().join(".env"),
  }
}

/// Exports `.env` entries that the shell has not already set. Returns the keys
/// that were applied.
pub fn load_env_file() -> Vec<String> {
  let Ok(contents) = fs::read_to_string(env_file_path()) else {
    return Vec::new();
  };
  let mut applied = Vec::new();
  for (key, value) in contents.lines().filter_map(parse_env_line) {
    if env::var_os(&key).is_some() {
      continue;
    }
    env::set_var(&key, value);
    applied.push(key);
  }
  applied
}

fn strip_quotes(value: &str) -> Option<&str> {
  ['"', '\'']
    .into_iter()
    .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let line = line.trim();
  if line.starts_with('#') {
    return None;
  }
  let line = line.strip_prefix("export ").unwrap_or(line);
  let (key, raw) = line.split_once('=')?;
  let key = key.trim();
  if key.is_empty() || key.contains(char::is_whitespace) {
    return None;
  }
  let raw = raw.trim();
  let value = match strip_quotes(raw) {
    Some(inner) => inner,
    None => raw.split(" #").next().unwrap_or(raw).trim_end(),
  };
  Some((key.to_string(), value.to_string()))
}

pub fn required_value(value: &str, key: &str) -> Result<String, String> {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    Err(format!("{key} is not set; set it in config.json, .env or the shell environment."))
  } else {
    Ok(trimmed.trim_end_matches('/').to_string())
  }
}

pub fn log_dir() -> PathBuf {
  repo_root().join("logs")
}

pub fn backend_log_path() -> PathBuf {
  log_dir().join("backend_api.log")
}

pub fn backend_log_entry(label: &str, payload: &str) -> String {
  let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
  format!("[{timestamp}] backend {label}\n{}\n\n", payload.trim_end())
}

/// Raw backend traffic goes to its own file, next to the tracing log.
pub fn append_backend_log(label: &str, payload: &str) {
  let path = backend_log_path();
  let opened = fs::create_dir_all(log_dir())
    .and_then(|_| fs::OpenOptions::new().create(true).append(true).open(&path));
  match opened {
    Ok(mut file) => {
      if let Err(e) = file.write_all(backend_log_entry(label, payload).as_bytes()) {
        tracing::debug!("backend log write to {} failed: {e}", path.display());
      }
    }
    Err(e) => tracing::debug!("backend log {} unavailable: {e}", path.display()),
  }
}

pub fn log_env_warnings(config: &AppConfig) {
  let mut warnings = Vec::new();

  match config.backend.trim() {
    BACKEND_SUPABASE => {
      if config.supabase_url.trim().is_empty() {
        warnings.push("SUPABASE_URL not set and no supabaseUrl in config, every backend call will fail".to_string());
      }
      if config.supabase_anon_key.trim().is_empty() {
        warnings.push("SUPABASE_ANON_KEY not set and no supabaseAnonKey in config, every backend call will fail".to_string());
      }
    }
    BACKEND_MEMORY => {
      if config.calendar_path.trim().is_empty() {
        warnings.push("memory backend without calendarPath, race list will be empty".to_string());
      }
      if config.dev_users.is_empty() {
        warnings.push("memory backend without devUsers, nobody can log in".to_string());
      }
    }
    other => warnings.push(format!("unknown backend \"{other}\"")),
  }

  for msg in warnings {
    tracing::warn!("{}", msg);
  }
}

/// Competitor codes are stored upper case (`VER`, `NOR`).
pub fn normalize_competitor_code(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }
  Some(trimmed.to_ascii_uppercase())
}
