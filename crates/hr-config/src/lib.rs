//! Configuration management for hr.
//!
//! Parses `hr.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! Settings are layered in this order, later layers winning:
//!
//! 1. `hr.toml` (or built-in defaults when no file is found)
//! 2. The [`ACTIVATION_ENV`] environment variable
//! 3. CLI settings passed as [`CliSettings`]
//!
//! ## Activation
//!
//! Live reload is off unless `live_reload.enabled = true`, the `HOT_RELOAD`
//! environment variable is present, or the CLI asks for it. A non-empty
//! `HOT_RELOAD` value names the file to watch (typically a bundler's
//! build-info file). An empty value activates the endpoints without a watcher,
//! so clients see one fixed token for the whole process lifetime.
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `static.root`
//! - `live_reload.watch`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that activates live reload.
pub const ACTIVATION_ENV: &str = "HOT_RELOAD";

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "hr.toml";

/// Marker file that disables static caching even without live reload.
const NO_CACHE_MARKER: &str = ".hot-reload";

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override static files directory.
    pub static_root: Option<PathBuf>,
    /// Override live reload enabled flag.
    pub live_reload_enabled: Option<bool>,
    /// Override the watched build marker (implies live reload).
    pub watch: Option<PathBuf>,
    /// Override notification transport.
    pub mode: Option<ReloadMode>,
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Static file configuration (paths are relative strings from TOML).
    #[serde(rename = "static")]
    static_files: StaticConfigRaw,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,

    /// Resolved static file configuration (set after loading).
    #[serde(skip)]
    pub static_resolved: StaticConfig,
    /// Resolved watch target (set after loading).
    #[serde(skip)]
    pub watch_target: Option<PathBuf>,
    /// Directory the configuration was resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7878,
        }
    }
}

/// Raw static configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StaticConfigRaw {
    root: Option<String>,
}

/// Resolved static file configuration with absolute paths.
#[derive(Debug, Default)]
pub struct StaticConfig {
    /// Directory served as the fallback handler.
    pub root: PathBuf,
}

/// Notification transport used by the status endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Server-Sent Events: one long-lived connection per client.
    #[default]
    Sse,
    /// Short-lived JSON requests repeated by the client.
    Poll,
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether live reload is enabled.
    pub enabled: bool,
    /// Build marker file to watch (raw string from TOML).
    pub watch: Option<String>,
    /// Notification transport.
    pub mode: ReloadMode,
    /// Status endpoint path.
    pub path: String,
    /// Script endpoint path (defaults to `<path>/script`).
    pub script_path: Option<String>,
    /// Seconds between keep-alive pings on stream connections.
    pub keepalive_secs: u64,
    /// Quiet period after the last filesystem event before clients are notified.
    pub debounce_ms: u64,
    /// Messages buffered per stream client before it is considered stalled.
    pub client_buffer: usize,
    /// Maximum number of concurrent stream clients (`None` means unlimited).
    pub max_clients: Option<usize>,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch: None,
            mode: ReloadMode::default(),
            path: "/hot-reload".to_owned(),
            script_path: None,
            keepalive_secs: 15,
            debounce_ms: 300,
            client_buffer: 16,
            max_clients: None,
        }
    }
}

impl LiveReloadConfig {
    /// Script endpoint path, derived from the status path when not set.
    #[must_use]
    pub fn script_path(&self) -> String {
        self.script_path
            .clone()
            .unwrap_or_else(|| format!("{}/script", self.path.trim_end_matches('/')))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`live_reload.watch`").
        field: String,
        /// Error message (e.g., "${`BUILD_DIR`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require an endpoint path to be absolute.
fn require_url_path(value: &str, field: &str) -> Result<(), ConfigError> {
    if !value.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{field} must start with '/'"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `hr.toml` in current directory and parents.
    ///
    /// The process environment is consulted for [`ACTIVATION_ENV`] after the
    /// file, and CLI settings are applied last.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the final configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        let cwd = std::env::current_dir().unwrap_or_default();
        config.apply_env_with(&cwd, |name| std::env::var(name).ok());

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply the [`ACTIVATION_ENV`] variable using a custom lookup.
    ///
    /// A present variable enables live reload. A non-empty value becomes the
    /// watch target, resolved against `cwd` when relative.
    pub fn apply_env_with<F>(&mut self, cwd: &Path, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup(ACTIVATION_ENV) else {
            return;
        };

        self.live_reload.enabled = true;

        let value = value.trim();
        if !value.is_empty() {
            self.watch_target = Some(cwd.join(value));
        }
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(root) = &settings.static_root {
            self.static_resolved.root.clone_from(root);
        }
        if let Some(enabled) = settings.live_reload_enabled {
            self.live_reload.enabled = enabled;
        }
        if let Some(watch) = &settings.watch {
            self.live_reload.enabled = true;
            self.watch_target = Some(watch.clone());
        }
        if let Some(mode) = settings.mode {
            self.live_reload.mode = mode;
        }
    }

    /// Whether static responses should bypass browser caches.
    ///
    /// True while live reload is active, or when a `.hot-reload` marker file
    /// sits in the working directory or next to the configuration.
    #[must_use]
    pub fn static_no_cache(&self) -> bool {
        let cwd = std::env::current_dir().unwrap_or_default();
        self.static_no_cache_in(&cwd)
    }

    /// [`Config::static_no_cache`] with an explicit working directory.
    #[must_use]
    pub fn static_no_cache_in(&self, cwd: &Path) -> bool {
        self.live_reload.enabled
            || cwd.join(NO_CACHE_MARKER).exists()
            || self.base_dir.join(NO_CACHE_MARKER).exists()
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            static_files: StaticConfigRaw::default(),
            live_reload: LiveReloadConfig::default(),
            static_resolved: StaticConfig {
                root: base.join("public"),
            },
            watch_target: None,
            base_dir: base.to_path_buf(),
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically at the end of [`Config::load`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_live_reload()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 is technically valid (OS assigns a random port), but it's
        // unlikely to be intentional in a config file
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate live reload configuration.
    fn validate_live_reload(&self) -> Result<(), ConfigError> {
        let live_reload = &self.live_reload;
        let script_path = live_reload.script_path();

        require_url_path(&live_reload.path, "live_reload.path")?;
        require_url_path(&script_path, "live_reload.script_path")?;

        if live_reload.path == script_path {
            return Err(ConfigError::Validation(
                "live_reload.path and live_reload.script_path must differ".to_owned(),
            ));
        }
        if live_reload.keepalive_secs == 0 {
            return Err(ConfigError::Validation(
                "live_reload.keepalive_secs must be greater than 0".to_owned(),
            ));
        }
        if live_reload.client_buffer == 0 {
            return Err(ConfigError::Validation(
                "live_reload.client_buffer must be greater than 0".to_owned(),
            ));
        }
        if live_reload.max_clients == Some(0) {
            return Err(ConfigError::Validation(
                "live_reload.max_clients must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;

        if let Some(ref root) = self.static_files.root {
            self.static_files.root = Some(expand::expand_env(root, "static.root")?);
        }

        if let Some(ref watch) = self.live_reload.watch {
            self.live_reload.watch = Some(expand::expand_env(watch, "live_reload.watch")?);
        }

        Ok(())
    }

    /// Resolve relative paths to absolute paths based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.static_resolved = StaticConfig {
            root: config_dir.join(self.static_files.root.as_deref().unwrap_or("public")),
        };
        self.watch_target = self
            .live_reload
            .watch
            .as_deref()
            .filter(|w| !w.is_empty())
            .map(|w| config_dir.join(w));
        self.base_dir = config_dir.to_path_buf();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/test"));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7878);
        assert_eq!(config.static_resolved.root, PathBuf::from("/test/public"));
        assert!(!config.live_reload.enabled);
        assert_eq!(config.live_reload.mode, ReloadMode::Sse);
        assert_eq!(config.live_reload.path, "/hot-reload");
        assert_eq!(config.live_reload.script_path(), "/hot-reload/script");
        assert_eq!(config.live_reload.keepalive_secs, 15);
        assert_eq!(config.live_reload.debounce_ms, 300);
        assert!(config.watch_target.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7878);
    }

    #[test]
    fn test_parse_live_reload_config() {
        let toml = r#"
[live_reload]
enabled = true
watch = "dist/build-info.json"
mode = "poll"
path = "/hot"
keepalive_secs = 30
max_clients = 8
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.live_reload.enabled);
        assert_eq!(
            config.live_reload.watch.as_deref(),
            Some("dist/build-info.json")
        );
        assert_eq!(config.live_reload.mode, ReloadMode::Poll);
        assert_eq!(config.live_reload.script_path(), "/hot/script");
        assert_eq!(config.live_reload.keepalive_secs, 30);
        assert_eq!(config.live_reload.max_clients, Some(8));
    }

    #[test]
    fn test_parse_unknown_mode_fails() {
        let toml = r#"
[live_reload]
mode = "websocket"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let toml = r#"
[static]
root = "web"

[live_reload]
watch = "dist/build-info.json"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.static_resolved.root, PathBuf::from("/project/web"));
        assert_eq!(
            config.watch_target,
            Some(PathBuf::from("/project/dist/build-info.json"))
        );
        assert_eq!(config.base_dir, PathBuf::from("/project"));
    }

    #[test]
    fn test_resolve_paths_empty_watch_is_none() {
        let toml = r#"
[live_reload]
watch = ""
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert!(config.watch_target.is_none());
    }

    #[test]
    fn test_env_absent_leaves_config_inert() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_env_with(Path::new("/cwd"), no_env);

        assert!(!config.live_reload.enabled);
        assert!(config.watch_target.is_none());
    }

    #[test]
    fn test_env_empty_activates_without_watcher() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_env_with(Path::new("/cwd"), |name| {
            (name == ACTIVATION_ENV).then(String::new)
        });

        assert!(config.live_reload.enabled);
        assert!(config.watch_target.is_none());
    }

    #[test]
    fn test_env_value_sets_watch_target() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_env_with(Path::new("/cwd"), |name| {
            (name == ACTIVATION_ENV).then(|| "dist/build-info.json".to_owned())
        });

        assert!(config.live_reload.enabled);
        assert_eq!(
            config.watch_target,
            Some(PathBuf::from("/cwd/dist/build-info.json"))
        );
    }

    #[test]
    fn test_env_absolute_value_kept() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_env_with(Path::new("/cwd"), |_| Some("/abs/info.json".to_owned()));

        assert_eq!(config.watch_target, Some(PathBuf::from("/abs/info.json")));
    }

    #[test]
    fn test_apply_cli_settings_host() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            host: Some("0.0.0.0".to_owned()),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7878); // Unchanged
    }

    #[test]
    fn test_apply_cli_settings_watch_enables_live_reload() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            watch: Some(PathBuf::from("/build/info.json")),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert!(config.live_reload.enabled);
        assert_eq!(config.watch_target, Some(PathBuf::from("/build/info.json")));
    }

    #[test]
    fn test_apply_cli_settings_override_env() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_env_with(Path::new("/cwd"), |_| Some(String::new()));
        let overrides = CliSettings {
            live_reload_enabled: Some(false),
            mode: Some(ReloadMode::Poll),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert!(!config.live_reload.enabled);
        assert_eq!(config.live_reload.mode, ReloadMode::Poll);
    }

    #[test]
    fn test_apply_cli_settings_empty() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.apply_cli_settings(&CliSettings::default());

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.static_resolved.root, PathBuf::from("/test/public"));
        assert!(!config.live_reload.enabled);
    }

    #[test]
    fn test_validate_default_config_passes() {
        let config = Config::default_with_base(Path::new("/test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_server_port_zero() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_validate_relative_path_rejected() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.live_reload.path = "hot-reload".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("live_reload.path"));
    }

    #[test]
    fn test_validate_same_paths_rejected() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.live_reload.script_path = Some("/hot-reload".to_owned());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_validate_zero_keepalive_rejected() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.live_reload.keepalive_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_zero_max_clients_rejected() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.live_reload.max_clients = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_static_no_cache_marker() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_with_base(dir.path());
        assert!(!config.static_no_cache());

        std::fs::write(dir.path().join(NO_CACHE_MARKER), "").unwrap();
        assert!(config.static_no_cache());
    }

    #[test]
    fn test_static_no_cache_marker_in_working_dir() {
        let project = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let config = Config::default_with_base(project.path());
        assert!(!config.static_no_cache_in(cwd.path()));

        // Config discovered in a parent directory, marker next to the process
        std::fs::write(cwd.path().join(NO_CACHE_MARKER), "").unwrap();
        assert!(config.static_no_cache_in(cwd.path()));
    }

    #[test]
    fn test_static_no_cache_when_live_reload_enabled() {
        let mut config = Config::default_with_base(Path::new("/nonexistent"));
        config.live_reload.enabled = true;
        assert!(config.static_no_cache());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/hr.toml")), None);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[live_reload]
enabled = true
watch = "dist/build-info.json"
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.watch_target,
            Some(dir.path().join("dist/build-info.json"))
        );
        assert_eq!(config.config_path, Some(path));
    }
}
