//! `hr serve` command implementation.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use hr_config::{ACTIVATION_ENV, CliSettings, Config, ReloadMode};
use hr_server::{run_server, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Notification transport selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum ModeArg {
    /// Server-Sent Events.
    Sse,
    /// JSON polling.
    Poll,
}

impl From<ModeArg> for ReloadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sse => Self::Sse,
            ModeArg::Poll => Self::Poll,
        }
    }
}

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover hr.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve static files from (overrides config).
    #[arg(short = 'r', long)]
    static_root: Option<PathBuf>,

    /// Build marker file to watch; implies --hot-reload.
    #[arg(short, long)]
    watch: Option<PathBuf>,

    /// Notification transport (overrides config).
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Enable live reload.
    #[arg(long)]
    hot_reload: bool,

    /// Disable live reload, even when HOT_RELOAD is set.
    #[arg(long, conflicts_with_all = ["hot_reload", "watch"])]
    no_hot_reload: bool,

    /// Enable verbose output (info-level logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = self.cli_settings();
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        tracing::debug!(
            config_path = ?config.config_path,
            live_reload = config.live_reload.enabled,
            "Configuration loaded"
        );

        print_startup(&output, &config);

        let server_config = server_config_from_config(&config);
        run_server(server_config).await?;

        Ok(())
    }

    /// Build CLI overrides from the parsed arguments.
    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            host: self.host.clone(),
            port: self.port,
            static_root: self.static_root.clone(),
            live_reload_enabled: self.resolve_live_reload_enabled(),
            watch: self.watch.clone(),
            mode: self.mode.map(ReloadMode::from),
        }
    }

    /// Resolve `live_reload_enabled` from --hot-reload/--no-hot-reload flags.
    fn resolve_live_reload_enabled(&self) -> Option<bool> {
        if self.no_hot_reload {
            Some(false)
        } else if self.hot_reload {
            Some(true)
        } else {
            None
        }
    }
}

/// Print the startup banner.
fn print_startup(output: &Output, config: &Config) {
    output.highlight(&format!(
        "Serving on http://{}:{}",
        config.server.host, config.server.port
    ));

    let root = &config.static_resolved.root;
    output.field("Static root", &root.display().to_string());
    if !root.is_dir() {
        output.warning(&format!(
            "Static root {} does not exist yet",
            root.display()
        ));
    }

    if !config.live_reload.enabled {
        output.field("Live reload", &format!("disabled (set {ACTIVATION_ENV} to enable)"));
        return;
    }

    let mode = match config.live_reload.mode {
        ReloadMode::Sse => "server-sent events",
        ReloadMode::Poll => "polling",
    };
    output.field("Live reload", mode);
    output.field("Status", &config.live_reload.path);
    output.field("Script", &config.live_reload.script_path());

    match &config.watch_target {
        Some(target) => output.field("Watching", &target.display().to_string()),
        None => output.field("Watching", "nothing (fixed token)"),
    }
}
