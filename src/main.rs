use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pty_relay_lib::config::{
    PartialAlertConfig, PartialConfig, PartialProcessConfig, PartialServerConfig, RelayConfig,
};
use pty_relay_lib::notify::{AlertSink, NotificationScheduler, NullSink, RelaySink};
use pty_relay_lib::server::{self, generate_auth_token, ServerAppState};
use pty_relay_lib::shutdown::{
    register_signal_handlers, run_to_completion, ShutdownHandler, ShutdownState,
    RUNTIME_SHUTDOWN_TIMEOUT,
};
use pty_relay_lib::supervisor::{CommandSpec, ProcessSupervisor, PtySpawner};

/// Program run when no command is given
const DEFAULT_COMMAND: &str = "claude";

/// How long the HTTP server gets to finish after shutdown
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// PTY Relay - share an interactive coding-assistant CLI over WebSocket
#[derive(Parser, Debug)]
#[command(name = "pty-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to bind the server to
    #[arg(long, env = "PTY_RELAY_PORT")]
    port: Option<u16>,

    /// Address to bind the server to
    #[arg(long, env = "PTY_RELAY_BIND")]
    bind: Option<String>,

    /// Fixed auth token (or set PTY_RELAY_TOKEN env var)
    /// If not provided, a random token is generated on each startup
    #[arg(long, env = "PTY_RELAY_TOKEN")]
    token: Option<String>,

    /// Reject all input from observers
    #[arg(long, env = "PTY_RELAY_READ_ONLY")]
    read_only: bool,

    /// Working directory for the supervised process
    #[arg(long, env = "PTY_RELAY_CWD")]
    cwd: Option<PathBuf>,

    /// Config file (defaults to <config_dir>/pty-relay/config.toml)
    #[arg(long, env = "PTY_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// ntfy topic for push alerts; alerts are off without one
    #[arg(long, env = "PTY_RELAY_NTFY_TOPIC")]
    ntfy_topic: Option<String>,

    /// ntfy server URL
    #[arg(long, env = "PTY_RELAY_NTFY_SERVER")]
    ntfy_server: Option<String>,

    /// Disable push alerts
    #[arg(long, env = "PTY_RELAY_NO_NOTIFY")]
    no_notify: bool,

    /// Command to supervise, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    /// Values given on the command line, as the highest-priority config layer
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            server: Some(PartialServerConfig {
                port: self.port,
                bind: self.bind.clone(),
                token: self.token.clone(),
                shutdown_deadline_ms: None,
            }),
            process: Some(PartialProcessConfig {
                cwd: self.cwd.clone(),
                read_only: self.read_only.then_some(true),
                ..Default::default()
            }),
            alerts: Some(PartialAlertConfig {
                enabled: self.no_notify.then_some(false),
                ntfy_server: self.ntfy_server.clone(),
                ntfy_topic: self.ntfy_topic.clone(),
                ..Default::default()
            }),
        }
    }

    fn command_spec(&self, cwd: Option<PathBuf>) -> CommandSpec {
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (DEFAULT_COMMAND.to_string(), Vec::new()),
        };
        CommandSpec::new(program).args(args).cwd(cwd)
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = RelayConfig::load(cli.config.as_deref(), cli.overrides())
        .context("Failed to load configuration")?;
    let command = cli.command_spec(config.process.cwd.clone());

    // Create the tokio runtime
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    run_to_completion(rt, run_relay(command, config), RUNTIME_SHUTDOWN_TIMEOUT)
}

async fn run_relay(command: CommandSpec, config: RelayConfig) -> anyhow::Result<i32> {
    let sink: Arc<dyn AlertSink> = match config.alerts.ntfy_topic {
        Some(ref topic) => Arc::new(
            RelaySink::new(
                &config.alerts.ntfy_server,
                topic,
                config.alerts.ntfy_token.clone(),
            )
            .context("Failed to create alert relay client")?,
        ),
        None => Arc::new(NullSink),
    };
    let scheduler = NotificationScheduler::new(sink, config.debounce());
    scheduler.set_enabled(config.alerts_active());

    log::info!("Supervising: {}", command.display());
    let spawner = Arc::new(PtySpawner::new(command));
    let supervisor = ProcessSupervisor::new(config.supervisor_config(), spawner, scheduler);

    // Initialize shutdown state
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    // Use provided token or generate a random one
    let auth_token = config
        .server
        .token
        .clone()
        .unwrap_or_else(generate_auth_token);
    let state = ServerAppState::new(auth_token, supervisor.clone(), shutdown_state.clone());

    let mut supervisor_task = tokio::spawn(supervisor.clone().run());
    let mut server_task = tokio::spawn({
        let port = config.server.port;
        let bind = config.server.bind.clone();
        async move { server::run_server(port, &bind, state).await }
    });

    let mut exit_code = 0;
    let mut server_finished = false;

    tokio::select! {
        _ = shutdown_state.wait() => {}
        result = &mut supervisor_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("Supervisor stopped: {}", e);
                    exit_code = 1;
                }
                Err(e) => {
                    log::error!("Supervisor task failed: {}", e);
                    exit_code = 1;
                }
            }
        }
        result = &mut server_task => {
            server_finished = true;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("{}", e);
                    exit_code = 1;
                }
                Err(e) => {
                    log::error!("Server task failed: {}", e);
                    exit_code = 1;
                }
            }
        }
    }

    let handler = ShutdownHandler::with_state(shutdown_state);
    let result = handler
        .shutdown(&supervisor, config.shutdown_deadline())
        .await;
    if !result.is_clean() {
        exit_code = 1;
    }

    if !server_finished {
        match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server_task).await {
            Ok(Ok(Err(e))) => log::warn!("{}", e),
            Ok(_) => {}
            Err(_) => log::warn!("Server did not stop in time"),
        }
    }

    Ok(exit_code)
}
