//! # Service Bus Demo CLI
//!
//! Command-line entry point: parses arguments, layers configuration, sets up
//! logging and drives a [`DemoRunner`] with console checkpoints.
//!
//! Configuration sources, later ones override earlier ones:
//!
//! 1. built-in defaults
//! 2. `config/servicebus-demo.{yaml,toml,json}` in the working directory
//! 3. the file given by `--config` / `SBDEMO_CONFIG_FILE`
//! 4. `SBDEMO__*` environment variables, e.g. `SBDEMO__PRODUCER__MESSAGE_COUNT=3`
//! 5. command-line flags

use async_trait::async_trait;
use clap::Parser;
use queue_runtime::ProviderConfig;
use serde::{Deserialize, Serialize};
use servicebus_demo_core::{
    AzureIdentityCredential, Checkpoint, ConsumerConfig, CredentialProvider, DemoConfig,
    DemoError, DemoRunner, ErrorCategory, KeyVaultConfiguration, MessageBodyMode, OperatorGate,
    ProducerConfig, SecretResolver, ServiceBusClientFactory, StdoutSink, VaultName,
    KEY_VAULT_NAME_VAR,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "SBDEMO";

/// Base name of the optional configuration file in the working directory
pub const LOCAL_CONFIG_FILE: &str = "config/servicebus-demo";

/// Exit code after Ctrl-C, as a shell reports SIGINT
pub const EXIT_INTERRUPTED: i32 = 130;

// ============================================================================
// CLI Structure
// ============================================================================

/// Sends five messages to an Azure Service Bus queue and prints them as they
/// are received
#[derive(Debug, Parser)]
#[command(name = "servicebus-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Key Vault holding the `QueueName` and `ServiceBusConnectionString` secrets
    #[arg(long, env = "KEY_VAULT_NAME")]
    pub vault_name: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "SBDEMO_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Do not wait for ENTER; keep consuming until Ctrl-C
    #[arg(long)]
    pub no_prompt: bool,

    /// Number of messages to send
    #[arg(long)]
    pub message_count: Option<usize>,

    /// Put the message index in each body instead of the literal text
    #[arg(long)]
    pub indexed_body: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub show_config: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings resolved from files, environment and flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub key_vault: KeyVaultConfiguration,
    pub provider: ProviderConfig,
}

impl AppSettings {
    pub fn demo_config(&self) -> DemoConfig {
        DemoConfig {
            producer: self.producer.clone(),
            consumer: self.consumer.clone(),
        }
    }
}

/// Layer configuration sources for `cli`
///
/// # Errors
/// `CliError::Configuration` when an explicit file is missing, a file is
/// malformed, or a value cannot be converted to its field type.
pub fn load_settings(cli: &Cli) -> Result<AppSettings, CliError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name(LOCAL_CONFIG_FILE).required(false));

    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    let mut settings: AppSettings = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()?;

    if let Some(count) = cli.message_count {
        settings.producer.message_count = count;
    }
    if cli.indexed_body {
        settings.producer.body_mode = MessageBodyMode::Indexed;
    }

    Ok(settings)
}

// ============================================================================
// Logging
// ============================================================================

fn default_filter(level: &str) -> String {
    format!("servicebus_demo={level},queue_runtime={level}", level = level)
}

/// Install the global subscriber; logs go to stderr
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(&cli.log_level)))
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Console checkpoints
// ============================================================================

/// Operator gate reading ENTER from a line reader, with Ctrl-C delivered
/// through `shutdown`
///
/// Ctrl-C before the handler is registered ends the run as interrupted; once
/// the handler is receiving it is the normal way to stop.
pub struct ConsoleGate<R> {
    input: Mutex<R>,
    shutdown: watch::Receiver<bool>,
    no_prompt: bool,
}

impl<R> ConsoleGate<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(input: R, shutdown: watch::Receiver<bool>, no_prompt: bool) -> Self {
        Self {
            input: Mutex::new(input),
            shutdown,
            no_prompt,
        }
    }

    /// Read one line; `false` at end of input
    async fn read_line(&self) -> Result<bool, DemoError> {
        let mut line = String::new();
        let read = self.input.lock().await.read_line(&mut line).await?;
        Ok(read > 0)
    }

    async fn shutdown_requested(&self) {
        let mut shutdown = self.shutdown.clone();
        // A dropped sender never fires again
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl<R> OperatorGate for ConsoleGate<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn wait(&self, checkpoint: Checkpoint) -> Result<(), DemoError> {
        debug!(%checkpoint, "Waiting for operator");

        match checkpoint {
            Checkpoint::MessagesSent => {
                if *self.shutdown.borrow() {
                    return Err(DemoError::Interrupted { phase: "operator prompt" });
                }
                if !self.no_prompt {
                    tokio::select! {
                        read = self.read_line() => { read?; }
                        _ = self.shutdown_requested() => {
                            return Err(DemoError::Interrupted { phase: "operator prompt" });
                        }
                    }
                }
            }
            Checkpoint::HandlerRegistered => {
                if self.no_prompt {
                    info!("Consuming messages; press Ctrl-C to stop");
                    self.shutdown_requested().await;
                } else {
                    tokio::select! {
                        read = self.read_line() => {
                            if !read? {
                                info!("Input closed; press Ctrl-C to stop");
                                self.shutdown_requested().await;
                            }
                        }
                        _ = self.shutdown_requested() => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn interrupted(&self) {
        self.shutdown_requested().await
    }
}

/// Flip `shutdown` when Ctrl-C arrives
fn spawn_ctrl_c_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown.send(true);
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error(transparent)]
    Demo(#[from] DemoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Logging { .. } => 1,
            Self::Io(_) => 5,
            Self::Demo(e) => match e.error_category() {
                ErrorCategory::Configuration => 1,
                ErrorCategory::Secrets => 2,
                ErrorCategory::Authentication => 3,
                ErrorCategory::Queue => 4,
                ErrorCategory::Io => 5,
                ErrorCategory::Interrupted => EXIT_INTERRUPTED,
            },
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse the process arguments and run
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;
    run(cli).await
}

/// Run with already parsed arguments
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(&cli)?;

    if cli.show_config {
        let json = serde_json::to_string_pretty(&settings).map_err(std::io::Error::other)?;
        println!("{}", json);
        return Ok(());
    }

    let vault_name = cli.vault_name.clone();
    let vault = VaultName::from_lookup(move |key| {
        (key == KEY_VAULT_NAME_VAR).then(|| vault_name.clone()).flatten()
    })
    .map_err(DemoError::from)?;
    info!(vault = %vault, "Using key vault");

    let credential: Arc<dyn CredentialProvider> =
        Arc::new(AzureIdentityCredential::default_chain().map_err(DemoError::from)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_ctrl_c_listener(shutdown_tx);
    let gate = ConsoleGate::new(BufReader::new(tokio::io::stdin()), shutdown_rx, cli.no_prompt);

    run_with(&vault, &settings, credential, &gate).await
}

/// Drive one run against `vault` with an already built credential and gate
///
/// # Errors
/// Any failure of the run; `DemoError::Interrupted` when `gate` reports
/// Ctrl-C before the handler is registered.
pub async fn run_with(
    vault: &VaultName,
    settings: &AppSettings,
    credential: Arc<dyn CredentialProvider>,
    gate: &dyn OperatorGate,
) -> Result<(), CliError> {
    let resolver = SecretResolver::for_vault(vault, settings.key_vault.clone(), credential)
        .map_err(DemoError::from)?;

    let runner = DemoRunner::new(
        resolver,
        Arc::new(ServiceBusClientFactory::new(settings.provider.clone())),
        Arc::new(StdoutSink),
        settings.demo_config(),
    );

    let summary = runner.run(gate).await?;
    info!(queue = %summary.queue_name, sent = summary.sent.len(), "Demo complete");
    Ok(())
}
