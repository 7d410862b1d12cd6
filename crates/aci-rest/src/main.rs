// # aci-rest - single object reconciler
//
// Thin command-line layer over aci-rest-core: reads configuration from the
// environment, builds a transport, runs one lifecycle operation and prints
// the resulting object as JSON on stdout.
//
// ## Usage
//
// ```bash
// aci-rest create object.json
// aci-rest read   object.json
// aci-rest update object.json
// aci-rest delete object.json
// aci-rest import fvTenant:uni/tn-prod
// ```
//
// `-` reads the object from stdin.
//
// ## Configuration
//
// - `ACI_URL`: controller URL
// - `ACI_USERNAME`: account name (default: admin)
// - `ACI_PASSWORD`: password
// - `ACI_PRIVATE_KEY` / `ACI_CERT_NAME`: signature credentials
// - `ACI_PROXY_URL`: proxy URL
// - `ACI_INSECURE`: accept invalid certificates (default: true)
// - `ACI_RETRIES`: attempts per remote operation, 0-9 (default: 3)
// - `ACI_ANNOTATE`: annotate written objects (default: true)
// - `ACI_MOCK`: use the in-memory store instead of the network
// - `ACI_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// Log output goes to stderr so stdout stays machine readable.

use aci_rest_core::{
    LifecycleEvent, ManagedObject, MemoryTransport, Orchestrator, ReadOutcome, RestConfig,
    Transport,
};
use anyhow::{Context, Result};
use std::env;
use std::io::Read;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Operation succeeded
/// - 1: Configuration or usage error
/// - 2: Operation failed
#[derive(Debug, Clone, Copy)]
enum AciExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AciExitCode> for ExitCode {
    fn from(code: AciExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Lifecycle command given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Create(String),
    Read(String),
    Update(String),
    Delete(String),
    Import(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let [command, argument] = args else {
            anyhow::bail!("usage: aci-rest <create|read|update|delete|import> <object.json|-|class:dn>");
        };
        let argument = argument.clone();

        Ok(match command.as_str() {
            "create" => Command::Create(argument),
            "read" => Command::Read(argument),
            "update" => Command::Update(argument),
            "delete" => Command::Delete(argument),
            "import" => Command::Import(argument),
            other => anyhow::bail!(
                "unknown command '{}'. Valid commands: create, read, update, delete, import",
                other
            ),
        })
    }
}

/// Application configuration
struct Config {
    rest: RestConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mock = parse_flag("ACI_MOCK", env::var("ACI_MOCK").ok(), false)?;

        let url = env::var("ACI_URL").or_else(|e| {
            if mock {
                Ok("https://mock.invalid".to_string())
            } else {
                Err(e).context("ACI_URL is required. Set it via: export ACI_URL=https://apic")
            }
        })?;

        let mut rest = RestConfig::new(url, env::var("ACI_USERNAME").unwrap_or_else(|_| "admin".to_string()));
        rest.password = env::var("ACI_PASSWORD").ok();
        rest.private_key = env::var("ACI_PRIVATE_KEY").ok();
        rest.cert_name = env::var("ACI_CERT_NAME").ok();
        rest.proxy_url = env::var("ACI_PROXY_URL").ok().filter(|p| !p.is_empty());
        rest.insecure = parse_flag("ACI_INSECURE", env::var("ACI_INSECURE").ok(), rest.insecure)?;
        rest.annotate = parse_flag("ACI_ANNOTATE", env::var("ACI_ANNOTATE").ok(), rest.annotate)?;
        rest.mock = mock;

        if let Ok(retries) = env::var("ACI_RETRIES") {
            rest.retries = retries
                .trim()
                .parse()
                .with_context(|| format!("ACI_RETRIES must be a number. Got: {}", retries))?;
        }

        if mock && rest.password.is_none() && rest.private_key.is_none() {
            rest.password = Some("mock".to_string());
        }

        Ok(Self {
            rest,
            log_level: env::var("ACI_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.rest.validate()?;

        if !self.rest.mock
            && !self.rest.url.starts_with("https://")
            && !self.rest.url.starts_with("http://")
        {
            anyhow::bail!("ACI_URL must use HTTP or HTTPS scheme. Got: {}", self.rest.url);
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ACI_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn parse_flag(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, value),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return AciExitCode::ConfigError.into();
        }
    };

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return AciExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return AciExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AciExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AciExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(config.rest, command).await {
            Ok(()) => AciExitCode::Success,
            Err(e) => {
                error!("{:#}", e);
                AciExitCode::RuntimeError
            }
        }
    })
    .into()
}

fn build_transport(config: &RestConfig) -> Result<Box<dyn Transport>> {
    if config.mock {
        info!("Using the in-memory store (ACI_MOCK)");
        return Ok(Box::new(MemoryTransport::new()));
    }

    network_transport(config)
}

#[cfg(feature = "http")]
fn network_transport(config: &RestConfig) -> Result<Box<dyn Transport>> {
    Ok(Box::new(aci_rest_http::HttpTransport::from_config(config)?))
}

#[cfg(not(feature = "http"))]
fn network_transport(_config: &RestConfig) -> Result<Box<dyn Transport>> {
    anyhow::bail!("built without the http feature; only ACI_MOCK=true is available")
}

fn load_object(source: &str) -> Result<ManagedObject> {
    let raw = if source == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read object from stdin")?;
        raw
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))?
    };

    serde_json::from_str(&raw).with_context(|| format!("Invalid object document in {}", source))
}

/// Run one lifecycle operation
async fn run(config: RestConfig, command: Command) -> Result<()> {
    let transport = build_transport(&config)?;
    let (orchestrator, mut events) = Orchestrator::new(transport, &config)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let orchestrator = orchestrator.with_cancellation(cancel_rx);

    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                info!("Received {}, abandoning retries", signal);
                let _ = cancel_tx.send(true);
            }
            Err(e) => error!("Shutdown handler error: {}", e),
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let LifecycleEvent::AttemptFailed { attempt, error, .. } = &event {
                debug!("Attempt {} failed: {}", attempt, error);
            } else {
                debug!("Lifecycle event: {:?}", event);
            }
        }
    });

    let object = match command {
        Command::Create(source) => {
            let mut object = load_object(&source)?;
            orchestrator.create(&mut object).await?;
            Some(object)
        }
        Command::Update(source) => {
            let mut object = load_object(&source)?;
            orchestrator.update(&mut object).await?;
            Some(object)
        }
        Command::Read(source) => {
            let mut object = load_object(&source)?;
            match orchestrator.read(&mut object).await? {
                ReadOutcome::Converged => Some(object),
                ReadOutcome::Absent => {
                    info!("{} does not exist", object.dn);
                    None
                }
            }
        }
        Command::Delete(source) => {
            let mut object = load_object(&source)?;
            orchestrator.delete(&mut object).await?;
            Some(object)
        }
        Command::Import(id) => Some(orchestrator.import(&id).await?),
    };

    if let Some(object) = object {
        println!("{}", serde_json::to_string_pretty(&object)?);
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse(&args(&["create", "tenant.json"])).unwrap(),
            Command::Create("tenant.json".to_string())
        );
        assert_eq!(
            Command::parse(&args(&["import", "fvTenant:uni/tn-a"])).unwrap(),
            Command::Import("fvTenant:uni/tn-a".to_string())
        );
        assert!(Command::parse(&args(&["create"])).is_err());
        assert!(Command::parse(&args(&["upsert", "x.json"])).is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("X", Some("TRUE".to_string()), false).unwrap());
        assert!(!parse_flag("X", Some("0".to_string()), true).unwrap());
        assert!(parse_flag("X", None, true).unwrap());
        assert!(parse_flag("X", Some("maybe".to_string()), true).is_err());
    }
}
