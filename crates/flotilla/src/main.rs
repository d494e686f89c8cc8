//! Main entry point for a fleet control-plane node
//!
//! Provides CLI interface, configuration loading, and startup of the
//! transport and HTTP servers with graceful shutdown.

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flotilla_http::HttpServer;
use flotilla_net::{ClientAuth, NetworkClient, NetworkServer, TlsSettings};

mod handlers;

use handlers::{
    node_handler_factory, NodeInfoHttpHandler, PingPacketListener, StatusHttpHandler,
    WsConsoleHandler, PING_CHANNEL,
};

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Node identity
    pub node: NodeSettings,
    /// Transport server configuration
    pub network: NetworkSettings,
    /// HTTP server configuration
    pub http: HttpSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Name this node answers to
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Transport listener addresses
    pub listeners: Vec<String>,
    /// Remote nodes to connect to on startup, as host:port
    pub connect: Vec<String>,
    /// TLS configuration
    pub tls: TlsConfigSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfigSettings {
    pub enabled: bool,
    /// PEM certificate chain; a self-signed certificate is generated when
    /// unset
    pub certificate_path: Option<String>,
    pub private_key_path: Option<String>,
    pub trust_certificate_path: Option<String>,
    /// Client certificate policy: disabled, optional or required
    pub client_auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// HTTP listener addresses
    pub listeners: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter
    pub level: String,
    /// JSON formatting
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                name: "node-1".to_string(),
            },
            network: NetworkSettings {
                listeners: vec!["0.0.0.0:7070".to_string()],
                connect: vec![],
                tls: TlsConfigSettings {
                    enabled: false,
                    certificate_path: None,
                    private_key_path: None,
                    trust_certificate_path: None,
                    client_auth: "disabled".to_string(),
                },
            },
            http: HttpSettings {
                listeners: vec!["0.0.0.0:8080".to_string()],
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file, writing the defaults when missing
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node.name.is_empty() {
            return Err("Node name cannot be empty".to_string());
        }

        for address in self.network.listeners.iter().chain(&self.http.listeners) {
            if address.parse::<SocketAddr>().is_err() {
                return Err(format!("Invalid listener address: {}", address));
            }
        }

        for target in &self.network.connect {
            match target.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => return Err(format!("Invalid connect target: {}", target)),
            }
        }

        let valid_auth = ["disabled", "optional", "required"];
        if !valid_auth.contains(&self.network.tls.client_auth.as_str()) {
            return Err(format!(
                "Invalid client_auth: {}. Must be one of: {:?}",
                self.network.tls.client_auth, valid_auth
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        Ok(())
    }

    /// Convert the TLS section into transport settings
    pub fn to_tls_settings(&self) -> TlsSettings {
        let tls = &self.network.tls;
        TlsSettings {
            certificate_path: tls.certificate_path.clone().map(PathBuf::from),
            private_key_path: tls.private_key_path.clone().map(PathBuf::from),
            trust_certificate_path: tls.trust_certificate_path.clone().map(PathBuf::from),
            client_auth: match tls.client_auth.as_str() {
                "required" => ClientAuth::Required,
                "optional" => ClientAuth::Optional,
                _ => ClientAuth::Disabled,
            },
        }
    }
}

// ============================================================================
// CLI Interface
// ============================================================================

/// Command line arguments
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub node_name: Option<String>,
    pub bind_address: Option<String>,
    pub http_bind_address: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    /// Parse command line arguments
    pub fn parse() -> Self {
        let matches = Command::new("Flotilla Node")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Fleet control-plane node with transport and HTTP layers")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("NAME")
                    .help("Node name"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Transport bind address (e.g., 0.0.0.0:7070)"),
            )
            .arg(
                Arg::new("http-bind")
                    .long("http-bind")
                    .value_name("ADDRESS")
                    .help("HTTP bind address (e.g., 0.0.0.0:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("Default config path should always be set"),
            ),
            node_name: matches.get_one::<String>("name").cloned(),
            bind_address: matches.get_one::<String>("bind").cloned(),
            http_bind_address: matches.get_one::<String>("http-bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Signal Handling
// ============================================================================

/// Setup graceful shutdown signal handling
async fn setup_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// Application
// ============================================================================

/// Main application struct wiring the transport and HTTP layers together
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(name) = args.node_name {
            config.node.name = name;
        }
        if let Some(bind_address) = args.bind_address {
            config.network.listeners = vec![bind_address];
        }
        if let Some(http_bind_address) = args.http_bind_address {
            config.http.listeners = vec![http_bind_address];
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        setup_logging(&config.logging)?;

        info!("🚀 Flotilla Node v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Node: {}",
            args.config_path.display(),
            config.node.name
        );

        Ok(Self { config })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let tls_enabled = self.config.network.tls.enabled;

        let server = if tls_enabled {
            NetworkServer::with_tls(node_handler_factory(), &self.config.to_tls_settings())?
        } else {
            NetworkServer::new(node_handler_factory())
        };
        server
            .packet_registry()
            .add_listener(PING_CHANNEL, Arc::new(PingPacketListener));

        for address in &self.config.network.listeners {
            let addr: SocketAddr = address.parse()?;
            if !server.add_listener(addr).await {
                return Err(format!("Failed to bind transport listener on {}", addr).into());
            }
        }

        let http = HttpServer::new();
        http.registry().register(
            "/api/status",
            None,
            0,
            StatusHttpHandler {
                node_name: self.config.node.name.clone(),
            },
        );
        http.registry().register(
            "/api/node/{name}",
            None,
            0,
            NodeInfoHttpHandler {
                node_name: self.config.node.name.clone(),
            },
        );
        http.registry().register("/ws", None, 0, WsConsoleHandler);

        for address in &self.config.http.listeners {
            let addr: SocketAddr = address.parse()?;
            if !http.add_listener(addr).await {
                return Err(format!("Failed to bind http listener on {}", addr).into());
            }
        }

        let client = if tls_enabled {
            NetworkClient::with_tls(node_handler_factory(), &self.config.to_tls_settings())?
        } else {
            NetworkClient::new(node_handler_factory())
        };
        for target in &self.config.network.connect {
            // Validated in AppConfig::validate
            let (host, port) = target.rsplit_once(':').expect("validated connect target");
            let port: u16 = port.parse().expect("validated connect target");
            if !client.connect(host, port).await {
                warn!("Could not reach {} on startup, continuing without it", target);
            }
        }

        info!("✅ Flotilla node '{}' is now running!", self.config.node.name);
        info!(
            "🌐 Transport: {:?} | Http: {:?}",
            self.config.network.listeners, self.config.http.listeners
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        client.shutdown();
        server.shutdown();
        http.shutdown();

        // Give in-flight connections a moment to drain
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        info!("✅ Flotilla node shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
