use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use callbridge_core::config::{Config, LoggingConfig};
use callbridge_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "callbridge",
    about = "Telephony voice bridge: phone calls in, assistant replies out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration, secrets redacted
    Show,
    /// Check the configuration for problems
    Validate,
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let mut directives = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    for filter in &logging.filters {
        directives.push(',');
        directives.push_str(filter);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Replace secret values before printing.
fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key == "api_key" && v.is_string() {
                    *v = serde_json::Value::String("********".into());
                } else {
                    redact(v);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

fn report(warnings: &[String], errors: &[String]) {
    for w in warnings {
        println!("warning: {w}");
    }
    for e in errors {
        println!("error: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Provider keys commonly live in a local .env file.
    let _ = dotenvy::dotenv();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, &config.logging());

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("Invalid configuration ({} errors)", errors.len());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            tracing::info!(config = %config_path.display(), "Starting Callbridge gateway on port {port}");

            let state = GatewayState::from_config(Arc::new(config))?;
            callbridge_gateway::start_gateway(Arc::new(state), port, bind).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let mut value = serde_json::to_value(&config)?;
                redact(&mut value);
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                report(&warnings, &errors);
                if !errors.is_empty() {
                    anyhow::bail!("Configuration has {} errors", errors.len());
                }
                println!("Configuration OK ({})", config_path.display());
            }
        },
        Commands::Status => {
            let port = config.gateway_port();
            println!("Callbridge v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway port: {port}");
            println!("Public URL: {}", config.public_url());
            println!("Media stream: {}/media-stream", config.stream_url());

            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()?;
            match client
                .get(format!("http://127.0.0.1:{port}/health"))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    let body: serde_json::Value = resp.json().await.unwrap_or_default();
                    println!(
                        "Status: running (active calls: {})",
                        body["active_calls"].as_u64().unwrap_or(0)
                    );
                }
                _ => println!("Status: not running"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_flags() {
        let cli = Cli::parse_from(["callbridge", "serve", "--port", "4000", "--bind", "127.0.0.1"]);
        match cli.command {
            Commands::Serve { port, bind } => {
                assert_eq!(port, Some(4000));
                assert_eq!(bind.as_deref(), Some("127.0.0.1"));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["callbridge", "config", "validate", "--config", "x.json", "-v"]);
        assert_eq!(cli.config.as_deref(), Some("x.json"));
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Validate
            }
        ));
    }

    #[test]
    fn test_redact_hides_api_keys() {
        let mut value = serde_json::json!({
            "telephony": { "api_key": "KEY123", "api_key_env": "TELNYX_API_KEY" },
            "tts": { "provider": "openai", "api_key": "sk-abc" }
        });
        redact(&mut value);
        assert_eq!(value["telephony"]["api_key"], "********");
        assert_eq!(value["telephony"]["api_key_env"], "TELNYX_API_KEY");
        assert_eq!(value["tts"]["api_key"], "********");
        assert_eq!(value["tts"]["provider"], "openai");
    }
}
