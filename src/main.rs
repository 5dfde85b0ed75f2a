//! Rerouter CLI - A local forward proxy that redirects selected domains

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rerouter::{Config, GeneratedCa, ProxyServer};

#[derive(Parser)]
#[command(name = "rerouter")]
#[command(about = "A local forward proxy that redirects selected domains to another origin")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Log level (error, warn, info, debug, trace); overrides the config file
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Generate a new root CA certificate
    GenerateCa {
        /// Output directory for the certificate and key
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Validate a configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();
}

/// Keep a console window open until the user has read the error
fn wait_for_enter() {
    if std::io::stdin().is_terminal() {
        println!("Press Enter to exit.");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, log_level } => {
            let cfg = match Config::from_file(&config).and_then(|cfg| {
                cfg.redirector()?;
                cfg.endpoint()?;
                Ok(cfg)
            }) {
                Ok(cfg) => cfg,
                Err(e) => {
                    println!("{}", e);
                    println!("Failed to parse the JSON configuration file.");
                    wait_for_enter();
                    return Ok(());
                }
            };

            init_logging(log_level.as_deref().unwrap_or(&cfg.log_level));
            tracing::info!(path = %config.display(), "Loaded configuration");

            let server = ProxyServer::new(cfg)?;

            tracing::info!("Configure clients with:");
            tracing::info!("  export HTTP_PROXY={}", server.endpoint());
            tracing::info!("  export HTTPS_PROXY={}", server.endpoint());

            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                println!("Shutting down ...");
                let _ = shutdown_tx.send(());
            });

            server.run_until_shutdown(shutdown_rx).await?;
        }

        Commands::GenerateCa { out } => {
            std::fs::create_dir_all(&out)?;

            let cert_path = out.join(rerouter::config::DEFAULT_CA_CERT);
            let key_path = out.join(rerouter::config::DEFAULT_CA_KEY);

            println!("Generating CA certificate...");

            let ca = GeneratedCa::generate()?;
            ca.save(&cert_path, &key_path)?;

            println!("CA certificate generated successfully!");
            println!();
            println!("  Certificate: {}", cert_path.display());
            println!("  Private key: {}", key_path.display());
            println!();
            println!("Point \"ca_cert\" and \"ca_key\" in config.json at these files,");
            println!("then install the certificate as trusted in your client.");
            println!();
            println!("IMPORTANT: Keep the private key secure!");
        }

        Commands::ValidateConfig { config } => {
            println!("Validating configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;
            let endpoint = cfg.endpoint()?;
            let target = cfg.target_origin()?;
            let (ca_cert, ca_key) = cfg.ca_paths();

            println!("Configuration is valid!");
            println!();
            println!("  Listen URL: {}", endpoint);
            println!("  Target origin: {}", target);
            println!("  SSL decrypt policy: {}", cfg.ssl_decrypt_policy.as_str());
            println!("  SSL error policy: {}", cfg.ssl_error_policy.as_str());
            println!("  CA cert: {}", ca_cert);
            println!("  CA key: {}", ca_key);
            println!(
                "  Upstream TLS CA: {}",
                cfg.upstream_tls_ca.as_deref().unwrap_or("(web roots only)")
            );
            println!("  Log level: {}", cfg.log_level);
            println!("  Redirect domains: {}", cfg.redirect_domains.len());
            for domain in &cfg.redirect_domains {
                println!("    - {}", domain);
            }
            println!("  URL patches: {}", cfg.url_patches.len());
            for (i, patch) in cfg.patches().iter().enumerate() {
                println!("    {}. {:?} -> {:?}", i + 1, patch.find, patch.replace);
            }
        }
    }

    Ok(())
}
