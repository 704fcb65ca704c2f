use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use consul_cloudmap::aws::CloudMap;
use consul_cloudmap::cli::{Cli, Commands};
use consul_cloudmap::consul::HttpConsul;
use consul_cloudmap::init_logger;
use consul_cloudmap::sync::{self, SyncInput};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let json_format = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false);

    if let Err(e) = init_logger(&cli.log_level, json_format) {
        eprintln!("Failed to initialize logger: {e}");
        std::process::exit(1);
    }

    match cli.command {
        Commands::Version => {
            println!("consul-cloudmap v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::SyncCatalog(args) => {
            let config = match args.into_config() {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, "invalid options");
                    std::process::exit(1);
                }
            };

            let consul = match HttpConsul::new(
                &config.consul_http_addr,
                &config.consul_http_token,
                config.stale,
                &config.consul_namespace,
                &config.consul_partition,
            ) {
                Ok(consul) => consul,
                Err(e) => {
                    tracing::error!(error = %e, "cannot connect to consul agent");
                    std::process::exit(1);
                }
            };

            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let cloud_map = CloudMap::new(aws_sdk_servicediscovery::Client::new(&aws_config));

            let input = SyncInput {
                config,
                consul: Arc::new(consul),
                aws: Arc::new(cloud_map),
            };

            let shutdown = CancellationToken::new();
            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutting down...");
                    signal_shutdown.cancel();
                }
            });

            if let Err(e) = sync::run(input, shutdown).await {
                tracing::error!(error = %e, "sync terminated");
                std::process::exit(1);
            }
        }
    }
}
