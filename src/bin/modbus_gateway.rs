use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};
use tracing::{error, info};

use modbus_core::{Gateway, RelayConfig};

#[derive(Parser)]
#[command(author, version, about = "TCP/MBAP to RTU Modbus gateway")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default config as YAML and exit
    #[arg(long = "dump-default-config")]
    dump_default: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        let config = RelayConfig::default();
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let config = match cli.common.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::new()?,
    };

    modbus_core::setup_logging(&config)?;

    info!("starting modbus-gateway");

    let gateway = Arc::new(Gateway::new(config.clone())?);

    let http_task = if config.http.enabled {
        let manager = gateway.connection_manager();
        let shutdown_rx = gateway.subscribe_shutdown();
        let address = config.http.bind_addr.clone();
        let port = config.http.bind_port;
        Some(tokio::spawn(async move {
            if let Err(e) = modbus_core::start_http_server(address, port, manager, shutdown_rx).await {
                error!("http api server error: {e}");
            }
        }))
    } else {
        None
    };

    let gateway_run = Arc::clone(&gateway);
    let run_task = tokio::spawn(async move { gateway_run.run().await });

    tokio::select! {
        result = run_task => {
            match result {
                Ok(Err(e)) => error!("gateway run loop failed: {e}"),
                Err(e) => error!("gateway task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            gateway.shutdown().await?;
        }
    }

    if let Some(task) = http_task {
        task.abort();
    }

    Ok(())
}
