use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wiretap::admin_api::AdminApiServer;
use wiretap::{CaptureProxy, Config, Harness};

#[derive(Parser, Debug)]
#[command(name = "wiretap", version, about = "HTTP capture proxy for tests")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "WIRETAP_CONFIG")]
    config: Option<String>,

    /// Proxy listen port
    #[arg(short, long, env = "WIRETAP_PORT")]
    port: Option<u16>,

    /// Admin API port
    #[arg(long, env = "WIRETAP_ADMIN_PORT")]
    admin_port: Option<u16>,

    /// Base URL that wait paths are resolved against
    #[arg(long, env = "WIRETAP_BASE_URL")]
    base_url: Option<String>,
}

impl Args {
    fn load_config(&self) -> Result<Config, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if let Some(base_url) = &self.base_url {
            config.capture.base_url = base_url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let started_at = Utc::now();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    let harness = Arc::new(Harness::new(&config.capture, &config.session)?);
    let proxy = CaptureProxy::new(Arc::clone(&harness), &config.session)?;

    if config.admin.enabled {
        let admin = AdminApiServer::new(
            config.admin.socket_addr(),
            Arc::clone(harness.store()),
            config.capture.default_timeout(),
        )
        .with_started_at(started_at);
        tokio::spawn(async move {
            if let Err(e) = admin.run().await {
                error!("Admin API stopped: {}", e);
            }
        });
    }

    tokio::select! {
        result = proxy.run(config.listen.socket_addr()) => {
            if let Err(e) = &result {
                error!("Capture proxy stopped: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down ({} exchanges captured)", harness.store().len());
            Ok(())
        }
    }
}
