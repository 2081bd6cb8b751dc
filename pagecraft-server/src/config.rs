//! Server configuration: intake settings plus the flattened pipeline config.

use clap::Parser;
use pagecraft_pipeline::PipelineConfig;

const DEFAULT_ADDR: &str = "0.0.0.0:3001";

#[derive(Debug, Clone, Parser)]
#[command(name = "pagecraft-server", about = "Brief in, GitHub Pages site out")]
pub struct ServerConfig {
    /// Address to bind. Falls back to 0.0.0.0:$PORT, then 0.0.0.0:3001.
    #[arg(long, env = "PAGECRAFT_ADDR")]
    pub listen_addr: Option<String>,

    /// Port supplied by the hosting platform.
    #[arg(long, env = "PORT", hide = true)]
    pub port: Option<u16>,

    /// Secret every intake request must carry.
    #[arg(long, env = "MY_SECRET", hide_env_values = true)]
    pub shared_secret: String,

    /// Requests that may wait for the worker before intake answers 503.
    #[arg(long, env = "PAGECRAFT_QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    #[command(flatten)]
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        match (&self.listen_addr, self.port) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) => format!("0.0.0.0:{port}"),
            (None, None) => DEFAULT_ADDR.to_string(),
        }
    }
}
