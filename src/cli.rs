use clap::Parser;
use std::path::PathBuf;

use crate::config::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "duet-relay")]
#[command(version)]
#[command(about = "Compare two chat models side by side through a streaming SSE relay")]
pub struct Args {
    /// Prompt to send to both models (compare mode)
    pub prompt: Option<String>,

    /// Run the relay server instead of a comparison
    #[arg(long)]
    pub serve: bool,

    /// TOML configuration file for the relay
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the relay to (overrides the config file)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the relay server (overrides the config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Relay endpoint used in compare mode
    #[arg(long, default_value = "http://127.0.0.1:8787/api/chat")]
    pub endpoint: String,

    /// Cancel each column after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl Args {
    /// Fold command-line overrides into a loaded configuration.
    pub fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_compare() {
        let args = Args::parse_from(["duet-relay", "hello world"]);
        assert_eq!(args.prompt.as_deref(), Some("hello world"));
        assert!(!args.serve);
        assert_eq!(args.endpoint, "http://127.0.0.1:8787/api/chat");
        assert!(args.timeout_secs.is_none());
    }

    #[test]
    fn test_args_parse_serve() {
        let args = Args::parse_from([
            "duet-relay",
            "--serve",
            "--port",
            "9000",
            "--host",
            "0.0.0.0",
            "--config",
            "relay.toml",
        ]);
        assert!(args.serve);
        assert!(args.prompt.is_none());
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));
    }

    #[test]
    fn test_args_timeout() {
        let args = Args::parse_from(["duet-relay", "hi", "--timeout-secs", "30"]);
        assert_eq!(args.timeout_secs, Some(30));
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from(["duet-relay", "--serve", "--port", "9100", "--host", "0.0.0.0"]);
        let mut config = RelayConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let args = Args::parse_from(["duet-relay", "--serve"]);
        let mut config = RelayConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.bind_addr(), "127.0.0.1:8787");
    }
}
