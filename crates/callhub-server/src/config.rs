//! Relay configuration.
//!
//! Built-in defaults, overlaid by an optional TOML file, overlaid by command
//! line flags and their environment variables.

use callhub_core::IceServer;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the WebSocket listener binds to.
    pub listen: SocketAddr,
    /// How long an unanswered call may ring. `0` lets it ring forever.
    pub ring_timeout_secs: u64,
    /// Per-connection outbound queue length. A client that lets it fill up
    /// is disconnected.
    pub outbound_queue: usize,
    /// Largest accepted WebSocket message.
    pub max_message_bytes: usize,
    /// How long one socket write may take before the connection is dropped.
    pub write_timeout_secs: u64,
    /// STUN/TURN servers announced to every client on connect.
    pub ice_servers: Vec<IceServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5001)),
            ring_timeout_secs: 60,
            outbound_queue: 64,
            max_message_bytes: 64 * 1024,
            write_timeout_secs: 10,
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
        }
    }
}

/// Command line, each flag also settable from the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "callhub", version, about = "Signaling relay for two-party audio/video calls")]
pub struct Args {
    /// TOML config file.
    #[arg(long, env = "CALLHUB_CONFIG")]
    pub config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:5001.
    #[arg(long, env = "CALLHUB_LISTEN")]
    pub listen: Option<SocketAddr>,
    /// Listen port on all interfaces. Ignored when --listen is given.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Ringing timeout in seconds, 0 to disable.
    #[arg(long, env = "CALLHUB_RING_TIMEOUT")]
    pub ring_timeout_secs: Option<u64>,
    #[arg(long, env = "CALLHUB_OUTBOUND_QUEUE")]
    pub outbound_queue: Option<usize>,
    #[arg(long, env = "CALLHUB_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: Option<usize>,
    #[arg(long, env = "CALLHUB_WRITE_TIMEOUT")]
    pub write_timeout_secs: Option<u64>,
    /// STUN/TURN URL without credentials; repeat or comma-separate. Replaces
    /// the configured list.
    #[arg(long = "ice-server", env = "CALLHUB_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,
}

impl Config {
    /// Resolve the effective configuration for `args`.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(listen) = args.listen {
            config.listen = listen;
        } else if let Some(port) = args.port {
            config.listen.set_port(port);
        }
        if let Some(secs) = args.ring_timeout_secs {
            config.ring_timeout_secs = secs;
        }
        if let Some(n) = args.outbound_queue {
            config.outbound_queue = n;
        }
        if let Some(n) = args.max_message_bytes {
            config.max_message_bytes = n;
        }
        if let Some(secs) = args.write_timeout_secs {
            config.write_timeout_secs = secs;
        }
        if !args.ice_servers.is_empty() {
            config.ice_servers = args.ice_servers.iter().map(IceServer::stun).collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Room for the welcome and the first directory update.
        if self.outbound_queue < 2 {
            return Err(ConfigError::Invalid(format!(
                "outbound_queue must be at least 2, got {}",
                self.outbound_queue
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("max_message_bytes must be positive".into()));
        }
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid("write_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::load(&Args::default()).unwrap();
        assert_eq!(config.listen.port(), 5001);
        assert_eq!(config.ring_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = Config::from_toml(
            r#"
            listen = "127.0.0.1:9000"
            ring_timeout_secs = 0

            [[ice_servers]]
            urls = ["turn:turn.example.org:3478"]
            username = "u"
            credential = "p"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.ring_timeout(), None);
        assert_eq!(config.outbound_queue, 64);
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml("colour = \"blue\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn flags_override_file_values() {
        let args = Args {
            port: Some(7000),
            ring_timeout_secs: Some(5),
            ice_servers: vec!["stun:a".into(), "stun:b".into()],
            ..Args::default()
        };
        let config = Config::load(&args).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.ring_timeout_secs, 5);
        assert_eq!(config.ice_servers, [IceServer::stun("stun:a"), IceServer::stun("stun:b")]);
    }

    #[test]
    fn tiny_queue_is_invalid() {
        let args = Args {
            outbound_queue: Some(1),
            ..Args::default()
        };
        assert!(matches!(Config::load(&args), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_write_timeout_is_invalid() {
        let args = Args {
            write_timeout_secs: Some(0),
            ..Args::default()
        };
        assert!(matches!(Config::load(&args), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_reported() {
        let args = Args {
            config: Some(PathBuf::from("/nonexistent/callhub.toml")),
            ..Args::default()
        };
        assert!(matches!(Config::load(&args), Err(ConfigError::Read { .. })));
    }
}
