use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::time::Duration;

/// Command-line layer. Only flags the user actually passed are serialized,
/// so unset flags never shadow the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "kadori-server", version, about = "KADORI karaoke session server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "KADORI_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "KADORI_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./kadori.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "KADORI_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// How long to wait for a client to answer a request, in milliseconds (0 = forever) [default: 5000]
    #[arg(long, env = "KADORI_REPLY_TIMEOUT_MS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_timeout_ms: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub reply_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./kadori.toml".to_string(),
            json_logs: false,
            generate_config: false,
            reply_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (KADORI_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(std::env::args_os())
    }

    /// Same as [`Config::load`] with an explicit argument list (first item is the binary name).
    pub fn load_from<I, T>(args: I) -> Result<Self, figment::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::parse_from(args);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("KADORI_"))
            .merge(Serialized::defaults(&cli))
            .extract()
    }

    /// Reply timeout for server-initiated requests; `None` when disabled.
    pub fn reply_timeout(&self) -> Option<Duration> {
        match self.reply_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# KADORI Karaoke Session Server Configuration
# Place this file at ./kadori.toml or specify with --config <path>
# All settings can be overridden via environment variables (KADORI_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# How long the scheduler waits for a singer to answer "getNextVideo"
# before moving on to the next singer, in milliseconds.
# 0 waits forever (a silent client then stalls the rotation).
# reply_timeout_ms = 5000
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_timeout_zero_disables() {
        let config = Config {
            reply_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.reply_timeout(), None);
        assert_eq!(
            Config::default().reply_timeout(),
            Some(Duration::from_millis(5000))
        );
    }

    /// Write a throwaway TOML file and return its path.
    fn toml_file(tag: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "kadori-config-{}-{}.toml",
            tag,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let path = toml_file("toml", "port = 9000\nreply_timeout_ms = 250\njson_logs = true\n");
        let config = Config::load_from(["kadori-server", "--config", path.as_str()]).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.port, 9000);
        assert_eq!(config.reply_timeout_ms, 250);
        assert!(config.json_logs);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.config, path);
    }

    #[test]
    fn test_cli_flags_override_toml() {
        let path = toml_file("cli", "port = 9000\nreply_timeout_ms = 250\n");
        let config = Config::load_from([
            "kadori-server",
            "--config",
            path.as_str(),
            "--port",
            "9100",
        ])
        .unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.port, 9100);
        assert_eq!(config.reply_timeout_ms, 250);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            Config::load_from(["kadori-server", "--config", "/nonexistent/kadori.toml"]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.reply_timeout(), Some(Duration::from_millis(5000)));
        assert!(!config.generate_config);
    }

    #[test]
    fn test_template_mentions_every_setting() {
        let template = generate_config_template();
        for key in ["port", "bind_address", "json_logs", "reply_timeout_ms"] {
            assert!(template.contains(key), "template missing {}", key);
        }
    }
}
