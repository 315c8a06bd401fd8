use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STATIC_DIR: &str = "public";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub static_dir: PathBuf,
    pub browser: BrowserSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            browser: BrowserSettings::default(),
        }
    }
}

impl Config {
    /// Read the process environment. Bad values are logged and replaced by
    /// their defaults so a typo never keeps the service from starting.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let host = parse_or_default(lookup("HOST"), "HOST", "IP address", defaults.host);
        let port = parse_or_default(lookup("PORT"), "PORT", "port number", defaults.port);

        let static_dir = lookup("STATIC_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        let executable = lookup("CHROME_EXECUTABLE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let no_sandbox = match lookup("CHROME_NO_SANDBOX") {
            Some(value) => parse_flag("CHROME_NO_SANDBOX", &value).unwrap_or_else(|e| {
                tracing::warn!("{}; using default", e);
                defaults.browser.no_sandbox
            }),
            None => defaults.browser.no_sandbox,
        };

        Self {
            host,
            port,
            static_dir,
            browser: BrowserSettings {
                executable,
                no_sandbox,
            },
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or_default<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> T {
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            let err = ConfigError::Invalid {
                name,
                expected,
                value,
            };
            tracing::warn!("{}; using default", err);
            default
        }
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "boolean flag",
            value: value.to_string(),
        }),
    }
}
