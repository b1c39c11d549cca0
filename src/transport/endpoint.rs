//! Broker endpoint parsing

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// A broker address taken from the configured server list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: String,
    host: String,
    port: u16,
    tls: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum EndpointError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: String },
    #[error("Missing host in {0}")]
    MissingHost(String),
}

impl Endpoint {
    /// Parse `mqtt://host:port`, `mqtts://host:port`, `tcp://host:port` or a bare `host[:port]`
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("mqtt://{raw}")
        };

        let url =
            Url::parse(&with_scheme).map_err(|_| EndpointError::InvalidUrl(raw.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(EndpointError::UnsupportedScheme {
                    scheme: other.to_string(),
                    url: raw.to_string(),
                })
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(raw.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(Self {
            url: with_scheme,
            host,
            port,
            tls,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mqtt_url() {
        let endpoint = Endpoint::parse("mqtt://broker.local:1884").unwrap();
        assert_eq!(endpoint.host(), "broker.local");
        assert_eq!(endpoint.port(), 1884);
        assert!(!endpoint.is_tls());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Endpoint::parse("mqtt://localhost").unwrap().port(), 1883);
        let tls = Endpoint::parse("mqtts://localhost").unwrap();
        assert_eq!(tls.port(), 8883);
        assert!(tls.is_tls());
    }

    #[test]
    fn test_bare_host_and_port() {
        let endpoint = Endpoint::parse("192.168.1.10:1883").unwrap();
        assert_eq!(endpoint.host(), "192.168.1.10");
        assert_eq!(endpoint.port(), 1883);

        let endpoint = Endpoint::parse("localhost").unwrap();
        assert_eq!(endpoint.port(), 1883);
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = Endpoint::parse("http://localhost:80");
        assert!(matches!(
            result,
            Err(EndpointError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_invalid_url() {
        assert!(Endpoint::parse("mqtt://").is_err());
        assert!(Endpoint::parse("mqtt://host:notaport").is_err());
    }

    #[test]
    fn test_display() {
        let endpoint: Endpoint = "mqtt://localhost:1883".parse().unwrap();
        assert_eq!(endpoint.to_string(), "localhost:1883");
    }
}
