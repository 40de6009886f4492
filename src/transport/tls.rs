//! Broker address parsing and TLS transport selection.
//!
//! - `BrokerEndpoint::parse` accepts `host`, `host:port`, `[ipv6]:port` and the
//!   `mqtt://`, `tcp://`, `mqtts://`, `ssl://` schemes.
//! - `TlsMaterials` loads an optional CA and an optional client identity.
//! - `build_transport` picks plain TCP or rustls.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;

/// Where the broker lives and whether to speak TLS to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    /// Parse `addr`. An explicit port in `addr` wins over `default_port`;
    /// a TLS scheme or `force_tls` enables TLS.
    pub fn parse(addr: &str, default_port: u16, force_tls: bool) -> Result<Self> {
        let mut use_tls = force_tls;
        let mut remainder = addr.trim();

        if let Some((scheme, rest)) = remainder.split_once("://") {
            match scheme {
                "mqtt" | "tcp" => {}
                "mqtts" | "ssl" => use_tls = true,
                other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
            }
            remainder = rest.trim_end_matches('/');
        }
        if remainder.is_empty() {
            return Err(anyhow!("MQTT broker address is empty"));
        }

        let (host, port) = split_host_port(remainder, default_port)?;
        Ok(Self {
            host,
            port,
            use_tls,
        })
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    // A bare IPv6 literal has several colons and no port.
    if addr.matches(':').count() > 1 {
        return Ok((addr.to_string(), default_port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), default_port)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}

/// PEM material for TLS connections.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA bundle; `None` means the default root store.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key for mutual TLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    /// Client cert and key must be given together.
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

/// Transport for `endpoint`: TCP, rustls with default roots, or rustls with
/// the given CA (and optional client identity).
pub fn build_transport(endpoint: &BrokerEndpoint, materials: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if materials.is_configured() {
            return Err(anyhow!(
                "MQTT TLS materials provided but TLS is disabled; \
                 set use_tls or use an mqtts:// broker address"
            ));
        }
        return Ok(Transport::tcp());
    }

    if !materials.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = materials.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing client certificates")
    })?;
    Ok(Transport::tls(ca, materials.client_auth.clone(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_takes_default_port() -> Result<()> {
        let ep = BrokerEndpoint::parse("broker.local", 1883, false)?;
        assert_eq!(ep.host, "broker.local");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
        assert_eq!(ep.to_string(), "broker.local:1883");
        Ok(())
    }

    #[test]
    fn scheme_selects_tls_and_explicit_port_wins() -> Result<()> {
        let ep = BrokerEndpoint::parse("mqtts://broker.example.com:8883", 1883, false)?;
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);

        let plain = BrokerEndpoint::parse("tcp://10.0.0.2", 1884, false)?;
        assert_eq!((plain.host.as_str(), plain.port, plain.use_tls), ("10.0.0.2", 1884, false));
        Ok(())
    }

    #[test]
    fn ipv6_forms() -> Result<()> {
        assert_eq!(BrokerEndpoint::parse("[::1]:1884", 1883, false)?.port, 1884);
        let bare = BrokerEndpoint::parse("::1", 1883, false)?;
        assert_eq!((bare.host.as_str(), bare.port), ("::1", 1883));
        assert_eq!(bare.to_string(), "[::1]:1883");
        Ok(())
    }

    #[test]
    fn bad_addresses_are_rejected() {
        assert!(BrokerEndpoint::parse("ws://broker", 1883, false).is_err());
        assert!(BrokerEndpoint::parse("broker:http", 1883, false).is_err());
        assert!(BrokerEndpoint::parse("mqtt://", 1883, false).is_err());
    }

    #[test]
    fn materials_need_cert_and_key_together() {
        let cert_only = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None);
        assert!(cert_only.unwrap_err().to_string().contains("without key"));
    }

    #[test]
    fn materials_without_tls_are_rejected() {
        let ep = BrokerEndpoint::parse("broker", 1883, false).expect("endpoint");
        let materials = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&ep, &materials).is_err());
        assert!(build_transport(&ep, &TlsMaterials::default()).is_ok());
    }
}
