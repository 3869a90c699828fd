//! ==============================================================================
//! endpoint.rs - OPC UA protocol server
//! ==============================================================================
//!
//! purpose:
//!     builds the opc.tcp server that owns the wire format and hands its node
//!     store to address_space.rs. the synchronizer never sees this module; it
//!     only writes through the AddressSpace handle.
//!
//! relationships:
//!     - configured by: config.rs ([server] endpoint, server_name, pki_dir)
//!     - node store used by: address_space.rs
//!     - spawned by: main.rs
//!
//! ==============================================================================

use opcua::server::prelude as ua;
use opcua::sync::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};

const SCHEME: &str = "opc.tcp://";
const DEFAULT_PORT: u16 = 4840;

/// `opc.tcp://host:port/path/` split into the pieces the server binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl EndpointUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| BridgeError::Config(format!("endpoint {url} is not an {SCHEME} url")))?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| BridgeError::Config(format!("endpoint {url} has an invalid port")))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(BridgeError::Config(format!("endpoint {url} has no host")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("{SCHEME}{}:{}{}", self.host, self.port, self.path)
    }
}

/// build the protocol server: one anonymous, unsecured endpoint at
/// `config.endpoint`
pub fn build(config: &ServerConfig) -> Result<ua::Server> {
    let url = EndpointUrl::parse(&config.endpoint)?;
    let user_tokens = vec![ua::ANONYMOUS_USER_TOKEN_ID.to_string()];

    ua::ServerBuilder::new()
        .application_name(config.server_name.as_str())
        .application_uri(format!("urn:{}", config.server_name.replace(' ', "-")))
        .product_uri("urn:sensor-ua-bridge")
        .pki_dir(config.pki_dir.as_str())
        .create_sample_keypair(config.create_sample_keypair)
        .discovery_server_url(None)
        .host_and_port(url.host.as_str(), url.port)
        .discovery_urls(vec![url.url()])
        .endpoint("none", ua::ServerEndpoint::new_none(url.path.as_str(), &user_tokens))
        .server()
        .ok_or_else(|| BridgeError::Config(format!("invalid server configuration for {}", url.url())))
}

/// accept client sessions until the process exits
pub async fn serve(server: ua::Server, endpoint: String) {
    info!(%endpoint, "opc ua endpoint listening");
    ua::Server::new_server_task(Arc::new(RwLock::new(server))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_endpoint() {
        let url = EndpointUrl::parse("opc.tcp://0.0.0.0:4840/ruuvi/server/").unwrap();
        assert_eq!(
            url,
            EndpointUrl {
                host: "0.0.0.0".to_string(),
                port: 4840,
                path: "/ruuvi/server/".to_string(),
            }
        );
        assert_eq!(url.url(), "opc.tcp://0.0.0.0:4840/ruuvi/server/");
    }

    #[test]
    fn test_parse_defaults_port_and_path() {
        let url = EndpointUrl::parse("opc.tcp://localhost").unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.path, "/");
    }

    #[test]
    fn test_parse_rejects_bad_endpoints() {
        for bad in ["http://localhost:4840/", "opc.tcp://:4840/", "opc.tcp://host:port/"] {
            assert!(
                matches!(EndpointUrl::parse(bad), Err(BridgeError::Config(_))),
                "{bad} accepted"
            );
        }
    }
}
