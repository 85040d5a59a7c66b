use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Process-level settings unrelated to the credential pool itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: IpAddr,
    pub listen_port: u16,
    pub loglevel: String,
    /// Inbound API key the server binary's own guard checks requests against. Unrelated to any
    /// credential in the pool; this gates the proxy's front door, not the upstream calls.
    pub proxy_key: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::from([0, 0, 0, 0]),
            listen_port: 8188,
            loglevel: "info".to_string(),
            proxy_key: String::new(),
        }
    }
}
