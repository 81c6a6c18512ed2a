//! Wire types for the remote-driver protocol: request bodies we actually
//! read fields from, and the handful of response shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default)]
    pub options: Value,
}

#[derive(Debug, Deserialize)]
pub struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Serialize, Default)]
pub struct EmptyResponse {}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Serialize)]
pub struct GetCapabilitiesResponse {
    pub scope: &'static str,
    #[serde(rename = "connectivityScope")]
    pub connectivity_scope: &'static str,
}

impl Default for GetCapabilitiesResponse {
    fn default() -> Self {
        Self {
            scope: "local",
            connectivity_scope: "global",
        }
    }
}

/// `net.dvnet.*` entries recognised under `CreateNetwork`'s generic options
/// key. `mtu`/`mode` are parsed but intentionally unused by the core rather
/// than silently dropped.
#[derive(Debug, Clone, Default)]
pub struct NetworkOptions {
    pub name: Option<String>,
    pub def_path: Option<String>,
    pub mtu: Option<u32>,
    pub mode: Option<String>,
}

const GENERIC_OPTIONS_KEY: &str = "com.docker.network.generic";

/// Docker nests driver-specific strings under a well-known generic-options
/// key; pull `net.dvnet.*` out of it, tolerating absence of the whole key.
pub fn parse_network_options(options: &Value) -> NetworkOptions {
    let mut parsed = NetworkOptions::default();
    let Some(generic) = options.get(GENERIC_OPTIONS_KEY).and_then(Value::as_object) else {
        return parsed;
    };

    let as_map: HashMap<&str, &Value> = generic.iter().map(|(k, v)| (k.as_str(), v)).collect();

    parsed.name = as_map
        .get("net.dvnet.name")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    parsed.def_path = as_map
        .get("net.dvnet.def")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    parsed.mtu = as_map
        .get("net.dvnet.mtu")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());
    parsed.mode = as_map
        .get("net.dvnet.mode")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    parsed
}

/// The network-id prefix used when no `net.dvnet.name` override is given:
/// `"dvn-" + truncateID(network_id, 5)`.
pub fn default_name(network_id: &str) -> String {
    let truncated: String = network_id.chars().take(5).collect();
    format!("dvn-{truncated}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dvnet_options_from_the_generic_key() {
        let options = json!({
            "com.docker.network.generic": {
                "net.dvnet.name": "office",
                "net.dvnet.def": "/tmp/office.json",
                "net.dvnet.mtu": "1450",
                "net.dvnet.mode": "nat"
            }
        });
        let parsed = parse_network_options(&options);
        assert_eq!(parsed.name.as_deref(), Some("office"));
        assert_eq!(parsed.def_path.as_deref(), Some("/tmp/office.json"));
        assert_eq!(parsed.mtu, Some(1450));
        assert_eq!(parsed.mode.as_deref(), Some("nat"));
    }

    #[test]
    fn missing_options_key_yields_all_none() {
        let parsed = parse_network_options(&json!({}));
        assert!(parsed.name.is_none());
        assert!(parsed.def_path.is_none());
    }

    #[test]
    fn default_name_truncates_to_five_characters() {
        assert_eq!(default_name("abcdef0123456789"), "dvn-abcde");
    }
}
