//! Topology definition loading, schema validation, and canonicalization.
//!
//! Mirrors the raw/parsed split in the original driver's `conf.go`: a
//! `RawNetDef` is exactly what `serde_json` can deserialize (CIDRs are still
//! strings), and `parse_def` turns it into a canonical `NetDef` where CIDRs
//! are already-parsed `Ipv4Network`s.

mod schema;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::{DvnetError, DvnetResult};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawHostDef {
    #[validate(length(min = 1))]
    pub image: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawSubnetDef {
    #[validate(length(min = 1))]
    pub cidr: String,
    #[validate(length(min = 1))]
    pub hosts: IndexMap<String, RawHostDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ForwardPolicy {
    Accept,
    Drop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FwRule {
    pub source: String,
    pub dest: String,
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFwRules {
    pub policy: Option<ForwardPolicy>,
    #[serde(default)]
    pub accept: Vec<FwRule>,
    #[serde(default)]
    pub drop: Vec<FwRule>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawRouterDef {
    #[validate(length(min = 1))]
    pub image: String,
    #[validate(length(min = 1))]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub fw_rules: RawFwRules,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOutboundAccess {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub hop_cidr: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawNetDef {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub outbound_access: RawOutboundAccess,
    #[serde(default)]
    pub update_hosts: bool,
    #[serde(default)]
    pub automatic_routing: bool,
    #[validate(length(min = 1))]
    pub subnets: IndexMap<String, RawSubnetDef>,
    pub routers: IndexMap<String, RawRouterDef>,
}

/// Firewall rules on a router: either fully specified or entirely absent.
#[derive(Debug, Clone)]
pub enum FwRules {
    None,
    Some {
        policy: ForwardPolicy,
        accept: Vec<FwRule>,
        drop: Vec<FwRule>,
    },
}

#[derive(Debug, Clone)]
pub struct HostDef {
    pub image: String,
}

#[derive(Debug, Clone)]
pub struct SubnetDef {
    pub cidr: Ipv4Network,
    pub hosts: IndexMap<String, HostDef>,
}

#[derive(Debug, Clone)]
pub struct RouterDef {
    pub image: String,
    pub subnets: IndexSet<String>,
    pub fw_rules: FwRules,
}

#[derive(Debug, Clone)]
pub struct OutboundAccess {
    pub enabled: bool,
    pub hop_cidr: Option<Ipv4Network>,
}

/// Canonical topology definition: the form every other module consumes.
#[derive(Debug, Clone)]
pub struct NetDef {
    pub name: String,
    pub outbound_access: OutboundAccess,
    pub update_hosts_file: bool,
    pub automatic_routing: bool,
    pub subnets: IndexMap<String, SubnetDef>,
    pub routers: IndexMap<String, RouterDef>,
}

pub fn load_def(path: &Path) -> DvnetResult<NetDef> {
    let raw = fs::read(path).map_err(|e| {
        DvnetError::Validation {
            message: format!("couldn't read topology definition {}: {e}", path.display()),
        }
    })?;
    parse_def(&raw)
}

pub fn parse_def(raw: &[u8]) -> DvnetResult<NetDef> {
    let doc: Value = serde_json::from_slice(raw)?;
    schema::validate(&doc)?;

    let raw_def: RawNetDef = serde_json::from_value(doc)?;
    raw_def
        .validate()
        .map_err(|e| DvnetError::validation(format!("topology definition is malformed: {e}")))?;

    let def = canonicalize(raw_def)?;
    validate_invariants(&def)?;
    Ok(def)
}

fn canonicalize(raw: RawNetDef) -> DvnetResult<NetDef> {
    let mut subnets = IndexMap::with_capacity(raw.subnets.len());
    for (name, raw_subnet) in raw.subnets {
        let cidr: Ipv4Network = raw_subnet.cidr.parse().map_err(|_| {
            DvnetError::validation(format!(
                "subnet {name} has an invalid IPv4 CIDR: {}",
                raw_subnet.cidr
            ))
        })?;
        let hosts = raw_subnet
            .hosts
            .into_iter()
            .map(|(host, h)| (host, HostDef { image: h.image }))
            .collect();
        subnets.insert(name, SubnetDef { cidr, hosts });
    }

    let mut routers = IndexMap::with_capacity(raw.routers.len());
    for (name, raw_router) in raw.routers {
        let fw_rules = match raw_router.fw_rules.policy {
            None if raw_router.fw_rules.accept.is_empty() && raw_router.fw_rules.drop.is_empty() => {
                FwRules::None
            }
            Some(policy) => FwRules::Some {
                policy,
                accept: raw_router.fw_rules.accept,
                drop: raw_router.fw_rules.drop,
            },
            None => {
                return Err(DvnetError::validation(format!(
                    "router {name} has accept/drop rules without a default policy"
                )));
            }
        };
        routers.insert(
            name,
            RouterDef {
                image: raw_router.image,
                subnets: raw_router.subnets.into_iter().collect(),
                fw_rules,
            },
        );
    }

    let hop_cidr = if raw.outbound_access.enabled {
        Some(raw.outbound_access.hop_cidr.parse().map_err(|_| {
            DvnetError::validation(format!(
                "outbound_access.hop_cidr is not a valid IPv4 CIDR: {}",
                raw.outbound_access.hop_cidr
            ))
        })?)
    } else {
        None
    };

    Ok(NetDef {
        name: raw.name,
        outbound_access: OutboundAccess {
            enabled: raw.outbound_access.enabled,
            hop_cidr,
        },
        update_hosts_file: raw.update_hosts,
        automatic_routing: raw.automatic_routing,
        subnets,
        routers,
    })
}

/// Structural invariants beyond what the schema can express: unique names
/// across hosts+routers, every router-referenced subnet exists.
fn validate_invariants(def: &NetDef) -> DvnetResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for subnet in def.subnets.values() {
        for host in subnet.hosts.keys() {
            if !seen.insert(host.as_str()) {
                return Err(DvnetError::collision(format!(
                    "name {host} is used by more than one host/router"
                )));
            }
        }
    }
    for router_name in def.routers.keys() {
        if !seen.insert(router_name.as_str()) {
            return Err(DvnetError::collision(format!(
                "name {router_name} is used by more than one host/router"
            )));
        }
    }
    for (router_name, router) in &def.routers {
        for subnet_name in &router.subnets {
            if !def.subnets.contains_key(subnet_name) {
                return Err(DvnetError::validation(format!(
                    "router {router_name} is attached to subnet {subnet_name} which doesn't exist"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_subnet_two_router_def() -> &'static str {
        r#"{
            "name": "Test Net 0",
            "automatic_routing": true,
            "subnets": {
                "A": {"cidr": "10.0.0.0/24", "hosts": {"A-1": {"image": "alpine"}, "A-2": {"image": "alpine"}}},
                "B": {"cidr": "10.0.1.0/24", "hosts": {"B-1": {"image": "alpine"}, "B-2": {"image": "alpine"}}}
            },
            "routers": {
                "R-1": {"image": "alpine", "subnets": ["A", "B"]},
                "R-2": {"image": "alpine", "subnets": ["A", "B"]}
            }
        }"#
    }

    #[test]
    fn parses_well_formed_definition() {
        let def = parse_def(two_subnet_two_router_def().as_bytes()).expect("should parse");
        assert_eq!(def.name, "Test Net 0");
        assert_eq!(def.subnets.len(), 2);
        assert_eq!(def.routers.len(), 2);
        assert!(def.automatic_routing);
    }

    #[test]
    fn rejects_router_referencing_missing_subnet() {
        let raw = r#"{
            "name": "bad",
            "subnets": {"A": {"cidr": "10.0.0.0/24", "hosts": {"A-1": {"image": "alpine"}}}},
            "routers": {"R-1": {"image": "alpine", "subnets": ["A", "ghost"]}}
        }"#;
        let err = parse_def(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DvnetError::Validation { .. }));
    }

    #[test]
    fn rejects_duplicate_host_name_across_subnets() {
        let raw = r#"{
            "name": "bad",
            "subnets": {
                "A": {"cidr": "10.0.0.0/24", "hosts": {"dup": {"image": "alpine"}}},
                "B": {"cidr": "10.0.1.0/24", "hosts": {"dup": {"image": "alpine"}}}
            },
            "routers": {}
        }"#;
        let err = parse_def(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DvnetError::Collision { .. }));
    }

    #[test]
    fn rejects_host_name_colliding_with_router_name() {
        let raw = r#"{
            "name": "bad",
            "subnets": {"A": {"cidr": "10.0.0.0/24", "hosts": {"same": {"image": "alpine"}}}},
            "routers": {"same": {"image": "alpine", "subnets": ["A"]}}
        }"#;
        let err = parse_def(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DvnetError::Collision { .. }));
    }

    #[test]
    fn rejects_malformed_cidr() {
        let raw = r#"{
            "name": "bad",
            "subnets": {"A": {"cidr": "not-a-cidr", "hosts": {"A-1": {"image": "alpine"}}}},
            "routers": {}
        }"#;
        let err = parse_def(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DvnetError::Validation { .. }));
    }

    #[test]
    fn rejects_missing_required_field_via_schema() {
        let raw = r#"{"subnets": {}, "routers": {}}"#;
        let err = parse_def(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DvnetError::Validation { .. }));
    }
}
