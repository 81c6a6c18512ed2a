//! On-disk outputs derived from the topology definition path's stem:
//! `<stem>.netg` (graph dump) and `<stem>.ipaddr` (assigned addresses).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::addressing::Addresser;
use crate::error::{DvnetError, DvnetResult};
use crate::graph::Graph;

fn sibling_with_suffix(def_path: &Path, suffix: &str) -> PathBuf {
    let mut out = def_path.to_path_buf();
    out.set_extension(suffix);
    out
}

pub fn dump_graph(def_path: &Path, graph: &Graph) -> DvnetResult<()> {
    let path = sibling_with_suffix(def_path, "netg");
    std::fs::write(&path, graph.render())
        .map_err(|e| DvnetError::Filesystem {
            message: format!("couldn't write graph dump {}: {e}", path.display()),
        })
}

#[derive(Serialize)]
struct SubnetAssignments {
    #[serde(rename = "AssignedIPs")]
    assigned_ips: HashMap<String, String>,
}

/// Dumps `subnet name -> {AssignedIPs: {name -> IP}}`. Dump failure is a
/// warning, not a fatal error.
pub fn dump_addressers(def_path: &Path, addressers: &IndexMap<String, Addresser>) -> DvnetResult<()> {
    let path = sibling_with_suffix(def_path, "ipaddr");
    let mut out = HashMap::with_capacity(addressers.len());
    for (subnet_name, addresser) in addressers {
        let assigned_ips = addresser
            .assigned()
            .iter()
            .map(|(name, ip)| (name.clone(), ip.to_string()))
            .collect();
        out.insert(subnet_name.clone(), SubnetAssignments { assigned_ips });
    }
    let json = serde_json::to_vec_pretty(&out)?;
    std::fs::write(&path, json).map_err(|e| DvnetError::Filesystem {
        message: format!("couldn't write address dump {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_sibling_paths_from_the_definition_stem() {
        let def = Path::new("/tmp/netDef.json");
        assert_eq!(sibling_with_suffix(def, "netg"), Path::new("/tmp/netDef.netg"));
        assert_eq!(sibling_with_suffix(def, "ipaddr"), Path::new("/tmp/netDef.ipaddr"));
    }
}
