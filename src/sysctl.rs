//! Sysctl Guard: save, set, and restore host sysctls, and ensure the netns
//! bind-mount point exists.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{DvnetError, DvnetResult};

const IP_FORWARD: &str = "net.ipv4.ip_forward";
const BRIDGE_NF_CALL_IPTABLES: &str = "net.bridge.bridge-nf-call-iptables";

fn sysctl_path(key: &str) -> String {
    format!("/proc/sys/{}", key.replace('.', "/"))
}

fn read_sysctl(key: &str) -> DvnetResult<String> {
    fs::read_to_string(sysctl_path(key))
        .map(|v| v.trim().to_string())
        .map_err(|e| DvnetError::sysctl(format!("couldn't read {key}: {e}")))
}

fn write_sysctl(key: &str, value: &str) -> DvnetResult<()> {
    fs::write(sysctl_path(key), value)
        .map_err(|e| DvnetError::sysctl(format!("couldn't set {key}={value}: {e}")))
}

/// Reads and overwrites the sysctls the datapath needs, returning the prior
/// values so they can be restored on teardown. Failure to set `ip_forward`
/// is fatal; failure on the bridge-netfilter sysctl is only a warning since
/// the `br_netfilter` module may not be loaded.
pub fn apply() -> DvnetResult<HashMap<String, String>> {
    ensure_netns_dir()?;

    let mut previous = HashMap::new();

    let prior_forward = read_sysctl(IP_FORWARD)?;
    write_sysctl(IP_FORWARD, "1")?;
    previous.insert(IP_FORWARD.to_string(), prior_forward);

    match read_sysctl(BRIDGE_NF_CALL_IPTABLES) {
        Ok(prior) => {
            if let Err(e) = write_sysctl(BRIDGE_NF_CALL_IPTABLES, "0") {
                log::warn!("couldn't set {BRIDGE_NF_CALL_IPTABLES}, continuing: {e}");
            } else {
                previous.insert(BRIDGE_NF_CALL_IPTABLES.to_string(), prior);
            }
        }
        Err(e) => log::warn!("couldn't read {BRIDGE_NF_CALL_IPTABLES}, continuing: {e}"),
    }

    Ok(previous)
}

fn ensure_netns_dir() -> DvnetResult<()> {
    let path = Path::new("/var/run/netns");
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| DvnetError::sysctl(format!("couldn't create /var/run/netns: {e}")))?;
    let mut perms = fs::metadata(path)
        .map_err(|e| DvnetError::sysctl(format!("couldn't stat /var/run/netns: {e}")))?
        .permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(path, perms)
        .map_err(|e| DvnetError::sysctl(format!("couldn't chmod /var/run/netns: {e}")))
}

/// Restores every recorded sysctl; collects failures into a single
/// aggregated warning but never stops partway.
pub fn restore(previous: &HashMap<String, String>) {
    let mut failures = Vec::new();
    for (key, value) in previous {
        if let Err(e) = write_sysctl(key, value) {
            failures.push(format!("{key}: {e}"));
        }
    }
    if !failures.is_empty() {
        log::warn!("couldn't restore some sysctls: {}", failures.join("; "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysctl_path_maps_dots_to_slashes() {
        assert_eq!(sysctl_path(IP_FORWARD), "/proc/sys/net/ipv4/ip_forward");
        assert_eq!(
            sysctl_path(BRIDGE_NF_CALL_IPTABLES),
            "/proc/sys/net/bridge/bridge-nf-call-iptables"
        );
    }

    #[test]
    fn restoring_an_empty_snapshot_does_nothing() {
        restore(&HashMap::new());
    }
}
