//! veth pair creation and namespace moves.

use std::process::Command;

use crate::error::{DvnetError, DvnetResult};
use crate::network::namespace::NetworkNamespace;

/// Creates a veth pair named `{bridge_prefix}{suffix}` / `{container_prefix}{suffix}`,
/// defaulting to `bth-`/`eth` for subnet-internal links and `hth-`/`dth-` for
/// hop-subnet links.
pub fn create_pair(bridge_prefix: &str, container_prefix: &str, suffix: &str) -> DvnetResult<(String, String)> {
    let bridge_end = format!("{bridge_prefix}{suffix}");
    let container_end = format!("{container_prefix}{suffix}");
    run_ip(&[
        "link", "add", &bridge_end, "type", "veth", "peer", "name", &container_end,
    ])?;
    log::debug!("created veth pair {bridge_end} <-> {container_end}");
    Ok((bridge_end, container_end))
}

/// Moves `interface` into the namespace of `pid` and brings it up there.
pub fn connect_to_container(interface: &str, pid: i32) -> DvnetResult<()> {
    run_ip(&["link", "set", interface, "netns", &pid.to_string()])?;
    NetworkNamespace::from_pid(pid).bring_up(interface)?;
    log::debug!("moved {interface} into namespace of pid {pid}");
    Ok(())
}

/// Deletes a veth end; missing-device is benign.
pub fn delete(interface: &str) -> DvnetResult<()> {
    let output = Command::new("ip")
        .args(["link", "delete", interface])
        .output()
        .map_err(|e| DvnetError::netlink(format!("couldn't delete veth {interface}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("Cannot find device") {
            return Err(DvnetError::netlink(format!(
                "couldn't delete veth {interface}: {stderr}"
            )));
        }
    }
    Ok(())
}

fn run_ip(args: &[&str]) -> DvnetResult<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| DvnetError::netlink(format!("couldn't execute ip {}: {e}", args.join(" "))))?;
    if !output.status.success() {
        return Err(DvnetError::netlink(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
