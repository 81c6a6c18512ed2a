use std::process::Command;

use crate::error::{DvnetError, DvnetResult};

/// A Linux bridge, identified by its already-prefixed kernel name.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub name: String,
}

impl Bridge {
    /// Creates (if absent) and brings up the bridge `"dvn-" + lowercase(name)`.
    /// Kernel interface names are capped at 15 characters; callers are
    /// responsible for passing an already-truncated `name` for
    /// runtime-assigned identifiers.
    pub fn create(name: &str) -> DvnetResult<Self> {
        let kernel_name = format!("dvn-{}", name.to_lowercase());
        let bridge = Bridge { name: kernel_name };
        if bridge.exists()? {
            log::debug!("bridge {} already exists", bridge.name);
        } else {
            run_ip(&["link", "add", "name", &bridge.name, "type", "bridge"])?;
            log::info!("created bridge {}", bridge.name);
        }
        bridge.up()?;
        Ok(bridge)
    }

    pub fn exists(&self) -> DvnetResult<bool> {
        let output = Command::new("ip")
            .args(["link", "show", &self.name])
            .output()
            .map_err(|e| DvnetError::netlink(format!("couldn't check bridge {}: {e}", self.name)))?;
        Ok(output.status.success())
    }

    pub fn up(&self) -> DvnetResult<()> {
        run_ip(&["link", "set", &self.name, "up"])
    }

    pub fn set_ip(&self, cidr: &str) -> DvnetResult<()> {
        run_ip_tolerating(
            &["addr", "add", cidr, "dev", &self.name],
            "File exists",
        )
    }

    pub fn attach_interface(&self, interface: &str) -> DvnetResult<()> {
        run_ip(&["link", "set", interface, "master", &self.name])?;
        run_ip(&["link", "set", interface, "up"])
    }

    /// Deletes the bridge; the kernel cascades removal of any veth ends whose
    /// master it was. A missing bridge is benign.
    pub fn remove(&self) -> DvnetResult<()> {
        if !self.exists()? {
            return Ok(());
        }
        run_ip(&["link", "delete", &self.name])
    }
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

fn run_ip_tolerating(args: &[&str], tolerate: &str) -> DvnetResult<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| DvnetError::netlink(format!("couldn't execute ip {}: {e}", args.join(" "))))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains(tolerate) {
            return Err(DvnetError::netlink(format!(
                "ip {} failed: {stderr}",
                args.join(" ")
            )));
        }
    }
    Ok(())
}
