//! Network-namespace critical section.
//!
//! Every entry into a non-default namespace pins the calling OS thread for
//! the duration of the switch: open a handle to the current namespace,
//! `setns` into the target by PID, run the closure, then `setns` back on
//! every exit path. Callers are expected to run this from inside
//! `tokio::task::spawn_blocking` — a blocking-pool task owns its OS thread
//! exclusively for as long as the closure runs, which is what gives us the
//! "no migration between kernel threads" guarantee without hand-rolled
//! thread affinity.

use std::fs::File;
use std::net::Ipv4Addr;
use std::process::Command;

use nix::sched::{CloneFlags, setns};

use crate::error::{Context, DvnetError, DvnetResult};

#[derive(Debug)]
pub struct NetworkNamespace {
    pid: i32,
}

impl NetworkNamespace {
    pub fn from_pid(pid: i32) -> Self {
        NetworkNamespace { pid }
    }

    /// Runs `callback` inside this namespace. Always restores the caller's
    /// original namespace before returning, even if `callback` fails.
    pub fn enter<F, T>(&self, callback: F) -> DvnetResult<T>
    where
        F: FnOnce() -> DvnetResult<T>,
    {
        let current_ns = File::open("/proc/self/ns/net")
            .map_err(|e| DvnetError::namespace(format!("couldn't open current namespace: {e}")))?;

        let ns_path = format!("/proc/{}/ns/net", self.pid);
        let target_ns = File::open(&ns_path).map_err(|e| {
            DvnetError::namespace(format!("couldn't open namespace for pid {}: {e}", self.pid))
        })?;

        setns(&target_ns, CloneFlags::CLONE_NEWNET).map_err(|e| {
            DvnetError::namespace(format!("couldn't switch to pid {} namespace: {e}", self.pid))
        })?;

        let result = callback();

        setns(&current_ns, CloneFlags::CLONE_NEWNET).map_err(|e| {
            DvnetError::namespace(format!(
                "couldn't restore original namespace after entering pid {}: {e}",
                self.pid
            ))
        })?;

        result.context(&format!("inside namespace of pid {}", self.pid))
    }

    /// Brings the moved-in link up inside the target namespace.
    pub fn bring_up(&self, iface: &str) -> DvnetResult<()> {
        self.enter(|| run_ip(&["link", "set", iface, "up"]))
    }

    /// Assigns `cidr` to `iface` inside this namespace.
    pub fn address_interface(&self, iface: &str, cidr: &str) -> DvnetResult<()> {
        self.enter(|| run_ip_tolerating(&["addr", "add", cidr, "dev", iface], "File exists"))
    }

    /// Installs one route inside this namespace. Kernel "already exists" is
    /// treated as success since routes must tolerate duplicates.
    pub fn add_route(&self, dst_cidr: &str, gateway: Ipv4Addr) -> DvnetResult<()> {
        self.enter(|| {
            run_ip_tolerating(
                &["route", "add", dst_cidr, "via", &gateway.to_string()],
                "File exists",
            )
        })
    }

    pub fn add_default_route(&self, gateway: Ipv4Addr, iface: &str) -> DvnetResult<()> {
        self.enter(|| {
            run_ip_tolerating(
                &[
                    "route",
                    "add",
                    "default",
                    "via",
                    &gateway.to_string(),
                    "dev",
                    iface,
                ],
                "File exists",
            )
        })
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

/// Like `run_ip`, but treats a stderr containing `tolerate` as success — used
/// where the kernel rejecting a duplicate add is the expected, benign case.
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
