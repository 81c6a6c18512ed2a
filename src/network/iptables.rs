//! Idempotent iptables NAT/FORWARD management.
//!
//! Every rule is probed with `exists` before it is applied or removed, the
//! way `iptables::IPTables::exists`/`insert`/`delete` are used for
//! netavark's firewall driver: install is a no-op if the rule is already
//! present, uninstall is a no-op if it's already gone.

use iptables::IPTables;

use crate::error::{DvnetError, DvnetResult};

const NAT_TABLE: &str = "nat";
const POSTROUTING: &str = "POSTROUTING";
const FILTER_TABLE: &str = "filter";
const FORWARD: &str = "FORWARD";

fn connect() -> DvnetResult<IPTables> {
    iptables::new(false).map_err(|e| DvnetError::iptables(format!("couldn't connect to iptables: {e}")))
}

fn insert_unique(conn: &IPTables, table: &str, chain: &str, rule: &str) -> DvnetResult<()> {
    let exists = conn
        .exists(table, chain, rule)
        .map_err(|e| DvnetError::iptables(format!("couldn't probe rule `{rule}`: {e}")))?;
    if exists {
        return Ok(());
    }
    conn.insert(table, chain, rule, 1)
        .map(|_| log::info!("installed iptables rule: -t {table} -I {chain} {rule}"))
        .map_err(|e| DvnetError::iptables(format!("couldn't install rule `{rule}`: {e}")))
}

fn remove_if_present(conn: &IPTables, table: &str, chain: &str, rule: &str) -> DvnetResult<()> {
    let exists = conn
        .exists(table, chain, rule)
        .map_err(|e| DvnetError::iptables(format!("couldn't probe rule `{rule}`: {e}")))?;
    if !exists {
        return Ok(());
    }
    conn.delete(table, chain, rule)
        .map(|_| log::info!("removed iptables rule: -t {table} -D {chain} {rule}"))
        .map_err(|e| DvnetError::iptables(format!("couldn't remove rule `{rule}`: {e}")))
}

/// `-t nat -I POSTROUTING -s <hop_cidr> -j MASQUERADE`.
pub fn setup_nat(hop_cidr: &str) -> DvnetResult<()> {
    let conn = connect()?;
    let rule = format!("-s {hop_cidr} -j MASQUERADE");
    insert_unique(&conn, NAT_TABLE, POSTROUTING, &rule)
}

/// No-op if `hop_cidr` is empty.
pub fn teardown_nat(hop_cidr: &str) -> DvnetResult<()> {
    if hop_cidr.is_empty() {
        return Ok(());
    }
    let conn = connect()?;
    let rule = format!("-s {hop_cidr} -j MASQUERADE");
    remove_if_present(&conn, NAT_TABLE, POSTROUTING, &rule)
}

/// `-I FORWARD -i <hop_bridge> -j ACCEPT` and `-I FORWARD -o <hop_bridge> -j ACCEPT`.
pub fn setup_hop_forwarding(hop_bridge: &str) -> DvnetResult<()> {
    let conn = connect()?;
    insert_unique(&conn, FILTER_TABLE, FORWARD, &format!("-i {hop_bridge} -j ACCEPT"))?;
    insert_unique(&conn, FILTER_TABLE, FORWARD, &format!("-o {hop_bridge} -j ACCEPT"))
}

/// No-op if `hop_bridge` is empty.
pub fn teardown_hop_forwarding(hop_bridge: &str) -> DvnetResult<()> {
    if hop_bridge.is_empty() {
        return Ok(());
    }
    let conn = connect()?;
    remove_if_present(&conn, FILTER_TABLE, FORWARD, &format!("-i {hop_bridge} -j ACCEPT"))?;
    remove_if_present(&conn, FILTER_TABLE, FORWARD, &format!("-o {hop_bridge} -j ACCEPT"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nat_rule_text_matches_spec() {
        let rule = format!("-s {} -j MASQUERADE", "192.168.240.0/24");
        assert_eq!(rule, "-s 192.168.240.0/24 -j MASQUERADE");
    }

    #[test]
    fn forward_rule_text_matches_spec() {
        assert_eq!(format!("-i {} -j ACCEPT", "dvn-dvhop"), "-i dvn-dvhop -j ACCEPT");
        assert_eq!(format!("-o {} -j ACCEPT", "dvn-dvhop"), "-o dvn-dvhop -j ACCEPT");
    }

    #[test]
    fn teardown_is_a_noop_for_empty_keys() {
        assert!(teardown_nat("").is_ok());
        assert!(teardown_hop_forwarding("").is_ok());
    }
}
