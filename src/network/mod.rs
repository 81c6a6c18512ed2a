//! Link plumbing and firewall plumbing: bridges, veth pairs, namespace-scoped
//! addresses/routes, and iptables NAT/FORWARD rules.

pub mod bridge;
pub mod iptables;
pub mod namespace;
pub mod veth;

pub use bridge::Bridge;
pub use namespace::NetworkNamespace;
