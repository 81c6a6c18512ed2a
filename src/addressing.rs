//! Per-subnet monotonic IPv4 allocator.
//!
//! An `Addresser` is a pure function of (CIDR, sequence of names): the same
//! insertion order always yields the same assignments, which is what makes
//! the on-disk `.ipaddr` dump meaningful across runs.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use indexmap::IndexMap;
use ipnetwork::Ipv4Network;

use crate::error::{DvnetError, DvnetResult};

#[derive(Debug, Clone)]
pub struct Addresser {
    cidr: Ipv4Network,
    cursor: u32,
    assigned: HashMap<String, Ipv4Addr>,
}

impl Addresser {
    /// Constructs an `Addresser` for `subnet_name`/`cidr`, checked against the
    /// addressers already registered in the owning `NetworkState`. Fails if
    /// `subnet_name` is already bound, or if `cidr` is already bound under a
    /// different subnet name.
    pub fn new(
        existing: &IndexMap<String, Addresser>,
        subnet_name: &str,
        cidr: Ipv4Network,
    ) -> DvnetResult<Self> {
        if existing.contains_key(subnet_name) {
            return Err(DvnetError::collision(format!(
                "an addresser already exists for subnet {subnet_name}"
            )));
        }
        if let Some((other_name, _)) = existing.iter().find(|(_, a)| a.cidr == cidr) {
            return Err(DvnetError::collision(format!(
                "CIDR {cidr} is already bound to subnet {other_name}, can't also bind it to {subnet_name}"
            )));
        }
        Ok(Self {
            cidr,
            cursor: u32::from(cidr.network()),
            assigned: HashMap::new(),
        })
    }

    pub fn cidr(&self) -> Ipv4Network {
        self.cidr
    }

    pub fn assigned(&self) -> &HashMap<String, Ipv4Addr> {
        &self.assigned
    }

    /// Advances the cursor by one and records `name -> new address`. The
    /// first call on a fresh `Addresser` yields network-address + 1.
    ///
    /// Never fails; overflowing past the subnet's broadcast address is a
    /// topology-sizing bug the caller is expected to have precluded, and is
    /// treated as a fatal precondition violation rather than a recoverable
    /// error.
    pub fn next_cidr(&mut self, name: impl Into<String>) -> String {
        let next = self
            .cursor
            .checked_add(1)
            .expect("subnet CIDR exhausted: more participants than addresses");
        let broadcast = u32::from(self.cidr.broadcast());
        assert!(
            next < broadcast,
            "subnet {} exhausted: no addresses left for more participants",
            self.cidr
        );
        self.cursor = next;
        let addr = Ipv4Addr::from(next);
        self.assigned.insert(name.into(), addr);
        format!("{addr}/{}", self.cidr.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn first_allocation_is_network_address_plus_one() {
        let mut a = Addresser::new(&IndexMap::new(), "A", cidr("10.0.0.0/24")).unwrap();
        assert_eq!(a.next_cidr("R-1"), "10.0.0.1/24");
        assert_eq!(a.next_cidr("R-2"), "10.0.0.2/24");
        assert_eq!(a.next_cidr("A-1"), "10.0.0.3/24");
        assert_eq!(a.next_cidr("A-2"), "10.0.0.4/24");
    }

    #[test]
    fn rejects_duplicate_subnet_name() {
        let mut existing = IndexMap::new();
        existing.insert(
            "A".to_string(),
            Addresser::new(&IndexMap::new(), "A", cidr("10.0.0.0/24")).unwrap(),
        );
        let err = Addresser::new(&existing, "A", cidr("10.0.1.0/24")).unwrap_err();
        assert!(matches!(err, DvnetError::Collision { .. }));
    }

    #[test]
    fn rejects_cidr_reused_under_different_name() {
        let mut existing = IndexMap::new();
        existing.insert(
            "A".to_string(),
            Addresser::new(&IndexMap::new(), "A", cidr("10.0.0.0/24")).unwrap(),
        );
        let err = Addresser::new(&existing, "B", cidr("10.0.0.0/24")).unwrap_err();
        assert!(matches!(err, DvnetError::Collision { .. }));
    }

    #[test]
    fn is_a_pure_function_of_cidr_and_name_sequence() {
        let mut a = Addresser::new(&IndexMap::new(), "A", cidr("10.0.0.0/24")).unwrap();
        let mut b = Addresser::new(&IndexMap::new(), "A", cidr("10.0.0.0/24")).unwrap();
        for name in ["R-1", "R-2", "H-1"] {
            assert_eq!(a.next_cidr(name), b.next_cidr(name));
        }
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn exhausting_a_tiny_subnet_is_fatal() {
        let mut a = Addresser::new(&IndexMap::new(), "tiny", cidr("10.0.0.0/30")).unwrap();
        a.next_cidr("one");
        a.next_cidr("two");
        a.next_cidr("three");
    }
}
