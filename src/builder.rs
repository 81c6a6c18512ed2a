//! Network Builder: orchestrates subnets, routers, automatic routing, and
//! outbound access; owns the `NetworkState` for one network and runs the
//! create/delete protocols.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::addressing::Addresser;
use crate::config::{self, NetDef};
use crate::container::ContainerRuntime;
use crate::error::{Context, DvnetError, DvnetResult};
use crate::graph::{self, Graph};
use crate::network::namespace::NetworkNamespace;
use crate::network::{bridge, iptables, veth};
use crate::persistence;
use crate::sysctl;

const HOP_SUBNET_NAME: &str = "outboundSubnet";
const HOP_BRIDGE_SUFFIX: &str = "dvhop";
const HOP_VETH_BRIDGE_PREFIX: &str = "hth-";
const HOP_VETH_CONTAINER_PREFIX: &str = "dth-";
const SUBNET_VETH_BRIDGE_PREFIX: &str = "bth-";
const SUBNET_VETH_CONTAINER_PREFIX: &str = "eth";

#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub pid: i32,
}

#[derive(Debug)]
pub struct SubnetState {
    pub bridge_name: String,
    pub containers: IndexMap<String, ContainerHandle>,
}

/// Live, mutable state owned by the Network Builder for the lifetime of one
/// network.
#[derive(Debug, Default)]
pub struct NetworkState {
    pub def_path: PathBuf,
    pub hop_cidr: String,
    pub hop_bridge: String,
    pub previous_sysctls: std::collections::HashMap<String, String>,
    pub subnets: IndexMap<String, SubnetState>,
    pub addressers: IndexMap<String, Addresser>,
    pub routers: IndexMap<String, ContainerHandle>,
}

pub struct NetworkBuilder {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Runs a blocking, sync closure on the blocking thread pool so
    /// namespace-entering netlink work never stalls the async reactor.
    async fn blocking<T, F>(f: F) -> DvnetResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> DvnetResult<T> + Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result,
            Err(e) => Err(DvnetError::namespace(format!("plumbing task panicked: {e}"))),
        }
    }

    /// Create protocol. On any step's failure, runs the delete protocol
    /// against whatever partial state was built, then returns the original
    /// error.
    pub async fn create(&self, def_path: &Path) -> DvnetResult<NetworkState> {
        let mut state = NetworkState {
            def_path: def_path.to_path_buf(),
            ..Default::default()
        };

        match self.try_create(&mut state, def_path).await {
            Ok(()) => Ok(state),
            Err(e) => {
                log::error!("network create failed, rolling back: {e}");
                self.delete(state).await;
                Err(e)
            }
        }
    }

    async fn try_create(&self, state: &mut NetworkState, def_path: &Path) -> DvnetResult<()> {
        state.previous_sysctls = Self::blocking(sysctl::apply).await?;

        let def = config::load_def(def_path).context("loading topology definition")?;

        let graph = graph::build_graph(&def)?;
        if let Err(e) = persistence::dump_graph(def_path, &graph) {
            log::warn!("couldn't dump graph, continuing: {e}");
        }

        // Subnets: bridges + addressers first, hosts are populated after
        // routers so that routers occupy the low addresses (routers get
        // .1/.2, hosts get .3/.4 — the first `next_cidr` calls on a subnet's
        // addresser must be the routers attached to it, since they act as
        // the implicit gateway seen by hosts added later).
        for (subnet_name, subnet_def) in &def.subnets {
            let addresser = Addresser::new(&state.addressers, subnet_name, subnet_def.cidr)?;
            state.addressers.insert(subnet_name.clone(), addresser);

            let bridge_name = subnet_name.clone();
            let bridge = Self::blocking(move || bridge::Bridge::create(&bridge_name)).await?;
            state.subnets.insert(
                subnet_name.clone(),
                SubnetState {
                    bridge_name: bridge.name,
                    containers: IndexMap::new(),
                },
            );
        }

        self.create_routers(state, &def).await?;
        self.create_hosts(state, &def).await?;

        if def.automatic_routing {
            self.install_routes(state, &def, &graph).await?;
        }

        if def.outbound_access.enabled {
            self.setup_outbound_access(state, &def).await?;
        }

        if let Err(e) = persistence::dump_addressers(def_path, &state.addressers) {
            log::warn!("couldn't dump address assignments, continuing: {e}");
        }

        Ok(())
    }

    async fn create_routers(&self, state: &mut NetworkState, def: &NetDef) -> DvnetResult<()> {
        for (router_name, router_def) in &def.routers {
            let (id, pid) = self.runtime.run(&router_def.image, router_name).await?;
            state
                .routers
                .insert(router_name.clone(), ContainerHandle { id, pid });

            for subnet_name in &router_def.subnets {
                let bridge_name = state
                    .subnets
                    .get(subnet_name)
                    .ok_or_else(|| {
                        DvnetError::validation(format!(
                            "router {router_name} attaches to unbuilt subnet {subnet_name}"
                        ))
                    })?
                    .bridge_name
                    .clone();

                let suffix = format!("{router_name}-{subnet_name}").to_lowercase();
                self.wire_veth(&bridge_name, &suffix, pid).await?;

                let addresser = state.addressers.get_mut(subnet_name).expect("addresser registered above");
                let cidr = addresser.next_cidr(router_name);
                let container_end = format!("{SUBNET_VETH_CONTAINER_PREFIX}{suffix}");
                Self::blocking(move || {
                    NetworkNamespace::from_pid(pid).address_interface(&container_end, &cidr)
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn create_hosts(&self, state: &mut NetworkState, def: &NetDef) -> DvnetResult<()> {
        for (subnet_name, subnet_def) in &def.subnets {
            let bridge_name = state.subnets[subnet_name].bridge_name.clone();

            for (host_name, host_def) in &subnet_def.hosts {
                let (id, pid) = self.runtime.run(&host_def.image, host_name).await?;

                let suffix = host_name.to_lowercase();
                self.wire_veth(&bridge_name, &suffix, pid).await?;

                let addresser = state
                    .addressers
                    .get_mut(subnet_name)
                    .expect("addresser registered above");
                let cidr = addresser.next_cidr(host_name);
                let container_end = format!("{SUBNET_VETH_CONTAINER_PREFIX}{suffix}");
                Self::blocking(move || {
                    NetworkNamespace::from_pid(pid).address_interface(&container_end, &cidr)
                })
                .await?;

                state
                    .subnets
                    .get_mut(subnet_name)
                    .expect("subnet registered above")
                    .containers
                    .insert(host_name.clone(), ContainerHandle { id, pid });
            }
        }
        Ok(())
    }

    /// Creates a subnet-internal veth pair, attaches the bridge end, and
    /// moves the container end into `pid`'s namespace. Returns the
    /// bridge-end interface name.
    async fn wire_veth(&self, bridge_name: &str, suffix: &str, pid: i32) -> DvnetResult<String> {
        let bridge_name = bridge_name.to_string();
        let suffix = suffix.to_string();
        Self::blocking(move || {
            let (bridge_end, container_end) = veth::create_pair(
                SUBNET_VETH_BRIDGE_PREFIX,
                SUBNET_VETH_CONTAINER_PREFIX,
                &suffix,
            )?;
            let b = bridge::Bridge { name: bridge_name };
            b.attach_interface(&bridge_end)?;
            veth::connect_to_container(&container_end, pid)?;
            Ok(bridge_end)
        })
        .await
    }

    /// Installs a route in every host's namespace towards every other
    /// subnet, gateway = the IP assigned to the first hop on the source
    /// subnet's own addresser.
    async fn install_routes(&self, state: &NetworkState, def: &NetDef, graph: &Graph) -> DvnetResult<()> {
        for (subnet_name, subnet_def) in &def.subnets {
            let routes = graph::subnet_routes(graph, def, subnet_name)?;
            let subnet_addresser = &state.addressers[subnet_name];

            for host_name in subnet_def.hosts.keys() {
                let pid = state.subnets[subnet_name].containers[host_name].pid;

                for route in routes.values() {
                    let hop_name = route.next_hop().ok_or_else(|| {
                        DvnetError::validation(format!(
                            "no router hop from subnet {subnet_name} towards {}",
                            route.dst_subnet
                        ))
                    })?;
                    let gateway = *subnet_addresser.assigned().get(hop_name).ok_or_else(|| {
                        DvnetError::validation(format!(
                            "gateway {hop_name} has no address on subnet {subnet_name}"
                        ))
                    })?;
                    let dst_cidr = route.dst_cidr.to_string();
                    Self::blocking(move || {
                        NetworkNamespace::from_pid(pid).add_route(&dst_cidr, gateway)
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Builds the hop subnet, hop bridge, NAT/FORWARD rules, and a default
    /// route in every existing container towards the hop bridge.
    async fn setup_outbound_access(&self, state: &mut NetworkState, def: &NetDef) -> DvnetResult<()> {
        let hop_cidr = def
            .outbound_access
            .hop_cidr
            .expect("outbound_access.enabled implies hop_cidr is set");

        let mut hop_addresser = Addresser::new(&state.addressers, HOP_SUBNET_NAME, hop_cidr)?;

        let hop_bridge = Self::blocking(move || bridge::Bridge::create(HOP_BRIDGE_SUFFIX)).await?;
        let hop_bridge_cidr = hop_addresser.next_cidr(HOP_BRIDGE_SUFFIX);
        let hop_gateway: Ipv4Addr = hop_bridge_cidr
            .split('/')
            .next()
            .expect("next_cidr always returns an A.B.C.D/P string")
            .parse()
            .expect("next_cidr always returns a valid IPv4 address");

        let hop_bridge_name = hop_bridge.name.clone();
        {
            let hop_bridge_name = hop_bridge_name.clone();
            let cidr = hop_bridge_cidr.clone();
            Self::blocking(move || bridge::Bridge { name: hop_bridge_name }.set_ip(&cidr)).await?;
        }

        state.hop_cidr = hop_cidr.to_string();
        state.hop_bridge = hop_bridge_name.clone();
        state.addressers.insert(HOP_SUBNET_NAME.to_string(), hop_addresser);

        {
            let hop_cidr_str = hop_cidr.to_string();
            Self::blocking(move || iptables::setup_nat(&hop_cidr_str)).await?;
        }
        {
            let hop_bridge_name = hop_bridge_name.clone();
            Self::blocking(move || iptables::setup_hop_forwarding(&hop_bridge_name)).await?;
        }

        let all_containers: Vec<(String, i32)> = state
            .subnets
            .values()
            .flat_map(|s| s.containers.values().map(|h| (h.id.clone(), h.pid)))
            .chain(state.routers.values().map(|h| (h.id.clone(), h.pid)))
            .collect();

        for (idx, (_, pid)) in all_containers.into_iter().enumerate() {
            let suffix = format!("hop{idx}");
            let bridge_name = hop_bridge_name.clone();
            let suffix_clone = suffix.clone();
            Self::blocking(move || {
                let (bridge_end, container_end) = veth::create_pair(
                    HOP_VETH_BRIDGE_PREFIX,
                    HOP_VETH_CONTAINER_PREFIX,
                    &suffix_clone,
                )?;
                let b = bridge::Bridge { name: bridge_name };
                b.attach_interface(&bridge_end)?;
                veth::connect_to_container(&container_end, pid)?;
                Ok(())
            })
            .await?;

            let hop_addresser = state
                .addressers
                .get_mut(HOP_SUBNET_NAME)
                .expect("hop addresser just registered");
            let cidr = hop_addresser.next_cidr(format!("hop-{suffix}"));
            let container_end = format!("{HOP_VETH_CONTAINER_PREFIX}{suffix}");
            Self::blocking(move || {
                NetworkNamespace::from_pid(pid).address_interface(&container_end, &cidr)
            })
            .await?;

            let container_end = format!("{HOP_VETH_CONTAINER_PREFIX}{suffix}");
            Self::blocking(move || {
                NetworkNamespace::from_pid(pid).add_default_route(hop_gateway, &container_end)
            })
            .await?;
        }

        Ok(())
    }

    /// Delete protocol, also used as the create-failure cleanup path. Every
    /// step is best-effort: failures are logged, never fatal.
    pub async fn delete(&self, state: NetworkState) {
        sysctl::restore(&state.previous_sysctls);

        if let Err(e) = iptables::teardown_nat(&state.hop_cidr) {
            log::warn!("couldn't remove NAT rule, continuing: {e}");
        }
        if let Err(e) = iptables::teardown_hop_forwarding(&state.hop_bridge) {
            log::warn!("couldn't remove hop FORWARD rules, continuing: {e}");
        }
        if !state.hop_bridge.is_empty() {
            let hop_bridge_name = state.hop_bridge.clone();
            if let Err(e) =
                Self::blocking(move || bridge::Bridge { name: hop_bridge_name }.remove()).await
            {
                log::warn!("couldn't remove hop bridge, continuing: {e}");
            }
        }

        for (subnet_name, subnet) in &state.subnets {
            let bridge_name = subnet.bridge_name.clone();
            if let Err(e) = Self::blocking(move || bridge::Bridge { name: bridge_name }.remove()).await {
                log::warn!("couldn't remove bridge for subnet {subnet_name}, continuing: {e}");
            }
            for (name, handle) in &subnet.containers {
                if let Err(e) = self.runtime.remove(&handle.id).await {
                    log::warn!("couldn't remove container {name}, continuing: {e}");
                }
            }
        }

        for (name, handle) in &state.routers {
            if let Err(e) = self.runtime.remove(&handle.id).await {
                log::warn!("couldn't remove router {name}, continuing: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeRuntime;
    use std::io::Write;

    fn write_def(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("netDef.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn routers_are_addressed_before_hosts() {
        // Pure addresser-ordering check, independent of actual netlink
        // calls: routers claim the low addresses before hosts do.
        let mut addressers: IndexMap<String, Addresser> = IndexMap::new();
        let a = Addresser::new(&addressers, "A", "10.0.0.0/24".parse().unwrap()).unwrap();
        addressers.insert("A".to_string(), a);
        let addresser = addressers.get_mut("A").unwrap();
        assert_eq!(addresser.next_cidr("R-1"), "10.0.0.1/24");
        assert_eq!(addresser.next_cidr("R-2"), "10.0.0.2/24");
        assert_eq!(addresser.next_cidr("A-1"), "10.0.0.3/24");
        assert_eq!(addresser.next_cidr("A-2"), "10.0.0.4/24");
    }

    #[test]
    fn sibling_dump_paths_use_the_definition_stem() {
        let dir = std::env::temp_dir();
        let def_path = write_def(&dir, "{}");
        assert_eq!(def_path.file_name().unwrap(), "netDef.json");
    }

    #[tokio::test]
    async fn delete_on_empty_state_performs_no_container_removal() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new());
        let builder = NetworkBuilder::new(runtime);
        builder.delete(NetworkState::default()).await;
    }
}
