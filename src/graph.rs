//! Undirected unit-weight graph of hosts and routers, and the shortest-path
//! routes derived from it.

use std::collections::{HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use crate::config::NetDef;
use crate::error::{DvnetError, DvnetResult};

#[derive(Debug, Default)]
pub struct Graph {
    /// Insertion order of vertex names, used only for the `.netg` dump.
    vertices: Vec<String>,
    adjacency: IndexMap<String, IndexSet<String>>,
}

impl Graph {
    fn add_vertex(&mut self, name: &str, seen: &mut HashSet<String>) -> DvnetResult<()> {
        if !seen.insert(name.to_string()) {
            return Err(DvnetError::collision(format!(
                "name {name} is used by more than one host/router"
            )));
        }
        self.vertices.push(name.to_string());
        self.adjacency.entry(name.to_string()).or_default();
        Ok(())
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn vertices(&self) -> &[String] {
        &self.vertices
    }

    pub fn neighbors(&self, name: &str) -> impl Iterator<Item = &String> {
        self.adjacency.get(name).into_iter().flatten()
    }

    /// Renders the graph as `vertex: neighbor neighbor ...` lines, one per
    /// vertex in insertion order, for the `.netg` dump.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for v in &self.vertices {
            let neighbors: Vec<&str> = self
                .adjacency
                .get(v)
                .map(|set| set.iter().map(String::as_str).collect())
                .unwrap_or_default();
            out.push_str(&format!("{v}: {}\n", neighbors.join(" ")));
        }
        out
    }

    /// Breadth-first shortest path from `src` to `dst`; unit weights make BFS
    /// exact (this is what Dijkstra reduces to on an unweighted graph).
    fn shortest_path(&self, src: &str, dst: &str) -> Option<Vec<String>> {
        if src == dst {
            return Some(vec![src.to_string()]);
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut parent: IndexMap<&str, &str> = IndexMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(src);
        queue.push_back(src);

        while let Some(cur) = queue.pop_front() {
            for next in self.neighbors(cur) {
                let next = next.as_str();
                if visited.insert(next) {
                    parent.insert(next, cur);
                    if next == dst {
                        queue.clear();
                        break;
                    }
                    queue.push_back(next);
                }
            }
        }

        if !visited.contains(dst) {
            return None;
        }
        let mut path = vec![dst];
        let mut cur = dst;
        while cur != src {
            let p = parent[cur];
            path.push(p);
            cur = p;
        }
        path.reverse();
        Some(path.into_iter().map(str::to_string).collect())
    }
}

/// A destination subnet reachable from some source host, expressed as the
/// sequence of router names traversed (first element is the next hop).
#[derive(Debug, Clone)]
pub struct Route {
    pub dst_subnet: String,
    pub dst_cidr: ipnetwork::Ipv4Network,
    pub raw_path: Vec<String>,
}

impl Route {
    pub fn next_hop(&self) -> Option<&str> {
        self.raw_path.first().map(String::as_str)
    }
}

/// Builds the graph described by a topology definition: one vertex per host
/// and per router, edges between a router and every host of each subnet it
/// attaches to.
pub fn build_graph(def: &NetDef) -> DvnetResult<Graph> {
    let mut graph = Graph::default();
    let mut seen = HashSet::new();

    for subnet in def.subnets.values() {
        for host in subnet.hosts.keys() {
            graph.add_vertex(host, &mut seen)?;
        }
    }
    for router_name in def.routers.keys() {
        graph.add_vertex(router_name, &mut seen)?;
    }

    for (router_name, router) in &def.routers {
        for subnet_name in &router.subnets {
            let subnet = def.subnets.get(subnet_name).ok_or_else(|| {
                DvnetError::validation(format!(
                    "router {router_name} attaches to unknown subnet {subnet_name}"
                ))
            })?;
            for host in subnet.hosts.keys() {
                graph.add_edge(router_name, host);
            }
        }
    }

    Ok(graph)
}

/// For `src_subnet`, computes a route to every other subnet in `def`: picks
/// an arbitrary representative host on each side (the graph is symmetric
/// under same-subnet hosts) and returns the trimmed shortest path.
pub fn subnet_routes(
    graph: &Graph,
    def: &NetDef,
    src_subnet: &str,
) -> DvnetResult<IndexMap<String, Route>> {
    let src_def = def.subnets.get(src_subnet).ok_or_else(|| {
        DvnetError::validation(format!("unknown source subnet {src_subnet}"))
    })?;
    let src_host = src_def.hosts.keys().next().ok_or_else(|| {
        DvnetError::validation(format!("subnet {src_subnet} has no hosts to route from"))
    })?;

    let mut routes = IndexMap::new();
    for (dst_name, dst_def) in &def.subnets {
        if dst_name == src_subnet {
            continue;
        }
        let dst_host = dst_def.hosts.keys().next().ok_or_else(|| {
            DvnetError::validation(format!("subnet {dst_name} has no hosts to route to"))
        })?;

        let path = graph.shortest_path(src_host, dst_host).ok_or_else(|| {
            DvnetError::netlink(format!(
                "no path from {src_host} (subnet {src_subnet}) to {dst_host} (subnet {dst_name})"
            ))
        })?;
        let raw_path = if path.len() > 2 {
            path[1..path.len() - 1].to_vec()
        } else {
            Vec::new()
        };
        routes.insert(
            dst_name.clone(),
            Route {
                dst_subnet: dst_name.clone(),
                dst_cidr: dst_def.cidr,
                raw_path,
            },
        );
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_def;

    fn test_net_0() -> &'static str {
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

    fn test_net_1_linear_chain() -> &'static str {
        r#"{
            "name": "Test Net 1",
            "automatic_routing": true,
            "subnets": {
                "A": {"cidr": "10.0.0.0/24", "hosts": {"A-1": {"image": "alpine"}}},
                "B": {"cidr": "10.0.1.0/24", "hosts": {"B-1": {"image": "alpine"}}},
                "C": {"cidr": "10.0.2.0/24", "hosts": {"C-1": {"image": "alpine"}}}
            },
            "routers": {
                "R-1": {"image": "alpine", "subnets": ["A"]},
                "R-2": {"image": "alpine", "subnets": ["A", "B"]},
                "R-3": {"image": "alpine", "subnets": ["B", "C"]}
            }
        }"#
    }

    #[test]
    fn builds_vertices_for_hosts_and_routers() {
        let def = parse_def(test_net_0().as_bytes()).unwrap();
        let graph = build_graph(&def).unwrap();
        assert_eq!(graph.vertices().len(), 6);
    }

    #[test]
    fn rejects_duplicate_host_names_across_subnets() {
        let raw = r#"{
            "name": "bad",
            "subnets": {
                "A": {"cidr": "10.0.0.0/24", "hosts": {"dup": {"image": "alpine"}}},
                "B": {"cidr": "10.0.1.0/24", "hosts": {"dup": {"image": "alpine"}}}
            },
            "routers": {}
        }"#;
        assert!(crate::config::parse_def(raw.as_bytes()).is_err());
    }

    #[test]
    fn single_host_subnet_has_no_intra_subnet_routes() {
        let def = parse_def(test_net_0().as_bytes()).unwrap();
        let graph = build_graph(&def).unwrap();
        let routes = subnet_routes(&graph, &def, "A").unwrap();
        assert!(!routes.contains_key("A"));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn linear_chain_routes_cross_through_the_middle_subnet() {
        let def = parse_def(test_net_1_linear_chain().as_bytes()).unwrap();
        let graph = build_graph(&def).unwrap();

        let from_a = subnet_routes(&graph, &def, "A").unwrap();
        let route_a_to_c = &from_a["C"];
        assert_eq!(route_a_to_c.next_hop(), Some("R-2"));

        let from_c = subnet_routes(&graph, &def, "C").unwrap();
        let route_c_to_a = &from_c["A"];
        assert_eq!(route_c_to_a.next_hop(), Some("R-3"));

        let from_b = subnet_routes(&graph, &def, "B").unwrap();
        assert!(from_b.contains_key("A"));
        assert!(from_b.contains_key("C"));
    }
}
