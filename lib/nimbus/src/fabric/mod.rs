//! Deterministic fat-tree fixture: node naming, directed endpoint
//! enumeration, and the bit-packed address scheme used as worker identity.
//!
//! A fat-tree of parameter K has K pods, each with K/2 edge switches (racks)
//! and K/2 aggregation switches, K*K/4 shared core switches, and K/2 hosts
//! per rack — (K^3)/4 hosts in total.

pub mod addr;

pub use crate::fabric::addr::{AddrError, Endpoint, Role};

/// Placement identity of a host: pod, rack (edge switch index within the
/// pod), and host index within the rack. Workers report this at
/// registration; the coordinator treats it as opaque.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct HostLoc {
    pub pod: u32,
    pub rack: u32,
    pub host: u32,
}

impl HostLoc {
    pub fn new(pod: u32, rack: u32, host: u32) -> HostLoc {
        HostLoc { pod, rack, host }
    }
}

/// The built topology: every host location and every directed endpoint, in a
/// deterministic order.
pub struct Topology {
    k: u32,
    hosts: Vec<HostLoc>,
    endpoints: Vec<Endpoint>,
}

impl Topology {
    /// Builds the fixture for an even K. Panics on a K the address scheme
    /// cannot carry (odd, or core indices past six bits).
    pub fn build(k: u32) -> Topology {
        assert!(k >= 2 && k % 2 == 0, "Fat-tree K must be even, got {}", k);
        assert!(k <= 14, "Fat-tree K must fit the address scheme, got {}", k);

        let half = k / 2;
        let core_count = k * k / 4;

        let mut hosts = Vec::new();
        let mut endpoints = Vec::new();

        for pod in 0..k {
            for rack in 0..half {
                for host in 0..half {
                    hosts.push(HostLoc::new(pod, rack, host));

                    let host_in_pod = rack * half + host;
                    endpoints.push(Endpoint {
                        role: Role::HostUp,
                        pod,
                        from: host_in_pod,
                        to: rack,
                    });
                    endpoints.push(Endpoint {
                        role: Role::EdgeDown,
                        pod,
                        from: rack,
                        to: host_in_pod,
                    });
                }
            }

            for edge in 0..half {
                for aggr in 0..half {
                    endpoints.push(Endpoint {
                        role: Role::EdgeUp,
                        pod,
                        from: edge,
                        to: aggr,
                    });
                    endpoints.push(Endpoint {
                        role: Role::AggrDown,
                        pod,
                        from: aggr,
                        to: edge,
                    });
                }
            }

            // Aggregation switch `a` owns the core switches a*K/2 .. a*K/2+K/2.
            for aggr in 0..half {
                for port in 0..half {
                    let core = aggr * half + port;
                    endpoints.push(Endpoint {
                        role: Role::AggrUp,
                        pod,
                        from: aggr,
                        to: core,
                    });
                    endpoints.push(Endpoint {
                        role: Role::CoreDown,
                        pod,
                        from: core,
                        to: aggr,
                    });
                }
            }
        }

        debug_assert_eq!(hosts.len() as u32, k * k * k / 4);
        debug_assert_eq!(endpoints.len() as u32, 6 * k * k * k / 4);
        debug_assert!(core_count <= 64);

        Topology { k, hosts, endpoints }
    }

    #[inline]
    pub fn k(&self) -> u32 {
        self.k
    }

    #[inline]
    pub fn hosts(&self) -> &[HostLoc] {
        &self.hosts
    }

    #[inline]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn host_count(&self) -> u32 {
        self.k * self.k * self.k / 4
    }

    pub fn edge_count(&self) -> u32 {
        self.k * self.k / 2
    }

    pub fn aggr_count(&self) -> u32 {
        self.k * self.k / 2
    }

    pub fn core_count(&self) -> u32 {
        self.k * self.k / 4
    }

    /// The IP of a host: the address of its up-facing endpoint.
    pub fn host_ip(&self, loc: HostLoc, base: u8) -> u32 {
        let host_in_pod = loc.rack * (self.k / 2) + loc.host;
        Endpoint {
            role: Role::HostUp,
            pod: loc.pod,
            from: host_in_pod,
            to: loc.rack,
        }
        .encode(base)
    }
}

pub fn host_name(pod: u32, host_in_pod: u32) -> String {
    format!("host_{}_{}", pod, host_in_pod)
}

pub fn edge_name(pod: u32, edge: u32) -> String {
    format!("edge_{}_{}", pod, edge)
}

pub fn aggr_name(pod: u32, aggr: u32) -> String {
    format!("aggr_{}_{}", pod, aggr)
}

pub fn core_name(core: u32) -> String {
    format!("core_{}", core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    const BASE: u8 = 10;

    #[test]
    fn test_k4_counts() {
        let topo = Topology::build(4);

        assert_eq!(topo.host_count(), 16);
        assert_eq!(topo.edge_count(), 8);
        assert_eq!(topo.aggr_count(), 8);
        assert_eq!(topo.core_count(), 4);
        assert_eq!(topo.hosts().len(), 16);
        // Six endpoint categories of K^3/4 each.
        assert_eq!(topo.endpoints().len(), 96);
    }

    #[test]
    fn test_k4_every_endpoint_roundtrips() {
        let topo = Topology::build(4);

        for endpoint in topo.endpoints() {
            let decoded = Endpoint::decode(endpoint.encode(BASE)).unwrap();
            assert_eq!(decoded, *endpoint, "roundtrip failed for {}", endpoint);
        }
    }

    #[test]
    fn test_k6_every_endpoint_roundtrips() {
        let topo = Topology::build(6);

        for endpoint in topo.endpoints() {
            let decoded = Endpoint::decode(endpoint.encode(BASE)).unwrap();
            assert_eq!(decoded, *endpoint, "roundtrip failed for {}", endpoint);
        }
    }

    #[test]
    fn test_endpoint_addresses_unique() {
        let topo = Topology::build(4);

        let addresses: HashSet<u32> = topo.endpoints().iter().map(|e| e.encode(BASE)).collect();
        assert_eq!(addresses.len(), topo.endpoints().len());
    }

    #[test]
    fn test_host_ips_unique_and_decodable() {
        let topo = Topology::build(4);
        let mut seen = HashSet::new();

        for loc in topo.hosts() {
            let ip = topo.host_ip(*loc, BASE);
            assert!(seen.insert(ip), "duplicate host ip for {:?}", loc);

            let endpoint = Endpoint::decode(ip).unwrap();
            assert_eq!(endpoint.role, Role::HostUp);
            assert_eq!(endpoint.pod, loc.pod);
            assert_eq!(endpoint.to, loc.rack);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(host_name(2, 3), "host_2_3");
        assert_eq!(edge_name(0, 1), "edge_0_1");
        assert_eq!(aggr_name(3, 0), "aggr_3_0");
        assert_eq!(core_name(2), "core_2");
    }

    #[test]
    #[should_panic(expected = "Fat-tree K must be even")]
    fn test_odd_k_rejected() {
        let _ = Topology::build(3);
    }
}
