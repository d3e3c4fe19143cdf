use std::fmt;

/// Which directed link a fat-tree endpoint sits on. Every physical link has
/// two endpoints, one per direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    /// Host toward its edge switch.
    HostUp,
    /// Edge switch toward a host.
    EdgeDown,
    /// Edge switch toward an aggregation switch.
    EdgeUp,
    /// Aggregation switch toward an edge switch.
    AggrDown,
    /// Aggregation switch toward a core switch.
    AggrUp,
    /// Core switch toward an aggregation switch.
    CoreDown,
}

/// A directed endpoint descriptor. Index semantics per role:
///
/// | role     | `from`              | `to`                |
/// |----------|---------------------|---------------------|
/// | HostUp   | host (per-pod)      | edge                |
/// | EdgeDown | edge                | host (per-pod)      |
/// | EdgeUp   | edge                | aggregation         |
/// | AggrDown | aggregation         | edge                |
/// | AggrUp   | aggregation         | core (global)       |
/// | CoreDown | core (global)       | aggregation         |
///
/// Core endpoints still carry the pod of the aggregation switch they face.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub role: Role,
    pub pod: u32,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AddrError {
    /// The aggregation/core sub-role bits were neither aggr-to-core nor
    /// core-to-aggr.
    BadRole(u8),
}

// Intra-pod role bits (low two bits of the third byte).
const ROLE_HOST_UP: u8 = 0b00;
const ROLE_AGGR_DOWN: u8 = 0b01;
const ROLE_EDGE_DOWN: u8 = 0b10;
const ROLE_EDGE_UP: u8 = 0b11;

// Aggregation/core sub-role bits (high two bits of the third byte).
const SUBROLE_AGGR_UP: u8 = 0b00;
const SUBROLE_CORE_DOWN: u8 = 0b01;

impl Endpoint {
    /// Packs the descriptor into an IPv4-shaped identifier.
    ///
    /// Intra-pod: `base | pod<<1|0 | edge<<2|role | far-end`.
    /// Aggr/core: `base | pod<<1|1 | subrole<<6|from | to`.
    pub fn encode(&self, base: u8) -> u32 {
        let (pod_byte, third, fourth) = match self.role {
            Role::HostUp => (self.pod << 1, (self.to as u8) << 2 | ROLE_HOST_UP, self.from as u8),
            Role::EdgeDown => (
                self.pod << 1,
                (self.from as u8) << 2 | ROLE_EDGE_DOWN,
                self.to as u8,
            ),
            Role::EdgeUp => (
                self.pod << 1,
                (self.from as u8) << 2 | ROLE_EDGE_UP,
                self.to as u8,
            ),
            Role::AggrDown => (
                self.pod << 1,
                (self.to as u8) << 2 | ROLE_AGGR_DOWN,
                self.from as u8,
            ),
            Role::AggrUp => (
                self.pod << 1 | 1,
                SUBROLE_AGGR_UP << 6 | self.from as u8,
                self.to as u8,
            ),
            Role::CoreDown => (
                self.pod << 1 | 1,
                SUBROLE_CORE_DOWN << 6 | self.from as u8,
                self.to as u8,
            ),
        };

        (base as u32) << 24 | pod_byte << 16 | (third as u32) << 8 | fourth as u32
    }

    /// Recovers the descriptor from a packed identifier. The top byte is the
    /// caller-chosen base and carries no descriptor information.
    pub fn decode(addr: u32) -> Result<Endpoint, AddrError> {
        let pod_byte = (addr >> 16) as u8;
        let third = (addr >> 8) as u8;
        let fourth = addr as u8;

        let pod = (pod_byte >> 1) as u32;

        if pod_byte & 1 == 0 {
            let edge = (third >> 2) as u32;
            let far = fourth as u32;

            let endpoint = match third & 0b11 {
                ROLE_HOST_UP => Endpoint {
                    role: Role::HostUp,
                    pod,
                    from: far,
                    to: edge,
                },
                ROLE_EDGE_DOWN => Endpoint {
                    role: Role::EdgeDown,
                    pod,
                    from: edge,
                    to: far,
                },
                ROLE_EDGE_UP => Endpoint {
                    role: Role::EdgeUp,
                    pod,
                    from: edge,
                    to: far,
                },
                ROLE_AGGR_DOWN => Endpoint {
                    role: Role::AggrDown,
                    pod,
                    from: far,
                    to: edge,
                },
                _ => unreachable!(),
            };

            Ok(endpoint)
        } else {
            let index = (third & 0x3f) as u32;
            let far = fourth as u32;

            match third >> 6 {
                SUBROLE_AGGR_UP => Ok(Endpoint {
                    role: Role::AggrUp,
                    pod,
                    from: index,
                    to: far,
                }),
                SUBROLE_CORE_DOWN => Ok(Endpoint {
                    role: Role::CoreDown,
                    pod,
                    from: index,
                    to: far,
                }),
                bits => Err(AddrError::BadRole(bits)),
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.role {
            Role::HostUp => write!(
                f,
                "host_{}_{}_to_edge_{}_{}",
                self.pod, self.from, self.pod, self.to
            ),
            Role::EdgeDown => write!(
                f,
                "edge_{}_{}_to_host_{}_{}",
                self.pod, self.from, self.pod, self.to
            ),
            Role::EdgeUp => write!(
                f,
                "edge_{}_{}_to_aggr_{}_{}",
                self.pod, self.from, self.pod, self.to
            ),
            Role::AggrDown => write!(
                f,
                "aggr_{}_{}_to_edge_{}_{}",
                self.pod, self.from, self.pod, self.to
            ),
            Role::AggrUp => write!(f, "aggr_{}_{}_to_core_{}", self.pod, self.from, self.to),
            Role::CoreDown => write!(f, "core_{}_to_aggr_{}_{}", self.from, self.pod, self.to),
        }
    }
}
