//! Subnet model and host address allocation.
//!
//! A [`Subnet`] is built once from validated configuration and immutable
//! afterwards. Host selection treats addresses as big-endian `u32` values;
//! the usable range excludes the network and broadcast addresses and is
//! recomputed on every call rather than cached.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::SubnetConfig;

/// A subnet declaration that failed to parse or validate.
#[derive(Debug, thiserror::Error)]
#[error("subnet {cidr}: {reason}")]
pub struct InvalidSubnet {
    pub cidr: String,
    pub reason: String,
}

/// Host allocation errors
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("subnet {cidr} has no assignable hosts")]
    InvalidRange { cidr: String },
    #[error("subnet {cidr} does not have enough available hosts: need {needed}, have {available}")]
    InsufficientHosts {
        cidr: String,
        needed: usize,
        available: usize,
    },
    #[error("gave up selecting hosts for {cidr} after {attempts} attempts")]
    SelectionExhausted { cidr: String, attempts: usize },
    #[error("no available host in {cidr}")]
    NoAvailableHost { cidr: String },
}

/// An immutable IPv4 subnet with its exclusion list and mount interface.
#[derive(Debug, Clone)]
pub struct Subnet {
    /// The CIDR string exactly as configured.
    pub cidr: String,
    /// Network base address with host bits cleared.
    pub network: Ipv4Addr,
    pub prefix_len: u8,
    pub exclude_hosts: Vec<Ipv4Addr>,
    pub mount_interface: Option<String>,
}

impl Subnet {
    /// Build the subnet inventory from configuration declarations.
    pub fn from_configs(configs: &[SubnetConfig]) -> Result<Vec<Subnet>, InvalidSubnet> {
        let mut result = Vec::with_capacity(configs.len());
        for config in configs {
            let (addr, prefix_len) = parse_cidr(&config.cidr).map_err(|reason| InvalidSubnet {
                cidr: config.cidr.clone(),
                reason: reason.to_string(),
            })?;
            if prefix_len >= 31 {
                return Err(InvalidSubnet {
                    cidr: config.cidr.clone(),
                    reason: "too small for host allocation".to_string(),
                });
            }
            let network = Ipv4Addr::from(u32::from(addr) & netmask(prefix_len));
            let mut subnet = Subnet {
                cidr: config.cidr.clone(),
                network,
                prefix_len,
                exclude_hosts: Vec::with_capacity(config.exclude_hosts.len()),
                mount_interface: config
                    .mount_interface
                    .clone()
                    .filter(|name| !name.is_empty()),
            };
            for host in &config.exclude_hosts {
                let addr: Ipv4Addr = host.parse().map_err(|_| InvalidSubnet {
                    cidr: config.cidr.clone(),
                    reason: format!("invalid exclude host {host}"),
                })?;
                if !subnet.contains(addr) {
                    return Err(InvalidSubnet {
                        cidr: config.cidr.clone(),
                        reason: format!("exclude host {host} outside subnet"),
                    });
                }
                subnet.exclude_hosts.push(addr);
            }
            result.push(subnet);
        }
        Ok(result)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & netmask(self.prefix_len) == u32::from(self.network)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !netmask(self.prefix_len))
    }

    /// First and last usable host address as `u32`, or `None` when the
    /// prefix leaves no room between network and broadcast.
    pub fn host_range(&self) -> Option<(u32, u32)> {
        if self.prefix_len >= 31 {
            return None;
        }
        let network = u32::from(self.network);
        let broadcast = u32::from(self.broadcast());
        Some((network + 1, broadcast - 1))
    }
}

fn netmask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), &'static str> {
    let (addr, prefix) = cidr.split_once('/').ok_or("missing prefix length")?;
    let addr: Ipv4Addr = addr.trim().parse().map_err(|_| "invalid IPv4 address")?;
    let prefix: u8 = prefix.trim().parse().map_err(|_| "invalid prefix length")?;
    if prefix > 32 {
        return Err("prefix length out of range");
    }
    Ok((addr, prefix))
}

fn excluded_values(excludes: &[Ipv4Addr], first: u32, last: u32) -> HashSet<u32> {
    // Excludes equal to the network or broadcast address are ignored; the
    // allocator never hands those out anyway.
    excludes
        .iter()
        .map(|addr| u32::from(*addr))
        .filter(|value| (first..=last).contains(value))
        .collect()
}

/// Select `count` distinct random host addresses from the subnet.
///
/// Seeds a fast generator from OS entropy so repeated process runs are not
/// statistically predictable, then delegates to
/// [`select_random_hosts_with`].
pub fn select_random_hosts(
    subnet: &Subnet,
    excludes: &[Ipv4Addr],
    count: usize,
) -> Result<Vec<Ipv4Addr>, AllocationError> {
    let mut rng = SmallRng::from_entropy();
    select_random_hosts_with(subnet, excludes, count, &mut rng)
}

/// Rejection-sampling host selection with an injectable random source.
///
/// Draws uniformly from the usable host interval, rejecting excluded and
/// already-chosen addresses, for at most `max(count * 20, 100)` attempts.
pub fn select_random_hosts_with<R: Rng>(
    subnet: &Subnet,
    excludes: &[Ipv4Addr],
    count: usize,
    rng: &mut R,
) -> Result<Vec<Ipv4Addr>, AllocationError> {
    let (first, last) = subnet.host_range().ok_or_else(|| AllocationError::InvalidRange {
        cidr: subnet.cidr.clone(),
    })?;
    let exclude_set = excluded_values(excludes, first, last);
    let available = (last - first + 1) as usize - exclude_set.len();
    if available < count {
        return Err(AllocationError::InsufficientHosts {
            cidr: subnet.cidr.clone(),
            needed: count,
            available,
        });
    }
    let max_attempts = (count * 20).max(100);
    let mut chosen: HashSet<u32> = HashSet::with_capacity(count);
    let mut hosts = Vec::with_capacity(count);
    let mut attempts = 0;
    while hosts.len() < count {
        if attempts >= max_attempts {
            return Err(AllocationError::SelectionExhausted {
                cidr: subnet.cidr.clone(),
                attempts,
            });
        }
        attempts += 1;
        let candidate = rng.gen_range(first..=last);
        if exclude_set.contains(&candidate) || !chosen.insert(candidate) {
            continue;
        }
        hosts.push(Ipv4Addr::from(candidate));
    }
    Ok(hosts)
}

/// Select a stable host address for mounting.
///
/// Scans forward from four addresses past the first usable host (wrapping to
/// the range start when that offset falls past the end), covering the full
/// usable range exactly once. The offset keeps the pick away from commonly
/// reserved low addresses such as a gateway at `.1`.
pub fn deterministic_host(
    subnet: &Subnet,
    excludes: &[Ipv4Addr],
) -> Result<Ipv4Addr, AllocationError> {
    let (first, last) = subnet.host_range().ok_or_else(|| AllocationError::InvalidRange {
        cidr: subnet.cidr.clone(),
    })?;
    let exclude_set = excluded_values(excludes, first, last);
    let span = u64::from(last - first) + 1;
    let mut start = first.saturating_add(4);
    if start > last {
        start = first;
    }
    for step in 0..span {
        let offset = (u64::from(start - first) + step) % span;
        let candidate = first + offset as u32;
        if !exclude_set.contains(&candidate) {
            return Ok(Ipv4Addr::from(candidate));
        }
    }
    Err(AllocationError::NoAvailableHost {
        cidr: subnet.cidr.clone(),
    })
}
