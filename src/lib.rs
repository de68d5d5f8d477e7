//! # Subnet Sentinel - outbound reachability checks for mounted IPv4 subnets
//!
//! This library verifies that a fleet of IPv4 subnets is bound to local
//! network interfaces and can originate outbound HTTP traffic from
//! individually chosen source addresses within each subnet.
//!
//! ## Overview
//!
//! A multi-homed host that owns several delegated ranges needs two things
//! confirmed continuously: the OS-level interface/route/kernel state matches
//! the declared subnet inventory, and arbitrary host addresses inside each
//! range can actually reach the outside world. Subnet Sentinel samples random
//! hosts from every subnet, issues HTTP probes bound to those source
//! addresses, and can converge the OS state (interface addresses, local
//! routes, the non-local-bind sysctl) when a subnet is not yet mounted.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: type-safe configuration structures and YAML parsing
//! - `subnets`: immutable subnet model and host address allocation
//! - `mount`: OS network state inspection and convergence
//! - `httpclient`: source-bound HTTP probe client
//! - `checker`: per-subnet, per-host, per-target probe scheduling
//! - `report`: plain-text run summaries and mount status reports
//!
//! ## Configuration Format
//!
//! Configurations use YAML format:
//!
//! ```yaml
//! subnets:
//!   - cidr: 203.0.113.0/27
//!     excludeHosts: [203.0.113.1]
//!     mountInterface: eth1
//! targets:
//!   - https://example.org
//! ipsPerSubnet: 5
//! interval: 60s
//! httpTimeout: 15s
//! autoMountSubnets: true
//! defaultInterface: eth0
//! ```
//!
//! ## Error Handling
//!
//! Library modules expose `thiserror` error types; the binary boundary uses
//! `color_eyre` for contextual error reports. Per-subnet failures during
//! mount reconciliation and probing are recorded and reported rather than
//! aborting the remaining work.

pub mod checker;
pub mod config;
pub mod httpclient;
pub mod mount;
pub mod report;
pub mod subnets;
