//! Network mount reconciliation.
//!
//! A subnet is "mounted" when three independent pieces of OS state line up:
//! an address from the subnet is assigned to the target interface, the local
//! routing table carries the subnet on loopback, and the kernel permits
//! binding to non-local addresses. [`check`] reads that state;
//! [`ensure_mounted`] additionally converges it, one corrective action per
//! unmet condition, each independently fail-soft.
//!
//! Status flags start false and are only ever OR-ed upward within a pass, so
//! a transient re-check failure after a successful corrective command can
//! never report previously-observed state as lost.

pub mod runner;

use std::net::Ipv4Addr;

use log::debug;
use regex::Regex;

use crate::subnets::{self, Subnet};

pub use runner::{CommandError, CommandRunner, SystemRunner};

/// A subnet paired with the interface it should mount on.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub subnet: Subnet,
    pub interface: String,
}

/// Per-subnet outcome of a check or mount pass.
#[derive(Debug, Clone, Default)]
pub struct MountStatus {
    pub cidr: String,
    pub interface: String,
    pub ip_assigned: bool,
    pub route_exists: bool,
    pub nonlocal_bind: bool,
    /// Address chosen for mounting, when a mount was attempted.
    pub mount_ip: Option<Ipv4Addr>,
    /// Corrective actions taken, in order.
    pub actions: Vec<String>,
    /// Failures encountered, in order. Never aborts other subnets.
    pub errors: Vec<String>,
}

impl MountStatus {
    fn for_request(request: &MountRequest) -> Self {
        MountStatus {
            cidr: request.subnet.cidr.clone(),
            interface: request.interface.clone(),
            ..Default::default()
        }
    }
}

/// Resolve each subnet's mount interface against the configured default.
pub fn prepare_requests(default_interface: &str, subnets: &[Subnet]) -> Vec<MountRequest> {
    subnets
        .iter()
        .map(|subnet| MountRequest {
            subnet: subnet.clone(),
            interface: subnet
                .mount_interface
                .clone()
                .unwrap_or_else(|| default_interface.to_string()),
        })
        .collect()
}

/// Read-only reconciliation: report mount state without touching anything.
pub async fn check(runner: &dyn CommandRunner, requests: &[MountRequest]) -> Vec<MountStatus> {
    let mut statuses = Vec::with_capacity(requests.len());
    // The flag is host-global; read it once and reuse it for every subnet.
    let nonlocal = runner.read_nonlocal_bind().await;
    for request in requests {
        let mut status = MountStatus::for_request(request);
        if request.interface.is_empty() {
            status.errors.push("no interface configured".to_string());
            statuses.push(status);
            continue;
        }
        match &nonlocal {
            Ok(value) => status.nonlocal_bind |= *value,
            Err(err) => status.errors.push(format!("nonlocal bind check failed: {err}")),
        }
        match interface_has_subnet_ip(runner, &request.interface, &request.subnet).await {
            Ok(assigned) => status.ip_assigned |= assigned,
            Err(err) => status.errors.push(format!("ip check failed: {err}")),
        }
        match has_local_route(runner, &request.subnet.cidr).await {
            Ok(route) => status.route_exists |= route,
            Err(err) => status.errors.push(format!("route check failed: {err}")),
        }
        statuses.push(status);
    }
    statuses
}

/// Converging reconciliation: check, then fix each unmet condition with a
/// single corrective action per subnet.
pub async fn ensure_mounted(
    runner: &dyn CommandRunner,
    requests: &[MountRequest],
) -> Vec<MountStatus> {
    let mut statuses = Vec::with_capacity(requests.len());
    let nonlocal = runner.read_nonlocal_bind().await;
    // The sysctl write is amortized: at most one per invocation.
    let mut nonlocal_set = matches!(nonlocal, Ok(true));
    for request in requests {
        let mut status = MountStatus::for_request(request);
        if request.interface.is_empty() {
            status.errors.push("no interface configured".to_string());
            statuses.push(status);
            continue;
        }
        if let Err(err) = &nonlocal {
            status.errors.push(format!("nonlocal bind check failed: {err}"));
        }

        match interface_has_subnet_ip(runner, &request.interface, &request.subnet).await {
            Ok(assigned) => status.ip_assigned |= assigned,
            Err(err) => status.errors.push(format!("ip check failed: {err}")),
        }
        if !status.ip_assigned {
            ensure_address(runner, request, &mut status).await;
        }

        match has_local_route(runner, &request.subnet.cidr).await {
            Ok(route) => status.route_exists |= route,
            Err(err) => status.errors.push(format!("route check failed: {err}")),
        }
        if !status.route_exists {
            ensure_route(runner, request, &mut status).await;
        }

        if nonlocal_set {
            status.nonlocal_bind = true;
        } else {
            match runner.set_nonlocal_bind().await {
                Err(err) => status.errors.push(format!("set nonlocal bind failed: {err}")),
                Ok(()) => {
                    status.actions.push("set net.ipv4.ip_nonlocal_bind=1".to_string());
                    status.nonlocal_bind = true;
                    nonlocal_set = true;
                    // Re-verify after writing; a failed read keeps the flag
                    // as observed from the successful write.
                    if let Err(err) = runner.read_nonlocal_bind().await {
                        status
                            .errors
                            .push(format!("nonlocal bind recheck failed: {err}"));
                    }
                }
            }
        }
        statuses.push(status);
    }
    statuses
}

async fn ensure_address(runner: &dyn CommandRunner, request: &MountRequest, status: &mut MountStatus) {
    let host = match subnets::deterministic_host(&request.subnet, &request.subnet.exclude_hosts) {
        Ok(host) => host,
        Err(err) => {
            status.errors.push(format!("determine host failed: {err}"));
            return;
        }
    };
    status.mount_ip = Some(host);
    let address = format!("{}/{}", host, request.subnet.prefix_len);
    let args = ["addr", "add", address.as_str(), "dev", request.interface.as_str()];
    match runner.run("ip", &args).await {
        Err(err) => status.errors.push(format!("ip addr add failed: {err}")),
        Ok(_) => {
            status
                .actions
                .push(format!("ip addr add {} dev {}", address, request.interface));
            match interface_has_subnet_ip(runner, &request.interface, &request.subnet).await {
                Ok(recheck) => status.ip_assigned |= recheck,
                Err(err) => status.errors.push(format!("ip recheck failed: {err}")),
            }
        }
    }
}

async fn ensure_route(runner: &dyn CommandRunner, request: &MountRequest, status: &mut MountStatus) {
    let cidr = request.subnet.cidr.as_str();
    let args = ["route", "add", "local", cidr, "dev", "lo"];
    match runner.run("ip", &args).await {
        Err(err) => status.errors.push(format!("add route failed: {err}")),
        Ok(_) => {
            status
                .actions
                .push(format!("ip route add local {cidr} dev lo"));
            match has_local_route(runner, cidr).await {
                Ok(recheck) => status.route_exists |= recheck,
                Err(err) => status.errors.push(format!("route recheck failed: {err}")),
            }
        }
    }
}

/// Does the interface currently carry any IPv4 address inside the subnet?
async fn interface_has_subnet_ip(
    runner: &dyn CommandRunner,
    interface: &str,
    subnet: &Subnet,
) -> Result<bool, CommandError> {
    let output = runner
        .run("ip", &["-4", "addr", "show", "dev", interface])
        .await?;
    let inet_line =
        Regex::new(r"^\s*inet\s+(\d+\.\d+\.\d+\.\d+)/\d+").expect("Invalid inet regex");
    for line in output.lines() {
        let Some(captures) = inet_line.captures(line) else {
            continue;
        };
        let Ok(addr) = captures[1].parse::<Ipv4Addr>() else {
            continue;
        };
        if subnet.contains(addr) {
            debug!("interface {interface} carries {addr} in {}", subnet.cidr);
            return Ok(true);
        }
    }
    Ok(false)
}

/// Does the "local" routing table carry an explicit loopback route for the
/// full CIDR?
async fn has_local_route(runner: &dyn CommandRunner, cidr: &str) -> Result<bool, CommandError> {
    let output = runner
        .run("ip", &["-4", "route", "show", "table", "local"])
        .await?;
    let target = format!("local {cidr}");
    Ok(output.lines().any(|line| {
        let line = line.trim();
        line.starts_with(&target) && line.contains(" dev lo")
    }))
}
