//! Probe scheduling.
//!
//! One run walks the subnets in declared order, samples random hosts from
//! each and probes every configured target from every sampled host, bound to
//! that host address. Cancellation is observed before each subnet, before
//! each probe and during in-flight fetches; partial results are always kept.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::httpclient::{FetchError, FetchOutcome, ProbeClient};
use crate::subnets::{self, AllocationError, Subnet};

/// Outcome of a single (host, target) probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub subnet: String,
    pub source_ip: Ipv4Addr,
    pub url: String,
    pub success: bool,
    /// HTTP status code, absent on transport-level failures.
    pub status: Option<u16>,
    pub duration: Duration,
    /// Empty on success.
    pub error: String,
}

/// Everything a run produced, including partial results after cancellation.
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<ProbeResult>,
    pub cancelled: bool,
}

impl RunReport {
    fn cancelled(results: Vec<ProbeResult>) -> Self {
        RunReport {
            results,
            cancelled: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    /// Host sampling failed for a subnet; the whole run is abandoned.
    #[error("select hosts for {cidr}: {source}")]
    HostSelection {
        cidr: String,
        #[source]
        source: AllocationError,
    },
}

/// Runs probe passes over a fixed subnet inventory.
pub struct Checker {
    subnets: Vec<Subnet>,
    targets: Vec<String>,
    ips_per_subnet: usize,
    client: Arc<dyn ProbeClient>,
}

impl Checker {
    pub fn new(config: &Config, subnets: Vec<Subnet>, client: Arc<dyn ProbeClient>) -> Self {
        Checker {
            subnets,
            targets: config.targets.clone(),
            ips_per_subnet: config.ips_per_subnet,
            client,
        }
    }

    /// Execute one full probing pass.
    ///
    /// A failed probe becomes a failed [`ProbeResult`] and the pass
    /// continues; only host selection aborts the run.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, CheckerError> {
        let mut results = Vec::new();
        for subnet in &self.subnets {
            if cancel.is_cancelled() {
                return Ok(RunReport::cancelled(results));
            }
            let hosts =
                subnets::select_random_hosts(subnet, &subnet.exclude_hosts, self.ips_per_subnet)
                    .map_err(|source| CheckerError::HostSelection {
                        cidr: subnet.cidr.clone(),
                        source,
                    })?;
            for host in hosts {
                for target in &self.targets {
                    if cancel.is_cancelled() {
                        return Ok(RunReport::cancelled(results));
                    }
                    let outcome = tokio::select! {
                        outcome = self.client.fetch(host, target) => outcome,
                        _ = cancel.cancelled() => return Ok(RunReport::cancelled(results)),
                    };
                    results.push(build_result(&subnet.cidr, host, target, outcome));
                }
            }
        }
        Ok(RunReport {
            results,
            cancelled: false,
        })
    }
}

fn build_result(
    cidr: &str,
    host: Ipv4Addr,
    target: &str,
    outcome: Result<FetchOutcome, FetchError>,
) -> ProbeResult {
    match outcome {
        Ok(outcome) => {
            debug!(
                "request succeeded subnet={cidr} ip={host} url={target} status={}",
                outcome.status
            );
            ProbeResult {
                subnet: cidr.to_string(),
                source_ip: host,
                url: target.to_string(),
                success: true,
                status: Some(outcome.status),
                duration: outcome.duration,
                error: String::new(),
            }
        }
        Err(err) => {
            error!("request failed subnet={cidr} ip={host} url={target} error={err}");
            ProbeResult {
                subnet: cidr.to_string(),
                source_ip: host,
                url: target.to_string(),
                success: false,
                status: err.status(),
                duration: err.duration(),
                error: err.to_string(),
            }
        }
    }
}
