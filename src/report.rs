//! Plain-text reporting on stdout.
//!
//! One header line per run or reconciliation pass, one line per probe
//! attempt or subnet status. These lines are the tool's primary output and
//! bypass the logger.

use chrono::{Local, SecondsFormat};

use crate::checker::ProbeResult;
use crate::mount::MountStatus;

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print one run: header plus one line per probe attempt, in probe order.
pub fn print_run_summary(run_id: u64, results: &[ProbeResult]) {
    println!("RUN {} {} total={}", run_id, timestamp(), results.len());
    for result in results {
        let duration = result.duration.as_millis();
        if result.success {
            println!(
                "OK subnet={} ip={} url={} duration={}ms status={}",
                result.subnet,
                result.source_ip,
                result.url,
                duration,
                result.status.unwrap_or_default()
            );
        } else {
            let detail = if result.error.is_empty() {
                "error"
            } else {
                result.error.as_str()
            };
            println!(
                "FAIL subnet={} ip={} url={} duration={}ms {}",
                result.subnet, result.source_ip, result.url, duration, detail
            );
        }
    }
}

/// Print one reconciliation pass under a `CHECK` or `MOUNT` header.
pub fn print_mount_statuses(prefix: &str, statuses: &[MountStatus]) {
    println!("{} {} total={}", prefix, timestamp(), statuses.len());
    for status in statuses {
        let mount_ip = status
            .mount_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        println!(
            "subnet={} interface={} ip_assigned={} route={} nonlocal={} mount_ip={}",
            status.cidr,
            status.interface,
            yes_no(status.ip_assigned),
            yes_no(status.route_exists),
            yes_no(status.nonlocal_bind),
            mount_ip
        );
        if !status.actions.is_empty() {
            println!(" actions={}", status.actions.join("; "));
        }
        if !status.errors.is_empty() {
            println!(" errors={}", status.errors.join("; "));
        }
    }
}
