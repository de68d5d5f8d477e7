//! End-to-end probe flow tests through the public library API.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use subnet_sentinel::checker::Checker;
use subnet_sentinel::config::Config;
use subnet_sentinel::httpclient::{FetchError, FetchOutcome, ProbeClient};
use subnet_sentinel::subnets::{self, Subnet};

struct ScriptedClient {
    responses: Mutex<VecDeque<Result<FetchOutcome, FetchError>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<FetchOutcome, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl ProbeClient for ScriptedClient {
    async fn fetch(&self, _source: Ipv4Addr, _url: &str) -> Result<FetchOutcome, FetchError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(FetchError::Transport {
                    message: "no scripted response".to_string(),
                    duration: Duration::ZERO,
                })
            })
    }
}

fn load_config(yaml: &str) -> Config {
    let config: Config = serde_yaml::from_str(yaml).expect("config should parse");
    config.validate().expect("config should validate");
    config
}

#[tokio::test]
async fn probe_run_reports_mixed_target_health() {
    let config = load_config(
        r#"
subnets:
  - cidr: 192.168.50.0/30
targets:
  - https://healthy.test
  - https://degraded.test
ipsPerSubnet: 1
"#,
    );
    let subnets = Subnet::from_configs(&config.subnets).expect("subnets should parse");
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(FetchOutcome {
            status: 200,
            duration: Duration::from_millis(42),
        }),
        Err(FetchError::BadStatus {
            status: 503,
            duration: Duration::from_millis(97),
        }),
    ]));

    let checker = Checker::new(&config, subnets, client);
    let run = checker
        .run(&CancellationToken::new())
        .await
        .expect("run should succeed");

    assert!(!run.cancelled);
    assert_eq!(run.results.len(), 2);
    let ok = &run.results[0];
    let fail = &run.results[1];
    assert!(ok.success);
    assert_eq!(ok.status, Some(200));
    assert!(ok.error.is_empty());
    assert!(!fail.success);
    assert_eq!(fail.status, Some(503));
    assert!(!fail.error.is_empty());
    // Source addresses must be usable hosts of the /30.
    for result in &run.results {
        let last_octet = result.source_ip.octets()[3];
        assert!(last_octet == 1 || last_octet == 2, "got {}", result.source_ip);
    }
}

#[tokio::test]
async fn cancelled_run_keeps_results_from_completed_subnets() {
    let config = load_config(
        r#"
subnets:
  - cidr: 192.168.50.0/30
  - cidr: 192.168.60.0/30
targets:
  - https://healthy.test
ipsPerSubnet: 1
"#,
    );
    let subnets = Subnet::from_configs(&config.subnets).expect("subnets should parse");

    struct CancellingClient {
        token: CancellationToken,
    }

    #[async_trait]
    impl ProbeClient for CancellingClient {
        async fn fetch(&self, _source: Ipv4Addr, _url: &str) -> Result<FetchOutcome, FetchError> {
            // Cancel after serving the first subnet's only probe.
            self.token.cancel();
            Ok(FetchOutcome {
                status: 204,
                duration: Duration::from_millis(5),
            })
        }
    }

    let cancel = CancellationToken::new();
    let client = Arc::new(CancellingClient {
        token: cancel.clone(),
    });
    let checker = Checker::new(&config, subnets, client);
    let run = checker
        .run(&cancel)
        .await
        .expect("cancellation is not an error");

    assert!(run.cancelled);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].subnet, "192.168.50.0/30");
    assert!(run.results[0].success);
}

#[test]
fn sampled_hosts_avoid_reserved_and_excluded_addresses() {
    let config = load_config(
        r#"
subnets:
  - cidr: 10.0.0.0/29
    excludeHosts:
      - 10.0.0.1
"#,
    );
    let subnets = Subnet::from_configs(&config.subnets).expect("subnets should parse");
    let subnet = &subnets[0];
    for _ in 0..25 {
        let hosts = subnets::select_random_hosts(subnet, &subnet.exclude_hosts, 2)
            .expect("selection should succeed");
        assert_eq!(hosts.len(), 2);
        assert_ne!(hosts[0], hosts[1]);
        for host in hosts {
            assert_ne!(host, Ipv4Addr::new(10, 0, 0, 0));
            assert_ne!(host, Ipv4Addr::new(10, 0, 0, 7));
            assert_ne!(host, Ipv4Addr::new(10, 0, 0, 1));
            assert!(subnet.contains(host));
        }
    }
}
