//! End-to-end checks of scan, export and assessment against local listeners.
use async_trait::async_trait;
use rustaudit::input::ScanKind;
use rustaudit::model::{ScanResult, ScanResults};
use rustaudit::scanner::{PortProbe, ScanConfig, Scanner};
use rustaudit::vuln::{Severity, VulnerabilityRuleEngine};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

async fn scanner(batch_size: usize) -> Scanner {
    Scanner::new(ScanConfig {
        timeout: Duration::from_millis(500),
        banner_timeout: Duration::from_millis(300),
        batch_size,
        ..ScanConfig::default()
    })
    .await
    .with_capability(None)
}

fn single(host: &str, port: u16, service: &str) -> ScanResults {
    let mut results = ScanResults::new();
    results.insert(host, vec![ScanResult::open(host, port, service)]);
    results
}

/// Records how many probes are in flight; every port is open.
#[derive(Debug, Default)]
struct InstrumentedProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl PortProbe for InstrumentedProbe {
    async fn probe(&self, socket: SocketAddr) -> std::io::Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // higher ports finish first
        tokio::time::sleep(Duration::from_millis(40 - u64::from(socket.port() % 40))).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(String::new())
    }
}

#[tokio::test]
async fn concurrency_never_exceeds_batch_size() {
    let probe = Arc::new(InstrumentedProbe::default());
    let results = scanner(7)
        .await
        .with_probe(probe.clone())
        .scan(&["127.0.0.1".to_owned()], "1-200", ScanKind::Connect)
        .await
        .unwrap();

    assert_eq!(results.result_count(), 200);
    assert!(probe.peak.load(Ordering::SeqCst) <= 7);
}

#[tokio::test]
async fn ports_come_back_sorted_for_every_host() {
    let probe = Arc::new(InstrumentedProbe::default());
    let hosts = vec!["127.0.0.1".to_owned(), "::1".to_owned()];
    let results = scanner(64)
        .await
        .with_probe(probe)
        .scan(&hosts, "443,22,80-90,3306,1", ScanKind::Connect)
        .await
        .unwrap();

    assert_eq!(results.hosts().collect::<Vec<_>>(), vec!["127.0.0.1", "::1"]);
    for (_, open) in results.iter() {
        let ports: Vec<u16> = open.iter().map(|r| r.port).collect();
        let mut sorted = ports.clone();
        sorted.sort_unstable();
        assert_eq!(ports, sorted);
        assert_eq!(ports.len(), 15);
    }
}

#[tokio::test]
async fn local_listener_is_scanned_exported_and_assessed() {
    let ssh = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let quiet = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ssh_port = ssh.local_addr().unwrap().port();
    let quiet_port = quiet.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = ssh.accept().await {
            let _ = stream.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await;
        }
    });
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = quiet.accept().await {
            held.push(stream);
        }
    });

    let spec = format!("{ssh_port},{quiet_port}");
    let results = scanner(10)
        .await
        .scan(&["127.0.0.1".to_owned()], &spec, ScanKind::Connect)
        .await
        .unwrap();

    let open = results.get("127.0.0.1").unwrap();
    assert_eq!(open.len(), 2);
    let ssh_result = open.iter().find(|r| r.port == ssh_port).unwrap();
    assert_eq!(ssh_result.service, "ssh");
    assert_eq!(ssh_result.banner, "SSH-2.0-OpenSSH_7.4");
    let quiet_result = open.iter().find(|r| r.port == quiet_port).unwrap();
    assert_eq!(quiet_result.banner, "");

    let restored = ScanResults::from_json(&results.to_json().unwrap()).unwrap();
    assert_eq!(restored, results);

    let report = VulnerabilityRuleEngine::new().assess(&restored).unwrap();
    assert_eq!(report.summary.total_open_ports, 2);
    assert!(report.vulnerabilities.is_empty());
}

#[test]
fn telnet_is_reported_as_insecure_protocol() {
    let report = VulnerabilityRuleEngine::new()
        .assess(&single("10.0.0.5", 23, "telnet"))
        .unwrap();

    let telnet: Vec<_> = report
        .vulnerabilities
        .iter()
        .filter(|v| v.title.contains("Insecure Protocol"))
        .collect();
    assert!(!telnet.is_empty());
    assert!(telnet.iter().all(|v| v.severity == Severity::High));
    assert_eq!(report.summary.affected_hosts, BTreeSet::from(["10.0.0.5".to_owned()]));
}

#[test]
fn exposed_databases_are_high_severity() {
    let engine = VulnerabilityRuleEngine::new();

    for (port, product) in [(3306, "mysql"), (5432, "postgresql")] {
        let report = engine.assess(&single("10.0.0.7", port, "unknown")).unwrap();
        assert_eq!(report.vulnerabilities.len(), 1, "{product}");
        assert_eq!(report.vulnerabilities[0].severity, Severity::High);
        assert_eq!(report.vulnerabilities[0].affected_service, product);
    }
}

#[test]
fn repeated_assessment_is_idempotent() {
    let mut input = ScanResults::new();
    input.insert(
        "10.0.0.5",
        vec![
            ScanResult::open("10.0.0.5", 21, "ftp"),
            ScanResult::open("10.0.0.5", 22, "ssh"),
            ScanResult::open("10.0.0.5", 445, "microsoft-ds"),
        ],
    );
    input.insert("10.0.0.6", vec![ScanResult::open("10.0.0.6", 27017, "mongodb")]);

    let engine = VulnerabilityRuleEngine::new();
    let first = engine.assess(&input).unwrap();
    let second = engine.assess(&input).unwrap();

    let ids = |report: &rustaudit::vuln::AssessmentReport| -> BTreeSet<String> {
        report
            .vulnerabilities
            .iter()
            .map(|v| v.id.clone())
            .chain(report.security_issues.iter().map(|i| i.id.clone()))
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.summary.total_vulnerabilities, second.summary.total_vulnerabilities);
    assert_eq!(first.summary.severity_distribution, second.summary.severity_distribution);
    assert_eq!(
        first.summary.severity_distribution.values().sum::<usize>(),
        first.vulnerabilities.len()
    );
}

#[test]
fn empty_results_give_a_well_formed_report() {
    let report = VulnerabilityRuleEngine::new().assess(&ScanResults::new()).unwrap();
    assert_eq!(report.summary.total_vulnerabilities, 0);
    assert_eq!(report.summary.total_security_issues, 0);
    assert!(report.summary.affected_hosts.is_empty());
    assert!(!report.recommendations.is_empty());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    for level in ["critical", "high", "medium", "low", "info"] {
        assert_eq!(json["summary"]["severity_distribution"][level], 0);
    }
}
