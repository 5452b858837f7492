//! Core functionality for actual scanning behaviour.
use crate::address::{resolve_host, reverse_lookup};
use crate::error::{Error, Result};
use crate::input::{parse_ports_and_ranges, ScanKind, ScanOrder};
use crate::model::{HostInfo, PortState, ScanResult, ScanResults};
use crate::pool::ProbePool;
use crate::port_strategy::PortStrategy;
use crate::service::{identify, ServiceIdentifier, UNKNOWN_SERVICE};
use async_trait::async_trait;
use log::{debug, info, warn};

pub mod nmap;
use nmap::NmapScanner;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

/// Longest banner kept on a [`ScanResult`], in characters.
pub const MAX_BANNER_CHARS: usize = 200;

const BANNER_BUFFER: usize = 1024;

/// Confirms that one port is open.
///
/// Returns the banner read from the port (possibly empty) when the port is
/// open, and an error for a refusal, reset or timeout.
#[async_trait]
pub trait PortProbe: Send + Sync + fmt::Debug {
    async fn probe(&self, socket: SocketAddr) -> io::Result<String>;
}

/// An external scanner able to run the scan kinds that need raw sockets.
#[async_trait]
pub trait FullScanCapability: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Scans `ports` on `host` and returns the open ones.
    async fn scan(&self, host: &str, ports: &[u16], kind: ScanKind)
        -> anyhow::Result<Vec<ScanResult>>;
}

/// TCP connect probe with a passive banner read.
///
/// Nothing is ever written to the probed port: services that talk first
/// (SSH, FTP, SMTP) are heard, everything else yields an empty banner.
#[derive(Debug, Clone)]
pub struct ConnectProbe {
    timeout: Duration,
    banner_timeout: Duration,
}

impl ConnectProbe {
    pub fn new(timeout: Duration, banner_timeout: Duration) -> Self {
        Self {
            timeout,
            banner_timeout,
        }
    }

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.timeout, async move { TcpStream::connect(socket).await }).await?
    }

    async fn read_banner(&self, stream: &mut TcpStream) -> String {
        let mut buffer = [0u8; BANNER_BUFFER];
        match time::timeout(self.banner_timeout, stream.read(&mut buffer)).await {
            Ok(Ok(n)) if n > 0 => clean_banner(&buffer[..n]),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl PortProbe for ConnectProbe {
    async fn probe(&self, socket: SocketAddr) -> io::Result<String> {
        let mut stream = self.connect(socket).await?;
        debug!("Connection was successful, reading banner from {socket}");
        let banner = self.read_banner(&mut stream).await;
        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown stream error {e}");
        }
        Ok(banner)
    }
}

/// Lossy UTF-8, trimmed, capped at [`MAX_BANNER_CHARS`].
fn clean_banner(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim()
        .chars()
        .take(MAX_BANNER_CHARS)
        .collect()
}

/// Settings for a [`Scanner`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Connect timeout per probe.
    pub timeout: Duration,
    /// How long to wait for a banner after connecting.
    pub banner_timeout: Duration,
    /// Maximum number of probes in flight.
    pub batch_size: usize,
    /// Run the deeper service probes on open ports.
    pub service_detection: bool,
    pub scan_order: ScanOrder,
    /// Ports removed from every port specification.
    pub exclude_ports: Vec<u16>,
    /// Budget for one host handed to the external scanner. A host that runs
    /// over it is rescanned with connect probes.
    pub delegate_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            banner_timeout: Duration::from_secs(1),
            batch_size: 100,
            service_detection: false,
            scan_order: ScanOrder::Serial,
            exclude_ports: Vec::new(),
            delegate_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// How raw-socket scan kinds are served. Chosen once, when the scanner is
/// built.
#[derive(Debug, Clone)]
enum RawScanBackend {
    Delegate(Arc<dyn FullScanCapability>),
    ConnectFallback,
}

/// Probes ports on a list of hosts.
///
/// Every probe, delegated host scan and name resolution runs on one
/// [`ProbePool`] sized by `batch_size`, and results come back per host sorted
/// by port no matter in which order the probes finished.
#[derive(Debug)]
pub struct Scanner {
    config: ScanConfig,
    pool: ProbePool,
    probe: Arc<dyn PortProbe>,
    identifier: ServiceIdentifier,
    raw: RawScanBackend,
}

impl Scanner {
    /// Builds a scanner, looking for `nmap` to serve SYN and UDP scans.
    pub async fn new(config: ScanConfig) -> Self {
        let raw = match NmapScanner::detect(config.delegate_timeout).await {
            Some(nmap) => RawScanBackend::Delegate(Arc::new(nmap)),
            None => RawScanBackend::ConnectFallback,
        };
        Self::with_backend(config, raw)
    }

    fn with_backend(config: ScanConfig, raw: RawScanBackend) -> Self {
        Self {
            pool: ProbePool::new(config.batch_size),
            probe: Arc::new(ConnectProbe::new(config.timeout, config.banner_timeout)),
            identifier: ServiceIdentifier::new(config.timeout),
            raw,
            config,
        }
    }

    /// Replaces the external scanner; `None` forces the connect fallback.
    pub fn with_capability(mut self, capability: Option<Arc<dyn FullScanCapability>>) -> Self {
        self.raw = match capability {
            Some(capability) => RawScanBackend::Delegate(capability),
            None => RawScanBackend::ConnectFallback,
        };
        self
    }

    /// Replaces the per-port probe.
    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Name of the external scanner in use, if any.
    pub fn delegate(&self) -> Option<&str> {
        match &self.raw {
            RawScanBackend::Delegate(capability) => Some(capability.name()),
            RawScanBackend::ConnectFallback => None,
        }
    }

    /// Scans `ports` on every host in `hosts`.
    ///
    /// The port specification is parsed before anything touches the network;
    /// a malformed one is an [`Error::InvalidPorts`]. A host that cannot be
    /// resolved is logged and reported with no results. Hosts keep the order
    /// in which they were supplied.
    pub async fn scan(&self, hosts: &[String], ports: &str, kind: ScanKind) -> Result<ScanResults> {
        let ports = parse_ports_and_ranges(ports).map_err(Error::InvalidPorts)?;
        let ports: Vec<u16> = ports
            .into_iter()
            .filter(|port| !self.config.exclude_ports.contains(port))
            .collect();

        let mut results: ScanResults = hosts
            .iter()
            .map(|host| (host.clone(), Vec::new()))
            .collect();
        if results.is_empty() || ports.is_empty() {
            return Ok(results);
        }

        let targets = self.resolve(results.hosts().map(str::to_owned).collect()).await;
        let strategy = PortStrategy::pick(ports, self.config.scan_order);

        let found = match (&self.raw, kind.needs_raw_sockets()) {
            (RawScanBackend::Delegate(capability), true) => {
                self.delegated_scan(capability, &targets, &strategy, kind).await
            }
            (RawScanBackend::ConnectFallback, true) => {
                info!("No external scanner available, running a connect scan instead of {kind:?}");
                self.connect_scan(&targets, &strategy).await
            }
            (_, false) => self.connect_scan(&targets, &strategy).await,
        };

        let mut grouped: HashMap<String, Vec<ScanResult>> = HashMap::new();
        for result in found {
            grouped.entry(result.host.clone()).or_default().push(result);
        }
        for (host, host_results) in grouped {
            results.insert(host, host_results);
        }

        debug!("Open ports found: {}", results.result_count());
        Ok(results)
    }

    /// Scans one host and summarizes it.
    pub async fn host_info(&self, target: &str, ports: &str) -> Result<HostInfo> {
        let results = self
            .scan(&[target.to_owned()], ports, ScanKind::Connect)
            .await?;
        let open_ports = results.get(target).map(<[_]>::to_vec).unwrap_or_default();

        let hostname = match resolve_host(target, self.config.timeout).await {
            Some(ip) => reverse_lookup(ip, self.config.timeout)
                .await
                .or_else(|| (target.parse::<IpAddr>().is_err()).then(|| target.to_owned())),
            None => None,
        };

        Ok(HostInfo::from_results(target, hostname, open_ports))
    }

    async fn resolve(&self, hosts: Vec<String>) -> Vec<(String, IpAddr)> {
        let timeout = self.config.timeout;
        let mut resolved = self
            .pool
            .run(hosts.iter().cloned().enumerate(), |(position, host)| async move {
                match resolve_host(&host, timeout).await {
                    Some(ip) => Some((position, host, ip)),
                    None => {
                        warn!("Could not resolve {host}, it will have no results");
                        None
                    }
                }
            })
            .await;
        resolved.sort_by_key(|(position, _, _)| *position);
        resolved
            .into_iter()
            .map(|(_, host, ip)| (host, ip))
            .collect()
    }

    async fn connect_scan(&self, targets: &[(String, IpAddr)], strategy: &PortStrategy) -> Vec<ScanResult> {
        let errors: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let error_cap = targets.len() * 1000;

        debug!(
            "Start scanning sockets. \nBatch size {}\nNumber of ip-s {}\nNumber of ports {}\nTargets all together {} ",
            self.pool.limit(),
            targets.len(),
            strategy.len(),
            targets.len() * strategy.len()
        );

        let jobs = targets.iter().flat_map(|(host, ip)| {
            strategy
                .order()
                .iter()
                .map(move |&port| (host.as_str(), SocketAddr::new(*ip, port)))
        });

        let errors_ref = &errors;
        let open = self
            .pool
            .run(jobs, |(host, socket)| async move {
                match self.probe.probe(socket).await {
                    Ok(banner) => Some(self.describe(host, socket, banner).await),
                    Err(e) => {
                        if let Ok(mut seen) = errors_ref.lock() {
                            if seen.len() < error_cap {
                                seen.insert(e.to_string());
                            }
                        }
                        None
                    }
                }
            })
            .await;

        if let Ok(seen) = errors.lock() {
            if seen.iter().any(|e| e.to_lowercase().contains("too many open files")) {
                warn!("Too many open files. Please reduce batch size or raise the ulimit.");
            }
            debug!("Typical socket connection errors {seen:?}");
        }
        open
    }

    /// Builds the result for an open port, running the deeper service probe
    /// when enabled.
    async fn describe(&self, host: &str, socket: SocketAddr, banner: String) -> ScanResult {
        let service = identify(socket.port(), &banner);
        let result = ScanResult::open(host, socket.port(), service.service)
            .with_version(service.version)
            .with_banner(banner);

        if self.config.service_detection {
            self.identifier.enrich(socket, result).await
        } else {
            result
        }
    }

    async fn delegated_scan(
        &self,
        capability: &Arc<dyn FullScanCapability>,
        targets: &[(String, IpAddr)],
        strategy: &PortStrategy,
        kind: ScanKind,
    ) -> Vec<ScanResult> {
        let ports = strategy.order();
        let budget = self.config.delegate_timeout;
        let outcomes = self
            .pool
            .run(targets.iter(), |(host, ip)| async move {
                let outcome = time::timeout(budget, capability.scan(&ip.to_string(), ports, kind))
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("no report within {budget:?}")));
                Some((host, *ip, outcome))
            })
            .await;

        let mut found = Vec::new();
        let mut fallback = Vec::new();
        for (host, ip, outcome) in outcomes {
            match outcome {
                Ok(results) => found.extend(
                    results
                        .into_iter()
                        .filter(|r| r.state == PortState::Open && ports.contains(&r.port))
                        .map(|r| normalize_delegated(host, r)),
                ),
                Err(e) => {
                    warn!(
                        "{} failed for {host}, falling back to a connect scan: {e:#}",
                        capability.name()
                    );
                    fallback.push((host.clone(), ip));
                }
            }
        }

        if !fallback.is_empty() {
            found.extend(self.connect_scan(&fallback, strategy).await);
        }
        found
    }
}

/// Files a delegated result under the supplied host name and fills in a
/// service label when the external scanner gave none.
fn normalize_delegated(host: &str, mut result: ScanResult) -> ScanResult {
    result.host = host.to_owned();
    if result.service.is_empty() || result.service == UNKNOWN_SERVICE {
        result.service = identify(result.port, &result.banner).service;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HostStatus;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn config(batch_size: usize) -> ScanConfig {
        ScanConfig {
            timeout: Duration::from_millis(500),
            banner_timeout: Duration::from_millis(200),
            batch_size,
            ..ScanConfig::default()
        }
    }

    fn scanner(batch_size: usize) -> Scanner {
        Scanner::with_backend(config(batch_size), RawScanBackend::ConnectFallback)
    }

    /// Opens the listed ports; later ports answer sooner.
    #[derive(Debug, Default)]
    struct ScriptedProbe {
        open: Vec<u16>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PortProbe for ScriptedProbe {
        async fn probe(&self, socket: SocketAddr) -> io::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = 200u64.saturating_sub(u64::from(socket.port()) % 200);
            time::sleep(Duration::from_millis(delay / 4)).await;
            if self.open.contains(&socket.port()) {
                Ok(String::new())
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        }
    }

    #[derive(Debug)]
    struct FailingCapability;

    #[async_trait]
    impl FullScanCapability for FailingCapability {
        fn name(&self) -> &str {
            "failing"
        }

        async fn scan(&self, _: &str, _: &[u16], _: ScanKind) -> anyhow::Result<Vec<ScanResult>> {
            Err(anyhow!("requires root privileges"))
        }
    }

    #[derive(Debug)]
    struct StaticCapability;

    #[async_trait]
    impl FullScanCapability for StaticCapability {
        fn name(&self) -> &str {
            "static"
        }

        async fn scan(&self, host: &str, _: &[u16], _: ScanKind) -> anyhow::Result<Vec<ScanResult>> {
            Ok(vec![
                ScanResult::open(host, 161, "snmp"),
                ScanResult::open(host, 53, ""),
                ScanResult::open(host, 9, "discard").with_state(PortState::Filtered),
            ])
        }
    }

    /// Never answers within any sensible budget.
    #[derive(Debug)]
    struct StalledCapability;

    #[async_trait]
    impl FullScanCapability for StalledCapability {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn scan(&self, host: &str, _: &[u16], _: ScanKind) -> anyhow::Result<Vec<ScanResult>> {
            time::sleep(Duration::from_secs(30)).await;
            Ok(vec![ScanResult::open(host, 161, "snmp")])
        }
    }

    async fn ssh_listener() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await;
            }
        });
        port
    }

    #[tokio::test]
    async fn results_are_sorted_despite_completion_order() {
        let probe = Arc::new(ScriptedProbe {
            open: vec![22, 80, 150, 199],
            ..ScriptedProbe::default()
        });
        let scanner = scanner(50).with_probe(probe);
        let results = scanner
            .scan(&["127.0.0.1".to_owned()], "1-199", ScanKind::Connect)
            .await
            .unwrap();

        let ports: Vec<u16> = results.get("127.0.0.1").unwrap().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 80, 150, 199]);
    }

    /// Records the order in which sockets are probed; every port is open.
    #[derive(Debug, Default)]
    struct RecordingProbe {
        seen: Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl PortProbe for RecordingProbe {
        async fn probe(&self, socket: SocketAddr) -> io::Result<String> {
            self.seen.lock().unwrap().push(socket);
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn random_order_shuffles_ports_not_hosts() {
        let probe = Arc::new(RecordingProbe::default());
        let mut config = config(1);
        config.scan_order = ScanOrder::Random;
        let scanner = Scanner::with_backend(config, RawScanBackend::ConnectFallback).with_probe(probe.clone());
        let hosts = ["127.0.0.1".to_owned(), "::1".to_owned()];
        let results = scanner.scan(&hosts, "1-50", ScanKind::Connect).await.unwrap();

        let seen = probe.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 100);
        assert!(seen[..50].iter().all(|s| s.ip().is_ipv4()));
        assert!(seen[50..].iter().all(|s| s.ip().is_ipv6()));
        let first: Vec<u16> = seen[..50].iter().map(SocketAddr::port).collect();
        let second: Vec<u16> = seen[50..].iter().map(SocketAddr::port).collect();
        assert_eq!(first, second);

        let ports: Vec<u16> = results.get("::1").unwrap().iter().map(|r| r.port).collect();
        assert_eq!(ports, (1..=50).collect::<Vec<u16>>());
    }

    #[tokio::test]
    async fn malformed_ports_fail_before_probing() {
        let probe = Arc::new(ScriptedProbe::default());
        let scanner = scanner(10).with_probe(probe.clone());

        for spec in ["80-", "", "22,,80", "http"] {
            let err = scanner
                .scan(&["127.0.0.1".to_owned()], spec, ScanKind::Connect)
                .await
                .unwrap_err();
            assert!(err.is_input_error(), "{spec:?} gave {err}");
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolvable_host_gets_empty_results() {
        let probe = Arc::new(ScriptedProbe {
            open: vec![22],
            ..ScriptedProbe::default()
        });
        let scanner = scanner(10).with_probe(probe);
        let hosts = ["no-such-host.invalid".to_owned(), "127.0.0.1".to_owned()];
        let results = scanner.scan(&hosts, "22", ScanKind::Connect).await.unwrap();

        assert_eq!(results.hosts().collect::<Vec<_>>(), vec!["no-such-host.invalid", "127.0.0.1"]);
        assert!(results.get("no-such-host.invalid").unwrap().is_empty());
        assert_eq!(results.get("127.0.0.1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn excluded_ports_are_not_probed() {
        let probe = Arc::new(ScriptedProbe {
            open: vec![22, 80],
            ..ScriptedProbe::default()
        });
        let mut config = config(10);
        config.exclude_ports = vec![80];
        let scanner = Scanner::with_backend(config, RawScanBackend::ConnectFallback).with_probe(probe.clone());
        let results = scanner
            .scan(&["127.0.0.1".to_owned()], "22,80", ScanKind::Connect)
            .await
            .unwrap();

        assert_eq!(results.get("127.0.0.1").unwrap().len(), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_delegate_falls_back_to_connect() {
        let probe = Arc::new(ScriptedProbe {
            open: vec![53],
            ..ScriptedProbe::default()
        });
        let scanner = scanner(10)
            .with_capability(Some(Arc::new(FailingCapability)))
            .with_probe(probe);
        let results = scanner
            .scan(&["127.0.0.1".to_owned()], "53,161", ScanKind::Udp)
            .await
            .unwrap();

        let ports: Vec<u16> = results.get("127.0.0.1").unwrap().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![53]);
    }

    #[tokio::test]
    async fn stalled_delegate_falls_back_within_budget() {
        let probe = Arc::new(ScriptedProbe {
            open: vec![53],
            ..ScriptedProbe::default()
        });
        let mut config = config(10);
        config.delegate_timeout = Duration::from_millis(100);
        let scanner = Scanner::with_backend(config, RawScanBackend::Delegate(Arc::new(StalledCapability)))
            .with_probe(probe.clone());

        let started = time::Instant::now();
        let results = scanner
            .scan(&["127.0.0.1".to_owned()], "53,161", ScanKind::Udp)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        let ports: Vec<u16> = results.get("127.0.0.1").unwrap().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![53]);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delegate_results_are_normalized() {
        let scanner = scanner(10).with_capability(Some(Arc::new(StaticCapability)));
        assert_eq!(scanner.delegate(), Some("static"));

        let results = scanner
            .scan(&["127.0.0.1".to_owned()], "1-200", ScanKind::Syn)
            .await
            .unwrap();
        let host = results.get("127.0.0.1").unwrap();

        assert_eq!(host.len(), 2);
        assert_eq!(host[0].port, 53);
        assert_eq!(host[0].service, "dns");
        assert_eq!(host[1].service, "snmp");
        assert!(host.iter().all(|r| r.host == "127.0.0.1"));
    }

    #[tokio::test]
    async fn connect_probe_reads_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await.unwrap();
        });

        let results = scanner(10)
            .scan(&["127.0.0.1".to_owned()], &port.to_string(), ScanKind::Connect)
            .await
            .unwrap();
        let found = &results.get("127.0.0.1").unwrap()[0];

        assert_eq!(found.port, port);
        assert_eq!(found.service, "ssh");
        assert_eq!(found.banner, "SSH-2.0-OpenSSH_7.4");
        assert_eq!(found.version.as_deref(), Some("OpenSSH_7.4"));
    }

    #[tokio::test]
    async fn service_detection_keeps_the_version_format() {
        let port = ssh_listener().await;
        let hosts = ["127.0.0.1".to_owned()];

        let passive = scanner(10)
            .scan(&hosts, &port.to_string(), ScanKind::Connect)
            .await
            .unwrap();
        let mut config = config(10);
        config.service_detection = true;
        let detected = Scanner::with_backend(config, RawScanBackend::ConnectFallback)
            .scan(&hosts, &port.to_string(), ScanKind::Connect)
            .await
            .unwrap();

        let version = |results: &ScanResults| results.get("127.0.0.1").unwrap()[0].version.clone();
        assert_eq!(version(&passive).as_deref(), Some("OpenSSH_7.4"));
        assert_eq!(version(&detected), version(&passive));
    }

    #[tokio::test]
    async fn host_info_reports_open_ports() {
        let port = ssh_listener().await;
        let info = scanner(10)
            .host_info("127.0.0.1", &format!("{port}"))
            .await
            .unwrap();

        assert_eq!(info.address, "127.0.0.1");
        assert_eq!(info.status, HostStatus::Up);
        assert_eq!(info.open_ports.len(), 1);
        assert_eq!(info.open_ports[0].port, port);
        assert_eq!(info.open_ports[0].service, "ssh");
    }

    #[tokio::test]
    async fn host_info_without_open_ports_is_filtered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let info = scanner(10)
            .host_info("127.0.0.1", &port.to_string())
            .await
            .unwrap();
        assert_eq!(info.status, HostStatus::Filtered);
        assert!(info.open_ports.is_empty());
    }

    #[tokio::test]
    async fn host_info_rejects_bad_ports() {
        let err = scanner(10).host_info("127.0.0.1", "22-").await.unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn closed_port_is_omitted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let results = scanner(10)
            .scan(&["127.0.0.1".to_owned()], &port.to_string(), ScanKind::Connect)
            .await
            .unwrap();
        assert!(results.get("127.0.0.1").unwrap().is_empty());
    }

    #[test]
    fn banners_are_capped() {
        let long = vec![b'A'; 600];
        assert_eq!(clean_banner(&long).chars().count(), MAX_BANNER_CHARS);
        assert_eq!(clean_banner(b"  220 ready\r\n"), "220 ready");
    }
}
