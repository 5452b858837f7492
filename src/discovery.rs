//! Host discovery: which candidate addresses in a range answer at all.
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;

use crate::address::parse_range;
use crate::error::Result;
use crate::input::DiscoveryMethod;
use crate::pool::ProbePool;

/// Ports tried by the common-ports sweep.
pub const COMMON_PORTS: [u16; 10] = [22, 23, 25, 53, 80, 110, 143, 443, 993, 995];

/// Settings for a [`HostDiscoverer`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Budget for one candidate's probe.
    pub timeout: Duration,
    /// Maximum number of candidates probed at once.
    pub batch_size: usize,
    /// Ports tried by [`DiscoveryMethod::CommonPorts`].
    pub common_ports: Vec<u16>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            batch_size: 100,
            common_ports: COMMON_PORTS.to_vec(),
        }
    }
}

/// Decides whether one address is live. A failure of any kind is "not live".
#[async_trait]
pub trait HostProbe: Send + Sync + fmt::Debug {
    async fn is_live(&self, ip: IpAddr) -> bool;
}

/// One echo request through the system `ping`.
#[derive(Debug, Clone)]
pub struct PresenceProbe {
    timeout: Duration,
}

impl PresenceProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn arguments(&self, ip: IpAddr) -> Vec<String> {
        let wait_secs = self.timeout.as_secs().max(1);
        let target = ip.to_string();
        if cfg!(windows) {
            vec![
                "-n".into(),
                "1".into(),
                "-w".into(),
                self.timeout.as_millis().max(1).to_string(),
                target,
            ]
        } else if cfg!(target_os = "macos") {
            vec![
                "-c".into(),
                "1".into(),
                "-W".into(),
                self.timeout.as_millis().max(1).to_string(),
                target,
            ]
        } else {
            vec!["-c".into(), "1".into(), "-W".into(), wait_secs.to_string(), target]
        }
    }
}

#[async_trait]
impl HostProbe for PresenceProbe {
    async fn is_live(&self, ip: IpAddr) -> bool {
        let mut ping = Command::new("ping");
        ping.args(self.arguments(ip))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // ping gets its own wait plus a little slack to start up
        let budget = self.timeout + Duration::from_millis(500);
        match time::timeout(budget, ping.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("Could not run ping for {ip}: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

/// Trial connects to a short list of ports; the first success wins.
#[derive(Debug, Clone)]
pub struct CommonPortsProbe {
    ports: Vec<u16>,
    timeout: Duration,
}

impl CommonPortsProbe {
    pub fn new(ports: Vec<u16>, timeout: Duration) -> Self {
        Self { ports, timeout }
    }
}

#[async_trait]
impl HostProbe for CommonPortsProbe {
    async fn is_live(&self, ip: IpAddr) -> bool {
        for &port in &self.ports {
            let socket = SocketAddr::new(ip, port);
            if let Ok(Ok(_)) = time::timeout(self.timeout, TcpStream::connect(socket)).await {
                debug!("{ip} answered on port {port}");
                return true;
            }
        }
        false
    }
}

/// Same-subnet sweep through the kernel neighbour table.
///
/// A single UDP datagram makes the kernel resolve the candidate's hardware
/// address; the candidate is live once `/proc/net/arp` holds a complete
/// entry for it. Addresses behind a router never get an entry.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct LinkLayerProbe {
    timeout: Duration,
}

#[cfg(target_os = "linux")]
impl LinkLayerProbe {
    const ARP_TABLE: &'static str = "/proc/net/arp";
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn nudge(ip: IpAddr) -> std::io::Result<()> {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(&[0u8], SocketAddr::new(ip, 9)).await?;
        Ok(())
    }

    async fn in_table(ip: IpAddr) -> bool {
        match tokio::fs::read_to_string(Self::ARP_TABLE).await {
            Ok(table) => arp_table_has(&table, ip),
            Err(e) => {
                debug!("Could not read {}: {e}", Self::ARP_TABLE);
                false
            }
        }
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl HostProbe for LinkLayerProbe {
    async fn is_live(&self, ip: IpAddr) -> bool {
        if !ip.is_ipv4() {
            return false;
        }
        if Self::in_table(ip).await {
            return true;
        }
        if let Err(e) = Self::nudge(ip).await {
            debug!("Could not nudge {ip}: {e}");
            return false;
        }

        let wait = async {
            loop {
                time::sleep(Self::POLL_INTERVAL).await;
                if Self::in_table(ip).await {
                    return true;
                }
            }
        };
        time::timeout(self.timeout, wait).await.unwrap_or(false)
    }
}

/// Whether an `/proc/net/arp` dump holds a resolved entry for `ip`.
///
/// Flag `0x2` marks a completed entry; incomplete ones carry an all-zero
/// hardware address.
pub fn arp_table_has(table: &str, ip: IpAddr) -> bool {
    let wanted = ip.to_string();
    table.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [address, _hw_type, flags, hw_address, ..] => {
                *address == wanted
                    && u32::from_str_radix(flags.trim_start_matches("0x"), 16)
                        .map(|f| f & 0x2 != 0)
                        .unwrap_or(false)
                    && *hw_address != "00:00:00:00:00:00"
            }
            _ => false,
        }
    })
}

/// Sweeps candidate addresses for live hosts.
#[derive(Debug, Clone)]
pub struct HostDiscoverer {
    config: DiscoveryConfig,
    pool: ProbePool,
}

impl HostDiscoverer {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            pool: ProbePool::new(config.batch_size),
            config,
        }
    }

    /// Finds the live addresses in `range`.
    ///
    /// A malformed range is an [`crate::error::Error::Discovery`] raised
    /// before anything is probed.
    pub async fn discover(&self, range: &str, method: DiscoveryMethod) -> Result<BTreeSet<IpAddr>> {
        let candidates = parse_range(range)?;
        let probe = self.probe_for(method);
        debug!(
            "Sweeping {} candidates with {method:?}, {} at a time",
            candidates.len(),
            self.pool.limit()
        );
        Ok(self.sweep(candidates, probe.as_ref()).await)
    }

    /// Runs `probe` against every candidate through the pool.
    pub async fn sweep(&self, candidates: Vec<IpAddr>, probe: &dyn HostProbe) -> BTreeSet<IpAddr> {
        self.pool
            .run(candidates, |ip| async move { probe.is_live(ip).await.then_some(ip) })
            .await
            .into_iter()
            .collect()
    }

    fn probe_for(&self, method: DiscoveryMethod) -> Box<dyn HostProbe> {
        let timeout = self.config.timeout;
        match method {
            DiscoveryMethod::Presence => Box::new(PresenceProbe::new(timeout)),
            DiscoveryMethod::CommonPorts => {
                Box::new(CommonPortsProbe::new(self.config.common_ports.clone(), timeout))
            }
            #[cfg(target_os = "linux")]
            DiscoveryMethod::LinkLayer => Box::new(LinkLayerProbe::new(timeout)),
            #[cfg(not(target_os = "linux"))]
            DiscoveryMethod::LinkLayer => {
                log::warn!("Link-layer discovery is only available on Linux, using ping instead");
                Box::new(PresenceProbe::new(timeout))
            }
        }
    }
}
