//! Service identification from port numbers and banners.
//!
//! [`identify`] is pure: a static port table gives the default label and
//! banner signatures override it. [`ServiceIdentifier`] adds optional deeper
//! probes (one connection, at most one write, one read) that can only add a
//! version string, never take information away.
use log::{debug, trace};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::model::ScanResult;

/// Label used when neither the port nor the banner says anything.
pub const UNKNOWN_SERVICE: &str = "unknown";

const MAX_PROBE_RESPONSE: usize = 4096;

/// Default service label for well-known ports.
pub fn service_for_port(port: u16) -> Option<&'static str> {
    let service = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        69 => "tftp",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        389 => "ldap",
        443 => "https",
        445 => "microsoft-ds",
        512 => "rexec",
        513 => "rlogin",
        514 => "rsh",
        587 => "submission",
        636 => "ldaps",
        993 => "imaps",
        995 => "pop3s",
        1433 => "mssql",
        1521 => "oracle",
        2049 => "nfs",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        5984 => "couchdb",
        5985 | 5986 => "winrm",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        9200 => "elasticsearch",
        11211 => "memcached",
        27017 => "mongodb",
        _ => return None,
    };
    Some(service)
}

/// Case-insensitive banner signatures, checked in order.
const BANNER_SIGNATURES: &[(&str, &str)] = &[
    ("http/", "http"),
    ("ssh-", "ssh"),
    ("ftp", "ftp"),
    ("smtp", "smtp"),
];

/// Outcome of identifying one open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMatch {
    pub service: String,
    pub version: Option<String>,
}

/// Maps a port and its banner to a service label and, where the banner
/// carries one, a version.
///
/// Banner evidence always wins over the port-based guess.
///
/// ```rust
/// # use rustaudit::service::identify;
/// assert_eq!(identify(80, "").service, "http");
/// assert_eq!(identify(2222, "SSH-2.0-OpenSSH_7.4").service, "ssh");
/// assert_eq!(identify(9999, "").service, "unknown");
/// ```
pub fn identify(port: u16, banner: &str) -> ServiceMatch {
    let by_port = service_for_port(port).unwrap_or(UNKNOWN_SERVICE);

    let lowered = banner.to_ascii_lowercase();
    let by_banner = BANNER_SIGNATURES
        .iter()
        .find(|(signature, _)| lowered.contains(signature))
        .map(|&(_, service)| service);

    match by_banner {
        Some(service) => ServiceMatch {
            service: service.to_owned(),
            version: version_from_banner(service, banner),
        },
        None => ServiceMatch {
            service: by_port.to_owned(),
            version: None,
        },
    }
}

/// Pulls a version string out of a banner for the protocols that put one
/// in their first bytes.
fn version_from_banner(service: &str, banner: &str) -> Option<String> {
    match service {
        "ssh" => ssh_version(banner),
        "http" => http_server_header(banner),
        "ftp" | "smtp" => greeting_text(banner),
        _ => None,
    }
}

/// `SSH-2.0-OpenSSH_7.4 Debian` gives `OpenSSH_7.4 Debian`.
fn ssh_version(banner: &str) -> Option<String> {
    let line = banner.lines().find(|l| l.starts_with("SSH-"))?;
    let software = line.trim().splitn(3, '-').nth(2)?;
    (!software.is_empty()).then(|| software.to_owned())
}

fn http_server_header(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        let value = value.trim();
        (name.trim().eq_ignore_ascii_case("server") && !value.is_empty()).then(|| value.to_owned())
    })
}

/// `220 (vsFTPd 3.0.3)` gives `(vsFTPd 3.0.3)`.
fn greeting_text(banner: &str) -> Option<String> {
    let line = banner.lines().find(|l| l.starts_with("220"))?;
    let text = line[3..].trim_start_matches(['-', ' ']).trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// Runs protocol-appropriate follow-up probes against identified services.
#[derive(Debug, Clone)]
pub struct ServiceIdentifier {
    timeout: Duration,
}

impl ServiceIdentifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Whether a deeper probe exists for `service`.
    pub fn can_probe(service: &str) -> bool {
        matches!(service, "http" | "http-proxy" | "ssh" | "ftp")
    }

    /// Tries to learn the version of the service behind `socket`.
    ///
    /// Only HTTP services receive a request; SSH and FTP announce themselves
    /// and are only read from. Any failure returns `result` untouched, and a
    /// successful probe never clears a version that was already known.
    pub async fn enrich(&self, socket: SocketAddr, result: ScanResult) -> ScanResult {
        if !Self::can_probe(&result.service) {
            return result;
        }

        let found = match result.service.as_str() {
            "http" | "http-proxy" => self.probe_http(socket, &result.host).await,
            "ssh" => self.read_greeting(socket).await.and_then(|b| ssh_version(&b)),
            "ftp" => self.read_greeting(socket).await.and_then(|b| greeting_text(&b)),
            _ => None,
        };

        match found {
            Some(version) => {
                debug!("{socket} runs {} {version}", result.service);
                result.with_version(Some(version))
            }
            None => result,
        }
    }

    async fn connect(&self, socket: SocketAddr) -> Option<TcpStream> {
        match timeout(self.timeout, TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                trace!("Service probe connect to {socket} failed: {e}");
                None
            }
            Err(_) => {
                trace!("Service probe connect to {socket} timed out");
                None
            }
        }
    }

    async fn read_some(&self, stream: &mut TcpStream) -> Option<String> {
        let mut buffer = vec![0u8; MAX_PROBE_RESPONSE];
        match timeout(self.timeout, stream.read(&mut buffer)).await {
            Ok(Ok(n)) if n > 0 => Some(String::from_utf8_lossy(&buffer[..n]).into_owned()),
            _ => None,
        }
    }

    async fn read_greeting(&self, socket: SocketAddr) -> Option<String> {
        let mut stream = self.connect(socket).await?;
        self.read_some(&mut stream).await
    }

    async fn probe_http(&self, socket: SocketAddr, host: &str) -> Option<String> {
        let mut stream = self.connect(socket).await?;
        let request = format!(
            "GET / HTTP/1.0\r\nHost: {host}\r\nUser-Agent: rustaudit/{}\r\n\r\n",
            env!("CARGO_PKG_VERSION")
        );
        timeout(self.timeout, stream.write_all(request.as_bytes()))
            .await
            .ok()?
            .ok()?;
        let response = self.read_some(&mut stream).await?;
        http_server_header(&response)
    }
}
