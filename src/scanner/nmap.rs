//! The optional external full-scan capability backed by `nmap`.
//!
//! SYN and UDP scans need raw sockets, which this crate does not open itself.
//! When an `nmap` binary is on the `PATH` those scan kinds are handed to it
//! and its XML report is read back into [`ScanResult`]s.
use anyhow::{bail, Context};
use async_trait::async_trait;
use itertools::Itertools;
use log::debug;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::FullScanCapability;
use crate::input::ScanKind;
use crate::model::ScanResult;

/// Runs `nmap` as a child process, one host per invocation.
#[derive(Debug, Clone)]
pub struct NmapScanner {
    binary: String,
    host_timeout: Duration,
}

impl NmapScanner {
    /// Looks for a working `nmap` on the `PATH`. Each host it scans is given
    /// at most `host_timeout`.
    pub async fn detect(host_timeout: Duration) -> Option<Self> {
        let found = Command::new("nmap")
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .is_ok_and(|status| status.success());

        if found {
            debug!("nmap found, SYN and UDP scans will be delegated");
            Some(Self::new("nmap", host_timeout))
        } else {
            debug!("nmap not found, SYN and UDP scans fall back to connect scans");
            None
        }
    }

    pub fn new(binary: impl Into<String>, host_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            host_timeout,
        }
    }

    fn arguments(&self, host: &str, ports: &[u16], kind: ScanKind) -> Vec<String> {
        let technique = match kind {
            ScanKind::Udp => "-sU",
            ScanKind::Syn | ScanKind::Connect => "-sS",
        };
        vec![
            technique.to_owned(),
            "-Pn".to_owned(),
            "-n".to_owned(),
            "--host-timeout".to_owned(),
            format!("{}ms", self.host_timeout.as_millis().max(1)),
            "-p".to_owned(),
            fold_ranges(ports),
            "-oX".to_owned(),
            "-".to_owned(),
            host.to_owned(),
        ]
    }
}

#[async_trait]
impl FullScanCapability for NmapScanner {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn scan(
        &self,
        host: &str,
        ports: &[u16],
        kind: ScanKind,
    ) -> anyhow::Result<Vec<ScanResult>> {
        if ports.is_empty() {
            return Ok(Vec::new());
        }

        let arguments = self.arguments(host, ports, kind);
        debug!("Running {} {}", self.binary, arguments.join(" "));

        let output = Command::new(&self.binary)
            .args(&arguments)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {}", self.binary))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_report(&String::from_utf8_lossy(&output.stdout), host)
    }
}

/// Collapses a sorted port list into nmap's `-p` syntax, e.g. `22,80-82`.
pub fn fold_ranges(ports: &[u16]) -> String {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for port in sorted {
        match ranges.last_mut() {
            Some((_, end)) if u32::from(*end) + 1 == u32::from(port) => *end = port,
            _ => ranges.push((port, port)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .join(",")
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(default)]
    host: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    ports: Option<NmapPorts>,
}

#[derive(Debug, Deserialize)]
struct NmapPorts {
    #[serde(default)]
    port: Vec<NmapPort>,
}

#[derive(Debug, Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid")]
    portid: u16,
    state: NmapState,
    service: Option<NmapService>,
}

#[derive(Debug, Deserialize)]
struct NmapState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapService {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
}

impl NmapService {
    fn version_string(&self) -> Option<String> {
        let joined = [self.product.as_deref(), self.version.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }
}

/// Reads an `nmap -oX` report and keeps the ports reported `open`.
fn parse_report(xml: &str, host: &str) -> anyhow::Result<Vec<ScanResult>> {
    let run: NmapRun = quick_xml::de::from_str(xml).context("unreadable nmap XML report")?;

    let results = run
        .host
        .into_iter()
        .filter_map(|h| h.ports)
        .flat_map(|p| p.port)
        .filter(|port| port.state.state == "open")
        .map(|port| {
            let (service, version) = match &port.service {
                Some(service) => (service.name.clone(), service.version_string()),
                None => (String::new(), None),
            };
            ScanResult::open(host, port.portid, service).with_version(version)
        })
        .collect();

    Ok(results)
}
