//! Scan-time data: what was observed on which host and port.
use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// State of a probed port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// The port accepted a connection or answered.
    #[default]
    Open,
    /// The port answered but refused.
    Closed,
    /// No conclusive answer.
    Filtered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed port on one host. Written once by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub host: String,
    pub port: u16,
    pub state: PortState,
    pub service: String,
    pub version: Option<String>,
    pub banner: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    /// An open port observed now, with no banner or version yet.
    pub fn open(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            state: PortState::Open,
            service: service.into(),
            version: None,
            banner: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_state(mut self, state: PortState) -> Self {
        self.state = state;
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Whether a host showed any sign of life during a port scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Filtered,
}

/// Aggregate view of a single host, derived from its scan results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub address: String,
    pub hostname: Option<String>,
    pub status: HostStatus,
    pub open_ports: Vec<ScanResult>,
}

impl HostInfo {
    pub fn from_results(
        address: impl Into<String>,
        hostname: Option<String>,
        mut results: Vec<ScanResult>,
    ) -> Self {
        results.sort_by_key(|r| r.port);
        let status = if results.iter().any(|r| r.state == PortState::Open) {
            HostStatus::Up
        } else {
            HostStatus::Filtered
        };
        Self {
            address: address.into(),
            hostname,
            status,
            open_ports: results,
        }
    }
}

/// Host to results mapping produced by a scan.
///
/// Hosts keep the order in which they were inserted; each host's results
/// are kept sorted by ascending port.
///
/// Serializes to the export format: a JSON object mapping each host to a
/// list of `{port, state, service, version, banner, timestamp}` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResults {
    hosts: Vec<(String, Vec<ScanResult>)>,
    index: HashMap<String, usize>,
}

impl ScanResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the results for `host`, replacing earlier ones. The host keeps
    /// its original position if it was already present.
    pub fn insert(&mut self, host: impl Into<String>, mut results: Vec<ScanResult>) {
        let host = host.into();
        results.sort_by_key(|r| r.port);
        match self.index.get(&host) {
            Some(&i) => self.hosts[i].1 = results,
            None => {
                self.index.insert(host.clone(), self.hosts.len());
                self.hosts.push((host, results));
            }
        }
    }

    pub fn get(&self, host: &str) -> Option<&[ScanResult]> {
        self.index.get(host).map(|&i| self.hosts[i].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ScanResult])> {
        self.hosts
            .iter()
            .map(|(host, results)| (host.as_str(), results.as_slice()))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|(host, _)| host.as_str())
    }

    /// Number of hosts, including hosts without results.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Total number of results over all hosts.
    pub fn result_count(&self) -> usize {
        self.hosts.iter().map(|(_, results)| results.len()).sum()
    }

    /// Checks the mapping is consistent: every result belongs to the host it
    /// is filed under, carries a real port, and appears once.
    pub fn validate(&self) -> Result<()> {
        for (host, results) in &self.hosts {
            if host.trim().is_empty() {
                return Err(Error::AssessmentInput("empty host key".to_owned()));
            }
            for result in results {
                if result.host != *host {
                    return Err(Error::AssessmentInput(format!(
                        "result for {}:{} is filed under host {host:?}",
                        result.host, result.port
                    )));
                }
                if result.port == 0 {
                    return Err(Error::AssessmentInput(format!(
                        "result for {host} has port 0"
                    )));
                }
            }
            if let Some(pair) = results.windows(2).find(|w| w[0].port == w[1].port) {
                return Err(Error::AssessmentInput(format!(
                    "port {} listed twice for {host}",
                    pair[0].port
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses the export format. Anything that is not a host to
    /// list-of-results mapping is an [`Error::AssessmentInput`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::AssessmentInput(e.to_string()))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

impl FromIterator<(String, Vec<ScanResult>)> for ScanResults {
    fn from_iter<T: IntoIterator<Item = (String, Vec<ScanResult>)>>(iter: T) -> Self {
        let mut results = ScanResults::new();
        for (host, entries) in iter {
            results.insert(host, entries);
        }
        results
    }
}

#[derive(Serialize)]
struct ExportEntry<'a> {
    port: u16,
    state: PortState,
    service: &'a str,
    version: Option<&'a str>,
    banner: &'a str,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a ScanResult> for ExportEntry<'a> {
    fn from(result: &'a ScanResult) -> Self {
        Self {
            port: result.port,
            state: result.state,
            service: &result.service,
            version: result.version.as_deref(),
            banner: &result.banner,
            timestamp: result.timestamp,
        }
    }
}

#[derive(Deserialize)]
struct ImportEntry {
    port: u16,
    #[serde(default)]
    state: PortState,
    #[serde(default)]
    service: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    banner: String,
    timestamp: DateTime<Utc>,
}

impl ImportEntry {
    fn into_result(self, host: &str) -> ScanResult {
        ScanResult {
            host: host.to_owned(),
            port: self.port,
            state: self.state,
            service: self.service,
            version: self.version.filter(|v| !v.is_empty()),
            banner: self.banner,
            timestamp: self.timestamp,
        }
    }
}

impl Serialize for ScanResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.hosts.len()))?;
        for (host, results) in &self.hosts {
            let entries: Vec<ExportEntry<'_>> = results.iter().map(ExportEntry::from).collect();
            map.serialize_entry(host, &entries)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScanResults {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ResultsVisitor;

        impl<'de> Visitor<'de> for ResultsVisitor {
            type Value = ScanResults;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of host to a list of scan results")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<ScanResults, A::Error> {
                let mut results = ScanResults::new();
                while let Some((host, entries)) = access.next_entry::<String, Vec<ImportEntry>>()? {
                    if results.get(&host).is_some() {
                        return Err(de::Error::custom(format!("host {host:?} appears twice")));
                    }
                    let entries = entries
                        .into_iter()
                        .map(|entry| entry.into_result(&host))
                        .collect();
                    results.insert(host, entries);
                }
                Ok(results)
            }
        }

        deserializer.deserialize_map(ResultsVisitor)
    }
}
