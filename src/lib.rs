//! This crate exposes the internal functionality of the `rustaudit` network
//! assessment tool.
//!
//! rustaudit finds live hosts in a range, scans them for open TCP ports,
//! labels the services behind those ports from their banners, and runs a
//! fixed battery of heuristic checks over the results to produce an
//! assessment report.
//!
//! ## Architecture Overview
//!
//! 1. **Discovery**: [`HostDiscoverer`](crate::discovery::HostDiscoverer)
//!    sweeps a range with ping, the neighbour table or trial connects.
//! 2. **Port scan**: [`Scanner`](crate::scanner::Scanner) probes every
//!    (host, port) pair through one bounded [`ProbePool`](crate::pool::ProbePool).
//!    SYN and UDP scans go to `nmap` when it is installed.
//! 3. **Service identification**: [`service::identify`] maps port and
//!    banner to a service label, with optional deeper probes.
//! 4. **Assessment**: [`VulnerabilityRuleEngine`](crate::vuln::VulnerabilityRuleEngine)
//!    turns a [`ScanResults`](crate::model::ScanResults) mapping into an
//!    [`AssessmentReport`](crate::vuln::AssessmentReport).
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use rustaudit::input::ScanKind;
//! use rustaudit::scanner::{ScanConfig, Scanner};
//! use rustaudit::vuln::VulnerabilityRuleEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = Scanner::new(ScanConfig::default()).await;
//!     let hosts = vec!["127.0.0.1".to_owned()];
//!     let results = scanner.scan(&hosts, "22,80,443,3306", ScanKind::Connect).await?;
//!
//!     let report = VulnerabilityRuleEngine::new().assess(&results)?;
//!     for vulnerability in &report.vulnerabilities {
//!         println!("{} [{}]", vulnerability.title, vulnerability.severity);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only malformed input surfaces as an [`Error`](crate::error::Error): a bad
//! port specification, a bad discovery range, or an inconsistent scan-result
//! mapping. Refused, reset and timed-out probes simply leave the port or host
//! out of the results.
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod error;

pub mod address;

pub mod pool;

pub mod model;

pub mod port_strategy;

pub mod service;

pub mod scanner;

pub mod discovery;

pub mod vuln;
