//! Finding types produced by an assessment.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Result;

/// Severity of a vulnerability, or risk level of a security issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no security impact
    #[default]
    Info,
    Low,
    Medium,
    High,
    /// Immediate action required
    Critical,
}

impl Severity {
    /// Every level, lowest first.
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Convert CVSS 3.x score to severity
    pub fn from_cvss(score: f32) -> Self {
        match score {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s >= 0.1 => Severity::Low,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts per level, with every level present even when zero.
pub type Histogram = BTreeMap<Severity, usize>;

/// Builds a [`Histogram`] over `levels`.
pub fn histogram(levels: impl IntoIterator<Item = Severity>) -> Histogram {
    let mut counts: Histogram = Severity::ALL.iter().map(|&level| (level, 0)).collect();
    for level in levels {
        *counts.entry(level).or_default() += 1;
    }
    counts
}

/// A weakness tied to a specific service on a specific host and port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Stable for identical input; usable as a dedup key.
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub cvss_score: f32,
    pub affected_service: String,
    pub host: String,
    pub port: u16,
    pub evidence: String,
    pub remediation: String,
    pub references: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A configuration or exposure concern that is not a vulnerability by
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub risk_level: Severity,
    pub host: String,
    pub port: u16,
    pub service: String,
    pub evidence: String,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub total_hosts: usize,
    pub total_open_ports: usize,
    pub total_vulnerabilities: usize,
    pub total_security_issues: usize,
    /// Vulnerabilities per severity. Sums to `total_vulnerabilities`.
    pub severity_distribution: Histogram,
    /// Security issues per risk level. Sums to `total_security_issues`.
    pub risk_distribution: Histogram,
    /// Hosts with at least one vulnerability.
    pub affected_hosts: BTreeSet<String>,
    pub assessment_timestamp: DateTime<Utc>,
}

/// Everything one assessment produced. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub vulnerabilities: Vec<Vulnerability>,
    pub security_issues: Vec<SecurityIssue>,
    pub summary: AssessmentSummary,
    pub recommendations: Vec<String>,
}

impl AssessmentReport {
    /// Highest severity among vulnerabilities and security issues.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.vulnerabilities
            .iter()
            .map(|v| v.severity)
            .chain(self.security_issues.iter().map(|i| i.risk_level))
            .max()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
