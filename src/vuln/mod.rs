//! Rule-based assessment of scan results.
//!
//! [`VulnerabilityRuleEngine::assess`] runs a fixed battery of checks over
//! every open port and builds a fresh [`AssessmentReport`]. The engine holds
//! only its immutable check list, so one instance can serve concurrent
//! assessments.
use chrono::Utc;
use log::debug;
use std::collections::BTreeSet;
use std::fmt;

pub mod finding;
pub mod rules;

pub use finding::{AssessmentReport, AssessmentSummary, SecurityIssue, Severity, Vulnerability};
use finding::histogram;
use rules::{default_checks, Check, Findings, DANGEROUS_PORTS};

use crate::error::Result;
use crate::model::{PortState, ScanResults};

/// General hardening advice included in every report.
pub const BASE_RECOMMENDATIONS: [&str; 6] = [
    "Keep exposed services patched and up to date",
    "Disable unnecessary services and close unused ports",
    "Use network segmentation to limit exposure",
    "Implement security monitoring and logging",
    "Deploy intrusion detection systems",
    "Conduct regular security assessments",
];

const HIGH_SEVERITY_ADVICE: &str = "Address high-severity vulnerabilities immediately";
const WEAK_PROTOCOL_ADVICE: &str = "Replace insecure protocols with secure alternatives";
const DATABASE_ADVICE: &str = "Implement proper database access controls";
const REMOTE_ADMIN_ADVICE: &str =
    "Restrict remote administration services to a VPN or trusted management networks";
const DEFAULT_PORT_ADVICE: &str = "Use non-standard ports for administrative services";

pub struct VulnerabilityRuleEngine {
    checks: Vec<Box<dyn Check>>,
}

impl fmt::Debug for VulnerabilityRuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulnerabilityRuleEngine")
            .field("checks", &self.checks.iter().map(|c| c.kind()).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for VulnerabilityRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VulnerabilityRuleEngine {
    /// An engine running the standard battery.
    pub fn new() -> Self {
        Self {
            checks: default_checks(),
        }
    }

    /// An engine running `checks`, in order.
    pub fn with_checks(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    /// Assesses `scan_results`.
    ///
    /// Fails with [`crate::error::Error::AssessmentInput`] when the mapping
    /// is inconsistent. Well-formed input never fails, and empty input gives
    /// a report with zero counts and the base recommendations.
    pub fn assess(&self, scan_results: &ScanResults) -> Result<AssessmentReport> {
        scan_results.validate()?;

        let at = Utc::now();
        let mut findings = Findings::default();
        let mut open_ports = 0;

        for (_, results) in scan_results.iter() {
            for result in results.iter().filter(|r| r.state == PortState::Open) {
                open_ports += 1;
                for check in &self.checks {
                    check.evaluate(result, at, &mut findings);
                }
            }
        }

        debug!(
            "Assessment of {} hosts found {} vulnerabilities and {} security issues",
            scan_results.len(),
            findings.vulnerabilities.len(),
            findings.security_issues.len()
        );

        let summary = AssessmentSummary {
            total_hosts: scan_results.len(),
            total_open_ports: open_ports,
            total_vulnerabilities: findings.vulnerabilities.len(),
            total_security_issues: findings.security_issues.len(),
            severity_distribution: histogram(findings.vulnerabilities.iter().map(|v| v.severity)),
            risk_distribution: histogram(findings.security_issues.iter().map(|i| i.risk_level)),
            affected_hosts: findings
                .vulnerabilities
                .iter()
                .map(|v| v.host.clone())
                .collect::<BTreeSet<_>>(),
            assessment_timestamp: at,
        };
        let recommendations = recommendations(&findings);

        Ok(AssessmentReport {
            vulnerabilities: findings.vulnerabilities,
            security_issues: findings.security_issues,
            summary,
            recommendations,
        })
    }
}

/// Base list followed by advice that depends on what was found.
fn recommendations(findings: &Findings) -> Vec<String> {
    let has_vuln = |prefix: &str| findings.vulnerabilities.iter().any(|v| v.id.starts_with(prefix));
    let has_issue = |prefix: &str| findings.security_issues.iter().any(|i| i.id.starts_with(prefix));

    let high = findings
        .vulnerabilities
        .iter()
        .any(|v| v.severity >= Severity::High);
    let remote_admin = findings.security_issues.iter().any(|i| {
        DANGEROUS_PORTS
            .get(&i.port)
            .is_some_and(|p| p.remote_admin && i.id.starts_with("DANGEROUS_PORT"))
    });

    let extras = [
        (high, HIGH_SEVERITY_ADVICE),
        (has_vuln("WEAK_PROTO"), WEAK_PROTOCOL_ADVICE),
        (has_vuln("DB_EXPOSURE"), DATABASE_ADVICE),
        (remote_admin, REMOTE_ADMIN_ADVICE),
        (has_issue("DEFAULT_PORT"), DEFAULT_PORT_ADVICE),
    ];

    BASE_RECOMMENDATIONS
        .iter()
        .copied()
        .chain(extras.into_iter().filter(|(applies, _)| *applies).map(|(_, advice)| advice))
        .map(str::to_owned)
        .collect()
}
