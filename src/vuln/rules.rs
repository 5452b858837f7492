//! The battery of heuristic checks and the static tables behind them.
//!
//! Every check looks at one open port at a time and either emits findings
//! or stays silent. Checks never see each other's output.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::finding::{SecurityIssue, Severity, Vulnerability};
use crate::model::ScanResult;

/// Clear-text protocol entry. Severity follows from the CVSS score.
#[derive(Debug, Clone, Copy)]
pub struct WeakProtocol {
    pub cvss: f32,
    pub alternative: &'static str,
}

/// Services that move credentials or data in clear text.
pub static WEAK_PROTOCOLS: Lazy<HashMap<&'static str, WeakProtocol>> = Lazy::new(|| {
    let weak = |cvss, alternative| WeakProtocol { cvss, alternative };
    HashMap::from([
        ("telnet", weak(7.5, "SSH")),
        ("ftp", weak(5.3, "SFTP or FTPS")),
        ("rlogin", weak(7.5, "SSH")),
        ("rsh", weak(7.5, "SSH")),
        ("rexec", weak(7.5, "SSH")),
        ("tftp", weak(5.3, "SFTP or SCP")),
        ("pop3", weak(5.3, "POP3S (port 995)")),
        ("imap", weak(5.3, "IMAPS (port 993)")),
        ("snmp", weak(5.3, "SNMPv3 with authentication and privacy")),
    ])
});

/// CVSS base score of a reachable database listener.
pub const DATABASE_EXPOSURE_CVSS: f32 = 7.5;

/// Database product entry: service label and display name.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseProduct {
    pub service: &'static str,
    pub name: &'static str,
}

/// Default ports of database products.
pub static DATABASE_PORTS: Lazy<HashMap<u16, DatabaseProduct>> = Lazy::new(|| {
    let db = |service, name| DatabaseProduct { service, name };
    HashMap::from([
        (1433, db("mssql", "Microsoft SQL Server")),
        (1521, db("oracle", "Oracle")),
        (3306, db("mysql", "MySQL")),
        (5432, db("postgresql", "PostgreSQL")),
        (5984, db("couchdb", "CouchDB")),
        (6379, db("redis", "Redis")),
        (9200, db("elasticsearch", "Elasticsearch")),
        (11211, db("memcached", "Memcached")),
        (27017, db("mongodb", "MongoDB")),
    ])
});

/// Commonly targeted port entry.
#[derive(Debug, Clone, Copy)]
pub struct DangerousPort {
    pub risk: Severity,
    pub what: &'static str,
    pub recommendation: &'static str,
    /// Remote administration surface.
    pub remote_admin: bool,
}

/// Ports attackers commonly go after first.
pub static DANGEROUS_PORTS: Lazy<HashMap<u16, DangerousPort>> = Lazy::new(|| {
    let port = |risk, what, recommendation, remote_admin| DangerousPort {
        risk,
        what,
        recommendation,
        remote_admin,
    };
    HashMap::from([
        (
            135,
            port(
                Severity::Medium,
                "MSRPC endpoint mapper",
                "Block port 135 at the perimeter and restrict it to trusted hosts",
                false,
            ),
        ),
        (
            139,
            port(
                Severity::Medium,
                "NetBIOS session service",
                "Disable NetBIOS over TCP/IP where it is not needed",
                false,
            ),
        ),
        (
            445,
            port(
                Severity::Medium,
                "SMB file sharing",
                "Ensure port 445 is properly secured or close if not needed",
                false,
            ),
        ),
        (
            3389,
            port(
                Severity::High,
                "Remote Desktop",
                "Ensure RDP is properly secured with strong authentication and consider VPN access",
                true,
            ),
        ),
        (
            5900,
            port(
                Severity::High,
                "VNC remote desktop",
                "Require strong VNC authentication and only expose it through a VPN or SSH tunnel",
                true,
            ),
        ),
        (
            5985,
            port(
                Severity::Medium,
                "WinRM over HTTP",
                "Use WinRM over HTTPS (5986) and restrict it to management networks",
                true,
            ),
        ),
    ])
});

/// Service running on its conventional port.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPort {
    pub port: u16,
    pub category: &'static str,
    pub recommendation: &'static str,
}

/// Conventional ports of services that are commonly moved off them.
pub static DEFAULT_PORTS: Lazy<HashMap<&'static str, DefaultPort>> = Lazy::new(|| {
    let default = |port, category, recommendation| DefaultPort {
        port,
        category,
        recommendation,
    };
    HashMap::from([
        (
            "ssh",
            default(
                22,
                "SSH Security",
                "Consider changing SSH to a non-standard port and implement fail2ban",
            ),
        ),
        (
            "ftp",
            default(21, "FTP Security", "Move FTP off port 21 or replace it with SFTP"),
        ),
        (
            "telnet",
            default(23, "Remote Access Security", "Disable telnet and use SSH instead"),
        ),
        (
            "rdp",
            default(
                3389,
                "Remote Access Security",
                "Move RDP off port 3389 and put it behind a VPN or RD Gateway",
            ),
        ),
        (
            "ms-wbt-server",
            default(
                3389,
                "Remote Access Security",
                "Move RDP off port 3389 and put it behind a VPN or RD Gateway",
            ),
        ),
        (
            "vnc",
            default(5900, "Remote Access Security", "Move VNC off port 5900 and tunnel it over SSH"),
        ),
        (
            "mysql",
            default(
                3306,
                "Database Security",
                "Bind MySQL to internal interfaces or move it off the default port",
            ),
        ),
        (
            "postgresql",
            default(
                5432,
                "Database Security",
                "Bind PostgreSQL to internal interfaces or move it off the default port",
            ),
        ),
    ])
});

/// Builds the deterministic id of a finding.
///
/// `DB_EXPOSURE`, `mysql`, `10.0.0.5`, `3306` gives
/// `DB_EXPOSURE_MYSQL_10.0.0.5_3306`.
pub fn finding_id(kind: &str, service: &str, host: &str, port: u16) -> String {
    let service = if service.is_empty() {
        "UNKNOWN".to_owned()
    } else {
        service
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    };
    format!("{kind}_{service}_{host}_{port}")
}

/// Per-call accumulator. Created fresh for every assessment.
#[derive(Debug, Default)]
pub struct Findings {
    pub vulnerabilities: Vec<Vulnerability>,
    pub security_issues: Vec<SecurityIssue>,
}

/// One heuristic over a single open port.
pub trait Check: Send + Sync {
    /// Prefix of the ids this check emits.
    fn kind(&self) -> &'static str;

    fn evaluate(&self, result: &ScanResult, at: DateTime<Utc>, findings: &mut Findings);
}

fn evidence(result: &ScanResult) -> String {
    let mut evidence = format!(
        "Port {} open running {}",
        result.port,
        if result.service.is_empty() { "an unknown service" } else { result.service.as_str() }
    );
    if let Some(version) = &result.version {
        evidence.push_str(&format!(" ({version})"));
    }
    if !result.banner.is_empty() {
        evidence.push_str(&format!(", banner: {}", result.banner));
    }
    evidence
}

/// Clear-text protocols.
#[derive(Debug, Default)]
pub struct WeakProtocolCheck;

impl Check for WeakProtocolCheck {
    fn kind(&self) -> &'static str {
        "WEAK_PROTO"
    }

    fn evaluate(&self, result: &ScanResult, at: DateTime<Utc>, findings: &mut Findings) {
        let service = result.service.to_ascii_lowercase();
        let Some(weak) = WEAK_PROTOCOLS.get(service.as_str()) else {
            return;
        };
        let upper = service.to_ascii_uppercase();
        findings.vulnerabilities.push(Vulnerability {
            id: finding_id(self.kind(), &service, &result.host, result.port),
            title: format!("Insecure Protocol: {upper}"),
            description: format!(
                "{upper} transmits data, including credentials, in clear text and can be intercepted"
            ),
            severity: Severity::from_cvss(weak.cvss),
            cvss_score: weak.cvss,
            affected_service: service.clone(),
            host: result.host.clone(),
            port: result.port,
            evidence: evidence(result),
            remediation: format!("Replace {upper} with {}", weak.alternative),
            references: vec!["https://cwe.mitre.org/data/definitions/319.html".to_owned()],
            timestamp: at,
        });
    }
}

/// Database listeners reachable from the scanning position.
#[derive(Debug, Default)]
pub struct DatabaseExposureCheck;

impl Check for DatabaseExposureCheck {
    fn kind(&self) -> &'static str {
        "DB_EXPOSURE"
    }

    fn evaluate(&self, result: &ScanResult, at: DateTime<Utc>, findings: &mut Findings) {
        let Some(db) = DATABASE_PORTS.get(&result.port) else {
            return;
        };
        findings.vulnerabilities.push(Vulnerability {
            id: finding_id(self.kind(), db.service, &result.host, result.port),
            title: format!("Exposed {} Database", db.name),
            description: format!(
                "{} is reachable over the network on port {}",
                db.name, result.port
            ),
            severity: Severity::from_cvss(DATABASE_EXPOSURE_CVSS),
            cvss_score: DATABASE_EXPOSURE_CVSS,
            affected_service: db.service.to_owned(),
            host: result.host.clone(),
            port: result.port,
            evidence: evidence(result),
            remediation: "Ensure database is properly secured with authentication and access controls"
                .to_owned(),
            references: vec!["https://cwe.mitre.org/data/definitions/284.html".to_owned()],
            timestamp: at,
        });
    }
}

/// Commonly targeted ports.
#[derive(Debug, Default)]
pub struct DangerousPortCheck;

impl Check for DangerousPortCheck {
    fn kind(&self) -> &'static str {
        "DANGEROUS_PORT"
    }

    fn evaluate(&self, result: &ScanResult, at: DateTime<Utc>, findings: &mut Findings) {
        let Some(dangerous) = DANGEROUS_PORTS.get(&result.port) else {
            return;
        };
        findings.security_issues.push(SecurityIssue {
            id: finding_id(self.kind(), &result.service, &result.host, result.port),
            category: "Network Security".to_owned(),
            title: format!("Potentially Dangerous Port Open: {}", result.port),
            description: format!(
                "Port {} ({}) is a common target for attacks",
                result.port, dangerous.what
            ),
            risk_level: dangerous.risk,
            host: result.host.clone(),
            port: result.port,
            service: result.service.clone(),
            evidence: evidence(result),
            recommendation: dangerous.recommendation.to_owned(),
            timestamp: at,
        });
    }
}

/// Services left on their conventional ports.
#[derive(Debug, Default)]
pub struct DefaultPortCheck;

impl Check for DefaultPortCheck {
    fn kind(&self) -> &'static str {
        "DEFAULT_PORT"
    }

    fn evaluate(&self, result: &ScanResult, at: DateTime<Utc>, findings: &mut Findings) {
        let service = result.service.to_ascii_lowercase();
        let Some(default) = DEFAULT_PORTS.get(service.as_str()) else {
            return;
        };
        if default.port != result.port {
            return;
        }
        let upper = service.to_ascii_uppercase();
        findings.security_issues.push(SecurityIssue {
            id: finding_id(self.kind(), &service, &result.host, result.port),
            category: default.category.to_owned(),
            title: format!("{upper} Running on Default Port"),
            description: format!(
                "{upper} is running on its default port {}, which automated scans probe first",
                result.port
            ),
            risk_level: Severity::Medium,
            host: result.host.clone(),
            port: result.port,
            service: service.clone(),
            evidence: evidence(result),
            recommendation: default.recommendation.to_owned(),
            timestamp: at,
        });
    }
}

/// The battery, in evaluation order.
pub fn default_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(WeakProtocolCheck),
        Box::new(DatabaseExposureCheck),
        Box::new(DangerousPortCheck),
        Box::new(DefaultPortCheck),
    ]
}
