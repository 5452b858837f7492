//! rustaudit command line entry point.
use anyhow::Context;
use colored::Colorize;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use rustaudit::address::parse_range;
use rustaudit::discovery::{DiscoveryConfig, HostDiscoverer};
use rustaudit::error::Error;
use rustaudit::input::{parse_ports_and_ranges, Config, Opts};
use rustaudit::model::ScanResults;
use rustaudit::scanner::{ScanConfig, Scanner};
use rustaudit::vuln::{AssessmentReport, VulnerabilityRuleEngine};
use rustaudit::{detail, opening, output, warning};

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::process::exit;
use std::time::Duration;

// Average value for Ubuntu
#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Safest batch size based on experimentation
const AVERAGE_BATCH_SIZE: u16 = 3000;
const DISCOVERY_TIMEOUT_CAP: Duration = Duration::from_secs(1);

#[cfg(not(tarpaulin_include))]
#[tokio::main]
/// Reads the command line arguments and configuration file, then discovers,
/// scans and optionally assesses the targets.
async fn main() {
    let mut opts: Opts = Opts::read();
    let config = match Config::read(opts.config_path.clone()) {
        Ok(config) => config,
        Err(e) => {
            warning!(format!("{e:#}"));
            exit(1);
        }
    };
    opts.merge(&config);

    let default_filter = if opts.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();
    debug!("Main() `opts` arguments are {opts:?}");

    if !opts.greppable && !opts.accessible && !opts.no_banner {
        opening!();
    }

    if let Err(e) = run(&opts).await {
        let message = match e.downcast_ref::<Error>() {
            Some(err) => format!("{} ({})", err, err.code()),
            None => format!("{e:#}"),
        };
        warning!(message.red().to_string());
        exit(1);
    }
}

#[cfg(not(tarpaulin_include))]
async fn run(opts: &Opts) -> anyhow::Result<()> {
    if let Some(path) = &opts.input {
        let results = ScanResults::read_json(path)
            .with_context(|| format!("reading scan results from {}", path.display()))?;
        detail!(
            format!("Assessing {} hosts from {}", results.len(), path.display()),
            opts.greppable,
            opts.accessible
        );
        return assess(opts, &results);
    }

    // Fail on a bad port specification before anything is probed.
    parse_ports_and_ranges(&opts.ports).map_err(Error::InvalidPorts)?;
    if opts.addresses.is_empty() {
        return Err(Error::InvalidTarget("no targets given, use -a".to_owned()).into());
    }

    #[cfg(unix)]
    let batch_size = infer_batch_size(opts, adjust_ulimit_size(opts));

    #[cfg(not(unix))]
    let batch_size = AVERAGE_BATCH_SIZE.min(opts.batch_size);

    let hosts = targets(opts, usize::from(batch_size)).await?;
    if hosts.is_empty() {
        warning!("No live hosts found.", opts.greppable, opts.accessible);
        return Ok(());
    }

    let scanner = Scanner::new(ScanConfig {
        timeout: Duration::from_millis(u64::from(opts.timeout)),
        banner_timeout: Duration::from_millis(u64::from(opts.timeout)).min(Duration::from_secs(1)),
        batch_size: usize::from(batch_size),
        service_detection: opts.service_detection,
        scan_order: opts.scan_order,
        exclude_ports: opts.exclude_ports.clone().unwrap_or_default(),
        delegate_timeout: Duration::from_secs(u64::from(opts.host_timeout)),
    })
    .await;
    if opts.scan_kind.needs_raw_sockets() && scanner.delegate().is_none() {
        warning!(
            format!("nmap not found, running a connect scan instead of {:?}.", opts.scan_kind),
            opts.greppable,
            opts.accessible
        );
    }

    let spinner = spinner(opts, format!("Scanning {} hosts", hosts.len()));
    let results = scanner.scan(&hosts, &opts.ports, opts.scan_kind).await;
    spinner.finish_and_clear();
    let results = results?;

    print_results(opts, &results);

    if let Some(path) = &opts.output {
        results
            .write_json(path)
            .with_context(|| format!("writing scan results to {}", path.display()))?;
        detail!(
            format!("Scan results written to {}", path.display()),
            opts.greppable,
            opts.accessible
        );
    }

    if opts.assess || opts.report.is_some() {
        assess(opts, &results)?;
    }
    Ok(())
}

/// Expands the supplied targets, runs discovery over address ranges and
/// drops excluded addresses. Host names are passed through untouched.
async fn targets(opts: &Opts, batch_size: usize) -> anyhow::Result<Vec<String>> {
    let discoverer = HostDiscoverer::new(DiscoveryConfig {
        timeout: Duration::from_millis(u64::from(opts.timeout)).min(DISCOVERY_TIMEOUT_CAP),
        batch_size,
        ..DiscoveryConfig::default()
    });
    let excluded = excluded_addresses(opts);

    let mut hosts: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for address in &opts.addresses {
        let found: Vec<String> = if !is_range(address) {
            vec![address.clone()]
        } else if opts.skip_discovery {
            parse_range(address)?.iter().map(IpAddr::to_string).collect()
        } else {
            let spinner = spinner(opts, format!("Discovering hosts in {address}"));
            let live = discoverer.discover(address, opts.discovery).await;
            spinner.finish_and_clear();
            let live = live?;
            detail!(
                format!("{} live hosts in {address}", live.len()),
                opts.greppable,
                opts.accessible
            );
            live.iter().map(IpAddr::to_string).collect()
        };

        for host in found {
            if !excluded.contains(&host) && seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }
    Ok(hosts)
}

/// Whether `address` is an address, CIDR, dash range or list rather than a
/// host name.
fn is_range(address: &str) -> bool {
    address.contains(',')
        || address.contains('/')
        || address.parse::<IpAddr>().is_ok()
        || address
            .split_once('-')
            .is_some_and(|(start, _)| start.trim().parse::<Ipv4Addr>().is_ok())
}

fn excluded_addresses(opts: &Opts) -> HashSet<String> {
    let mut excluded = HashSet::new();
    for entry in opts.exclude_addresses.iter().flatten() {
        match parse_range(entry) {
            Ok(ips) => excluded.extend(ips.iter().map(IpAddr::to_string)),
            Err(_) => {
                excluded.insert(entry.clone());
            }
        }
    }
    excluded
}

fn spinner(opts: &Opts, message: String) -> ProgressBar {
    if opts.greppable || opts.accessible {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn print_results(opts: &Opts, results: &ScanResults) {
    for (host, open) in results.iter() {
        if opts.greppable {
            let ports: Vec<String> = open.iter().map(|r| r.port.to_string()).collect();
            println!("{} -> [{}]", host, ports.join(","));
            continue;
        }
        if open.is_empty() {
            detail!(format!("{host}: no open ports"), false, opts.accessible);
            continue;
        }
        output!(format!("{host}"), false, opts.accessible);
        for result in open {
            let line = format!(
                "  {:>5}  {:<12} {}",
                result.port,
                result.service,
                result.version.as_deref().unwrap_or("")
            );
            if opts.accessible {
                println!("{line}");
            } else {
                println!("{}", line.purple());
            }
        }
    }
}

fn assess(opts: &Opts, results: &ScanResults) -> anyhow::Result<()> {
    let report = VulnerabilityRuleEngine::new().assess(results)?;

    if !opts.greppable {
        print_report(opts, &report);
    }

    if let Some(path) = &opts.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("writing assessment report to {}", path.display()))?;
        detail!(
            format!("Assessment report written to {}", path.display()),
            opts.greppable,
            opts.accessible
        );
    }
    Ok(())
}

fn print_report(opts: &Opts, report: &AssessmentReport) {
    let summary = &report.summary;
    output!(
        format!(
            "{} vulnerabilities and {} security issues on {} hosts ({} open ports)",
            summary.total_vulnerabilities,
            summary.total_security_issues,
            summary.total_hosts,
            summary.total_open_ports
        ),
        false,
        opts.accessible
    );
    if let Some(highest) = report.highest_severity() {
        detail!(format!("Highest severity: {highest}"), false, opts.accessible);
    }

    for vulnerability in &report.vulnerabilities {
        warning!(
            format!(
                "[{}] {} on {}:{} (CVSS {:.1})",
                vulnerability.severity,
                vulnerability.title,
                vulnerability.host,
                vulnerability.port,
                vulnerability.cvss_score
            ),
            false,
            opts.accessible
        );
    }
    for issue in &report.security_issues {
        detail!(
            format!(
                "[{}] {}: {} on {}:{}",
                issue.risk_level, issue.category, issue.title, issue.host, issue.port
            ),
            false,
            opts.accessible
        );
    }

    println!();
    output!("Recommendations:", false, opts.accessible);
    for (n, recommendation) in report.recommendations.iter().enumerate() {
        println!("  {}. {recommendation}", n + 1);
    }
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!("ERROR. Failed to set ulimit value.", opts.greppable, opts.accessible);
        }
    }

    Resource::NOFILE
        .get()
        .map(|(soft, _)| soft)
        .unwrap_or(DEFAULT_FILE_DESCRIPTORS_LIMIT)
}

#[cfg(unix)]
fn infer_batch_size(opts: &Opts, ulimit: u64) -> u16 {
    let mut batch_size = u64::from(opts.batch_size.max(1));

    // Keep enough descriptors free for resolvers, child processes and stdio.
    if ulimit < batch_size + 100 {
        warning!(
            "File limit is lower than default batch size. Consider upping with --ulimit. May cause harm to sensitive servers",
            opts.greppable,
            opts.accessible
        );

        batch_size = if ulimit > u64::from(AVERAGE_BATCH_SIZE) {
            u64::from(AVERAGE_BATCH_SIZE)
        } else {
            (ulimit / 2).max(1)
        };
        detail!(
            format!("Batch size lowered to {batch_size}."),
            opts.greppable,
            opts.accessible
        );
    }

    u16::try_from(batch_size).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use super::infer_batch_size;
    use super::{excluded_addresses, is_range};
    use rustaudit::input::Opts;

    #[test]
    #[cfg(unix)]
    fn batch_size_lowered() {
        let opts = Opts {
            batch_size: 1000,
            ..Opts::default()
        };
        let batch_size = infer_batch_size(&opts, 120);

        assert!(batch_size < opts.batch_size);
        assert_eq!(batch_size, 60);
    }

    #[test]
    #[cfg(unix)]
    fn batch_size_lowered_average_size() {
        let opts = Opts {
            batch_size: 50_000,
            ..Opts::default()
        };
        let batch_size = infer_batch_size(&opts, 20_000);

        assert_eq!(batch_size, 3_000);
    }

    #[test]
    #[cfg(unix)]
    fn batch_size_kept_when_limit_allows() {
        let opts = Opts {
            batch_size: 100,
            ..Opts::default()
        };
        assert_eq!(infer_batch_size(&opts, 8_000), 100);
    }

    #[test]
    fn ranges_and_names() {
        assert!(is_range("10.0.0.0/24"));
        assert!(is_range("10.0.0.1-10.0.0.9"));
        assert!(is_range("10.0.0.1,10.0.0.2"));
        assert!(is_range("::1"));
        assert!(!is_range("scanme.example.com"));
        assert!(!is_range("web-01.internal"));
    }

    #[test]
    fn excluded_ranges_expand() {
        let opts = Opts {
            exclude_addresses: Some(vec!["10.0.0.0/30".to_owned(), "db.internal".to_owned()]),
            ..Opts::default()
        };
        let excluded = excluded_addresses(&opts);
        assert!(excluded.contains("10.0.0.1"));
        assert!(excluded.contains("10.0.0.2"));
        assert!(excluded.contains("db.internal"));
    }
}
