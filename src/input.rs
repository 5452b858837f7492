//! Provides a means to read, parse and hold configuration options for scans.
use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Port specification used when neither the command line nor the config
/// file names one.
pub const DEFAULT_PORTS: &str = "1-1000";

/// Represents the order in which probes are submitted to the pool.
///   - Serial submits hosts in the supplied order and ports ascending.
///   - Random shuffles the port list once; hosts keep the supplied order.
///
/// Results are always reported per host in ascending port order.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScanOrder {
    /// Ascending ports, hosts in supplied order.
    #[default]
    Serial,
    /// Shuffled probe set.
    Random,
}

/// Represents the technique used to decide whether a port is open.
///   - connect performs a full TCP handshake, needs no privileges.
///   - syn and udp need raw sockets and are delegated to an external scanner
///     when one is installed, otherwise they fall back to connect.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScanKind {
    /// TCP connect scan.
    #[default]
    Connect,
    /// TCP SYN (half-open) scan.
    Syn,
    /// UDP scan.
    Udp,
}

impl ScanKind {
    /// Whether this kind needs raw-socket techniques.
    pub fn needs_raw_sockets(self) -> bool {
        matches!(self, ScanKind::Syn | ScanKind::Udp)
    }
}

/// Represents the technique used to decide whether a host is live.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    /// One echo request per candidate.
    #[default]
    Presence,
    /// Neighbour table lookup, same subnet only (Linux).
    LinkLayer,
    /// Trial connects to a short list of commonly open ports.
    CommonPorts,
}

/// Parses a port specification into a sorted, de-duplicated port list.
///
/// The grammar is a comma-separated list of tokens, each either a single
/// port or an inclusive `start-end` range. Any malformed token rejects the
/// whole specification.
///
/// ```rust
/// # use rustaudit::input::parse_ports_and_ranges;
/// assert_eq!(parse_ports_and_ranges("22,80-82,443"), Ok(vec![22, 80, 81, 82, 443]));
/// assert!(parse_ports_and_ranges("80-").is_err());
/// ```
pub fn parse_ports_and_ranges(input: &str) -> Result<Vec<u16>, String> {
    if input.trim().is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("Empty entry in port list '{input}'"));
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = parse_digits(range_parts[0].trim()).ok_or_else(|| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = parse_digits(range_parts[1].trim()).ok_or_else(|| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

/// Plain decimal digits only; `u16::from_str` would also take a leading `+`.
fn parse_digits(token: &str) -> Option<u16> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 =
        parse_digits(port_str).ok_or_else(|| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rustaudit",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Network exposure assessment: host discovery, port scanning and
/// rule-based findings.
/// WARNING Only scan networks you are authorised to assess.
pub struct Opts {
    /// A comma-delimited list of IPs, CIDRs, dash ranges or hosts to assess.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// Ports and/or port ranges to scan. Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, alias = "range", default_value = DEFAULT_PORTS)]
    pub ports: String,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the hosts and open ports.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Scan technique. syn and udp fall back to connect when no external scanner is installed.
    #[arg(long, value_enum, ignore_case = true, default_value = "connect")]
    pub scan_kind: ScanKind,

    /// Host discovery technique.
    #[arg(long, value_enum, ignore_case = true, default_value = "presence")]
    pub discovery: DiscoveryMethod,

    /// Skip host discovery and scan every target address directly.
    #[arg(long)]
    pub skip_discovery: bool,

    /// The maximum number of probes in flight at once.
    #[arg(short, long, default_value = "100")]
    pub batch_size: u16,

    /// The timeout in milliseconds before a probe is treated as refused.
    #[arg(short, long, default_value = "3000")]
    pub timeout: u32,

    /// Seconds the external scanner may spend on one host before that host
    /// is rescanned with connect probes.
    #[arg(long, default_value = "300")]
    pub host_timeout: u32,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order in which probes are submitted. Output order is not affected.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// Run protocol-specific probes against identified services to read versions.
    #[arg(long)]
    pub service_detection: bool,

    /// Run the vulnerability assessment on the scan results.
    #[arg(long)]
    pub assess: bool,

    /// Assess a previously exported scan-results file instead of scanning.
    #[arg(short, long, conflicts_with = "addresses")]
    pub input: Option<PathBuf>,

    /// Write the scan results as JSON to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the assessment report as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// A list of comma separated ports to be excluded from scanning. Example: 80,443,8080.
    #[arg(short, long, value_delimiter = ',')]
    pub exclude_ports: Option<Vec<u16>>,

    /// A list of comma separated IPs or hosts to be excluded from scanning.
    #[arg(short = 'x', long = "exclude-addresses", value_delimiter = ',')]
    pub exclude_addresses: Option<Vec<String>>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merges values found within the user configuration file into the
    /// command line options.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            addresses, ports, greppable, accessible, batch_size, timeout, host_timeout, scan_order,
            scan_kind, discovery, skip_discovery, service_detection, assess
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(ulimit, exclude_ports, exclude_addresses);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            ports: DEFAULT_PORTS.to_owned(),
            no_config: true,
            no_banner: false,
            config_path: None,
            greppable: true,
            accessible: false,
            scan_kind: ScanKind::Connect,
            discovery: DiscoveryMethod::Presence,
            skip_discovery: false,
            batch_size: 0,
            timeout: 0,
            host_timeout: 300,
            ulimit: None,
            scan_order: ScanOrder::Serial,
            service_detection: false,
            assess: false,
            input: None,
            output: None,
            report: None,
            exclude_ports: None,
            exclude_addresses: None,
            verbose: false,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    ports: Option<String>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<u16>,
    timeout: Option<u32>,
    host_timeout: Option<u32>,
    ulimit: Option<u64>,
    scan_order: Option<ScanOrder>,
    scan_kind: Option<ScanKind>,
    discovery: Option<DiscoveryMethod>,
    skip_discovery: Option<bool>,
    service_detection: Option<bool>,
    assess: Option<bool>,
    exclude_ports: Option<Vec<u16>>,
    exclude_addresses: Option<Vec<String>>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// addresses = ["10.0.0.0/24"]
    /// ports = "22,80,443,3306"
    /// scan_kind = "connect"
    /// discovery = "common-ports"
    /// exclude_ports = [9100]
    /// assess = true
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::empty()),
            },
        };

        let content = if config_path.exists() {
            fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?
        } else {
            String::new()
        };

        toml::from_str(&content)
            .with_context(|| format!("parsing configuration file {}", config_path.display()))
    }

    fn empty() -> Self {
        Self {
            addresses: None,
            ports: None,
            greppable: None,
            accessible: None,
            batch_size: None,
            timeout: None,
            host_timeout: None,
            ulimit: None,
            scan_order: None,
            scan_kind: None,
            discovery: None,
            skip_discovery: None,
            service_detection: None,
            assess: None,
            exclude_ports: None,
            exclude_addresses: None,
        }
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".rustaudit.toml");
    Some(config_path)
}
