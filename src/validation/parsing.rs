//! Parsing of raw command output.
//!
//! Remote workloads expose no machine-readable health API, so checks read
//! the output of the same tools an operator would run (`ip`, `ss`, `ping`,
//! `ovs-vsctl`, `iperf3`). Everything here is a pure function of the text.
//!
//! The containment checks are deliberately approximate: an address or port
//! that happens to be a substring of an unrelated field still matches.
//! Callers pass full dotted addresses and rely on the protocol-specific
//! `ss` flags to narrow the socket table.

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

fn compile(pattern: &str) -> Result<Regex, ParseError> {
    Regex::new(pattern).map_err(|e| ParseError::RegexCompilation(e.to_string()))
}

/// Markers that each indicate at least one successful echo exchange.
///
/// Different ping implementations format success differently, so any one
/// of them is accepted.
pub const REACHABILITY_MARKERS: &[&str] = &[" 0% packet loss", "bytes from", "ttl="];

/// Literal containment of an address in interface listing output.
pub fn contains_address(output: &str, address: &str) -> bool {
    !address.is_empty() && output.contains(address)
}

/// Literal containment of a port number in socket table output.
pub fn lists_port(output: &str, port: u16) -> bool {
    output.contains(&port.to_string())
}

/// Check ping output for any success marker.
pub fn reachability_confirmed(output: &str) -> bool {
    REACHABILITY_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}

/// Check `ovs-vsctl show` output for VXLAN ports.
pub fn ovs_mentions_vxlan(output: &str) -> bool {
    output.to_lowercase().contains("vxlan")
}

/// Bridge names from `ovs-vsctl list-br`, one per line.
pub fn parse_bridge_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Non-loopback interface names from `ip link show`.
///
/// Header lines look like `3: n2@if12: <BROADCAST,MULTICAST,UP> mtu 1450 ...`;
/// the peer suffix after `@` is dropped.
pub fn parse_interface_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with(' ') && !line.starts_with('\t'))
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty() && !name.starts_with("lo"))
        .collect()
}

/// First address from `hostname -i` output.
pub fn parse_hostname_address(output: &str) -> Option<String> {
    output.split_whitespace().next().map(String::from)
}

/// Pod annotation Multus writes with the addresses of every attachment.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// One entry of the network-status annotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachedNetwork {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Parse the network-status annotation, a JSON list of attachments.
pub fn parse_network_status(annotation: &str) -> Result<Vec<AttachedNetwork>, ParseError> {
    serde_json::from_str(annotation).map_err(|e| ParseError::Parse(e.to_string()))
}

/// First address of the first attachment whose interface matches.
pub fn attachment_address(
    networks: &[AttachedNetwork],
    interface_matches: impl Fn(&str) -> bool,
) -> Option<String> {
    networks
        .iter()
        .find(|n| n.interface.as_deref().is_some_and(&interface_matches))
        .and_then(|n| n.ips.first().cloned())
}

/// Most recent connected-gNB count the AMF logged.
pub fn parse_gnb_count(logs: &str) -> Result<Option<u32>, ParseError> {
    let re = compile(r"Number of gNBs is now (\d+)")?;
    Ok(re
        .captures_iter(logs)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}

/// Summary statistics from ping output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    pub loss_percent: f64,
    /// Average round-trip time, when the summary includes one
    pub rtt_avg_ms: Option<f64>,
}

impl PingStats {
    /// Parse the trailing summary of iputils or busybox ping output.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let summary = compile(
            r"(\d+) packets transmitted, (\d+) (?:packets )?received.*?([\d.]+)% packet loss",
        )?;
        let rtt = compile(r"(?:rtt|round-trip) min/avg/max(?:/mdev)? = [\d.]+/([\d.]+)/")?;

        let caps = summary
            .captures(output)
            .ok_or_else(|| ParseError::MissingField("packet loss summary".to_string()))?;

        let number = |idx: usize| -> Result<&str, ParseError> {
            caps.get(idx)
                .map(|m| m.as_str())
                .ok_or_else(|| ParseError::MissingField(format!("summary group {idx}")))
        };

        let transmitted = number(1)?
            .parse()
            .map_err(|e| ParseError::Parse(format!("transmitted: {e}")))?;
        let received = number(2)?
            .parse()
            .map_err(|e| ParseError::Parse(format!("received: {e}")))?;
        let loss_percent = number(3)?
            .parse()
            .map_err(|e| ParseError::Parse(format!("packet loss: {e}")))?;

        let rtt_avg_ms = rtt
            .captures(output)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        Ok(PingStats {
            transmitted,
            received,
            loss_percent,
            rtt_avg_ms,
        })
    }
}

/// Throughput in Mbit/s from iperf3 client output.
///
/// Prefers the last receiver summary line, then the last sender line.
pub fn parse_iperf_mbps(output: &str) -> Result<f64, ParseError> {
    let line_rate = compile(r"([\d.]+)\s+([KMG]?)bits/sec")?;

    let rate_on = |role: &str| {
        output
            .lines()
            .filter(|line| line.trim_end().ends_with(role))
            .filter_map(|line| line_rate.captures(line))
            .last()
            .and_then(|caps| {
                let value: f64 = caps.get(1)?.as_str().parse().ok()?;
                let scale = match caps.get(2).map(|m| m.as_str()) {
                    Some("K") => 0.001,
                    Some("G") => 1000.0,
                    Some("M") => 1.0,
                    _ => 0.000_001,
                };
                Some(value * scale)
            })
    };

    rate_on("receiver")
        .or_else(|| rate_on("sender"))
        .ok_or_else(|| ParseError::MissingField("bitrate summary".to_string()))
}

#[derive(Debug, Deserialize)]
struct IperfReport {
    end: IperfEnd,
}

#[derive(Debug, Deserialize)]
struct IperfEnd {
    sum_received: Option<IperfSum>,
    sum_sent: Option<IperfSum>,
}

#[derive(Debug, Deserialize)]
struct IperfSum {
    bits_per_second: f64,
}

/// Throughput in Mbit/s from `iperf3 -J` output.
///
/// Falls back to the text summary when the output is not JSON, which is
/// what older iperf3 builds print on error.
pub fn parse_iperf_json_mbps(output: &str) -> Result<f64, ParseError> {
    match serde_json::from_str::<IperfReport>(output) {
        Ok(report) => report
            .end
            .sum_received
            .or(report.end.sum_sent)
            .map(|sum| sum.bits_per_second / 1_000_000.0)
            .ok_or_else(|| ParseError::MissingField("end.sum_received".to_string())),
        Err(_) => parse_iperf_mbps(output),
    }
}
