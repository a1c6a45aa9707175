use super::{HopResult, ProbeSession, ProbeStrategy};
use crate::error::ProbeError;
use crate::target::Target;
use regex::Regex;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Instant;

const MS_PER_SECOND: u64 = 1000;

static HOP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3})\s").expect("hop line pattern is valid"));
static DOTTED_QUAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("dotted quad pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityFlavor {
    /// Windows `tracert`: timeout in milliseconds
    Tracert,
    /// BSD/Linux `traceroute`: timeout in whole seconds
    Traceroute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceUtility {
    pub program: String,
    pub flavor: UtilityFlavor,
}

impl TraceUtility {
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::new("tracert", UtilityFlavor::Tracert)
        } else {
            Self::new("traceroute", UtilityFlavor::Traceroute)
        }
    }

    pub fn new(program: &str, flavor: UtilityFlavor) -> Self {
        Self {
            program: program.to_string(),
            flavor,
        }
    }

    /// Translate the session's hop budget and timeout into utility flags.
    pub fn args(&self, session: &ProbeSession) -> Vec<String> {
        let hops = session.hop_budget.to_string();
        match self.flavor {
            UtilityFlavor::Tracert => vec![
                "-d".to_string(),
                "-h".to_string(),
                hops,
                "-w".to_string(),
                session.timeout_ms.to_string(),
                session.destination.clone(),
            ],
            UtilityFlavor::Traceroute => {
                let wait_secs = session.timeout_ms.div_ceil(MS_PER_SECOND).max(1);
                vec![
                    "-n".to_string(),
                    "-q".to_string(),
                    "1".to_string(),
                    "-m".to_string(),
                    hops,
                    "-w".to_string(),
                    wait_secs.to_string(),
                    session.destination.clone(),
                ]
            }
        }
    }
}

/// Runs the native trace utility once per session and replays its hop
/// lines one round at a time.
#[derive(Debug)]
pub struct ShelledProber {
    utility: TraceUtility,
    hops: Option<Vec<HopResult>>,
}

impl ShelledProber {
    pub fn for_host() -> Self {
        Self::new(TraceUtility::for_host())
    }

    pub fn new(utility: TraceUtility) -> Self {
        Self { utility, hops: None }
    }

    fn trace(&self, session: &ProbeSession) -> Result<Vec<HopResult>, ProbeError> {
        // The destination is passed positionally and must not parse as a flag
        if session.destination.trim_start().starts_with('-') {
            log::error!("[probe::shelled] destination_rejected: destination={}", session.destination);
            return Err(ProbeError::Utility {
                program: self.utility.program.clone(),
                reason: format!("destination {:?} looks like an option", session.destination),
            });
        }

        let args = self.utility.args(session);
        log::debug!("[probe::shelled] executing_command: program={} args={:?}", self.utility.program, args);

        let command_start = Instant::now();
        let output = Command::new(&self.utility.program)
            .args(&args)
            .output()
            .map_err(|e| {
                log::error!("[probe::shelled] command_failed: program={} error={}", self.utility.program, e);
                ProbeError::Utility {
                    program: self.utility.program.clone(),
                    reason: e.to_string(),
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hops = parse_trace_output(&stdout);

        log::debug!("[probe::shelled] command_completed: program={} duration={}ms status={} hops={}",
            self.utility.program, command_start.elapsed().as_millis(), output.status, hops.len());

        if !output.status.success() && hops.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("[probe::shelled] command_unsuccessful: program={} status={} stderr={}",
                self.utility.program, output.status, stderr.trim());
            return Err(ProbeError::Utility {
                program: self.utility.program.clone(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(hops)
    }
}

impl ProbeStrategy for ShelledProber {
    fn name(&self) -> &'static str {
        "shelled"
    }

    fn prepare(&mut self, session: &mut ProbeSession) -> Result<(), ProbeError> {
        self.hops = None;
        // Unresolvable names still get traced; matching then falls back to the literal argument
        session.destination_ip = Target::parse(&session.destination).resolve().ok();
        Ok(())
    }

    fn probe(&mut self, session: &ProbeSession) -> Result<HopResult, ProbeError> {
        if self.hops.is_none() {
            self.hops = Some(self.trace(session)?);
        }

        let hop = self
            .hops
            .as_deref()
            .unwrap_or_default()
            .iter()
            .rev()
            .find(|hop| hop.ttl == session.ttl)
            .copied()
            .unwrap_or_else(|| HopResult::miss(session.ttl));
        Ok(hop)
    }
}

/// All valid dotted-quad IPv4 addresses on a line, in order of appearance.
pub fn extract_ipv4_addresses(line: &str) -> Vec<Ipv4Addr> {
    DOTTED_QUAD
        .find_iter(line)
        .filter_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
        .collect()
}

/// Parse one output line. Returns `None` for anything but a numbered hop line.
pub fn parse_hop_line(line: &str) -> Option<HopResult> {
    let captures = HOP_LINE.captures(line)?;
    let ttl = captures[1].parse::<u8>().ok().filter(|ttl| *ttl > 0)?;

    let address = extract_ipv4_addresses(&line[captures[0].len()..]).last().copied();
    if address.is_none() {
        log::trace!("[probe::shelled] hop_without_address: ttl={} line={}", ttl, line.trim());
    }
    Some(HopResult { ttl, address })
}

pub fn parse_trace_output(output: &str) -> Vec<HopResult> {
    output.lines().filter_map(parse_hop_line).collect()
}
