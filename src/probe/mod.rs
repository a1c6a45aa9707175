pub mod direct;
pub mod platform;
pub mod shelled;
pub mod socket;

pub use direct::DirectProber;
pub use platform::Platform;
pub use shelled::ShelledProber;

use crate::error::ProbeError;
use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

/// Range the per-session destination port is drawn from.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 33434..=33534;
pub const DEFAULT_HOP_BUDGET: u8 = 2;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// State of one `Prober::run` invocation.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    pub destination: String,
    pub destination_ip: Option<Ipv4Addr>,
    pub hop_budget: u8,
    pub timeout_ms: u64,
    pub ttl: u8,
    pub port: u16,
}

impl ProbeSession {
    pub fn new(destination: &str, hop_budget: u8, timeout_ms: u64) -> Self {
        let port = rand::thread_rng().gen_range(EPHEMERAL_PORTS);
        Self::with_port(destination, hop_budget, timeout_ms, port)
    }

    pub fn with_port(destination: &str, hop_budget: u8, timeout_ms: u64, port: u16) -> Self {
        Self {
            destination: destination.to_string(),
            destination_ip: None,
            hop_budget,
            timeout_ms,
            ttl: 1,
            port,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// True while the current ttl may still be probed.
    pub fn in_budget(&self) -> bool {
        self.ttl <= self.hop_budget
    }

    /// Move to the next ttl. Returns false once the budget is spent.
    pub fn advance(&mut self) -> bool {
        match self.ttl.checked_add(1) {
            Some(next) => {
                self.ttl = next;
                self.in_budget()
            }
            None => false,
        }
    }

    /// Whether `ip` is the destination. Falls back to comparing against the
    /// literal destination argument when it was never resolved.
    pub fn is_destination(&self, ip: Ipv4Addr) -> bool {
        match self.destination_ip {
            Some(dst) => dst == ip,
            None => ip.to_string() == self.destination,
        }
    }
}

/// Outcome of a single probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopResult {
    pub ttl: u8,
    pub address: Option<Ipv4Addr>,
}

impl HopResult {
    pub fn responded(ttl: u8, address: Ipv4Addr) -> Self {
        Self { ttl, address: Some(address) }
    }

    pub fn miss(ttl: u8) -> Self {
        Self { ttl, address: None }
    }
}

/// What a completed run reports back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceOutcome {
    pub reached: bool,
    pub last_ip: Option<Ipv4Addr>,
}

impl fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self
            .last_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "*".to_string());
        if self.reached {
            write!(f, "reached (last hop {})", last)
        } else {
            write!(f, "not reached (last hop {})", last)
        }
    }
}

/// One way of executing probe rounds.
pub trait ProbeStrategy {
    fn name(&self) -> &'static str;

    /// Runs once before the first round. Fills in `destination_ip`.
    fn prepare(&mut self, session: &mut ProbeSession) -> Result<(), ProbeError>;

    /// Executes the round for `session.ttl`. A timeout may be reported either
    /// as `HopResult::miss` or as `ProbeError::Timeout`.
    fn probe(&mut self, session: &ProbeSession) -> Result<HopResult, ProbeError>;
}

pub struct Prober {
    destination: String,
    hop_budget: u8,
    timeout_ms: u64,
    strategy: Box<dyn ProbeStrategy>,
}

impl Prober {
    /// Build a prober using the strategy for the running platform.
    pub fn new(destination: &str, hop_budget: u8, timeout_ms: u64) -> Result<Self, ProbeError> {
        let platform = Platform::detect()?;
        Ok(Self::with_platform(destination, hop_budget, timeout_ms, platform))
    }

    pub fn with_platform(destination: &str, hop_budget: u8, timeout_ms: u64, platform: Platform) -> Self {
        Self::with_strategy(destination, hop_budget, timeout_ms, platform.strategy())
    }

    pub fn with_strategy(
        destination: &str,
        hop_budget: u8,
        timeout_ms: u64,
        strategy: Box<dyn ProbeStrategy>,
    ) -> Self {
        log::debug!("[probe] new: destination={} hop_budget={} timeout={}ms strategy={}",
            destination, hop_budget, timeout_ms, strategy.name());
        Self {
            destination: destination.to_string(),
            hop_budget,
            timeout_ms,
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn run(&mut self) -> Result<TraceOutcome, ProbeError> {
        let session = ProbeSession::new(&self.destination, self.hop_budget, self.timeout_ms);
        self.run_session(session)
    }

    fn run_session(&mut self, mut session: ProbeSession) -> Result<TraceOutcome, ProbeError> {
        let run_start = Instant::now();
        self.strategy.prepare(&mut session)?;

        log::info!("[probe] trace_starting: destination={} ip={} hops={} port={} strategy={}",
            session.destination,
            session.destination_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string()),
            session.hop_budget, session.port, self.strategy.name());

        let mut outcome = TraceOutcome::default();
        let mut in_budget = session.in_budget();

        while in_budget {
            let round_start = Instant::now();
            let hop = match self.strategy.probe(&session) {
                Ok(hop) => hop,
                Err(e) if e.is_recoverable() => HopResult::miss(session.ttl),
                Err(e) => {
                    log::error!("[probe] round_failed: destination={} ttl={} error={}",
                        session.destination, session.ttl, e);
                    return Err(e);
                }
            };

            match hop.address {
                Some(ip) => {
                    log::debug!("[probe] hop_responded: ttl={} ip={} duration={}ms",
                        session.ttl, ip, round_start.elapsed().as_millis());
                    outcome.last_ip = Some(ip);
                    if session.is_destination(ip) {
                        outcome.reached = true;
                        log::info!("[probe] destination_reached: destination={} ttl={} duration={}ms",
                            session.destination, session.ttl, run_start.elapsed().as_millis());
                        return Ok(outcome);
                    }
                }
                None => {
                    log::debug!("[probe] hop_miss: ttl={} timeout={}ms", session.ttl, session.timeout_ms);
                }
            }

            in_budget = session.advance();
        }

        log::info!("[probe] hop_budget_exhausted: destination={} hops={} last_ip={:?} duration={}ms",
            session.destination, session.hop_budget, outcome.last_ip, run_start.elapsed().as_millis());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Step = Result<Option<Ipv4Addr>, ProbeError>;

    /// Replays a fixed sequence of round outcomes and records every ttl seen.
    struct ScriptedStrategy {
        resolve_to: Result<Ipv4Addr, String>,
        steps: VecDeque<Step>,
        seen: Rc<RefCell<Vec<u8>>>,
    }

    impl ScriptedStrategy {
        fn new(resolve_to: Result<Ipv4Addr, String>, steps: Vec<Step>) -> (Self, Rc<RefCell<Vec<u8>>>) {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let strategy = Self {
                resolve_to,
                steps: steps.into(),
                seen: Rc::clone(&seen),
            };
            (strategy, seen)
        }
    }

    impl ProbeStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn prepare(&mut self, session: &mut ProbeSession) -> Result<(), ProbeError> {
            match &self.resolve_to {
                Ok(ip) => {
                    session.destination_ip = Some(*ip);
                    Ok(())
                }
                Err(reason) => Err(ProbeError::Resolution {
                    destination: session.destination.clone(),
                    reason: reason.clone(),
                }),
            }
        }

        fn probe(&mut self, session: &ProbeSession) -> Result<HopResult, ProbeError> {
            self.seen.borrow_mut().push(session.ttl);
            match self.steps.pop_front() {
                Some(Ok(Some(ip))) => Ok(HopResult::responded(session.ttl, ip)),
                Some(Ok(None)) | None => Ok(HopResult::miss(session.ttl)),
                Some(Err(e)) => Err(e),
            }
        }
    }

    fn timeout(ttl: u8) -> Step {
        Err(ProbeError::Timeout { ttl, timeout_ms: 1000 })
    }

    fn run(destination: &str, hops: u8, strategy: ScriptedStrategy) -> Result<TraceOutcome, ProbeError> {
        let mut prober = Prober::with_strategy(destination, hops, 1000, Box::new(strategy));
        prober.run()
    }

    const DEST: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    #[test]
    fn test_destination_reached_on_third_round() {
        let (strategy, seen) = ScriptedStrategy::new(
            Ok(DEST),
            vec![Ok(Some(Ipv4Addr::new(10, 0, 0, 1))), timeout(2), Ok(Some(DEST))],
        );

        let outcome = run("example.com", 3, strategy).unwrap();
        assert_eq!(outcome, TraceOutcome { reached: true, last_ip: Some(DEST) });
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_all_rounds_time_out() {
        let (strategy, seen) = ScriptedStrategy::new(Ok(DEST), vec![timeout(1), timeout(2)]);

        let outcome = run("example.com", 2, strategy).unwrap();
        assert_eq!(outcome, TraceOutcome { reached: false, last_ip: None });
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_resolution_failure_runs_no_rounds() {
        let (strategy, seen) = ScriptedStrategy::new(Err("no such host".to_string()), vec![]);

        let result = run("nowhere.invalid", 5, strategy);
        assert!(matches!(result, Err(ProbeError::Resolution { .. })));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_first_response_from_destination_stops_after_one_round() {
        let (strategy, seen) = ScriptedStrategy::new(
            Ok(DEST),
            vec![Ok(Some(DEST)), Ok(Some(Ipv4Addr::new(10, 0, 0, 9)))],
        );

        let outcome = run("93.184.216.34", 30, strategy).unwrap();
        assert!(outcome.reached);
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn test_last_ip_is_most_recent_responder() {
        let (strategy, _) = ScriptedStrategy::new(
            Ok(DEST),
            vec![
                Ok(Some(Ipv4Addr::new(10, 0, 0, 1))),
                Ok(Some(Ipv4Addr::new(172, 16, 0, 1))),
                timeout(3),
                Ok(None),
            ],
        );

        let outcome = run("example.com", 4, strategy).unwrap();
        assert!(!outcome.reached);
        assert_eq!(outcome.last_ip, Some(Ipv4Addr::new(172, 16, 0, 1)));
    }

    #[test]
    fn test_rounds_never_exceed_hop_budget() {
        for budget in 1..=12u8 {
            let steps = (1..=20u8).map(|i| Ok(Some(Ipv4Addr::new(10, 0, 0, i)))).collect();
            let (strategy, seen) = ScriptedStrategy::new(Ok(DEST), steps);

            let outcome = run("example.com", budget, strategy).unwrap();
            assert!(!outcome.reached);
            assert_eq!(outcome.last_ip, Some(Ipv4Addr::new(10, 0, 0, budget)));

            let expected: Vec<u8> = (1..=budget).collect();
            assert_eq!(*seen.borrow(), expected);
        }
    }

    #[test]
    fn test_full_ttl_range_does_not_overflow() {
        let (strategy, seen) = ScriptedStrategy::new(Ok(DEST), vec![]);

        let outcome = run("example.com", u8::MAX, strategy).unwrap();
        assert!(!outcome.reached);
        assert_eq!(seen.borrow().len(), u8::MAX as usize);
        assert_eq!(seen.borrow().last(), Some(&u8::MAX));
    }

    #[test]
    fn test_zero_hop_budget_runs_no_rounds() {
        let (strategy, seen) = ScriptedStrategy::new(Ok(DEST), vec![Ok(Some(DEST))]);

        let outcome = run("example.com", 0, strategy).unwrap();
        assert_eq!(outcome, TraceOutcome::default());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_fatal_round_error_propagates() {
        let (strategy, seen) = ScriptedStrategy::new(
            Ok(DEST),
            vec![
                Ok(Some(Ipv4Addr::new(10, 0, 0, 1))),
                Err(ProbeError::socket("bind", std::io::Error::from(std::io::ErrorKind::PermissionDenied))),
                Ok(Some(DEST)),
            ],
        );

        let result = run("example.com", 5, strategy);
        assert!(matches!(result, Err(ProbeError::Socket { action: "bind", .. })));
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[cfg(unix)]
    #[test]
    fn test_new_selects_direct_strategy_on_unix() {
        let prober = Prober::new("127.0.0.1", 1, 100).unwrap();
        assert_eq!(prober.strategy_name(), "direct");
    }

    #[test]
    fn test_session_port_in_ephemeral_range() {
        for _ in 0..50 {
            let session = ProbeSession::new("example.com", 3, 1000);
            assert!(EPHEMERAL_PORTS.contains(&session.port));
            assert_eq!(session.ttl, 1);
        }
    }

    #[test]
    fn test_session_destination_matching() {
        let mut session = ProbeSession::with_port("93.184.216.34", 3, 1000, 33434);
        assert!(session.is_destination(DEST));

        let mut named = ProbeSession::with_port("example.com", 3, 1000, 33434);
        assert!(!named.is_destination(DEST));
        named.destination_ip = Some(DEST);
        assert!(named.is_destination(DEST));

        session.destination_ip = Some(Ipv4Addr::new(1, 1, 1, 1));
        assert!(!session.is_destination(DEST));
    }

    #[test]
    fn test_outcome_display() {
        let reached = TraceOutcome { reached: true, last_ip: Some(DEST) };
        assert_eq!(reached.to_string(), "reached (last hop 93.184.216.34)");
        assert_eq!(TraceOutcome::default().to_string(), "not reached (last hop *)");
    }
}
