//! The delegation point: a zone cut's nameserver set and resolved glue,
//! plus target selection.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::name::Name;

/// A resolved `(nameserver name, address)` pair: glue for a delegation
/// point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub ns_name: Name,
    pub addr: SocketAddr,
}

/// How `DelegationPoint::select_target` picks among usable targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    RoundRobin,
    /// Prefer targets with the lowest recorded RTT; targets with no
    /// recorded RTT are tried last, in round-robin order among themselves.
    RttOrdered,
    Random,
}

/// The set of nameservers and resolved addresses authoritative for a zone
/// cut, plus enough state to pick a target to query next.
///
/// Every target's `ns_name` appears in `nameservers`; `add_target` adds it
/// implicitly if it is missing. A DP is *usable* iff it has at least one
/// target.
#[derive(Debug, Clone)]
pub struct DelegationPoint {
    name: Name,
    nameservers: Vec<Name>,
    targets: Vec<Target>,
    rtts: HashMap<SocketAddr, Duration>,
    round_robin_cursor: usize,
}

impl DelegationPoint {
    pub fn new(name: Name) -> Self {
        DelegationPoint {
            name,
            nameservers: Vec::new(),
            targets: Vec::new(),
            rtts: HashMap::new(),
            round_robin_cursor: 0,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Idempotent assignment of the owner name of this zone cut.
    pub fn set_name(&mut self, name: Name) {
        self.name = name;
    }

    pub fn nameservers(&self) -> &[Name] {
        &self.nameservers
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn is_usable(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Insert into the nameserver set if absent. Order of first insertion is
    /// retained. Returns `true` if this was a new nameserver.
    pub fn add_ns(&mut self, ns_name: Name) -> bool {
        if self.nameservers.contains(&ns_name) {
            false
        } else {
            self.nameservers.push(ns_name);
            true
        }
    }

    /// Add a resolved glue address for a nameserver, implicitly adding the
    /// nameserver itself if it wasn't already known. Deduplicates by
    /// `(ns_name, addr)`. Returns `true` if this was a new target.
    pub fn add_target(&mut self, ns_name: Name, addr: SocketAddr) -> bool {
        self.add_ns(ns_name.clone());

        let target = Target { ns_name, addr };
        if self.targets.contains(&target) {
            false
        } else {
            self.targets.push(target);
            true
        }
    }

    /// Add a floating address not tied to a known NS name, for stubs
    /// configured by IP only. Synthesizes a placeholder nameserver name so
    /// the usual `(ns_name, addr)` bookkeeping still applies.
    pub fn add_addr(&mut self, addr: SocketAddr) -> bool {
        let placeholder = synthetic_ns_name(addr);
        self.add_target(placeholder, addr)
    }

    pub fn record_rtt(&mut self, addr: SocketAddr, rtt: Duration) {
        self.rtts.insert(addr, rtt);
    }

    /// Pick a usable target, excluding any already in `exclude`, honoring
    /// `policy`. Deterministic for a fixed `rng` seed: the same sequence of
    /// calls against the same target set visits every target once before
    /// repeating.
    pub fn select_target(
        &mut self,
        policy: SelectionPolicy,
        exclude: &HashSet<(Name, SocketAddr)>,
        rng: &mut impl Rng,
    ) -> Option<Target> {
        if self.targets.is_empty() {
            return None;
        }

        match policy {
            SelectionPolicy::RoundRobin => self.select_round_robin(exclude),
            SelectionPolicy::RttOrdered => self.select_rtt_ordered(exclude),
            SelectionPolicy::Random => self.select_random(exclude, rng),
        }
    }

    fn select_round_robin(&mut self, exclude: &HashSet<(Name, SocketAddr)>) -> Option<Target> {
        let n = self.targets.len();
        for step in 0..n {
            let i = (self.round_robin_cursor + step) % n;
            let t = &self.targets[i];
            if !exclude.contains(&(t.ns_name.clone(), t.addr)) {
                self.round_robin_cursor = (i + 1) % n;
                return Some(t.clone());
            }
        }
        None
    }

    fn select_rtt_ordered(&mut self, exclude: &HashSet<(Name, SocketAddr)>) -> Option<Target> {
        let mut candidates: Vec<&Target> = self
            .targets
            .iter()
            .filter(|t| !exclude.contains(&(t.ns_name.clone(), t.addr)))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // `None` (no recorded RTT) must sort after every `Some`, not before
        // it as `Option`'s derived order would.
        candidates.sort_by_key(|t| match self.rtts.get(&t.addr) {
            Some(rtt) => (0u8, *rtt),
            None => (1u8, Duration::ZERO),
        });
        let chosen = candidates[0].clone();
        self.round_robin_cursor = self
            .targets
            .iter()
            .position(|t| *t == chosen)
            .map(|i| (i + 1) % self.targets.len())
            .unwrap_or(0);
        Some(chosen)
    }

    fn select_random(
        &mut self,
        exclude: &HashSet<(Name, SocketAddr)>,
        rng: &mut impl Rng,
    ) -> Option<Target> {
        let candidates: Vec<&Target> = self
            .targets
            .iter()
            .filter(|t| !exclude.contains(&(t.ns_name.clone(), t.addr)))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let idx = rng.gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }
}

fn synthetic_ns_name(addr: SocketAddr) -> Name {
    let label = format!("{addr}").replace(['.', ':', '[', ']'], "-");
    Name::from_dotted_string(&format!("{label}.addr-literal.invalid."))
        .unwrap_or_else(Name::root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::test_util::name;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(a: u8, b: u8, c: u8, d: u8) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), 53))
    }

    #[test]
    fn add_target_adds_implicit_nameserver() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));
        assert_eq!(&[name("ns1.example.com.")], dp.nameservers());
    }

    #[test]
    fn add_target_deduplicates() {
        let mut dp = DelegationPoint::new(name("example.com."));
        assert!(dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1)));
        assert!(!dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1)));
        assert_eq!(1, dp.targets().len());
    }

    #[test]
    fn empty_dp_is_not_usable() {
        let dp = DelegationPoint::new(name("example.com."));
        assert!(!dp.is_usable());
    }

    #[test]
    fn round_robin_visits_every_target_before_repeating() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));
        dp.add_target(name("ns2.example.com."), addr(2, 2, 2, 2));
        dp.add_target(name("ns3.example.com."), addr(3, 3, 3, 3));

        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let t = dp
                .select_target(SelectionPolicy::RoundRobin, &HashSet::new(), &mut rng)
                .unwrap();
            assert!(seen.insert(t.addr));
        }
        assert_eq!(3, seen.len());

        let wrap = dp
            .select_target(SelectionPolicy::RoundRobin, &HashSet::new(), &mut rng)
            .unwrap();
        assert!(seen.contains(&wrap.addr));
    }

    #[test]
    fn select_target_honors_exclude_set() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));
        dp.add_target(name("ns2.example.com."), addr(2, 2, 2, 2));

        let mut exclude = HashSet::new();
        exclude.insert((name("ns1.example.com."), addr(1, 1, 1, 1)));

        let mut rng = StdRng::seed_from_u64(1);
        let t = dp
            .select_target(SelectionPolicy::RoundRobin, &exclude, &mut rng)
            .unwrap();
        assert_eq!(addr(2, 2, 2, 2), t.addr);
    }

    #[test]
    fn select_target_returns_none_when_all_excluded() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));

        let mut exclude = HashSet::new();
        exclude.insert((name("ns1.example.com."), addr(1, 1, 1, 1)));

        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(
            None,
            dp.select_target(SelectionPolicy::RoundRobin, &exclude, &mut rng)
        );
    }

    #[test]
    fn rtt_ordered_prefers_lower_rtt() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));
        dp.add_target(name("ns2.example.com."), addr(2, 2, 2, 2));
        dp.record_rtt(addr(1, 1, 1, 1), Duration::from_millis(200));
        dp.record_rtt(addr(2, 2, 2, 2), Duration::from_millis(20));

        let mut rng = StdRng::seed_from_u64(3);
        let t = dp
            .select_target(SelectionPolicy::RttOrdered, &HashSet::new(), &mut rng)
            .unwrap();
        assert_eq!(addr(2, 2, 2, 2), t.addr);
    }

    #[test]
    fn rtt_ordered_tries_unmeasured_targets_last() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_target(name("ns1.example.com."), addr(1, 1, 1, 1));
        dp.add_target(name("ns2.example.com."), addr(2, 2, 2, 2));
        dp.record_rtt(addr(1, 1, 1, 1), Duration::from_millis(500));
        // ns2 has no recorded RTT at all.

        let mut rng = StdRng::seed_from_u64(4);
        let t = dp
            .select_target(SelectionPolicy::RttOrdered, &HashSet::new(), &mut rng)
            .unwrap();
        assert_eq!(addr(1, 1, 1, 1), t.addr);
    }

    #[test]
    fn add_addr_synthesizes_usable_target() {
        let mut dp = DelegationPoint::new(name("example.com."));
        dp.add_addr(addr(9, 9, 9, 9));
        assert!(dp.is_usable());
        assert_eq!(addr(9, 9, 9, 9), dp.targets()[0].addr);
    }
}
