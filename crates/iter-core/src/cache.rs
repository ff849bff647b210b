//! A reference message/RRset cache: in-process, size-bounded, and pruned
//! by LRU and expiry. `spec.md` §1 keeps the production shared caches out
//! of the core's internals, but the iterator module still needs something
//! behind `Environment::cache_lookup_msg`/`cache_lookup_delegation` to be
//! runnable and testable without a real network — this is that something.
//!
//! Directly grounded in the teacher's `lib-dns-resolver/src/cache.rs`: the
//! same double-priority-queue structure (one by last access for LRU
//! eviction, one by next expiry for cheap expired-record sweeps),
//! generalized from its `dns-types` record model to this crate's
//! `iter_types` one.

use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use iter_types::class::DnsClass;
use iter_types::delegation::DelegationPoint;
use iter_types::message::{QueryType, RecordData, RecordType, ResourceRecord};
use iter_types::name::Name;

const MUTEX_POISON_MESSAGE: &str = "cache mutex poisoned, cannot recover from this";

/// A convenience wrapper letting a `Cache` be shared between threads.
/// Cloning gives a new handle to the same underlying cache.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

impl SharedCache {
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new())),
        }
    }

    pub fn with_desired_size(desired_size: usize) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::with_desired_size(desired_size))),
        }
    }

    /// Cached records for `name`/`qtype`, with the TTL already
    /// re-expressed relative to now. Excludes anything that has expired.
    pub fn get(&self, name: &Name, qtype: QueryType) -> Vec<ResourceRecord> {
        let mut rrs = self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(name, qtype);
        rrs.retain(|rr| rr.ttl > 0);
        rrs
    }

    /// Insert a record. Not inserted if its TTL is zero.
    pub fn insert(&self, record: &ResourceRecord) {
        if record.ttl > 0 {
            self.cache.lock().expect(MUTEX_POISON_MESSAGE).insert(record);
        }
    }

    /// The best-known delegation for `qname` in `qclass`: walk `qname`'s
    /// ancestors from most to least specific and return the first one with
    /// a cached, live NS rrset, its targets populated from any cached
    /// glue. `None` if nothing is cached at all — callers fall back to the
    /// hints store's root in that case, per `spec.md` §4.F `INIT`.
    pub fn delegation_for(&self, qname: &Name, qclass: DnsClass) -> Option<DelegationPoint> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).delegation_for(qname, qclass)
    }

    /// Clears expired entries and, if over the desired size, prunes by
    /// LRU. Returns `(had overflowed?, current size, num expired, num
    /// pruned)`.
    pub fn prune(&self) -> (bool, usize, usize, usize) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).prune()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Caching for `ResourceRecord`s. Most callers want `SharedCache` instead.
#[derive(Debug, Clone)]
pub struct Cache {
    entries: HashMap<Name, CachedNameRecords>,
    /// Domains ordered by last access; pruned in this order once the cache
    /// is full and there's nothing expired to drop first.
    ///
    /// INVARIANT: the names in here are exactly the names in `entries`.
    access_priority: PriorityQueue<Name, Reverse<Instant>>,
    /// Domains ordered by next expiry; drained first on a prune.
    ///
    /// INVARIANT: the names in here are exactly the names in `entries`.
    expiry_priority: PriorityQueue<Name, Reverse<Instant>>,
    current_size: usize,
    desired_size: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct CachedNameRecords {
    last_read: Instant,
    /// INVARIANT: the minimum expiry across every record for this name.
    next_expiry: Instant,
    /// INVARIANT: the sum of the vector lengths below.
    size: usize,
    records: HashMap<RecordType, Vec<(RecordData, Instant)>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::with_desired_size(512)
    }

    /// Panics if `desired_size` is zero.
    pub fn with_desired_size(desired_size: usize) -> Self {
        assert!(desired_size > 0, "cannot create a zero-size cache");

        Cache {
            entries: HashMap::with_capacity(desired_size / 2),
            access_priority: PriorityQueue::with_capacity(desired_size),
            expiry_priority: PriorityQueue::with_capacity(desired_size),
            current_size: 0,
            desired_size,
        }
    }

    /// Cached records for `name`/`qtype`. The TTL may be zero — callers
    /// (`SharedCache::get`) must filter expired records out themselves.
    pub fn get(&mut self, name: &Name, qtype: QueryType) -> Vec<ResourceRecord> {
        let Some(entry) = self.entries.get_mut(name) else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut rrs = Vec::new();
        match qtype {
            QueryType::Wildcard => {
                for tuples in entry.records.values() {
                    to_rrs(name, now, tuples, &mut rrs);
                }
            }
            QueryType::Record(rtype) => {
                if let Some(tuples) = entry.records.get(&rtype) {
                    to_rrs(name, now, tuples, &mut rrs);
                }
            }
        }

        if !rrs.is_empty() {
            entry.last_read = now;
            self.access_priority.change_priority(name, Reverse(entry.last_read));
        }
        rrs
    }

    pub fn insert(&mut self, record: &ResourceRecord) {
        let now = Instant::now();
        let rtype = record.rdata.rtype();
        let expiry = now + Duration::from_secs(record.ttl.into());
        let tuple = (record.rdata.clone(), expiry);

        if let Some(entry) = self.entries.get_mut(&record.name) {
            let tuples = entry.records.entry(rtype).or_default();
            let duplicate_expiry = tuples
                .iter()
                .position(|(data, _)| *data == tuple.0)
                .map(|i| tuples.swap_remove(i).1);
            tuples.push(tuple);

            if let Some(dup_expiry) = duplicate_expiry {
                entry.size -= 1;
                self.current_size -= 1;
                if dup_expiry == entry.next_expiry {
                    entry.next_expiry = min_expiry(&entry.records).unwrap_or(expiry);
                    self.expiry_priority.change_priority(&record.name, Reverse(entry.next_expiry));
                }
            }

            entry.last_read = now;
            entry.size += 1;
            self.access_priority.change_priority(&record.name, Reverse(entry.last_read));
            if expiry < entry.next_expiry {
                entry.next_expiry = expiry;
                self.expiry_priority.change_priority(&record.name, Reverse(entry.next_expiry));
            }
        } else {
            let mut records = HashMap::new();
            records.insert(rtype, vec![tuple]);
            let entry = CachedNameRecords {
                last_read: now,
                next_expiry: expiry,
                size: 1,
                records,
            };
            self.access_priority.push(record.name.clone(), Reverse(entry.last_read));
            self.expiry_priority.push(record.name.clone(), Reverse(entry.next_expiry));
            self.entries.insert(record.name.clone(), entry);
        }

        self.current_size += 1;
    }

    /// The best cached delegation for `qname`/`qclass`: try `qname`
    /// itself, then each ancestor in turn, down to the root, returning the
    /// first with a live NS rrset.
    pub fn delegation_for(&mut self, qname: &Name, qclass: DnsClass) -> Option<DelegationPoint> {
        let mut candidate = qname.clone();
        loop {
            let ns_rrs = self.get(&candidate, QueryType::Record(RecordType::NS));
            let ns_rrs: Vec<_> = ns_rrs.into_iter().filter(|rr| rr.rclass == qclass).collect();
            if !ns_rrs.is_empty() {
                let mut dp = DelegationPoint::new(candidate.clone());
                for rr in &ns_rrs {
                    if let RecordData::NS { nsdname } = &rr.rdata {
                        dp.add_ns(nsdname.clone());
                        for glue in self.get(nsdname, QueryType::Record(RecordType::A)) {
                            if let RecordData::A { address } = glue.rdata {
                                dp.add_target(nsdname.clone(), SocketAddr::new(address.into(), 53));
                            }
                        }
                    }
                }
                return Some(dp);
            }

            if candidate.is_root() {
                return None;
            }
            candidate = parent_of(&candidate);
        }
    }

    pub fn remove_expired(&mut self) -> usize {
        let mut pruned = 0;
        loop {
            let before = pruned;
            pruned += self.remove_expired_step();
            if before == pruned {
                break;
            }
        }
        pruned
    }

    /// Returns `(had overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&mut self) -> (bool, usize, usize, usize) {
        let had_overflowed = self.current_size > self.desired_size;
        let num_expired = self.remove_expired();
        let mut num_pruned = 0;
        while self.current_size > self.desired_size {
            num_pruned += self.remove_least_recently_used();
        }
        (had_overflowed, self.current_size, num_expired, num_pruned)
    }

    fn remove_expired_step(&mut self) -> usize {
        let Some((name, Reverse(expiry))) = self.expiry_priority.pop() else {
            return 0;
        };
        let now = Instant::now();
        if expiry > now {
            self.expiry_priority.push(name, Reverse(expiry));
            return 0;
        }

        let Some(entry) = self.entries.get_mut(&name) else {
            self.access_priority.remove(&name);
            return 0;
        };

        let mut pruned = 0;
        for tuples in entry.records.values_mut() {
            let before = tuples.len();
            tuples.retain(|(_, e)| *e > now);
            pruned += before - tuples.len();
        }
        entry.size -= pruned;
        self.current_size -= pruned;

        match min_expiry(&entry.records) {
            Some(next) => {
                entry.next_expiry = next;
                self.expiry_priority.push(name, Reverse(next));
            }
            None => {
                self.entries.remove(&name);
                self.access_priority.remove(&name);
            }
        }
        pruned
    }

    fn remove_least_recently_used(&mut self) -> usize {
        let Some((name, _)) = self.access_priority.pop() else {
            return 0;
        };
        self.expiry_priority.remove(&name);
        let Some(entry) = self.entries.remove(&name) else {
            return 0;
        };
        self.current_size -= entry.size;
        entry.size
    }
}

fn min_expiry(records: &HashMap<RecordType, Vec<(RecordData, Instant)>>) -> Option<Instant> {
    records.values().flatten().map(|(_, e)| *e).min()
}

/// `qname` with its leftmost label stripped. Panics on the root — callers
/// must check `is_root` first.
fn parent_of(name: &Name) -> Name {
    let mut labels = name.as_labels().to_vec();
    labels.remove(0);
    Name::from_labels(labels).expect("stripping a label from a valid name stays valid")
}

fn to_rrs(name: &Name, now: Instant, tuples: &[(RecordData, Instant)], rrs: &mut Vec<ResourceRecord>) {
    for (rdata, expiry) in tuples {
        let ttl = expiry.saturating_duration_since(now).as_secs().try_into().unwrap_or(u32::MAX);
        rrs.push(ResourceRecord {
            name: name.clone(),
            rdata: rdata.clone(),
            rclass: DnsClass::IN,
            ttl,
        });
    }
}
