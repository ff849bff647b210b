//! The module environment: read-mostly services shared by every query, and
//! the config snapshot they're built from. Socket management, the wire
//! codec, and the production message/RRset caches live outside this crate;
//! this module only specifies the surface the iterator calls through.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Duration;

use iter_types::class::DnsClass;
use iter_types::delegation::DelegationPoint;
use iter_types::hints::HintsStore;
use iter_types::message::{Message, Question};
use iter_types::name::Name;

use crate::metrics::Metrics;
use crate::qstate::QueryId;

/// A cached reply, with its remaining TTL already accounted for.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message: Message,
    pub ttl_remaining: Duration,
}

/// Read-only services the iterator invokes. Implementations report failure
/// through the return value; they never raise out-of-band.
pub trait Environment {
    /// Send `message` to `addr`. On success the caller's `operate` returns
    /// `wait_reply`; later, a `reply` or `timeout` event re-enters it for
    /// `qid`. Returns `false` on a failure to even attempt the send (no
    /// memory, no route); the pipeline treats that the same as an
    /// immediate timeout.
    fn send_query(&self, message: &Message, addr: SocketAddr, timeout: Duration, qid: QueryId, use_tcp: bool) -> bool;

    /// The best cached answer for a question, if any is still live.
    fn cache_lookup_msg(&self, question: &Question) -> Option<CachedMessage>;

    /// The best cached delegation point for `qname` in `qclass`, if the
    /// cache holds one at all.
    fn cache_lookup_delegation(&self, qname: &Name, qclass: DnsClass) -> Option<DelegationPoint>;
}

/// The config-derived, read-mostly state every query shares: the hints
/// store and the iterator's tunables. Arenas and the worker-local
/// allocator from the source design have no counterpart here — per-query
/// state is owned outright by its `QState`, scoped by ordinary Rust
/// ownership instead of an arena handle.
///
/// Also carries the counters a resolution attempt accumulates. The source
/// has no equivalent field here — metrics are a daemon-level concern there
/// — but a `RefCell` is cheap enough, and a module's `operate` is never
/// reentered while already running (calls are strictly serial per query,
/// see `spec.md` §5), so there is never a live borrow to conflict with.
pub struct ModuleEnv<E: Environment> {
    pub hints: HintsStore,
    pub config: crate::config::IteratorConfig,
    pub services: E,
    metrics: RefCell<Metrics>,
}

impl<E: Environment> ModuleEnv<E> {
    pub fn new(hints: HintsStore, config: crate::config::IteratorConfig, services: E) -> Self {
        ModuleEnv {
            hints,
            config,
            services,
            metrics: RefCell::new(Metrics::new()),
        }
    }

    /// A snapshot of the counters accumulated so far.
    pub fn metrics_snapshot(&self) -> Metrics {
        self.metrics.borrow().clone()
    }

    pub fn metrics_sent(&self) {
        self.metrics.borrow_mut().query_sent();
    }

    pub fn metrics_reply(&self) {
        self.metrics.borrow_mut().reply_received();
    }

    pub fn metrics_answer(&self) {
        self.metrics.borrow_mut().answer();
    }

    pub fn metrics_terminal(&self) {
        self.metrics.borrow_mut().terminal_reply();
    }

    pub fn metrics_referral(&self) {
        self.metrics.borrow_mut().referral();
    }

    pub fn metrics_cname(&self) {
        self.metrics.borrow_mut().cname_followed();
    }

    pub fn metrics_timeout(&self) {
        self.metrics.borrow_mut().timeout();
    }

    pub fn metrics_invalid(&self) {
        self.metrics.borrow_mut().invalid_reply();
    }

    pub fn metrics_cache(&self, hit: bool) {
        self.metrics.borrow_mut().cache_hit_or_miss(hit);
    }

    pub fn metrics_subquery_spawned(&self) {
        self.metrics.borrow_mut().subquery_spawned();
    }
}
