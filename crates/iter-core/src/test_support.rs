//! An `Environment` test double for the pipeline/query-table test suites.
//! Records every packet handed to `send_query` instead of putting it on the
//! wire, and backs cache lookups with a real `SharedCache` so priming and
//! referral-following tests can exercise genuine cache hits and misses.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Duration;

use iter_types::class::DnsClass;
use iter_types::delegation::DelegationPoint;
use iter_types::message::{Message, Question};
use iter_types::name::Name;

use crate::cache::SharedCache;
use crate::env::{CachedMessage, Environment};
use crate::qstate::QueryId;

/// One packet `send_query` was asked to deliver.
#[derive(Debug, Clone)]
pub struct SentQuery {
    pub message: Message,
    pub addr: SocketAddr,
    pub timeout: Duration,
    pub qid: QueryId,
    pub use_tcp: bool,
}

/// An `Environment` that records sent queries instead of sending them, for
/// tests to drive replies or timeouts against by hand.
pub struct RecordingEnvironment {
    sent: RefCell<Vec<SentQuery>>,
    cache: SharedCache,
    /// When `Some`, `send_query` returns this instead of `true` — lets a
    /// test exercise `do_query_targets`'s retry-on-send-failure loop.
    fail_sends: bool,
}

impl RecordingEnvironment {
    pub fn new() -> Self {
        RecordingEnvironment {
            sent: RefCell::new(Vec::new()),
            cache: SharedCache::new(),
            fail_sends: false,
        }
    }

    pub fn with_cache(cache: SharedCache) -> Self {
        RecordingEnvironment {
            sent: RefCell::new(Vec::new()),
            cache,
            fail_sends: false,
        }
    }

    pub fn always_fail_sends() -> Self {
        RecordingEnvironment {
            sent: RefCell::new(Vec::new()),
            cache: SharedCache::new(),
            fail_sends: true,
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Every packet recorded so far, oldest first.
    pub fn sent(&self) -> Vec<SentQuery> {
        self.sent.borrow().clone()
    }

    pub fn last_sent(&self) -> Option<SentQuery> {
        self.sent.borrow().last().cloned()
    }
}

impl Default for RecordingEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for RecordingEnvironment {
    fn send_query(&self, message: &Message, addr: SocketAddr, timeout: Duration, qid: QueryId, use_tcp: bool) -> bool {
        if self.fail_sends {
            return false;
        }
        self.sent.borrow_mut().push(SentQuery {
            message: message.clone(),
            addr,
            timeout,
            qid,
            use_tcp,
        });
        true
    }

    fn cache_lookup_msg(&self, _question: &Question) -> Option<CachedMessage> {
        None
    }

    fn cache_lookup_delegation(&self, qname: &Name, qclass: DnsClass) -> Option<DelegationPoint> {
        self.cache.delegation_for(qname, qclass)
    }
}
