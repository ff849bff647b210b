//! Counters from a resolution attempt. The pipeline builds this structure
//! rather than update a Prometheus registry directly; the worker loop that
//! owns the registry is out of scope here.

/// Counters accumulated over a single query's lifetime, including its
/// sub-queries.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Outbound queries sent to a nameserver target.
    pub queries_sent: u64,
    /// Replies classified as an answer.
    pub answers: u64,
    /// Replies classified as a referral.
    pub referrals: u64,
    /// CNAMEs followed.
    pub cnames_followed: u64,
    /// Replies classified as NXDOMAIN/NODATA.
    pub terminal_replies: u64,
    /// Per-target timeouts.
    pub timeouts: u64,
    /// Replies rejected as invalid (malformed, mismatched, or an error
    /// RCODE) and treated as a failed target.
    pub invalid_replies: u64,
    /// Priming sub-queries spawned.
    pub subqueries_spawned: u64,
    /// Cache hits for a delegation or message lookup.
    pub cache_hits: u64,
    /// Cache misses for a delegation or message lookup.
    pub cache_misses: u64,
    /// Inbound server replies routed back to a suspended query, answer or
    /// not.
    pub replies_received: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            queries_sent: 0,
            answers: 0,
            referrals: 0,
            cnames_followed: 0,
            terminal_replies: 0,
            timeouts: 0,
            invalid_replies: 0,
            subqueries_spawned: 0,
            cache_hits: 0,
            cache_misses: 0,
            replies_received: 0,
        }
    }

    pub fn query_sent(&mut self) {
        self.queries_sent += 1;
    }

    pub fn reply_received(&mut self) {
        self.replies_received += 1;
    }

    pub fn answer(&mut self) {
        self.answers += 1;
    }

    pub fn referral(&mut self) {
        self.referrals += 1;
    }

    pub fn cname_followed(&mut self) {
        self.cnames_followed += 1;
    }

    pub fn terminal_reply(&mut self) {
        self.terminal_replies += 1;
    }

    pub fn timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn invalid_reply(&mut self) {
        self.invalid_replies += 1;
    }

    pub fn subquery_spawned(&mut self) {
        self.subqueries_spawned += 1;
    }

    pub fn cache_hit_or_miss(&mut self, hit: bool) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
