//! Error kinds surfaced by the core, per the propagation policy: a module
//! never aborts the process, the worst outcome is transitioning a query to
//! `error`.

use std::fmt;

pub use iter_types::hints::HintsError;

/// Resolution failed permanently: the pipeline turns this into a SERVFAIL
/// response to the caller. Transient failures (a single target's timeout
/// or SERVFAIL) never reach here — they are recovered locally by trying the
/// next target within the delegation point.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResolutionError {
    /// Every target in the current delegation point was tried and failed.
    TargetsExhausted,
    /// `MAX_REFERRALS` referrals were followed without reaching an answer.
    ReferralLimitExceeded,
    /// `MAX_CNAME_CHAIN` CNAMEs were followed without reaching an answer.
    CnameChainExceeded,
    /// A referral named a zone that is not a descendant of the delegation
    /// point it was a reply from.
    NonDescendingReferral,
    /// A sub-query (priming, or otherwise) failed or was cancelled.
    SubqueryFailed,
    /// An invariant the pipeline is supposed to guarantee didn't hold (e.g.
    /// an event reached a module with no predecessor to route it to). Not
    /// expected to occur; kept distinct from the named resolution failures
    /// above so it's never mistaken for one in a metrics dashboard.
    Internal,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::TargetsExhausted => write!(f, "all targets exhausted"),
            ResolutionError::ReferralLimitExceeded => write!(f, "too many referrals"),
            ResolutionError::CnameChainExceeded => write!(f, "CNAME chain too long"),
            ResolutionError::NonDescendingReferral => write!(f, "referral does not descend"),
            ResolutionError::SubqueryFailed => write!(f, "sub-query failed"),
            ResolutionError::Internal => write!(f, "internal pipeline invariant violated"),
        }
    }
}

impl std::error::Error for ResolutionError {}
