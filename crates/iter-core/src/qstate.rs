//! Per-query state: the record that survives across a query's suspensions
//! and links it into the sub-query tree.
//!
//! The source models two arena scopes per query (`region`, live for the
//! whole query, and `scratch`, reset on every activation). In ordinary Rust
//! ownership there is nothing to reset: `QState` and `IterState` fields that
//! must outlive suspension are simply owned fields, and anything truly
//! scratch-scoped is a local in `operate` that is dropped when it returns.
//! There is no `scratch`-reachable-from-`minfo` invariant to violate because
//! nothing is ever borrowed across that boundary.

use iter_types::message::{Message, Question};

use crate::iterator::IterState;

/// A query's slot in the pipeline's query table.
pub type QueryId = usize;

/// The module table has exactly one member: the iterator. The pipeline is
/// written generically over `MAX_MODULE` modules regardless, so adding a
/// second (a cache-aware front end, a validator) does not require changing
/// this constant's callers, only its value and `QState::ext_state`'s length.
pub const MAX_MODULE: usize = 1;

/// Externally visible states of the module state machine. A module may also
/// have richer internal state (see [`crate::iterator::Phase`]); this is only
/// what the pipeline needs to decide the next dispatch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExtState {
    Initial,
    WaitReply,
    WaitModule,
    WaitSubquery,
    Error,
    Finished,
}

/// Events that start or wake a module.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ModuleEvent {
    New,
    Pass,
    Reply,
    Timeout,
    ModDone,
    SubqDone,
    Error,
}

pub struct QState {
    /// Name/type/class under resolution. Rewritten in place when a CNAME is
    /// followed.
    pub qinfo: Question,
    /// Reply assembly buffer: the final answer, once there is one.
    pub buf: Option<Message>,
    /// The most recent inbound server reply, valid only while handling a
    /// `Reply` event.
    pub reply: Option<Message>,
    /// Index of the currently active module.
    pub curmod: usize,
    pub ext_state: Vec<ExtState>,
    /// The iterator module's private data. With `MAX_MODULE == 1` this is
    /// the only module slot there is.
    pub minfo: IterState,

    pub parent: Option<QueryId>,
    pub subquery_first: Option<QueryId>,
    pub subquery_next: Option<QueryId>,
}

impl QState {
    pub fn new(qinfo: Question) -> Self {
        QState {
            qinfo,
            buf: None,
            reply: None,
            curmod: 0,
            ext_state: vec![ExtState::Initial; MAX_MODULE],
            minfo: IterState::new(),
            parent: None,
            subquery_first: None,
            subquery_next: None,
        }
    }
}
