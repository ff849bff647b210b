//! The query table: allocates `QState`s, links them into the sub-query
//! tree, and drives the pipeline. The in-process stand-in for the worker
//! loop's query bookkeeping — see `spec.md` §4.D and §9 ("back-references
//! without cycles"; the parent/child edges here are the same shape, minus
//! the arena).

use rand::rngs::StdRng;

use iter_types::message::{Message, Question};

use crate::env::{Environment, ModuleEnv};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::qstate::{ModuleEvent, QState, QueryId};

/// What driving a query through the pipeline, possibly across several
/// sub-queries, settled on.
#[derive(Debug)]
pub enum QueryOutcome {
    /// The innermost active sub-query is waiting on a network reply or a
    /// timeout. The caller (the out-of-scope worker loop, or a test
    /// harness standing in for it) is expected to already know which
    /// `QueryId` that is: it's the one `Environment::send_query` was
    /// called with.
    Suspended,
    /// The top-level query finished with an answer (or `None`, for a
    /// terminal NXDOMAIN/NODATA with no records to carry).
    Answered(Option<Message>),
    /// The top-level query could not be resolved.
    Failed,
}

/// An indexed store of `QState`s plus the sub-query tree edges between
/// them. Slots are reused via a free list, the same way a production
/// allocator would reuse a query's slab entry once released.
pub struct QueryTable<E: Environment> {
    queries: Vec<Option<QState>>,
    free_list: Vec<QueryId>,
    pipeline: Pipeline<E>,
}

impl<E: Environment> QueryTable<E> {
    pub fn new(pipeline: Pipeline<E>) -> Self {
        QueryTable {
            queries: Vec::new(),
            free_list: Vec::new(),
            pipeline,
        }
    }

    pub fn get(&self, qid: QueryId) -> Option<&QState> {
        self.queries.get(qid).and_then(Option::as_ref)
    }

    fn insert(&mut self, qstate: QState) -> QueryId {
        if let Some(qid) = self.free_list.pop() {
            self.queries[qid] = Some(qstate);
            qid
        } else {
            self.queries.push(Some(qstate));
            self.queries.len() - 1
        }
    }

    /// `spec.md` §4.D `new`: submit a fresh top-level query and drive it
    /// with `event=new` until it suspends or settles.
    pub fn submit(&mut self, qinfo: Question, menv: &ModuleEnv<E>, rng: &mut StdRng) -> (QueryId, QueryOutcome) {
        let qid = self.insert(QState::new(qinfo));
        let outcome = self.drive(qid, ModuleEvent::New, None, menv, rng);
        (qid, outcome)
    }

    /// Route an inbound server reply to the query that's waiting for it. A
    /// duplicate or late reply for a query that has already completed and
    /// been released is an ordinary race, not a contract violation — treat
    /// it as a no-op failure rather than calling into `drive`.
    pub fn reply(&mut self, qid: QueryId, message: Message, menv: &ModuleEnv<E>, rng: &mut StdRng) -> QueryOutcome {
        let Some(q) = self.queries.get_mut(qid).and_then(Option::as_mut) else {
            return QueryOutcome::Failed;
        };
        q.reply = Some(message);
        self.drive(qid, ModuleEvent::Reply, None, menv, rng)
    }

    /// A per-target timeout fired for `qid`'s outstanding network query. As
    /// with `reply`, a timeout that fires after the query has already
    /// completed and been released is a no-op, not a panic.
    pub fn timeout(&mut self, qid: QueryId, menv: &ModuleEnv<E>, rng: &mut StdRng) -> QueryOutcome {
        if self.queries.get(qid).and_then(Option::as_ref).is_none() {
            return QueryOutcome::Failed;
        }
        self.drive(qid, ModuleEvent::Timeout, None, menv, rng)
    }

    /// Cancel `qid` and every descendant sub-query, depth-first, per
    /// `spec.md` §5: invoke each module's `clear` before releasing the
    /// arenas (here, before dropping the `QState`s).
    pub fn cancel(&mut self, qid: QueryId) {
        let children = self.child_ids(qid);
        for child in children {
            self.cancel(child);
        }
        if let Some(q) = self.queries.get_mut(qid).and_then(Option::as_mut) {
            self.pipeline.clear(q);
        }
        self.release(qid);
    }

    /// `spec.md` §4.D `release`: recursively destroy sub-queries first,
    /// then this query. Idempotent — releasing an already-released id is a
    /// no-op.
    pub fn release(&mut self, qid: QueryId) {
        let children = self.child_ids(qid);
        for child in children {
            self.release(child);
        }
        if let Some(slot) = self.queries.get_mut(qid) {
            if slot.take().is_some() {
                self.free_list.push(qid);
            }
        }
    }

    fn child_ids(&self, qid: QueryId) -> Vec<QueryId> {
        let mut out = Vec::new();
        let Some(q) = self.get(qid) else { return out };
        let mut cur = q.subquery_first;
        while let Some(child) = cur {
            out.push(child);
            cur = self.get(child).and_then(|c| c.subquery_next);
        }
        out
    }

    /// `spec.md` §4.D `create_subquery`: link a fresh `QState` under
    /// `parent`'s `subquery_first` chain (newest child first — the order
    /// sub-queries are created in doesn't matter to the spec, only that
    /// each appears exactly once).
    fn create_subquery(&mut self, parent: QueryId, qinfo: Question) -> QueryId {
        let mut child = QState::new(qinfo);
        child.parent = Some(parent);
        child.subquery_next = self.get(parent).and_then(|p| p.subquery_first);

        let child_id = self.insert(child);
        if let Some(p) = self.queries.get_mut(parent).and_then(Option::as_mut) {
            p.subquery_first = Some(child_id);
        }
        child_id
    }

    /// Dispatch `event` through the pipeline for `qid`, recursively
    /// creating and driving sub-queries the iterator module asks for, and
    /// folding their results back in as `subq_done`.
    pub fn drive(
        &mut self,
        qid: QueryId,
        event: ModuleEvent,
        subquery_answer: Option<Message>,
        menv: &ModuleEnv<E>,
        rng: &mut StdRng,
    ) -> QueryOutcome {
        let outcome = {
            let qstate = self
                .queries
                .get_mut(qid)
                .and_then(Option::as_mut)
                .expect("drive called on a released or nonexistent query");
            self.pipeline.dispatch(qstate, qid, event, subquery_answer, menv, rng)
        };

        match outcome {
            PipelineOutcome::Suspended => QueryOutcome::Suspended,
            PipelineOutcome::Done(msg) => QueryOutcome::Answered(msg),
            PipelineOutcome::Failed => QueryOutcome::Failed,
            PipelineOutcome::NeedSubquery(question) => {
                menv.metrics_subquery_spawned();
                let child = self.create_subquery(qid, question);
                match self.drive(child, ModuleEvent::New, None, menv, rng) {
                    QueryOutcome::Suspended => QueryOutcome::Suspended,
                    QueryOutcome::Answered(msg) => {
                        self.release(child);
                        self.drive(qid, ModuleEvent::SubqDone, msg, menv, rng)
                    }
                    QueryOutcome::Failed => {
                        self.release(child);
                        self.drive(qid, ModuleEvent::SubqDone, None, menv, rng)
                    }
                }
            }
        }
    }
}
