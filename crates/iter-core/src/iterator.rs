//! The iterator module: priming, referral handling, target selection, and
//! sub-query spawning against the hints store and the message cache.

use std::collections::HashSet;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::Rng;

use iter_types::delegation::{DelegationPoint, SelectionPolicy as DelegationSelectionPolicy};
use iter_types::message::{Message, QueryType, Question, Rcode, RecordData, RecordType, ResourceRecord};
use iter_types::name::Name;

use crate::classify::{classify, Classification};
use crate::env::{Environment, ModuleEnv};
use crate::error::ResolutionError;
use crate::pipeline::Module;
use crate::qstate::{ExtState, ModuleEvent, QState, QueryId};

/// Where the current `target_dp` came from, for diagnostics and for
/// deciding whether a reply's delegation information supersedes it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DpSource {
    Hints,
    Cache,
    Referral,
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Outcome {
    Answer,
    Error(ResolutionError),
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Phase {
    Init,
    Prime,
    QueryTargets,
    Done(Outcome),
}

/// Per-query state private to the iterator module (`minfo` in the source
/// design).
pub struct IterState {
    target_dp: Option<DelegationPoint>,
    dp_source: DpSource,
    queried_targets: HashSet<(Name, SocketAddr)>,
    referrals_seen: u32,
    cname_chain_len: u32,
    priming_ns_index: usize,
    last_request: Option<Message>,
    last_match_count: usize,
    phase: Phase,
}

impl IterState {
    pub fn new() -> Self {
        IterState {
            target_dp: None,
            dp_source: DpSource::Hints,
            queried_targets: HashSet::new(),
            referrals_seen: 0,
            cname_chain_len: 0,
            priming_ns_index: 0,
            last_request: None,
            last_match_count: 0,
            phase: Phase::Init,
        }
    }

    pub fn dp_source(&self) -> DpSource {
        self.dp_source
    }

    pub fn referrals_seen(&self) -> u32 {
        self.referrals_seen
    }

    pub fn cname_chain_len(&self) -> u32 {
        self.cname_chain_len
    }

    pub fn target_dp(&self) -> Option<&DelegationPoint> {
        self.target_dp.as_ref()
    }

    /// The reason resolution failed permanently, once `operate` has
    /// returned `error`. `None` before that, or if the query is still
    /// running or finished with an answer.
    pub fn last_error(&self) -> Option<&ResolutionError> {
        match &self.phase {
            Phase::Done(Outcome::Error(e)) => Some(e),
            _ => None,
        }
    }
}

impl Default for IterState {
    fn default() -> Self {
        Self::new()
    }
}

/// The iterator module. Holds no state of its own: everything that
/// outlives a single `operate` call lives in the query's `IterState`.
#[derive(Default)]
pub struct IteratorModule;

impl<E: Environment> Module<E> for IteratorModule {
    fn operate(
        &mut self,
        qstate: &mut QState,
        qid: QueryId,
        event: ModuleEvent,
        subquery_answer: Option<Message>,
        menv: &ModuleEnv<E>,
        rng: &mut StdRng,
    ) -> (ExtState, Option<Question>) {
        match event {
            ModuleEvent::New | ModuleEvent::Pass => {
                qstate.minfo.phase = Phase::Init;
            }
            ModuleEvent::Timeout => {
                menv.metrics_timeout();
                qstate.minfo.phase = Phase::QueryTargets;
            }
            ModuleEvent::Reply => {
                menv.metrics_reply();
                self.handle_reply(qstate, menv);
            }
            ModuleEvent::SubqDone => {
                self.handle_subquery_done(qstate, subquery_answer, menv.config.max_targets_per_dp);
            }
            ModuleEvent::ModDone | ModuleEvent::Error => {
                // This module never has a predecessor: with a single module
                // in the pipeline these events can't legitimately reach it.
                qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::Internal));
            }
        }

        self.run(qstate, qid, menv, rng)
    }

    fn clear(&mut self, qstate: &mut QState) {
        qstate.minfo = IterState::new();
    }
}

impl IteratorModule {
    /// Drive phase transitions until the module must suspend or is done.
    fn run<E: Environment>(
        &mut self,
        qstate: &mut QState,
        qid: QueryId,
        menv: &ModuleEnv<E>,
        rng: &mut StdRng,
    ) -> (ExtState, Option<Question>) {
        loop {
            match qstate.minfo.phase.clone() {
                Phase::Init => {
                    qstate.minfo.phase = self.do_init(qstate, menv);
                }
                Phase::Prime => {
                    if let Some(result) = self.do_prime(qstate) {
                        return result;
                    }
                }
                Phase::QueryTargets => {
                    if let Some(result) = self.do_query_targets(qstate, qid, menv, rng) {
                        return result;
                    }
                }
                Phase::Done(Outcome::Answer) => return (ExtState::Finished, None),
                Phase::Done(Outcome::Error(_)) => return (ExtState::Error, None),
            }
        }
    }

    /// Consult the message cache for the best known delegation, then the
    /// hints store for a stub that improves on it, falling back to the
    /// compiled-in root hints when there is no cached delegation at all.
    fn do_init<E: Environment>(&mut self, qstate: &mut QState, menv: &ModuleEnv<E>) -> Phase {
        let qname = qstate.qinfo.name.clone();
        let qclass = qstate.qinfo.qclass;

        match menv.services.cache_lookup_delegation(&qname, qclass) {
            Some(cache_dp) => {
                menv.metrics_cache(true);
                match menv.hints.lookup_stub(&qname, qclass, &cache_dp) {
                    Some(stub) => {
                        self.enter_dp(qstate, stub.clone(), DpSource::Hints);
                        Phase::Prime
                    }
                    None => {
                        self.enter_dp(qstate, cache_dp, DpSource::Cache);
                        Phase::QueryTargets
                    }
                }
            }
            None => {
                menv.metrics_cache(false);
                match menv.hints.lookup_root(qclass) {
                    Some(root) => {
                        self.enter_dp(qstate, root.clone(), DpSource::Hints);
                        Phase::Prime
                    }
                    None => Phase::Done(Outcome::Error(ResolutionError::TargetsExhausted)),
                }
            }
        }
    }

    fn enter_dp(&self, qstate: &mut QState, dp: DelegationPoint, source: DpSource) {
        qstate.minfo.target_dp = Some(dp);
        qstate.minfo.dp_source = source;
        qstate.minfo.queried_targets.clear();
        qstate.minfo.priming_ns_index = 0;
    }

    /// If `target_dp` already has targets, proceed straight to querying
    /// them. Otherwise resolve its nameservers one at a time via a
    /// sub-query, asking the pipeline to spawn it.
    fn do_prime(&mut self, qstate: &mut QState) -> Option<(ExtState, Option<Question>)> {
        let dp = qstate.minfo.target_dp.as_ref().expect("prime without a target dp");
        if dp.is_usable() {
            qstate.minfo.phase = Phase::QueryTargets;
            return None;
        }

        let nameservers = dp.nameservers().to_vec();
        if qstate.minfo.priming_ns_index >= nameservers.len() {
            qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::TargetsExhausted));
            return None;
        }

        let ns_name = nameservers[qstate.minfo.priming_ns_index].clone();
        let question = Question {
            name: ns_name,
            qtype: QueryType::Record(RecordType::A),
            qclass: qstate.qinfo.qclass,
        };
        Some((ExtState::WaitSubquery, Some(question)))
    }

    fn handle_subquery_done(&mut self, qstate: &mut QState, answer: Option<Message>, max_targets: usize) {
        if qstate.minfo.phase != Phase::Prime {
            // A subquery finishing after we've moved on (e.g. the query was
            // rewritten by a CNAME while priming was outstanding) carries no
            // useful information any more.
            return;
        }

        let ns_name = {
            let dp = qstate.minfo.target_dp.as_ref().expect("priming without a target dp");
            match dp.nameservers().get(qstate.minfo.priming_ns_index) {
                Some(name) => name.clone(),
                None => {
                    qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::Internal));
                    return;
                }
            }
        };
        qstate.minfo.priming_ns_index += 1;

        if let Some(msg) = answer {
            let dp = qstate.minfo.target_dp.as_mut().expect("priming without a target dp");
            for rr in &msg.answers {
                if dp.targets().len() >= max_targets {
                    break;
                }
                if rr.name == ns_name {
                    if let RecordData::A { address } = rr.rdata {
                        dp.add_target(ns_name.clone(), SocketAddr::new(address.into(), 53));
                    }
                }
            }
        }

        let dp = qstate.minfo.target_dp.as_ref().expect("priming without a target dp");
        qstate.minfo.phase = if dp.is_usable() { Phase::QueryTargets } else { Phase::Prime };
    }

    fn do_query_targets<E: Environment>(
        &mut self,
        qstate: &mut QState,
        qid: QueryId,
        menv: &ModuleEnv<E>,
        rng: &mut StdRng,
    ) -> Option<(ExtState, Option<Question>)> {
        loop {
            let policy: DelegationSelectionPolicy = menv.config.selection_policy.into();
            let dp = qstate.minfo.target_dp.as_mut().expect("query_targets without a target dp");
            let target = match dp.select_target(policy, &qstate.minfo.queried_targets, rng) {
                Some(target) => target,
                None => {
                    qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::TargetsExhausted));
                    return None;
                }
            };
            qstate.minfo.queried_targets.insert((target.ns_name.clone(), target.addr));
            qstate.minfo.last_match_count = dp.name().labels();

            let request = build_query(qstate.qinfo.clone(), rng.gen());
            let sent = menv
                .services
                .send_query(&request, target.addr, menv.config.per_target_timeout(), qid, false);
            if !sent {
                continue;
            }

            menv.metrics_sent();
            qstate.minfo.last_request = Some(request);
            return Some((ExtState::WaitReply, None));
        }
    }

    fn handle_reply<E: Environment>(&mut self, qstate: &mut QState, menv: &ModuleEnv<E>) {
        let request = qstate
            .minfo
            .last_request
            .clone()
            .expect("reply event without an outstanding request");
        let reply = qstate.reply.take().expect("reply event without a reply");
        let match_count = qstate.minfo.last_match_count;

        match classify(&request, &reply, match_count) {
            Classification::Answer(rrs) => {
                menv.metrics_answer();
                qstate.buf = Some(answer_message(&request, rrs));
                qstate.minfo.phase = Phase::Done(Outcome::Answer);
            }
            Classification::Terminal(rrs) => {
                menv.metrics_terminal();
                qstate.buf = Some(answer_message(&request, rrs));
                qstate.minfo.phase = Phase::Done(Outcome::Answer);
            }
            Classification::Cname { target, .. } => {
                menv.metrics_cname();
                if qstate.minfo.cname_chain_len + 1 > menv.config.max_cname_chain {
                    qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::CnameChainExceeded));
                } else {
                    qstate.minfo.cname_chain_len += 1;
                    qstate.qinfo.name = target;
                    qstate.minfo.phase = Phase::Init;
                }
            }
            Classification::Referral {
                zone_name,
                nameservers,
                glue,
            } => {
                menv.metrics_referral();
                self.handle_referral(qstate, zone_name, &nameservers, &glue, menv);
            }
            Classification::Invalid => {
                menv.metrics_invalid();
                qstate.minfo.phase = Phase::QueryTargets;
            }
        }
    }

    fn handle_referral<E: Environment>(
        &mut self,
        qstate: &mut QState,
        zone_name: Name,
        nameservers: &HashSet<Name>,
        glue: &[ResourceRecord],
        menv: &ModuleEnv<E>,
    ) {
        let old_name = qstate
            .minfo
            .target_dp
            .as_ref()
            .expect("referral without a target dp")
            .name()
            .clone();

        if Name::strict_subdomain(&zone_name, &old_name) {
            if qstate.minfo.referrals_seen + 1 > menv.config.max_referrals {
                qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::ReferralLimitExceeded));
                return;
            }
            qstate.minfo.referrals_seen += 1;

            let mut dp = DelegationPoint::new(zone_name);
            for ns in nameservers {
                dp.add_ns(ns.clone());
            }
            apply_glue(&mut dp, glue, menv.config.max_targets_per_dp);

            qstate.minfo.target_dp = Some(dp);
            qstate.minfo.dp_source = DpSource::Referral;
            qstate.minfo.queried_targets.clear();
            qstate.minfo.phase = Phase::QueryTargets;
        } else if zone_name == old_name {
            let dp = qstate.minfo.target_dp.as_mut().expect("referral without a target dp");
            for ns in nameservers {
                dp.add_ns(ns.clone());
            }
            apply_glue(dp, glue, menv.config.max_targets_per_dp);
            qstate.minfo.phase = Phase::QueryTargets;
        } else {
            // Ordering regression: a referral to a shallower or unrelated
            // zone. A permanent resolution failure, per spec.md's error
            // taxonomy, not a recoverable one.
            qstate.minfo.phase = Phase::Done(Outcome::Error(ResolutionError::NonDescendingReferral));
        }
    }
}

/// Add glue addresses to `dp`, honoring `spec.md`'s `MAX_TARGETS_PER_DP`
/// bound: a referral carrying more glue than that is truncated rather than
/// left to grow the target set (and the per-query memory it implies)
/// without limit.
fn apply_glue(dp: &mut DelegationPoint, glue: &[ResourceRecord], max_targets: usize) {
    for rr in glue {
        if dp.targets().len() >= max_targets {
            break;
        }
        if let RecordData::A { address } = rr.rdata {
            dp.add_target(rr.name.clone(), SocketAddr::new(address.into(), 53));
        }
    }
}

fn build_query(question: Question, id: u16) -> Message {
    Message {
        id,
        is_response: false,
        is_truncated: false,
        is_authoritative: false,
        rcode: Rcode::NoError,
        questions: vec![question],
        answers: vec![],
        authority: vec![],
        additional: vec![],
    }
}

fn answer_message(request: &Message, rrs: Vec<ResourceRecord>) -> Message {
    Message {
        id: request.id,
        is_response: true,
        is_truncated: false,
        is_authoritative: false,
        rcode: Rcode::NoError,
        questions: request.questions.clone(),
        answers: rrs,
        authority: vec![],
        additional: vec![],
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rand::SeedableRng;

    use iter_types::class::DnsClass;
    use iter_types::hints::{HintsConfig, HintsStore, StubConfig};
    use iter_types::message::QueryType;
    use iter_types::name::test_util::name;

    use crate::config::IteratorConfig;
    use crate::env::ModuleEnv;
    use crate::pipeline::Pipeline;
    use crate::query_table::{QueryOutcome, QueryTable};
    use crate::test_support::RecordingEnvironment;

    use super::*;

    fn question(n: &str) -> Question {
        Question {
            name: name(n),
            qtype: QueryType::Record(RecordType::A),
            qclass: DnsClass::IN,
        }
    }

    fn root_stub_hints(addrs: &[&str]) -> HintsStore {
        let mut hints = HintsStore::create();
        hints
            .apply_config(&HintsConfig {
                stubs: vec![StubConfig {
                    name: Some(".".to_string()),
                    addrs: addrs.iter().map(|s| s.to_string()).collect(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        hints
    }

    fn table() -> QueryTable<RecordingEnvironment> {
        QueryTable::new(Pipeline::new(vec![Box::new(IteratorModule)]))
    }

    fn referral_response(request: &Message, zone: &Name, ns_name: &Name, ns_addr: Ipv4Addr) -> Message {
        Message {
            id: request.id,
            is_response: true,
            is_truncated: false,
            is_authoritative: false,
            rcode: Rcode::NoError,
            questions: request.questions.clone(),
            answers: vec![],
            authority: vec![ResourceRecord {
                name: zone.clone(),
                rdata: RecordData::NS { nsdname: ns_name.clone() },
                rclass: DnsClass::IN,
                ttl: 300,
            }],
            additional: vec![ResourceRecord {
                name: ns_name.clone(),
                rdata: RecordData::A { address: ns_addr },
                rclass: DnsClass::IN,
                ttl: 300,
            }],
        }
    }

    fn answer_response(request: &Message, qname: &Name, addr: Ipv4Addr) -> Message {
        Message {
            id: request.id,
            is_response: true,
            is_truncated: false,
            is_authoritative: true,
            rcode: Rcode::NoError,
            questions: request.questions.clone(),
            answers: vec![ResourceRecord {
                name: qname.clone(),
                rdata: RecordData::A { address: addr },
                rclass: DnsClass::IN,
                ttl: 300,
            }],
            authority: vec![],
            additional: vec![],
        }
    }

    fn cname_response(request: &Message, qname: &Name, target: &Name) -> Message {
        Message {
            id: request.id,
            is_response: true,
            is_truncated: false,
            is_authoritative: false,
            rcode: Rcode::NoError,
            questions: request.questions.clone(),
            answers: vec![ResourceRecord {
                name: qname.clone(),
                rdata: RecordData::CNAME { cname: target.clone() },
                rclass: DnsClass::IN,
                ttl: 300,
            }],
            authority: vec![],
            additional: vec![],
        }
    }

    /// Scenario: root prime. No cached delegation, no configured stub other
    /// than the (test-supplied, in place of the compiled-in) root — the
    /// first outbound query goes straight to it.
    #[test]
    fn scenario_root_prime_sends_to_root_target() {
        let hints = root_stub_hints(&["192.0.2.1"]);
        let menv = ModuleEnv::new(hints, IteratorConfig::default(), RecordingEnvironment::new());
        let mut rng = StdRng::seed_from_u64(0);
        let mut table = table();

        let (_qid, outcome) = table.submit(question("www.example.com."), &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));

        let sent = menv.services.sent();
        assert_eq!(1, sent.len());
        assert_eq!("192.0.2.1:53".parse::<SocketAddr>().unwrap(), sent[0].addr);
    }

    /// Scenario: referral walk. `www.a.b.example.` starting from the root
    /// hint, referred down through `example.`, `b.example.`, `a.b.example.`
    /// before the last nameserver answers — four outbound queries total.
    #[test]
    fn scenario_referral_walk_issues_four_queries_and_answers() {
        let hints = root_stub_hints(&["192.0.2.1"]);
        let menv = ModuleEnv::new(hints, IteratorConfig::default(), RecordingEnvironment::new());
        let mut rng = StdRng::seed_from_u64(1);
        let mut table = table();

        let (qid, outcome) = table.submit(question("www.a.b.example."), &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));

        let req1 = menv.services.last_sent().unwrap().message;
        let resp1 = referral_response(&req1, &name("example."), &name("ns1.example."), Ipv4Addr::new(192, 0, 2, 2));
        let outcome = table.reply(qid, resp1, &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));
        assert_eq!(2, menv.services.sent().len());

        let req2 = menv.services.last_sent().unwrap().message;
        let resp2 = referral_response(
            &req2,
            &name("b.example."),
            &name("ns1.b.example."),
            Ipv4Addr::new(192, 0, 2, 3),
        );
        let outcome = table.reply(qid, resp2, &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));
        assert_eq!(3, menv.services.sent().len());

        let req3 = menv.services.last_sent().unwrap().message;
        let resp3 = referral_response(
            &req3,
            &name("a.b.example."),
            &name("ns1.a.b.example."),
            Ipv4Addr::new(192, 0, 2, 4),
        );
        let outcome = table.reply(qid, resp3, &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));
        assert_eq!(4, menv.services.sent().len());

        let req4 = menv.services.last_sent().unwrap().message;
        let resp4 = answer_response(&req4, &name("www.a.b.example."), Ipv4Addr::new(203, 0, 113, 5));
        let outcome = table.reply(qid, resp4, &menv, &mut rng);
        match outcome {
            QueryOutcome::Answered(Some(msg)) => assert_eq!(1, msg.answers.len()),
            other => panic!("expected an answer, got {other:?}"),
        }

        assert_eq!(4, menv.services.sent().len());
        assert_eq!(3, table.get(qid).unwrap().minfo.referrals_seen());
    }

    /// Scenario: CNAME follow. The root target answers with a CNAME for the
    /// query name on the first query, then an A record for the CNAME's
    /// target on the second; `cname_chain_len` should read back as 1.
    #[test]
    fn scenario_cname_follow_rewrites_qname_and_counts_the_hop() {
        let hints = root_stub_hints(&["192.0.2.1"]);
        let menv = ModuleEnv::new(hints, IteratorConfig::default(), RecordingEnvironment::new());
        let mut rng = StdRng::seed_from_u64(2);
        let mut table = table();

        let (qid, outcome) = table.submit(question("alias.example."), &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));

        let req1 = menv.services.last_sent().unwrap().message;
        let resp1 = cname_response(&req1, &name("alias.example."), &name("target.example."));
        let outcome = table.reply(qid, resp1, &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));
        assert_eq!(2, menv.services.sent().len());

        let req2 = menv.services.last_sent().unwrap().message;
        assert_eq!(name("target.example."), req2.questions[0].name);
        let resp2 = answer_response(&req2, &name("target.example."), Ipv4Addr::new(203, 0, 113, 9));
        let outcome = table.reply(qid, resp2, &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Answered(Some(_))));

        assert_eq!(1, table.get(qid).unwrap().minfo.cname_chain_len());
    }

    /// Scenario: exhaustion. Three targets, all SERVFAIL; no fourth query is
    /// sent, and the query fails rather than hanging.
    #[test]
    fn scenario_exhaustion_fails_after_every_target_servfails() {
        let hints = root_stub_hints(&["192.0.2.1", "192.0.2.2", "192.0.2.3"]);
        let menv = ModuleEnv::new(hints, IteratorConfig::default(), RecordingEnvironment::new());
        let mut rng = StdRng::seed_from_u64(3);
        let mut table = table();

        let (qid, outcome) = table.submit(question("www.example.com."), &menv, &mut rng);
        assert!(matches!(outcome, QueryOutcome::Suspended));

        let mut outcome = outcome;
        for _ in 0..3 {
            let req = menv.services.last_sent().unwrap().message;
            let mut resp = req.clone();
            resp.is_response = true;
            resp.rcode = Rcode::ServerFailure;
            outcome = table.reply(qid, resp, &menv, &mut rng);
        }

        assert!(matches!(outcome, QueryOutcome::Failed));
        assert_eq!(3, menv.services.sent().len());
    }

    /// A referral to a shallower or unrelated zone is a permanent
    /// resolution failure, not a recoverable one: the query does not fall
    /// back to the current delegation point's remaining targets.
    #[test]
    fn non_descending_referral_is_a_permanent_failure() {
        let hints = root_stub_hints(&["192.0.2.1", "192.0.2.2"]);
        let menv = ModuleEnv::new(hints, IteratorConfig::default(), RecordingEnvironment::new());
        let mut rng = StdRng::seed_from_u64(4);
        let mut table = table();

        let (qid, _) = table.submit(question("www.example.com."), &menv, &mut rng);
        let req1 = menv.services.last_sent().unwrap().message;
        // A referral to the root itself doesn't strictly descend from the
        // root delegation point already in use.
        let bogus = referral_response(&req1, &name("."), &name("ns1."), Ipv4Addr::new(198, 51, 100, 1));
        let outcome = table.reply(qid, bogus, &menv, &mut rng);

        assert!(matches!(outcome, QueryOutcome::Failed));
        // No further target was tried once the referral was rejected.
        assert_eq!(1, menv.services.sent().len());
        assert_eq!(
            Some(&ResolutionError::NonDescendingReferral),
            table.get(qid).and_then(|q| q.minfo.last_error())
        );
    }
}

