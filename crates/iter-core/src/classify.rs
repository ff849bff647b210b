//! Classifying a nameserver's reply against the question that produced it:
//! answer, referral, CNAME, or a terminal NXDOMAIN/NODATA. Ported from the
//! validation performed before a reply is trusted, generalised to
//! distinguish NXDOMAIN/NODATA from an ordinary answer as its own outcome.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use iter_types::message::{Message, Rcode, RecordData, RecordType, ResourceRecord};
use iter_types::name::Name;

#[derive(Debug, Clone)]
pub enum Classification {
    /// The answer section holds the final record(s) for the query name.
    Answer(Vec<ResourceRecord>),
    /// A non-authoritative pointer at a deeper zone cut.
    Referral {
        zone_name: Name,
        nameservers: HashSet<Name>,
        glue: Vec<ResourceRecord>,
    },
    /// The answer section holds a CNAME chain but not a final record of the
    /// queried type; `target` is the name to resolve next.
    Cname { rrs: Vec<ResourceRecord>, target: Name },
    /// NXDOMAIN or NODATA: a normal terminal outcome, not an error.
    Terminal(Vec<ResourceRecord>),
    /// The reply doesn't correspond to the request, signals an error, or
    /// carries nothing usable. Callers treat this like a timeout: try the
    /// next target.
    Invalid,
}

/// Classify `response` as a reply to `request`, given `current_match_count`
/// (the label count of the zone cut already reached, used to reject a
/// referral that doesn't improve on it).
pub fn classify(request: &Message, response: &Message, current_match_count: usize) -> Classification {
    if request.questions.len() != 1 {
        return Classification::Invalid;
    }
    let question = &request.questions[0];

    if !response.is_plausible_reply_to(request) {
        return Classification::Invalid;
    }
    if response.rcode.is_error() {
        return Classification::Invalid;
    }

    if let Some((final_name, cname_map)) = follow_cnames(&response.answers, &question.name) {
        let mut rrs_for_query = Vec::with_capacity(response.answers.len());
        let mut seen_final_record = false;
        let mut all_unknown = true;

        for rr in &response.answers {
            let rtype = rr.rdata.rtype();
            if matches!(rtype, RecordType::Other(_)) {
                continue;
            }
            all_unknown = false;

            if question.qtype.matches(rtype) && rr.name == final_name {
                rrs_for_query.push(rr.clone());
                seen_final_record = true;
            } else if rtype == RecordType::CNAME && cname_map.contains_key(&rr.name) {
                rrs_for_query.push(rr.clone());
            }
        }

        if all_unknown || rrs_for_query.is_empty() {
            return Classification::Invalid;
        }
        return if seen_final_record {
            Classification::Answer(rrs_for_query)
        } else {
            Classification::Cname {
                rrs: rrs_for_query,
                target: final_name,
            }
        };
    }

    match better_ns_names(&response.answers, &question.name, current_match_count)
        .into_iter()
        .chain(better_ns_names(&response.authority, &question.name, current_match_count))
        .reduce(|(n1, s1), (n2, s2)| match n1.labels().cmp(&n2.labels()) {
            Ordering::Greater => (n1, s1),
            Ordering::Equal => (n1, s1.union(&s2).cloned().collect()),
            Ordering::Less => (n2, s2),
        }) {
        Some((zone_name, nameservers)) => {
            let glue = collect_glue(response, &nameservers);
            Classification::Referral {
                zone_name,
                nameservers,
                glue,
            }
        }
        // No NS record improves on the zone cut we already have. An
        // NXDOMAIN, or an authoritative empty answer (NODATA), is a genuine
        // terminal result; anything else (a stale or unhelpful authority
        // section) carries nothing usable and is treated like a timeout.
        None if response.rcode == Rcode::NameError => {
            Classification::Terminal(terminal_soa(response, &question.name, current_match_count))
        }
        None if response.is_authoritative && response.answers.is_empty() => {
            Classification::Terminal(terminal_soa(response, &question.name, current_match_count))
        }
        None => Classification::Invalid,
    }
}

/// Follow CNAMEs in `rrs` starting from `target`, returning the final name
/// and the full CNAME map. `None` if there's a loop or nothing matches
/// `target` at all (directly or via a CNAME).
fn follow_cnames(rrs: &[ResourceRecord], target: &Name) -> Option<(Name, HashMap<Name, Name>)> {
    let mut cname_map = HashMap::new();
    let mut got_direct_match = false;
    for rr in rrs {
        if &rr.name == target {
            got_direct_match = true;
        }
        if let RecordData::CNAME { cname } = &rr.rdata {
            cname_map.insert(rr.name.clone(), cname.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut final_name = target.clone();
    while let Some(next) = cname_map.get(&final_name) {
        if seen.contains(next) {
            return None;
        }
        seen.insert(next.clone());
        final_name = next.clone();
    }

    if got_direct_match || !seen.is_empty() {
        Some((final_name, cname_map))
    } else {
        None
    }
}

/// Find NS RRs that improve on `current_match_count` for `target`, and the
/// zone name they improve to.
fn better_ns_names(rrs: &[ResourceRecord], target: &Name, current_match_count: usize) -> Option<(Name, HashSet<Name>)> {
    let mut match_count = current_match_count;
    let mut match_name = None;
    let mut ns_names = HashSet::new();

    for rr in rrs {
        if let RecordData::NS { nsdname } = &rr.rdata {
            if !target.is_subdomain_of(&rr.name) {
                continue;
            }
            match rr.name.labels().cmp(&match_count) {
                Ordering::Greater => {
                    match_count = rr.name.labels();
                    match_name = Some(rr.name.clone());
                    ns_names.clear();
                    ns_names.insert(nsdname.clone());
                }
                Ordering::Equal => {
                    ns_names.insert(nsdname.clone());
                }
                Ordering::Less => (),
            }
        }
    }

    match_name.map(|name| (name, ns_names))
}

fn collect_glue(response: &Message, ns_names: &HashSet<Name>) -> Vec<ResourceRecord> {
    let mut glue = Vec::new();
    for rr in response.answers.iter().chain(&response.authority).chain(&response.additional) {
        match &rr.rdata {
            RecordData::NS { nsdname } if ns_names.contains(nsdname) => glue.push(rr.clone()),
            RecordData::A { .. } | RecordData::AAAA { .. } if ns_names.contains(&rr.name) => glue.push(rr.clone()),
            _ => (),
        }
    }
    glue
}

/// The SOA carried alongside an NXDOMAIN/NODATA, if present and plausibly
/// authoritative for the query name.
fn terminal_soa(response: &Message, qname: &Name, current_match_count: usize) -> Vec<ResourceRecord> {
    let mut soa = None;
    for rr in &response.authority {
        if matches!(rr.rdata, RecordData::SOA { .. }) {
            if soa.is_some() {
                return Vec::new();
            }
            soa = Some(rr);
        }
    }

    match soa {
        Some(rr) if qname.is_subdomain_of(&rr.name) && rr.name.labels() >= current_match_count => vec![rr.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iter_types::class::DnsClass;
    use iter_types::message::{QueryType, Question, Rcode};
    use iter_types::name::test_util::name;
    use std::net::Ipv4Addr;

    fn question(n: &str) -> Question {
        Question {
            name: name(n),
            qtype: QueryType::Record(RecordType::A),
            qclass: DnsClass::IN,
        }
    }

    fn base_request(q: Question) -> Message {
        Message {
            id: 42,
            is_response: false,
            is_truncated: false,
            is_authoritative: false,
            rcode: Rcode::NoError,
            questions: vec![q],
            answers: vec![],
            authority: vec![],
            additional: vec![],
        }
    }

    fn base_response(request: &Message) -> Message {
        Message {
            is_response: true,
            ..request.clone()
        }
    }

    #[test]
    fn classifies_direct_answer() {
        let request = base_request(question("www.example.com."));
        let mut response = base_response(&request);
        response.answers.push(ResourceRecord {
            name: name("www.example.com."),
            rdata: RecordData::A {
                address: Ipv4Addr::new(1, 1, 1, 1),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });

        match classify(&request, &response, 0) {
            Classification::Answer(rrs) => assert_eq!(1, rrs.len()),
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[test]
    fn classifies_cname_without_final_record() {
        let request = base_request(question("alias.example.com."));
        let mut response = base_response(&request);
        response.answers.push(ResourceRecord {
            name: name("alias.example.com."),
            rdata: RecordData::CNAME {
                cname: name("target.example.com."),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });

        match classify(&request, &response, 0) {
            Classification::Cname { target, .. } => assert_eq!(name("target.example.com."), target),
            other => panic!("expected cname, got {other:?}"),
        }
    }

    #[test]
    fn classifies_referral() {
        let request = base_request(question("www.example.com."));
        let mut response = base_response(&request);
        response.authority.push(ResourceRecord {
            name: name("example.com."),
            rdata: RecordData::NS {
                nsdname: name("ns1.example.com."),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });
        response.additional.push(ResourceRecord {
            name: name("ns1.example.com."),
            rdata: RecordData::A {
                address: Ipv4Addr::new(2, 2, 2, 2),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });

        match classify(&request, &response, 0) {
            Classification::Referral {
                zone_name, glue, ..
            } => {
                assert_eq!(name("example.com."), zone_name);
                assert_eq!(2, glue.len());
            }
            other => panic!("expected referral, got {other:?}"),
        }
    }

    #[test]
    fn rejects_referral_that_does_not_improve() {
        let request = base_request(question("www.example.com."));
        let mut response = base_response(&request);
        response.authority.push(ResourceRecord {
            name: name("example.com."),
            rdata: RecordData::NS {
                nsdname: name("ns1.example.com."),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });

        // current_match_count already at example.com.'s label count: no improvement.
        match classify(&request, &response, name("example.com.").labels()) {
            Classification::Invalid => (),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn classifies_nxdomain_as_terminal() {
        let request = base_request(question("nope.example.com."));
        let mut response = base_response(&request);
        response.rcode = Rcode::NameError;

        match classify(&request, &response, 0) {
            Classification::Terminal(_) => (),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn classifies_authoritative_empty_answer_as_nodata_terminal() {
        let request = base_request(question("empty.example.com."));
        let mut response = base_response(&request);
        response.is_authoritative = true;

        match classify(&request, &response, 0) {
            Classification::Terminal(_) => (),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn non_authoritative_empty_answer_with_no_referral_is_invalid() {
        let request = base_request(question("empty.example.com."));
        let response = base_response(&request);

        assert!(matches!(classify(&request, &response, 0), Classification::Invalid));
    }

    #[test]
    fn rejects_mismatched_id() {
        let request = base_request(question("www.example.com."));
        let mut response = base_response(&request);
        response.id = request.id + 1;

        assert!(matches!(classify(&request, &response, 0), Classification::Invalid));
    }

    #[test]
    fn rejects_servfail() {
        let request = base_request(question("www.example.com."));
        let mut response = base_response(&request);
        response.rcode = Rcode::ServerFailure;

        assert!(matches!(classify(&request, &response, 0), Classification::Invalid));
    }

    #[test]
    fn follows_cname_chain_to_final_answer() {
        let request = base_request(question("alias.example.com."));
        let mut response = base_response(&request);
        response.answers.push(ResourceRecord {
            name: name("alias.example.com."),
            rdata: RecordData::CNAME {
                cname: name("target.example.com."),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });
        response.answers.push(ResourceRecord {
            name: name("target.example.com."),
            rdata: RecordData::A {
                address: Ipv4Addr::new(3, 3, 3, 3),
            },
            rclass: DnsClass::IN,
            ttl: 300,
        });

        match classify(&request, &response, 0) {
            Classification::Answer(rrs) => assert_eq!(2, rrs.len()),
            other => panic!("expected answer, got {other:?}"),
        }
    }
}
