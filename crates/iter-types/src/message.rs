//! The parsed form of a DNS message, as the (out-of-scope) wire codec would
//! hand it to the iterator. This module only carries the fields component F
//! branches on when classifying a nameserver reply; it does not encode or
//! decode wire octets.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::class::DnsClass;
use crate::name::Name;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Other(u8),
}

impl Rcode {
    pub fn is_error(&self) -> bool {
        !matches!(self, Rcode::NoError | Rcode::NameError)
    }
}

/// A record type together with whatever data it carries. Only the types the
/// iterator needs to reason about are distinguished; everything else is
/// opaque.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordData {
    A { address: Ipv4Addr },
    AAAA { address: Ipv6Addr },
    NS { nsdname: Name },
    CNAME { cname: Name },
    SOA { mname: Name },
    Unknown { rtype: u16 },
}

impl RecordData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordData::A { .. } => RecordType::A,
            RecordData::AAAA { .. } => RecordType::AAAA,
            RecordData::NS { .. } => RecordType::NS,
            RecordData::CNAME { .. } => RecordType::CNAME,
            RecordData::SOA { .. } => RecordType::SOA,
            RecordData::Unknown { rtype } => RecordType::Other(*rtype),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    AAAA,
    NS,
    CNAME,
    SOA,
    Other(u16),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QueryType {
    Record(RecordType),
    Wildcard,
}

impl QueryType {
    pub fn matches(&self, rtype: RecordType) -> bool {
        match self {
            QueryType::Record(t) => *t == rtype,
            QueryType::Wildcard => true,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResourceRecord {
    pub name: Name,
    pub rdata: RecordData,
    pub rclass: DnsClass,
    pub ttl: u32,
}

/// A DNS question: QNAME, QTYPE, QCLASS.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub name: Name,
    pub qtype: QueryType,
    pub qclass: DnsClass,
}

/// The parsed form of a DNS message. Counts and wire-only framing fields
/// (QDCOUNT etc.) are the codec's concern, not the iterator's, so they are
/// not represented here.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u16,
    pub is_response: bool,
    pub is_truncated: bool,
    pub is_authoritative: bool,
    pub rcode: Rcode,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Basic sanity check that `response` is plausibly an answer to
    /// `request`: matching ID, a response bit, not truncated, and a single
    /// matching question. Deeper validation (does it actually answer the
    /// question) is the iterator's job, not this check's.
    pub fn is_plausible_reply_to(&self, request: &Message) -> bool {
        self.id == request.id
            && self.is_response
            && !self.is_truncated
            && self.questions == request.questions
    }
}
