//! DNS classes. Only the values the iterative core needs to branch on.

use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DnsClass {
    IN,
    CH,
    HS,
    Other(u16),
}

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsClass::IN => write!(f, "IN"),
            DnsClass::CH => write!(f, "CH"),
            DnsClass::HS => write!(f, "HS"),
            DnsClass::Other(n) => write!(f, "CLASS{n}"),
        }
    }
}
