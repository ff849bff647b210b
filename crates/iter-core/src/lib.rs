#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod cache;
pub mod classify;
pub mod config;
pub mod env;
pub mod error;
pub mod iterator;
pub mod metrics;
pub mod pipeline;
pub mod qstate;
pub mod query_table;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;
