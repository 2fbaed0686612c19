// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-query
#![deny(unsafe_code)]

/// Conjunctive `where` conditions shared by filters and queries.
mod conditions;
/// Declarative entity filters.
mod filter;
/// Shortcode expansion and stripping.
mod resolver;

pub use conditions::{Condition, ConditionOp, parse_conditions};
pub use filter::{FilterDef, FilterEngine, Selection};
pub use resolver::{
    DEFAULT_MAX_DEPTH, ResolverContext, ResolverEngine, strip_payload, strip_string,
};
