// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-command
#![deny(unsafe_code)]

/// Statement parsing and the handler chain.
mod parser;
/// Action dispatch and envelope normalization.
mod registry;

pub use parser::{CommandParser, ParseContext, ParsedCommand};
pub use registry::{CommandMeta, CommandOutcome, CommandRegistry, HandlerFn};
