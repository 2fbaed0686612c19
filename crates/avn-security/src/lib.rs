// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-security
#![deny(unsafe_code)]

/// Token authorization and REST gating.
mod auth;
/// Rate limiting, blocks, and lockdown.
mod security;

pub use auth::{AccessDecision, AuthManager, AuthMode, ScopeKind, TokenScope, token_preview};
pub use security::{SecurityManager, SecuritySettings};
