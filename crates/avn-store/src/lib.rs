// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-store
#![deny(unsafe_code)]

/// Auth and API substate operations on the system brain.
mod auth_state;
/// Brain backups and restore.
mod backup;
/// Project, entity, and version operations.
mod entities;
/// Integrity verification and reports.
mod integrity;
/// Deterministic filesystem layout.
mod locator;
/// The repository core: brain files, caching, the atomic write protocol.
mod repository;
/// Presets, export layouts, and scheduler tasks (system brain).
mod system_data;

pub use auth_state::generate_key;
pub use backup::BackupInfo;
pub use entities::{SaveOptions, SaveOutcome};
pub use integrity::{IntegrityIssue, IntegrityReport};
pub use locator::PathLocator;
pub use repository::{BrainRepository, SYSTEM_BRAIN};
