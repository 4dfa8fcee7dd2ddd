//! caw — coordinated agent workflows.
//!
//! A single-process orchestration engine for fleets of AI coding agents:
//! plan admission into a dependency-ordered task graph, dependency-aware
//! scheduling, bounded runner pools supervising external agent processes,
//! an inter-agent message bus, session/lock coordination with a stale-actor
//! reaper, and an embedded SQLite store behind it all.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
