//! Operator tooling for mono node homes.
//!
//! The crate implements the network onboarding pipeline: resolve a
//! [`network::Network`], fetch and validate its genesis and peer document,
//! generate the canonical [`patch::ConfigPatch`], and write everything into
//! the node home atomically. The same canonical values drive the
//! [`doctor`], which detects and repairs configuration drift.
//!
//! Front-ends drive [`join::Orchestrator`] and [`doctor::repair`] and render
//! the [`report::Step`] lists they return; nothing in the core prints.

pub mod cancel;
pub mod config;
pub mod doctor;
pub mod errors;
pub mod fetch;
pub mod genesis;
pub mod join;
pub mod network;
pub mod patch;
pub mod peers;
pub mod probe;
pub mod report;
pub mod service;
pub mod writer;
