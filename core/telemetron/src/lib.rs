//! Configuration loading and plugin orchestration core of a telemetry agent.
//!
//! The agent does not gather nor deliver anything by itself. Plugins do:
//! - [inputs](plugin::Input) gather telemetry data,
//! - [outputs](plugin::Output) deliver it,
//! - [parsers](plugin::Parser) decode raw bytes for the inputs that accept them,
//! - [loaders](plugin::Loader) produce the configuration that declares all of the above,
//!   including more loaders.
//!
//! # Overview
//!
//! Every plugin is built from a weakly-typed configuration fragment by a factory
//! held in the [`Registry`](plugin::registry::Registry). The [decoder](config::Decoder)
//! turns a TOML source into a [`Config`](config::Config), and the
//! [loading protocol](pipeline::load) walks the loaders recursively to produce one
//! flat [`Pipeline`](pipeline::Pipeline).
//!
//! While a pipeline is live, the [watch orchestrator](agent::watch) observes every loader
//! that contributed to it. As soon as one of them reports a change, the generation
//! ends and the [agent](agent::Agent) builds a new one from scratch.
//!
//! ```text
//! Decoder ─▶ Config ─▶ loading protocol ─▶ Pipeline
//!                              │                │
//!                              ▼                ▼
//!                         Registry        Watch orchestrator ─▶ next generation
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod metric;
pub mod pipeline;
pub mod plugin;

#[cfg(any(test, feature = "test"))]
pub mod test;
