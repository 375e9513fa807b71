//! Plugin kinds and the capabilities each kind implements.
//!
//! ## Plugin lifecycle
//!
//! 1. **Registration**: a factory is registered in the [`Registry`](registry::Registry)
//!    under a kind and a name, once, at process start. The factory advertises the
//!    shape of the configuration it expects.
//!
//! 2. **Decoding**: a loader decodes a configuration source. For each declaration,
//!    the decoder asks the registry for a fresh configuration value of the right shape,
//!    and populates it from the declaration body.
//!
//! 3. **Construction**: the factory consumes the decoded configuration and returns
//!    a plugin instance, which is wrapped with its kind-wide settings in a
//!    `Running*` value of the [`Pipeline`](crate::pipeline::Pipeline).
//!
//! 4. **Discard**: when the configuration changes, the whole pipeline is dropped
//!    and a new one is built from scratch.
//!
//! ## Writing a plugin
//!
//! Define a configuration structure that implements [`serde::Deserialize`],
//! [`serde::Serialize`], [`Default`], [`Clone`] and [`Debug`], then implement
//! [`FromConfig`](factory::FromConfig) and the trait of the plugin kind.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use telemetron::metric::Metric;
//! use telemetron::plugin::{factory::FromConfig, registry::Registry, Input};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct Config {
//!     path: String,
//! }
//!
//! #[derive(Debug)]
//! struct FileSize {
//!     path: String,
//! }
//!
//! impl FromConfig for FileSize {
//!     type Config = Config;
//!
//!     fn from_config(config: Config) -> anyhow::Result<Self> {
//!         Ok(Self { path: config.path })
//!     }
//! }
//!
//! impl Input for FileSize {
//!     fn gather(&mut self) -> anyhow::Result<Vec<Metric>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let registry = Registry::builder().add_input::<FileSize>("file_size").build().unwrap();
//! assert!(registry.input("file_size").is_some());
//! ```
//!
//! The configuration structure must *not* use `#[serde(deny_unknown_fields)]`:
//! the body of a declaration also contains the settings that are common to every
//! plugin of the same kind (see [`config`](crate::config)).

use std::fmt;

use async_trait::async_trait;

use crate::{
    config::Config,
    context::Context,
    metric::Metric,
    plugin::registry::ConfigRegistry,
};

pub mod config;
pub mod factory;
pub mod registry;

pub use config::{ConfigShape, ConfigType, PluginConfig};

/// The kinds of plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Input,
    Output,
    Loader,
    Parser,
}

impl PluginKind {
    /// All the kinds, in the order of the configuration sections.
    pub const ALL: [PluginKind; 4] = [
        PluginKind::Input,
        PluginKind::Output,
        PluginKind::Loader,
        PluginKind::Parser,
    ];

    /// Name of the kind, as used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Input => "input",
            PluginKind::Output => "output",
            PluginKind::Loader => "loader",
            PluginKind::Parser => "parser",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gathers telemetry data.
pub trait Input: fmt::Debug + Send + Sync {
    /// Gathers the current metrics.
    fn gather(&mut self) -> anyhow::Result<Vec<Metric>>;

    /// Returns the parser capability of this input, if it has one.
    ///
    /// Inputs that decode raw data with a [`Parser`] return `Some(self)`.
    /// The parser selected by the `data_format` setting is then attached to the input
    /// right after its construction.
    fn parser_input(&mut self) -> Option<&mut dyn ParserInput> {
        None
    }
}

/// Optional capability of an [`Input`]: accepts a [`Parser`].
pub trait ParserInput {
    /// Sets the parser that the input must use.
    fn set_parser(&mut self, parser: Box<dyn Parser>);
}

/// Delivers telemetry data.
pub trait Output: fmt::Debug + Send + Sync {
    /// Connects the output to its destination.
    fn connect(&mut self) -> anyhow::Result<()>;

    /// Writes some metrics.
    fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()>;
}

/// Decodes raw bytes into metrics.
pub trait Parser: fmt::Debug + Send + Sync {
    fn parse(&self, buf: &[u8]) -> anyhow::Result<Vec<Metric>>;
}

/// Produces configuration, and tells when it changes.
///
/// ## Watch before load
/// Callers always call [`watch`](Loader::watch) *before* [`load`](Loader::load) on the
/// same loader. `watch` must not return before the monitoring is active, so that a change
/// that occurs while (or right after) the configuration is loaded is never missed.
///
/// ## Cancellation
/// Both methods, and [`Waiter::wait`], must return promptly once their context ends.
#[async_trait]
pub trait Loader: fmt::Debug + Send + Sync {
    /// Name of the loader plugin.
    fn name(&self) -> &str;

    /// Identifies the configuration source, for instance a canonical path or a URL.
    ///
    /// Loaders that return `Some` are checked for cycles: a loader cannot (transitively)
    /// declare another loader with the same origin.
    fn origin(&self) -> Option<String> {
        None
    }

    /// Establishes the monitoring of future changes.
    ///
    /// The returned waiter must observe `ctx`.
    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>>;

    /// Decodes the current configuration.
    async fn load(&self, ctx: &Context, configs: &ConfigRegistry<'_>) -> anyhow::Result<Config>;
}

/// An established watch on a change source.
#[async_trait]
pub trait Waiter: Send {
    /// Blocks until the change source fires, the context of the watch ends,
    /// or an error occurs.
    ///
    /// Returns `Ok(())` when a change has been detected. When the context ends,
    /// the result does not matter: the caller inspects the context.
    async fn wait(self: Box<Self>) -> anyhow::Result<()>;
}
