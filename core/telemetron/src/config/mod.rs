//! Decoded configurations.
//!
//! A configuration source is a TOML document with up to four top-level sections:
//!
//! ```toml
//! [agent]
//! interval = "10s"
//!
//! [inputs.example]
//! value = "x"
//!
//! [[outputs.example]]
//! value = "y"
//!
//! [loaders.toml]
//! path = "/etc/telemetron/extra.toml"
//! ```
//!
//! Each entry of `inputs`, `outputs` and `loaders` is a *declaration*: its key is the
//! name of a registered plugin, and its body is shared between the settings that are
//! common to the plugin kind (such as `name_override`) and the plugin-specific settings.
//! A plugin may be declared several times with an array of tables.
//!
//! The [`Decoder`] turns a source into a [`Config`].

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::plugin::{PluginConfig, PluginKind};

pub mod claim;
mod decode;
pub mod hint;
pub mod source;

pub use decode::{DecodeError, Decoder, UnclaimedKey};

/// Data format used by inputs that do not set `data_format`.
pub const DEFAULT_DATA_FORMAT: &str = "influx";

/// The result of one loader's decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub agent: AgentConfig,
    /// Input declarations, grouped by plugin name, in declaration order.
    pub inputs: IndexMap<String, Vec<InputDeclaration>>,
    pub outputs: IndexMap<String, Vec<OutputDeclaration>>,
    pub loaders: IndexMap<String, Vec<LoaderDeclaration>>,
}

impl Config {
    /// Number of declarations of the given kind.
    pub fn count(&self, kind: PluginKind) -> usize {
        fn sum<T>(map: &IndexMap<String, Vec<T>>) -> usize {
            map.values().map(Vec::len).sum()
        }
        match kind {
            PluginKind::Input => sum(&self.inputs),
            PluginKind::Output => sum(&self.outputs),
            PluginKind::Loader => sum(&self.loaders),
            PluginKind::Parser => sum(&self.inputs),
        }
    }

    /// Returns `true` if the configuration declares no plugin at all.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.loaders.is_empty()
    }

    /// Appends the declarations of `other` after the ones of `self`.
    ///
    /// The agent settings of `self` are kept.
    pub fn append(&mut self, other: Config) {
        fn extend<T>(into: &mut IndexMap<String, Vec<T>>, from: IndexMap<String, Vec<T>>) {
            for (name, declarations) in from {
                into.entry(name).or_default().extend(declarations);
            }
        }
        extend(&mut self.inputs, other.inputs);
        extend(&mut self.outputs, other.outputs);
        extend(&mut self.loaders, other.loaders);
    }
}

/// Agent-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Gathering interval of the inputs.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Settings that every input accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonInputConfig {
    /// Replaces the name of the measurements produced by the input.
    pub name_override: Option<String>,
    /// Name of the parser that decodes the raw data of the input.
    pub data_format: Option<String>,
}

/// Settings that every output accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonOutputConfig {
    pub name_override: Option<String>,
}

/// Settings that every loader accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonLoaderConfig {}

#[derive(Debug, Clone, PartialEq)]
pub struct InputDeclaration {
    pub common: CommonInputConfig,
    pub plugin: PluginConfig,
    /// The parser selected by `data_format`.
    pub parser: ParserDeclaration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserDeclaration {
    /// Name of the parser plugin.
    pub format: String,
    pub config: PluginConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDeclaration {
    pub common: CommonOutputConfig,
    pub plugin: PluginConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderDeclaration {
    pub common: CommonLoaderConfig,
    pub plugin: PluginConfig,
}

impl LoaderDeclaration {
    /// Declares a loader programmatically, for instance the root loader of the agent.
    pub fn new(plugin: PluginConfig) -> Self {
        Self {
            common: CommonLoaderConfig::default(),
            plugin,
        }
    }
}
