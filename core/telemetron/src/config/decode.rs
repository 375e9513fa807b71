use std::fmt;

use serde::de::DeserializeOwned;

use super::{
    AgentConfig, CommonInputConfig, CommonLoaderConfig, CommonOutputConfig, Config, DEFAULT_DATA_FORMAT,
    InputDeclaration, LoaderDeclaration, OutputDeclaration, ParserDeclaration,
    claim::{Ignored, decode_tracked, unclaimed_keys},
    hint,
};
use crate::plugin::{PluginConfig, PluginKind, registry::ConfigRegistry};

const SECTIONS: [&str; 4] = ["agent", "inputs", "outputs", "loaders"];

/// Decodes configuration sources into [`Config`] values.
///
/// Decoding is all-or-nothing: if any declaration is invalid, or if any key of the
/// source is not consumed by a configuration structure, no `Config` is returned.
/// The bodies of loader declarations are not checked for unconsumed keys, since they
/// may contain configuration that only the nested loader understands.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'r> {
    configs: ConfigRegistry<'r>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid TOML")]
    Syntax(#[from] toml::de::Error),
    #[error("unexpected type for {path}: expected {expected}, got {actual}")]
    BadType {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("unknown {kind} plugin {name:?} at {path}{}", DidYouMean(.suggestion))]
    UnknownPlugin {
        kind: PluginKind,
        name: String,
        path: String,
        suggestion: Option<String>,
    },
    #[error("invalid configuration at {path}")]
    Invalid {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown configuration keys: {}", .keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", "))]
    Unclaimed { keys: Vec<UnclaimedKey> },
}

/// A key that no configuration structure has consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclaimedKey {
    pub path: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for UnclaimedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, DidYouMean(&self.suggestion))
    }
}

struct DidYouMean<'a>(&'a Option<String>);

impl fmt::Display for DidYouMean<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) => write!(f, " (did you mean {s:?}?)"),
            None => Ok(()),
        }
    }
}

impl<'r> Decoder<'r> {
    pub fn new(configs: ConfigRegistry<'r>) -> Self {
        Self { configs }
    }

    /// Parses and decodes a TOML document.
    pub fn decode_str(&self, source: &str) -> Result<Config, DecodeError> {
        let table: toml::Table = toml::from_str(source)?;
        self.decode_table(table)
    }

    /// Decodes a parsed TOML document.
    pub fn decode_table(&self, source: toml::Table) -> Result<Config, DecodeError> {
        let mut config = Config::default();
        let mut unclaimed = Vec::new();

        for (section, value) in source {
            match section.as_str() {
                "agent" => {
                    let body = expect_table(value, "agent")?;
                    let (agent, ignored) = decode_fragment::<AgentConfig>(&body, "agent")?;
                    unclaimed_keys(&body, &[&ignored], "agent", &mut unclaimed);
                    config.agent = agent;
                }
                "inputs" => {
                    for (name, value) in expect_table(value, "inputs")? {
                        let mut declarations = Vec::new();
                        for (path, body) in declarations_of(value, &format!("inputs.{name}"))? {
                            declarations.push(self.decode_input(&name, &body, &path, &mut unclaimed)?);
                        }
                        config.inputs.insert(name, declarations);
                    }
                }
                "outputs" => {
                    for (name, value) in expect_table(value, "outputs")? {
                        let mut declarations = Vec::new();
                        for (path, body) in declarations_of(value, &format!("outputs.{name}"))? {
                            declarations.push(self.decode_output(&name, &body, &path, &mut unclaimed)?);
                        }
                        config.outputs.insert(name, declarations);
                    }
                }
                "loaders" => {
                    for (name, value) in expect_table(value, "loaders")? {
                        let mut declarations = Vec::new();
                        for (path, body) in declarations_of(value, &format!("loaders.{name}"))? {
                            declarations.push(self.decode_loader(&name, &body, &path)?);
                        }
                        config.loaders.insert(name, declarations);
                    }
                }
                _ => unclaimed.push(section),
            }
        }

        if unclaimed.is_empty() {
            Ok(config)
        } else {
            let keys = unclaimed
                .into_iter()
                .map(|path| {
                    let suggestion = if path.contains('.') {
                        None
                    } else {
                        hint::closest(&path, SECTIONS).map(str::to_owned)
                    };
                    UnclaimedKey { path, suggestion }
                })
                .collect();
            Err(DecodeError::Unclaimed { keys })
        }
    }

    fn decode_input(
        &self,
        name: &str,
        body: &toml::Table,
        path: &str,
        unclaimed: &mut Vec<String>,
    ) -> Result<InputDeclaration, DecodeError> {
        let (plugin, plugin_ignored) = self.decode_plugin(PluginKind::Input, name, body, path)?;
        let (common, common_ignored) = decode_fragment::<CommonInputConfig>(body, path)?;

        let format = common.data_format.as_deref().unwrap_or(DEFAULT_DATA_FORMAT);
        let (parser_config, parser_ignored) =
            self.decode_plugin(PluginKind::Parser, format, body, &format!("{path}.data_format"))?;
        let parser = ParserDeclaration {
            format: format.to_owned(),
            config: parser_config,
        };

        unclaimed_keys(body, &[&common_ignored, &plugin_ignored, &parser_ignored], path, unclaimed);
        Ok(InputDeclaration { common, plugin, parser })
    }

    fn decode_output(
        &self,
        name: &str,
        body: &toml::Table,
        path: &str,
        unclaimed: &mut Vec<String>,
    ) -> Result<OutputDeclaration, DecodeError> {
        let (plugin, plugin_ignored) = self.decode_plugin(PluginKind::Output, name, body, path)?;
        let (common, common_ignored) = decode_fragment::<CommonOutputConfig>(body, path)?;

        unclaimed_keys(body, &[&common_ignored, &plugin_ignored], path, unclaimed);
        Ok(OutputDeclaration { common, plugin })
    }

    fn decode_loader(&self, name: &str, body: &toml::Table, path: &str) -> Result<LoaderDeclaration, DecodeError> {
        let (plugin, _) = self.decode_plugin(PluginKind::Loader, name, body, path)?;
        let (common, _) = decode_fragment::<CommonLoaderConfig>(body, path)?;
        Ok(LoaderDeclaration { common, plugin })
    }

    /// Resolves a plugin config and populates it from the declaration body.
    fn decode_plugin(
        &self,
        kind: PluginKind,
        name: &str,
        body: &toml::Table,
        path: &str,
    ) -> Result<(PluginConfig, Ignored), DecodeError> {
        let mut config = self
            .configs
            .plugin_config(kind, name)
            .ok_or_else(|| DecodeError::UnknownPlugin {
                kind,
                name: name.to_owned(),
                path: path.to_owned(),
                suggestion: hint::closest(name, self.configs.names(kind)).map(str::to_owned),
            })?;
        let ignored = config.decode(body).map_err(|source| DecodeError::Invalid {
            path: path.to_owned(),
            source,
        })?;
        Ok((config, ignored))
    }
}

/// Splits a declaration into its bodies: one for a table, one per element for an array of tables.
fn declarations_of(value: toml::Value, path: &str) -> Result<Vec<(String, toml::Table)>, DecodeError> {
    match value {
        toml::Value::Table(body) => Ok(vec![(path.to_owned(), body)]),
        toml::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("{path}[{i}]");
                match item {
                    toml::Value::Table(body) => Ok((path, body)),
                    bad => Err(bad_type(path, "table", &bad)),
                }
            })
            .collect(),
        bad => Err(bad_type(path.to_owned(), "table or array of tables", &bad)),
    }
}

fn expect_table(value: toml::Value, path: &str) -> Result<toml::Table, DecodeError> {
    match value {
        toml::Value::Table(t) => Ok(t),
        bad => Err(bad_type(path.to_owned(), "table", &bad)),
    }
}

fn bad_type(path: String, expected: &'static str, actual: &toml::Value) -> DecodeError {
    DecodeError::BadType {
        path,
        expected,
        actual: actual.type_str(),
    }
}

fn decode_fragment<T: DeserializeOwned>(body: &toml::Table, path: &str) -> Result<(T, Ignored), DecodeError> {
    decode_tracked(body.clone()).map_err(|source| DecodeError::Invalid {
        path: path.to_owned(),
        source,
    })
}
