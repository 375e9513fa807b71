use std::path::PathBuf;

use anyhow::Context;
use env_logger::Env;
use plugin_loaders::file::FileConfig;
use telemetron::{
    agent::reload::ReloadNotifier,
    config::{LoaderDeclaration, source::merge_override},
    plugin::{
        PluginConfig,
        registry::{Registry, RegistrationErrors},
    },
};

/// Name of the loader plugin that reads the configuration file given on the command line.
pub const ROOT_LOADER: &str = "toml";

/// Initializes the global logger.
///
/// Call this first! `RUST_LOG` takes precedence over `debug`.
///
/// # Example
///
/// ```
/// use telemetron_agent::init_logger;
///
/// fn main() {
///     init_logger(false);
///     log::info!("I can log now!");
/// }
/// ```
pub fn init_logger(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    // Print a warning if we are running in debug mode.
    #[cfg(debug_assertions)]
    {
        log::warn!("DEBUG assertions are enabled, this build of the agent is fine for debugging, but not for production.");
    }
}

/// Builds the registry of the plugins that are compiled into the agent.
///
/// `notifier` is shared by every `toml` loader: notifying it reloads the configuration.
pub fn registry(notifier: ReloadNotifier) -> Result<Registry, RegistrationErrors> {
    let builder = Registry::builder();
    let builder = plugin_example::register(builder);
    let builder = plugin_parsers::register(builder);
    plugin_loaders::register(builder, notifier).build()
}

/// Declares the root loader, which reads the configuration file at `path`.
pub fn root_declaration(path: PathBuf, overrides: toml::Table, watch_file: bool) -> LoaderDeclaration {
    LoaderDeclaration::new(PluginConfig::new(FileConfig {
        path,
        overrides,
        watch_file,
        ..Default::default()
    }))
}

/// Parses the config overrides provided on the command line, and merges them into a single table.
pub fn parse_config_overrides(overrides: &[String]) -> anyhow::Result<toml::Table> {
    let mut config_override = toml::Table::new();
    for o in overrides {
        let parsed: toml::Table = o
            .parse()
            .with_context(|| format!("config override is not a valid TOML table: {o}"))?;
        merge_override(&mut config_override, parsed);
    }
    Ok(config_override)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use telemetron::{agent::reload::ReloadNotifier, plugin::PluginKind};

    use super::{parse_config_overrides, registry};

    #[test]
    fn builtin_plugins() {
        let registry = registry(ReloadNotifier::new()).unwrap();
        assert_eq!(registry.names(PluginKind::Input), vec!["example", "example2"]);
        assert_eq!(registry.names(PluginKind::Output), vec!["example"]);
        assert_eq!(registry.names(PluginKind::Parser), vec!["influx", "collectd"]);
        assert_eq!(registry.names(PluginKind::Loader), vec!["toml", "http", "inline", "null"]);
    }

    #[test]
    fn fresh_configs_match_factories() {
        let registry = registry(ReloadNotifier::new()).unwrap();
        let configs = registry.configs();
        for kind in PluginKind::ALL {
            for name in registry.names(kind) {
                let factory = registry.factory(kind, name).unwrap();
                let config = configs.plugin_config(kind, name).unwrap();
                assert_eq!(config.shape(), factory.shape(), "{kind} {name}");
            }
        }
    }

    #[test]
    fn overrides_are_merged() {
        let overrides = parse_config_overrides(&[
            String::from("agent.interval = '1m'"),
            String::from("[inputs.example]\nvalue = 'a'"),
            String::from("inputs.example.name_override = 'b'"),
        ])
        .unwrap();
        let expected: toml::Table = "agent.interval = '1m'\n[inputs.example]\nvalue = 'a'\nname_override = 'b'"
            .parse()
            .unwrap();
        assert_eq!(overrides, expected);

        assert!(parse_config_overrides(&[String::from("not toml")]).is_err());
    }
}
