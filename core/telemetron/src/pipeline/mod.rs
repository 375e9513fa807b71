//! The plugin instances of one generation.

use crate::{
    config::{
        AgentConfig, CommonInputConfig, CommonLoaderConfig, CommonOutputConfig, InputDeclaration,
        LoaderDeclaration, OutputDeclaration,
    },
    plugin::{Input, Loader, Output, PluginConfig, registry::BuildError, registry::Registry},
};

pub mod load;

pub use load::{LoadError, LoadOptions, load_pipeline};

/// An input plugin, ready to gather.
#[derive(Debug)]
pub struct RunningInput {
    plugin_name: String,
    pub common: CommonInputConfig,
    pub config: PluginConfig,
    /// Data format of the parser attached to the input, if the input accepts one.
    pub data_format: Option<String>,
    pub input: Box<dyn Input>,
}

#[derive(Debug)]
pub struct RunningOutput {
    plugin_name: String,
    pub common: CommonOutputConfig,
    pub config: PluginConfig,
    pub output: Box<dyn Output>,
}

/// A loader plugin, with the configuration it was built from.
#[derive(Debug)]
pub struct RunningLoader {
    plugin_name: String,
    pub common: CommonLoaderConfig,
    pub config: PluginConfig,
    pub loader: Box<dyn Loader>,
}

impl RunningInput {
    /// Builds an input and, if it has the parser capability, attaches its parser.
    pub fn create(name: &str, declaration: InputDeclaration, registry: &Registry) -> Result<Self, BuildError> {
        let mut input = registry.create_input(name, &declaration.plugin)?;
        let data_format = match input.parser_input() {
            Some(target) => {
                let parser = declaration.parser;
                target.set_parser(registry.create_parser(&parser.format, &parser.config)?);
                Some(parser.format)
            }
            None => None,
        };
        Ok(Self {
            plugin_name: name.to_owned(),
            common: declaration.common,
            config: declaration.plugin,
            data_format,
            input,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The name of the input, taking `name_override` into account.
    pub fn name(&self) -> &str {
        self.common.name_override.as_deref().unwrap_or(&self.plugin_name)
    }
}

impl RunningOutput {
    pub fn create(name: &str, declaration: OutputDeclaration, registry: &Registry) -> Result<Self, BuildError> {
        let output = registry.create_output(name, &declaration.plugin)?;
        Ok(Self {
            plugin_name: name.to_owned(),
            common: declaration.common,
            config: declaration.plugin,
            output,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn name(&self) -> &str {
        self.common.name_override.as_deref().unwrap_or(&self.plugin_name)
    }
}

impl RunningLoader {
    pub fn create(name: &str, declaration: LoaderDeclaration, registry: &Registry) -> Result<Self, BuildError> {
        let loader = registry.create_loader(name, &declaration.plugin)?;
        Ok(Self {
            plugin_name: name.to_owned(),
            common: declaration.common,
            config: declaration.plugin,
            loader,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// A short description of the loader and its source, for messages.
    pub fn describe(&self) -> String {
        match self.loader.origin() {
            Some(origin) => format!("{} ({origin})", self.plugin_name),
            None => self.plugin_name.clone(),
        }
    }
}

/// Everything that one generation has built.
///
/// The pipeline is replaced wholesale on every configuration change: dropping it
/// drops every plugin instance.
#[derive(Debug, Default)]
pub struct Pipeline {
    /// Agent settings, from the root loader.
    pub agent: AgentConfig,
    pub inputs: Vec<RunningInput>,
    pub outputs: Vec<RunningOutput>,
    /// Every loader of the tree, root first.
    pub loaders: Vec<RunningLoader>,
}

impl Pipeline {
    /// Formats a human-readable summary of the pipeline.
    pub fn summary(&self) -> String {
        macro_rules! pluralize {
            ($count:expr, $str:expr) => {
                if $count > 1 { concat!($str, "s") } else { $str }
            };
        }

        fn list(names: impl Iterator<Item = String>) -> String {
            let list: Vec<String> = names.map(|n| format!("    - {n}")).collect();
            if list.is_empty() {
                String::from("    ∅")
            } else {
                list.join("\n")
            }
        }

        let n_inputs = self.inputs.len();
        let n_outputs = self.outputs.len();
        let n_loaders = self.loaders.len();
        let input_str = pluralize!(n_inputs, "input");
        let output_str = pluralize!(n_outputs, "output");
        let loader_str = pluralize!(n_loaders, "loader");

        let input_list = list(self.inputs.iter().map(|i| match &i.data_format {
            Some(format) => format!("{} (data format: {format})", i.name()),
            None => i.name().to_owned(),
        }));
        let output_list = list(self.outputs.iter().map(|o| o.name().to_owned()));
        let loader_list = list(self.loaders.iter().map(|l| l.describe()));
        let interval = humantime_serde::re::humantime::format_duration(self.agent.interval);

        indoc::formatdoc! {"
            Pipeline ready, gathering every {interval}.
            📥 {n_inputs} {input_str}:
            {input_list}

            📝 {n_outputs} {output_str}:
            {output_list}

            🔄 {n_loaders} {loader_str}:
            {loader_list}
            "
        }
    }
}
