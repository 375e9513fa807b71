//! Example plugins.
//!
//! - input `example`: emits its `value`, decoded by the parser selected by `data_format`;
//! - input `example2`: emits its `value` as is;
//! - output `example`: logs what it receives.

use serde::{Deserialize, Serialize};
use telemetron::{
    metric::{FieldValue, Metric},
    plugin::{Input, Output, Parser, ParserInput, factory::FromConfig, registry::RegistryBuilder},
};

/// Registers the example plugins.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .add_input::<ExampleInput>("example")
        .add_input::<Example2Input>("example2")
        .add_output::<ExampleOutput>("example")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub value: String,
}

#[derive(Debug)]
pub struct ExampleInput {
    value: String,
    parser: Option<Box<dyn Parser>>,
}

impl ExampleInput {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn has_parser(&self) -> bool {
        self.parser.is_some()
    }
}

impl FromConfig for ExampleInput {
    type Config = Config;

    fn from_config(config: Config) -> anyhow::Result<Self> {
        Ok(Self {
            value: config.value,
            parser: None,
        })
    }
}

impl Input for ExampleInput {
    fn gather(&mut self) -> anyhow::Result<Vec<Metric>> {
        match &self.parser {
            Some(parser) => parser.parse(self.value.as_bytes()),
            None => Ok(vec![value_metric("example", &self.value)]),
        }
    }

    fn parser_input(&mut self) -> Option<&mut dyn ParserInput> {
        Some(self)
    }
}

impl ParserInput for ExampleInput {
    fn set_parser(&mut self, parser: Box<dyn Parser>) {
        self.parser = Some(parser);
    }
}

#[derive(Debug)]
pub struct Example2Input {
    value: String,
}

impl FromConfig for Example2Input {
    type Config = Config;

    fn from_config(config: Config) -> anyhow::Result<Self> {
        Ok(Self { value: config.value })
    }
}

impl Input for Example2Input {
    fn gather(&mut self) -> anyhow::Result<Vec<Metric>> {
        Ok(vec![value_metric("example2", &self.value)])
    }
}

#[derive(Debug)]
pub struct ExampleOutput {
    value: String,
    connected: bool,
}

impl FromConfig for ExampleOutput {
    type Config = Config;

    fn from_config(config: Config) -> anyhow::Result<Self> {
        Ok(Self {
            value: config.value,
            connected: false,
        })
    }
}

impl Output for ExampleOutput {
    fn connect(&mut self) -> anyhow::Result<()> {
        log::debug!("example output {:?} connected", self.value);
        self.connected = true;
        Ok(())
    }

    fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
        anyhow::ensure!(self.connected, "example output {:?} is not connected", self.value);
        for m in metrics {
            log::info!("[{}] {m:?}", self.value);
        }
        Ok(())
    }
}

fn value_metric(name: &str, value: &str) -> Metric {
    Metric::new(name).with_field("value", FieldValue::String(value.to_owned()))
}
