use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telemetron::{
    config::{Config, Decoder},
    context::Context,
    plugin::{Loader, Waiter, factory::FromConfig, registry::ConfigRegistry},
};

use crate::null::UntilDone;

/// The whole declaration body is the nested configuration.
///
/// ```toml
/// [[loaders.inline]]
/// [loaders.inline.outputs.example]
/// value = "y"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineConfig {
    #[serde(flatten)]
    pub body: toml::Table,
}

#[derive(Debug)]
pub struct InlineLoader {
    body: toml::Table,
}

impl FromConfig for InlineLoader {
    type Config = InlineConfig;

    fn from_config(config: InlineConfig) -> anyhow::Result<Self> {
        Ok(Self { body: config.body })
    }
}

#[async_trait]
impl Loader for InlineLoader {
    fn name(&self) -> &str {
        "inline"
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        Ok(Box::new(UntilDone(ctx.clone())))
    }

    async fn load(&self, _ctx: &Context, configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        Ok(Decoder::new(*configs).decode_table(self.body.clone())?)
    }
}
