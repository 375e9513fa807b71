use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telemetron::{
    config::Config,
    context::Context,
    plugin::{Loader, Waiter, factory::FromConfig, registry::ConfigRegistry},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NullConfig {}

/// Produces an empty configuration, which never changes.
#[derive(Debug, Default)]
pub struct NullLoader;

impl FromConfig for NullLoader {
    type Config = NullConfig;

    fn from_config(_config: NullConfig) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl Loader for NullLoader {
    fn name(&self) -> &str {
        "null"
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        Ok(Box::new(UntilDone(ctx.clone())))
    }

    async fn load(&self, _ctx: &Context, _configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        Ok(Config::default())
    }
}

/// Waiter that only resolves when its context ends.
pub(crate) struct UntilDone(pub(crate) Context);

#[async_trait]
impl Waiter for UntilDone {
    async fn wait(self: Box<Self>) -> anyhow::Result<()> {
        self.0.done().await;
        Ok(())
    }
}
