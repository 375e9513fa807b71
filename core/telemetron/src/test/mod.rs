//! Test doubles: simple plugins and a loader that tests control.
//!
//! Enabled by the `test` feature.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    agent::reload::{ReloadNotifier, ReloadSubscription},
    config::{Config, Decoder},
    context::Context,
    metric::{FieldValue, Metric},
    plugin::{
        Input, Loader, Output, Parser, ParserInput, Waiter,
        factory::FromConfig,
        registry::{ConfigRegistry, Registry, RegistryBuilder},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueConfig {
    pub value: String,
}

/// Input that emits one metric named after its `value`, and accepts a parser.
#[derive(Debug)]
pub struct ValueInput {
    pub value: String,
    pub parser: Option<Box<dyn Parser>>,
}

impl FromConfig for ValueInput {
    type Config = ValueConfig;

    fn from_config(config: ValueConfig) -> anyhow::Result<Self> {
        if config.value == "fail" {
            anyhow::bail!("refusing to build an input with value {:?}", config.value);
        }
        Ok(Self {
            value: config.value,
            parser: None,
        })
    }
}

impl Input for ValueInput {
    fn gather(&mut self) -> anyhow::Result<Vec<Metric>> {
        match &self.parser {
            Some(parser) => parser.parse(self.value.as_bytes()),
            None => Ok(vec![Metric::new(self.value.clone())]),
        }
    }

    fn parser_input(&mut self) -> Option<&mut dyn ParserInput> {
        Some(self)
    }
}

impl ParserInput for ValueInput {
    fn set_parser(&mut self, parser: Box<dyn Parser>) {
        self.parser = Some(parser);
    }
}

/// Input without parser capability.
#[derive(Debug)]
pub struct PlainInput {
    pub value: String,
}

impl FromConfig for PlainInput {
    type Config = ValueConfig;

    fn from_config(config: ValueConfig) -> anyhow::Result<Self> {
        Ok(Self { value: config.value })
    }
}

impl Input for PlainInput {
    fn gather(&mut self) -> anyhow::Result<Vec<Metric>> {
        Ok(vec![Metric::new(self.value.clone())])
    }
}

#[derive(Debug)]
pub struct ValueOutput {
    pub value: String,
}

impl FromConfig for ValueOutput {
    type Config = ValueConfig;

    fn from_config(config: ValueConfig) -> anyhow::Result<Self> {
        Ok(Self { value: config.value })
    }
}

impl Output for ValueOutput {
    fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn write(&mut self, _metrics: &[Metric]) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoConfig {}

/// Parser that turns each line into a metric with a single `value` field.
#[derive(Debug)]
pub struct LineParser;

impl FromConfig for LineParser {
    type Config = NoConfig;

    fn from_config(_config: NoConfig) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Parser for LineParser {
    fn parse(&self, buf: &[u8]) -> anyhow::Result<Vec<Metric>> {
        let text = std::str::from_utf8(buf)?;
        Ok(text
            .lines()
            .map(|l| Metric::new("line").with_field("value", FieldValue::String(l.to_owned())))
            .collect())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthParserConfig {
    pub auth_file: Option<String>,
}

/// Parser that requires its own setting in the input body.
#[derive(Debug)]
pub struct AuthParser;

impl FromConfig for AuthParser {
    type Config = AuthParserConfig;

    fn from_config(_config: AuthParserConfig) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Parser for AuthParser {
    fn parse(&self, _buf: &[u8]) -> anyhow::Result<Vec<Metric>> {
        Ok(Vec::new())
    }
}

/// Registers the test plugins:
/// - inputs `example` (with parser capability) and `plain`,
/// - output `example`,
/// - parsers `influx` (the default data format) and `auth`.
pub fn plugins() -> RegistryBuilder {
    Registry::builder()
        .add_input::<ValueInput>("example")
        .add_input::<PlainInput>("plain")
        .add_output::<ValueOutput>("example")
        .add_parser::<LineParser>("influx")
        .add_parser::<AuthParser>("auth")
}

/// Something that the test [`Harness`] recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Watch(String),
    Load(String),
}

/// Controls the `harness` loaders of a registry.
///
/// Each `harness` loader has an `id`. Tests set the configuration source of each id,
/// trigger changes, inject failures, and inspect the sequence of watch and load calls.
#[derive(Debug, Default)]
pub struct Harness {
    state: Mutex<HarnessState>,
}

#[derive(Debug, Default)]
struct HarnessState {
    sources: HashMap<String, String>,
    notifiers: HashMap<String, ReloadNotifier>,
    fail_watch: HashMap<String, String>,
    fail_load: HashMap<String, String>,
    fail_wait: HashMap<String, String>,
    trigger_on_load: Vec<String>,
    events: Vec<Event>,
}

impl Harness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, HarnessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the configuration source of the loader `id`.
    pub fn set_source(&self, id: &str, source: &str) {
        self.state().sources.insert(id.to_owned(), source.to_owned());
    }

    /// Fires the change source of the loader `id`, and returns how many watches were notified.
    pub fn trigger(&self, id: &str) -> usize {
        self.notifier(id).notify()
    }

    /// Makes the next watches of `id` fail.
    pub fn fail_watch(&self, id: &str, message: &str) {
        self.state().fail_watch.insert(id.to_owned(), message.to_owned());
    }

    /// Makes the next loads of `id` fail.
    pub fn fail_load(&self, id: &str, message: &str) {
        self.state().fail_load.insert(id.to_owned(), message.to_owned());
    }

    /// Makes the next waiters of `id` fail as soon as they are notified.
    pub fn fail_wait(&self, id: &str, message: &str) {
        self.state().fail_wait.insert(id.to_owned(), message.to_owned());
    }

    /// Fires the change source of `id` while `id` is being loaded, once.
    pub fn trigger_on_load(&self, id: &str) {
        self.state().trigger_on_load.push(id.to_owned());
    }

    /// Removes every failure injected so far.
    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_watch.clear();
        state.fail_load.clear();
        state.fail_wait.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    fn notifier(&self, id: &str) -> ReloadNotifier {
        self.state().notifiers.entry(id.to_owned()).or_default().clone()
    }

    /// Returns the test plugins plus the `harness` and `null` loaders.
    pub fn registry(self: &Arc<Self>) -> Registry {
        self.register(plugins())
            .add_loader::<NullLoader>("null")
            .build()
            .expect("test registry should be valid")
    }

    /// Registers the `harness` loader.
    pub fn register(self: &Arc<Self>, builder: RegistryBuilder) -> RegistryBuilder {
        let harness = self.clone();
        builder.add_loader_fn("harness", move |config: HarnessConfig| {
            Ok(Box::new(HarnessLoader {
                id: config.id,
                origin: config.origin,
                harness: harness.clone(),
            }))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub id: String,
    /// Origin reported for cycle detection.
    pub origin: Option<String>,
}

#[derive(Debug)]
pub struct HarnessLoader {
    id: String,
    origin: Option<String>,
    harness: Arc<Harness>,
}

struct HarnessWaiter {
    ctx: Context,
    subscription: ReloadSubscription,
    failure: Option<String>,
}

#[async_trait]
impl Loader for HarnessLoader {
    fn name(&self) -> &str {
        "harness"
    }

    fn origin(&self) -> Option<String> {
        self.origin.clone()
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        let subscription = self.harness.notifier(&self.id).subscribe();
        let mut state = self.harness.state();
        state.events.push(Event::Watch(self.id.clone()));
        if let Some(message) = state.fail_watch.get(&self.id) {
            anyhow::bail!("{message}");
        }
        Ok(Box::new(HarnessWaiter {
            ctx: ctx.clone(),
            subscription,
            failure: state.fail_wait.get(&self.id).cloned(),
        }))
    }

    async fn load(&self, _ctx: &Context, configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        let (source, trigger) = {
            let mut state = self.harness.state();
            state.events.push(Event::Load(self.id.clone()));
            if let Some(message) = state.fail_load.get(&self.id) {
                anyhow::bail!("{message}");
            }
            let trigger = match state.trigger_on_load.iter().position(|id| id == &self.id) {
                Some(i) => {
                    state.trigger_on_load.remove(i);
                    true
                }
                None => false,
            };
            (state.sources.get(&self.id).cloned().unwrap_or_default(), trigger)
        };
        if trigger {
            self.harness.trigger(&self.id);
        }
        Ok(Decoder::new(*configs).decode_str(&source)?)
    }
}

#[async_trait]
impl Waiter for HarnessWaiter {
    async fn wait(self: Box<Self>) -> anyhow::Result<()> {
        let HarnessWaiter {
            ctx,
            mut subscription,
            failure,
        } = *self;
        if subscription.changed_or_done(&ctx).await {
            if let Some(message) = failure {
                anyhow::bail!("{message}");
            }
        }
        Ok(())
    }
}

/// Loader that produces an empty configuration and never reports a change.
#[derive(Debug)]
pub struct NullLoader;

impl FromConfig for NullLoader {
    type Config = NoConfig;

    fn from_config(_config: NoConfig) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

struct NullWaiter(Context);

#[async_trait]
impl Loader for NullLoader {
    fn name(&self) -> &str {
        "null"
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        Ok(Box::new(NullWaiter(ctx.clone())))
    }

    async fn load(&self, _ctx: &Context, _configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        Ok(Config::default())
    }
}

#[async_trait]
impl Waiter for NullWaiter {
    async fn wait(self: Box<Self>) -> anyhow::Result<()> {
        self.0.done().await;
        Ok(())
    }
}
