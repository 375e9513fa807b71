//! The agent: builds a pipeline, waits for a configuration change, and starts over.
//!
//! Each iteration of [`Agent::run`] is a *generation*:
//!
//! 1. a fresh [`Watcher`] is created under a child of the run context;
//! 2. the pipeline is built from the root loader, with the recursive loading protocol
//!    (see [`pipeline::load`](crate::pipeline::load));
//! 3. the agent waits for the first watch to complete;
//! 4. the pipeline is dropped and, unless the run context has ended, a new generation begins.

use std::{sync::Arc, time::Duration};

use crate::{
    config::LoaderDeclaration,
    context::{Context, Done},
    pipeline::{LoadError, LoadOptions, Pipeline, RunningLoader, load_pipeline},
    plugin::registry::{BuildError, Registry},
};

pub mod reload;
pub mod watch;

use watch::{WatchCause, Watcher};

/// Agent builder.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use telemetron::{agent, config::LoaderDeclaration, context::Context, plugin::registry::Registry};
///
/// # async fn run(registry: Registry, root: LoaderDeclaration) -> anyhow::Result<()> {
/// let mut agent = agent::Builder::new(Arc::new(registry), "toml", root)
///     .on_pipeline_ready(|generation, pipeline| {
///         println!("generation {generation}: {} inputs", pipeline.inputs.len());
///     })
///     .build()?;
/// let summary = agent.run(&Context::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Builder {
    registry: Arc<Registry>,
    root_name: String,
    root: LoaderDeclaration,
    options: LoadOptions,
    reload_delay: Duration,
    callbacks: Callbacks,
}

type PipelineCallback = Box<dyn FnMut(u64, &mut Pipeline) + Send>;

struct Callbacks {
    on_pipeline_ready: PipelineCallback,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_pipeline_ready: Box::new(|_, _| ()),
        }
    }
}

/// An agent, ready to run.
pub struct Agent {
    registry: Arc<Registry>,
    root_name: String,
    root: LoaderDeclaration,
    options: LoadOptions,
    reload_delay: Duration,
    callbacks: Callbacks,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of generations that have been started.
    pub generations: u64,
    pub stop: Done,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid root loader")]
    RootLoader(#[source] BuildError),
    #[error("generation {generation} failed")]
    Generation {
        generation: u64,
        #[source]
        source: LoadError,
    },
}

impl Builder {
    /// Creates a builder for an agent whose root loader is the loader plugin `root_name`,
    /// configured by `root`.
    pub fn new(registry: Arc<Registry>, root_name: impl Into<String>, root: LoaderDeclaration) -> Self {
        Self {
            registry,
            root_name: root_name.into(),
            root,
            options: LoadOptions::default(),
            reload_delay: Duration::from_secs(1),
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the maximum nesting depth of loaders.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.options.max_depth = max_depth;
        self
    }

    /// Sets how long to wait before rebuilding the pipeline after a watch failure.
    pub fn reload_delay(mut self, delay: Duration) -> Self {
        self.reload_delay = delay;
        self
    }

    /// Sets a function to run each time a pipeline has been built, with the generation number.
    ///
    /// There can be only one callback. If this function is called more than once,
    /// only the last callback will be called.
    pub fn on_pipeline_ready<F: FnMut(u64, &mut Pipeline) + Send + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_pipeline_ready = Box::new(f);
        self
    }

    /// Checks the root loader and builds the agent.
    pub fn build(self) -> Result<Agent, AgentError> {
        RunningLoader::create(&self.root_name, self.root.clone(), &self.registry).map_err(AgentError::RootLoader)?;
        Ok(Agent {
            registry: self.registry,
            root_name: self.root_name,
            root: self.root,
            options: self.options,
            reload_delay: self.reload_delay,
            callbacks: self.callbacks,
        })
    }
}

impl Agent {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Builds one pipeline from a fresh instance of the root loader.
    ///
    /// Every loader of the tree is registered in `watcher`.
    pub async fn load_pipeline(&self, ctx: &Context, watcher: &mut Watcher) -> Result<Pipeline, LoadError> {
        let root = RunningLoader::create(&self.root_name, self.root.clone(), &self.registry)?;
        load_pipeline(ctx, &self.registry, root, watcher, &self.options).await
    }

    /// Runs generations until `ctx` ends or a generation fails to build.
    pub async fn run(&mut self, ctx: &Context) -> Result<RunSummary, AgentError> {
        let mut generation = 0;
        loop {
            if let Some(stop) = ctx.err() {
                return Ok(stopped(generation, stop));
            }
            generation += 1;
            let generation_ctx = ctx.child();
            let mut watcher = Watcher::new(&generation_ctx);

            log::info!("Loading the configuration (generation {generation})...");
            let mut pipeline = match self.load_pipeline(&generation_ctx, &mut watcher).await {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    watcher.shutdown().await;
                    generation_ctx.cancel();
                    if let Some(stop) = ctx.err() {
                        return Ok(stopped(generation, stop));
                    }
                    return Err(AgentError::Generation { generation, source: e });
                }
            };
            log::info!("{}", pipeline.summary());
            (self.callbacks.on_pipeline_ready)(generation, &mut pipeline);

            let outcome = watcher.wait().await;
            drop(pipeline);
            generation_ctx.cancel();

            if let Some(stop) = ctx.err() {
                return Ok(stopped(generation, stop));
            }
            let loader = outcome.loader.as_deref().unwrap_or("?");
            match outcome.cause {
                WatchCause::Failed(e) => {
                    log::warn!(
                        "Watch of loader {loader} failed, reloading in {}: {e:#}",
                        humantime_serde::re::humantime::format_duration(self.reload_delay)
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reload_delay) => (),
                        _ = ctx.done() => (),
                    }
                }
                _ => log::info!("Reloading the configuration (change reported by loader {loader})."),
            }
        }
    }
}

fn stopped(generations: u64, stop: Done) -> RunSummary {
    match stop {
        Done::Canceled => log::info!("Agent stopped after {generations} generation(s)."),
        Done::DeadlineExceeded => log::info!("Run timeout reached after {generations} generation(s)."),
    }
    RunSummary { generations, stop }
}
