//! The recursive loading protocol.
//!
//! Starting from the root loader, each loader is first *watched*, then *loaded*.
//! The plugins declared by its configuration are built and added to the pipeline,
//! and each nested loader goes through the same protocol, depth first.
//!
//! Watching before loading guarantees that a change that happens while the configuration
//! is being read is not lost: it triggers the watch, and the next generation reads the
//! new version.

use std::future::Future;

use super::{Pipeline, RunningInput, RunningLoader, RunningOutput};
use crate::{
    agent::watch::Watcher,
    context::{Context, Done},
    plugin::registry::{BuildError, Registry},
};

/// Default bound on the nesting of loaders.
pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Maximum nesting depth of loaders. The root loader has depth 0.
    pub max_depth: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to watch loader {loader}")]
    Watch {
        loader: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("loader {loader} failed to load its configuration")]
    Load {
        loader: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to build the pipeline")]
    Build(#[from] BuildError),
    #[error("loader {loader} is nested too deeply (maximum depth: {max_depth})")]
    DepthExceeded { loader: String, max_depth: usize },
    #[error("loader cycle detected: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
    #[error("loading interrupted: {0}")]
    Interrupted(Done),
}

/// A loader that has not been processed yet.
struct Pending {
    loader: RunningLoader,
    depth: usize,
    /// Origins of the loader and of its ancestors.
    origins: Vec<String>,
}

/// Builds the pipeline of one generation, starting from `root`.
///
/// Every loader is registered in `watcher` before being loaded. On error, the watches
/// established so far are left in `watcher`: the caller must shut it down.
pub async fn load_pipeline(
    ctx: &Context,
    registry: &Registry,
    root: RunningLoader,
    watcher: &mut Watcher,
    options: &LoadOptions,
) -> Result<Pipeline, LoadError> {
    let mut pipeline = Pipeline::default();
    let origins = root.loader.origin().into_iter().collect();
    let mut stack = vec![Pending {
        loader: root,
        depth: 0,
        origins,
    }];

    while let Some(Pending { loader, depth, origins }) = stack.pop() {
        let name = loader.describe();
        log::debug!("watching loader {name}");
        interruptible(ctx, watcher.watch_loader(ctx, &loader))
            .await?
            .map_err(|source| LoadError::Watch {
                loader: name.clone(),
                source,
            })?;

        log::debug!("loading loader {name}");
        let configs = registry.configs();
        let config = interruptible(ctx, loader.loader.load(ctx, &configs))
            .await?
            .map_err(|source| LoadError::Load {
                loader: name.clone(),
                source,
            })?;

        if depth == 0 {
            pipeline.agent = config.agent;
        }
        for (plugin, declarations) in config.inputs {
            for declaration in declarations {
                pipeline.inputs.push(RunningInput::create(&plugin, declaration, registry)?);
            }
        }
        for (plugin, declarations) in config.outputs {
            for declaration in declarations {
                pipeline.outputs.push(RunningOutput::create(&plugin, declaration, registry)?);
            }
        }

        let mut nested = Vec::new();
        for (plugin, declarations) in config.loaders {
            for declaration in declarations {
                let child = RunningLoader::create(&plugin, declaration, registry)?;
                if depth + 1 > options.max_depth {
                    return Err(LoadError::DepthExceeded {
                        loader: child.describe(),
                        max_depth: options.max_depth,
                    });
                }
                let mut child_origins = origins.clone();
                if let Some(origin) = child.loader.origin() {
                    if origins.contains(&origin) {
                        child_origins.push(origin);
                        return Err(LoadError::Cycle { chain: child_origins });
                    }
                    child_origins.push(origin);
                }
                nested.push(Pending {
                    loader: child,
                    depth: depth + 1,
                    origins: child_origins,
                });
            }
        }
        // reversed, so that nested loaders are processed in declaration order
        stack.extend(nested.into_iter().rev());
        pipeline.loaders.push(loader);
    }
    Ok(pipeline)
}

/// Runs `fut` until it completes or `ctx` ends.
async fn interruptible<T>(ctx: &Context, fut: impl Future<Output = T>) -> Result<T, LoadError> {
    tokio::select! {
        biased;
        done = ctx.done() => Err(LoadError::Interrupted(done)),
        res = fut => Ok(res),
    }
}
