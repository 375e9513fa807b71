//! Loader of local TOML files.
//!
//! The configuration is read from `path`, then from every `*.toml` file of `directory` in
//! lexical order. Declarations of the directory snippets are appended to the ones of the
//! main file. `overrides` are merged into the main file before decoding.
//!
//! A change is reported when the [`ReloadNotifier`] fires (the agent forwards SIGHUP to it)
//! or, with `watch_file = true`, when one of the files is modified.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use telemetron::{
    agent::reload::{ReloadNotifier, ReloadSubscription},
    config::{
        Config, Decoder,
        source::{merge_override, read_source},
    },
    context::Context,
    plugin::{Loader, Waiter, registry::ConfigRegistry},
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
    /// Directory of additional `*.toml` files.
    pub directory: Option<PathBuf>,
    /// Reports a change when a file is modified, in addition to the reload notifier.
    pub watch_file: bool,
    /// Replaces `${ENV_VAR}` by the value of the environment variable.
    pub substitute_env: bool,
    pub overrides: toml::Table,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            directory: None,
            watch_file: false,
            substitute_env: true,
            overrides: toml::Table::new(),
        }
    }
}

#[derive(Debug)]
pub struct FileLoader {
    config: FileConfig,
    notifier: ReloadNotifier,
}

impl FileLoader {
    pub fn new(config: FileConfig, notifier: ReloadNotifier) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.path.as_os_str().is_empty() || config.directory.is_some(),
            "the toml loader needs a path, a directory, or both"
        );
        Ok(Self { config, notifier })
    }

    fn watch_files(&self) -> anyhow::Result<FileEvents> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    log::debug!("file event {:?} on {:?}", event.kind, event.paths);
                    let _ = tx.send(());
                }
            }
            Err(e) => log::error!("watch error: {e:?}"),
        })
        .context("failed to create the file watcher")?;

        let targets = (!self.config.path.as_os_str().is_empty())
            .then_some(self.config.path.as_path())
            .into_iter()
            .chain(self.config.directory.as_deref());
        for target in targets {
            watcher
                .watch(target, RecursiveMode::NonRecursive)
                .with_context(|| format!("failed to watch {target:?}"))?;
        }
        Ok(FileEvents { _watcher: watcher, rx })
    }
}

struct FileEvents {
    // events stop when the watcher is dropped
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

struct FileWaiter {
    ctx: Context,
    subscription: ReloadSubscription,
    files: Option<FileEvents>,
}

#[async_trait]
impl Loader for FileLoader {
    fn name(&self) -> &str {
        "toml"
    }

    fn origin(&self) -> Option<String> {
        let main = if self.config.path.as_os_str().is_empty() {
            self.config.directory.as_deref()?
        } else {
            self.config.path.as_path()
        };
        let canonical = std::fs::canonicalize(main).unwrap_or_else(|_| main.to_owned());
        Some(canonical.display().to_string())
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        let subscription = self.notifier.subscribe();
        let files = if self.config.watch_file {
            Some(self.watch_files()?)
        } else {
            None
        };
        Ok(Box::new(FileWaiter {
            ctx: ctx.clone(),
            subscription,
            files,
        }))
    }

    async fn load(&self, _ctx: &Context, configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        let config = self.config.clone();
        let sources = tokio::task::spawn_blocking(move || read_sources(&config))
            .await
            .context("reading task failed")??;

        let decoder = Decoder::new(*configs);
        let mut sources = sources.into_iter();
        let mut config = match sources.next() {
            Some((path, table)) => decoder
                .decode_table(table)
                .with_context(|| format!("invalid configuration in {path:?}"))?,
            None => Config::default(),
        };
        for (path, table) in sources {
            let snippet = decoder
                .decode_table(table)
                .with_context(|| format!("invalid configuration in {path:?}"))?;
            config.append(snippet);
        }
        Ok(config)
    }
}

#[async_trait]
impl Waiter for FileWaiter {
    async fn wait(self: Box<Self>) -> anyhow::Result<()> {
        let FileWaiter {
            ctx,
            mut subscription,
            files,
        } = *self;
        let Some(mut files) = files else {
            subscription.changed_or_done(&ctx).await;
            return Ok(());
        };
        tokio::select! {
            _ = subscription.changed_or_done(&ctx) => Ok(()),
            event = files.rx.recv() => match event {
                Some(()) => Ok(()),
                None => Err(anyhow::anyhow!("the file watcher stopped")),
            },
        }
    }
}

/// Reads and parses the main file (with the overrides applied) then the directory snippets.
fn read_sources(config: &FileConfig) -> anyhow::Result<Vec<(PathBuf, toml::Table)>> {
    let mut sources = Vec::new();
    if !config.path.as_os_str().is_empty() {
        let mut main = parse_file(&config.path, config.substitute_env)?;
        merge_override(&mut main, config.overrides.clone());
        sources.push((config.path.clone(), main));
    } else if !config.overrides.is_empty() {
        sources.push((PathBuf::from("overrides"), config.overrides.clone()));
    }

    if let Some(dir) = &config.directory {
        let mut snippets = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("could not read directory {dir:?}"))? {
            let path = entry.with_context(|| format!("could not read directory {dir:?}"))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                snippets.push(path);
            }
        }
        snippets.sort();
        for path in snippets {
            let table = parse_file(&path, config.substitute_env)?;
            sources.push((path, table));
        }
    }
    Ok(sources)
}

fn parse_file(path: &Path, substitute_env: bool) -> anyhow::Result<toml::Table> {
    let content = read_source(path, substitute_env)?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("invalid TOML in {path:?}"))
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use telemetron::{
        agent::reload::ReloadNotifier,
        context::Context,
        plugin::{Loader, PluginKind},
        test::plugins,
    };

    use super::{FileConfig, FileLoader};

    fn loader(config: FileConfig) -> (FileLoader, ReloadNotifier) {
        let notifier = ReloadNotifier::new();
        (FileLoader::new(config, notifier.clone()).unwrap(), notifier)
    }

    #[test]
    fn needs_a_source() {
        assert!(FileLoader::new(FileConfig::default(), ReloadNotifier::new()).is_err());
    }

    #[tokio::test]
    async fn main_file_and_snippets() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(&main, "[[inputs.example]]\nvalue = 'main'\n").unwrap();
        let snippets = dir.path().join("conf.d");
        fs::create_dir(&snippets).unwrap();
        fs::write(snippets.join("b.toml"), "[[inputs.example]]\nvalue = 'b'\n").unwrap();
        fs::write(snippets.join("a.toml"), "[[outputs.example]]\nvalue = 'a'\n").unwrap();
        fs::write(snippets.join("ignored.txt"), "not toml").unwrap();

        let (loader, _notifier) = loader(FileConfig {
            path: main.clone(),
            directory: Some(snippets),
            ..Default::default()
        });
        let registry = plugins().build().unwrap();
        let config = loader.load(&Context::new(), &registry.configs()).await.unwrap();

        assert_eq!(config.count(PluginKind::Input), 2);
        assert_eq!(config.count(PluginKind::Output), 1);
        assert_eq!(
            loader.origin(),
            Some(fs::canonicalize(&main).unwrap().display().to_string())
        );
    }

    #[tokio::test]
    async fn overrides_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(
            &main,
            indoc! {r#"
                [agent]
                interval = "10s"

                [inputs.example]
                value = "${CARGO_PKG_NAME}"
            "#},
        )
        .unwrap();

        let (loader, _notifier) = loader(FileConfig {
            path: main,
            overrides: "[agent]\ninterval = '1m'".parse().unwrap(),
            ..Default::default()
        });
        let registry = plugins().build().unwrap();
        let config = loader.load(&Context::new(), &registry.configs()).await.unwrap();

        assert_eq!(config.agent.interval, Duration::from_secs(60));
        let input = &config.inputs["example"][0];
        let value = &input.plugin.downcast_ref::<telemetron::test::ValueConfig>().unwrap().value;
        assert_eq!(value, env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn missing_file() {
        let (loader, _notifier) = loader(FileConfig {
            path: "/nonexistent/agent.toml".into(),
            ..Default::default()
        });
        let registry = plugins().build().unwrap();
        let err = loader.load(&Context::new(), &registry.configs()).await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/agent.toml"), "{err:#}");
    }

    #[tokio::test]
    async fn decode_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(&main, "[inputs.unknown]\n").unwrap();

        let (loader, _notifier) = loader(FileConfig {
            path: main,
            ..Default::default()
        });
        let registry = plugins().build().unwrap();
        let err = loader.load(&Context::new(), &registry.configs()).await.unwrap_err();
        assert!(err.to_string().contains("agent.toml"), "{err:#}");
    }

    #[tokio::test]
    async fn reload_notification() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(&main, "").unwrap();
        let (loader, notifier) = loader(FileConfig {
            path: main,
            ..Default::default()
        });

        let ctx = Context::new();
        let waiter = loader.watch(&ctx).await.unwrap();
        // subscribed before watch returned
        assert_eq!(notifier.notify(), 1);
        tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn file_modification() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(&main, "").unwrap();
        let (loader, _notifier) = loader(FileConfig {
            path: main.clone(),
            watch_file: true,
            ..Default::default()
        });

        let ctx = Context::new();
        let waiter = loader.watch(&ctx).await.unwrap();
        fs::write(&main, "[agent]\ninterval = '1s'\n").unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn waiter_ends_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("agent.toml");
        fs::write(&main, "").unwrap();
        let (loader, _notifier) = loader(FileConfig {
            path: main,
            watch_file: true,
            ..Default::default()
        });

        let ctx = Context::new();
        let waiter = loader.watch(&ctx).await.unwrap();
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .unwrap()
            .unwrap();
    }
}
