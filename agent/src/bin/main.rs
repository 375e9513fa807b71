use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Args, FromArgMatches};
use telemetron::{
    agent::{self, reload::ReloadNotifier, watch::Watcher},
    context::Context,
    plugin::{PluginKind, registry::Registry},
};
use telemetron_agent::{ROOT_LOADER, init_logger, parse_config_overrides, registry, root_declaration};

const BINARY: &str = env!("CARGO_BIN_NAME");

/// Main agent function.
///
/// The steps are:
/// - parse the CLI
/// - build the plugin registry
/// - run the command: list the plugins, check the configuration once, or run
///   generations until the agent is stopped
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    // Define the command-line interface.
    let mut cmd = clap::Command::new(BINARY).version(env!("CARGO_PKG_VERSION"));
    cmd = cli::Cli::augment_args(cmd);

    // Parse CLI arguments and handle some special flags like --version and --help.
    let matches = cmd.get_matches();
    let args = cli::Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    init_logger(args.common.debug);

    let notifier = ReloadNotifier::new();
    let registry = registry(notifier.clone()).context("invalid plugin registration")?;

    let command = args.command.unwrap_or(cli::Command::Run);
    if let cli::Command::Plugins = command {
        print_plugins(&registry);
        return Ok(());
    }

    log::info!("Starting telemetron agent '{BINARY}' v{}", env!("CARGO_PKG_VERSION"));
    let overrides = parse_config_overrides(&args.common.config_override).context("invalid config overrides")?;
    let root = root_declaration(args.common.config.clone(), overrides, args.common.watch_file);
    let builder = agent::Builder::new(Arc::new(registry), ROOT_LOADER, root);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    rt.block_on(async move {
        match command {
            cli::Command::Check => check(builder, args.common.run_timeout).await,
            _ => run(builder, notifier, args.common.run_timeout).await,
        }
    })
}

/// Prints the registered plugins, per kind.
fn print_plugins(registry: &Registry) {
    println!("Available plugins:");
    for kind in PluginKind::ALL {
        println!("\n{kind}s:");
        for name in registry.names(kind) {
            println!("- {name}");
        }
    }
}

/// Builds the pipeline once, prints it and stops.
async fn check(builder: agent::Builder, timeout: Option<Duration>) -> anyhow::Result<()> {
    let agent = builder.build().context("startup failure")?;
    let ctx = with_timeout(Context::new(), timeout);
    let mut watcher = Watcher::new(&ctx);
    let res = agent.load_pipeline(&ctx, &mut watcher).await;
    watcher.shutdown().await;

    let pipeline = res.context("invalid configuration")?;
    println!("{}", pipeline.summary());
    Ok(())
}

/// Runs generations until Ctrl+C, or until the run timeout expires.
async fn run(builder: agent::Builder, notifier: ReloadNotifier, timeout: Option<Duration>) -> anyhow::Result<()> {
    let ctx = with_timeout(Context::new(), timeout);
    let ctrl_c = agent::reload::shutdown_on_ctrl_c(ctx.clone());
    #[cfg(unix)]
    let hangup = agent::reload::forward_hangup(notifier, ctx.clone()).context("failed to listen for SIGHUP")?;
    #[cfg(not(unix))]
    drop(notifier);

    let mut agent = builder
        .on_pipeline_ready(|generation, pipeline| {
            for output in &mut pipeline.outputs {
                if let Err(e) = output.output.connect() {
                    log::error!("Output {} failed to connect (generation {generation}): {e:#}", output.name());
                }
            }
        })
        .build()
        .context("startup failure")?;

    let res = agent.run(&ctx).await;

    // stop the signal listeners
    ctx.cancel();
    let _ = ctrl_c.await;
    #[cfg(unix)]
    let _ = hangup.await;

    let summary = res.context("error while running")?;
    log::debug!("run ended: {summary:?}");
    Ok(())
}

fn with_timeout(ctx: Context, timeout: Option<Duration>) -> Context {
    match timeout {
        Some(t) => ctx.with_timeout(t),
        None => ctx,
    }
}

/// Agent command-line interface (CLI).
///
/// We use `clap` to parse these options, therefore the structs
/// derive [`clap::Args`] or other clap trait implementations.
mod cli {
    use clap::{Args, Parser, Subcommand};
    use std::{path::PathBuf, time::Duration};

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// Telemetry agent: loads its plugins from a tree of configuration sources,
    /// and reloads them when a source changes.
    #[derive(Parser)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        #[command(flatten)]
        pub common: CommonArgs,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the agent, rebuilding the pipeline on every configuration change.
        ///
        /// This is the default command.
        Run,

        /// Load the configuration once, print the resulting pipeline and stop.
        Check,

        /// Print the available plugins.
        Plugins,
    }

    #[derive(Args, Clone)]
    pub struct CommonArgs {
        /// Path to the config file.
        #[arg(long, env = "TELEMETRON_CONFIG", default_value = "telemetron.toml")]
        pub config: PathBuf,

        /// Enables debug logs.
        #[arg(long)]
        pub debug: bool,

        /// Stops the agent after this amount of time, ex. `30s` or `1h 30m`.
        #[arg(long, value_parser = humantime::parse_duration)]
        pub run_timeout: Option<Duration>,

        /// Config options overrides, applied to the config file.
        ///
        /// Use dots to separate TOML levels, ex. `agent.interval='1m'`
        #[arg(long)]
        pub config_override: Vec<String>,

        /// Reloads the configuration when the config file is modified.
        ///
        /// SIGHUP always reloads the configuration.
        #[arg(long)]
        pub watch_file: bool,
    }
}
