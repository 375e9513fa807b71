//! Loader of configurations served over HTTP.
//!
//! `load` fetches `GET <origin>/config`. `watch` starts a long poll on
//! `GET <origin>/config/poll`: it returns as soon as the response headers arrive, and the
//! waiter resolves when the server ends the response body, which signals a change.

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use telemetron::{
    config::{Config, Decoder},
    context::Context,
    plugin::{Loader, Waiter, factory::FromConfig, registry::ConfigRegistry},
};

const CONFIG_PATH: &str = "/config";
const POLL_PATH: &str = "/config/poll";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Scheme, host and port of the configuration server, for instance `http://localhost:8080`.
    pub origin: String,
}

#[derive(Debug)]
pub struct HttpLoader {
    origin: Url,
    client: Client,
}

impl FromConfig for HttpLoader {
    type Config = HttpConfig;

    fn from_config(config: HttpConfig) -> anyhow::Result<Self> {
        let origin = Url::parse(&config.origin).with_context(|| format!("invalid origin {:?}", config.origin))?;
        anyhow::ensure!(
            matches!(origin.scheme(), "http" | "https"),
            "unsupported scheme {:?} in origin {origin}",
            origin.scheme()
        );
        // A long poll holds its connection open, connections are never reused.
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .context("failed to build the HTTP client")?;
        Ok(Self { origin, client })
    }
}

impl HttpLoader {
    fn url(&self, path: &str) -> Url {
        let mut url = self.origin.clone();
        url.set_path(path);
        url
    }

    async fn get(&self, path: &str) -> anyhow::Result<Response> {
        let url = self.url(path);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("unexpected response from {url}"))
    }
}

struct PollWaiter {
    ctx: Context,
    response: Response,
}

#[async_trait]
impl Loader for HttpLoader {
    fn name(&self) -> &str {
        "http"
    }

    fn origin(&self) -> Option<String> {
        Some(self.origin.origin().ascii_serialization())
    }

    async fn watch(&self, ctx: &Context) -> anyhow::Result<Box<dyn Waiter>> {
        let response = self.get(POLL_PATH).await?;
        Ok(Box::new(PollWaiter {
            ctx: ctx.clone(),
            response,
        }))
    }

    async fn load(&self, _ctx: &Context, configs: &ConfigRegistry<'_>) -> anyhow::Result<Config> {
        let response = self.get(CONFIG_PATH).await?;
        let body = response.text().await.context("failed to read the configuration")?;
        let config = Decoder::new(*configs)
            .decode_str(&body)
            .with_context(|| format!("invalid configuration from {}", self.url(CONFIG_PATH)))?;
        Ok(config)
    }
}

#[async_trait]
impl Waiter for PollWaiter {
    async fn wait(self: Box<Self>) -> anyhow::Result<()> {
        let PollWaiter { ctx, mut response } = *self;
        let url = response.url().clone();
        tokio::select! {
            res = async {
                while response.chunk().await?.is_some() {}
                Ok::<_, reqwest::Error>(())
            } => {
                res.with_context(|| format!("long poll on {url} failed"))?;
                log::debug!("long poll on {url} completed");
                Ok(())
            }
            _ = ctx.done() => Ok(()),
        }
    }
}
