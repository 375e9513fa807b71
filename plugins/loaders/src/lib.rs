//! Loader plugins.
//!
//! | name     | source of the configuration        | change source                      |
//! |----------|------------------------------------|------------------------------------|
//! | `toml`   | local TOML file(s)                 | reload notifier, file watch        |
//! | `http`   | `GET <origin>/config`              | long poll on `<origin>/config/poll` |
//! | `inline` | the body of its own declaration    | none                               |
//! | `null`   | nothing                            | none                               |

use telemetron::{
    agent::reload::ReloadNotifier,
    plugin::{Loader, registry::RegistryBuilder},
};

pub mod file;
pub mod http;
pub mod inline;
pub mod null;

pub use file::FileLoader;
pub use http::HttpLoader;
pub use inline::InlineLoader;
pub use null::NullLoader;

/// Registers the loaders. `notifier` is the change source of the `toml` loaders.
pub fn register(builder: RegistryBuilder, notifier: ReloadNotifier) -> RegistryBuilder {
    builder
        .add_loader_fn("toml", move |config: file::FileConfig| {
            Ok(Box::new(FileLoader::new(config, notifier.clone())?) as Box<dyn Loader>)
        })
        .add_loader::<HttpLoader>("http")
        .add_loader::<InlineLoader>("inline")
        .add_loader::<NullLoader>("null")
}
