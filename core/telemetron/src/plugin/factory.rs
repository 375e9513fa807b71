//! Plugin factories.

use std::marker::PhantomData;

use super::{
    Input, Loader, Output, Parser, PluginKind,
    config::{ConfigShape, ConfigType, PluginConfig},
};

/// Constructs a plugin from its configuration.
pub trait FromConfig: Sized {
    /// Configuration structure of the plugin.
    type Config: ConfigType;

    fn from_config(config: Self::Config) -> anyhow::Result<Self>;
}

/// Builds plugins of type `P` (for instance `dyn Input`) from a type-erased configuration.
pub trait PluginFactory<P: ?Sized>: Send + Sync {
    /// Shape of the configuration that [`build`](Self::build) accepts.
    fn shape(&self) -> ConfigShape;

    /// Returns a fresh configuration, which holds the default values.
    fn empty_config(&self) -> PluginConfig;

    /// Builds a new plugin.
    fn build(&self, config: &PluginConfig) -> Result<Box<P>, FactoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("wrong configuration shape: expected {expected}, got {actual}")]
    ShapeMismatch { expected: ConfigShape, actual: ConfigShape },
    #[error("plugin construction failed")]
    Construction(#[source] anyhow::Error),
}

type BuildFn<C, P> = dyn Fn(C) -> anyhow::Result<Box<P>> + Send + Sync;

/// A factory that accepts configurations of type `C`, and builds plugins with a function.
pub struct TypedFactory<C, P: ?Sized> {
    build: Box<BuildFn<C, P>>,
    _config: PhantomData<fn() -> C>,
}

impl<C: ConfigType, P: ?Sized> TypedFactory<C, P> {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(C) -> anyhow::Result<Box<P>> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            _config: PhantomData,
        }
    }
}

impl<C: ConfigType, P: ?Sized + 'static> PluginFactory<P> for TypedFactory<C, P> {
    fn shape(&self) -> ConfigShape {
        ConfigShape::of::<C>()
    }

    fn empty_config(&self) -> PluginConfig {
        PluginConfig::empty::<C>()
    }

    fn build(&self, config: &PluginConfig) -> Result<Box<P>, FactoryError> {
        let config = config
            .downcast_ref::<C>()
            .ok_or_else(|| FactoryError::ShapeMismatch {
                expected: ConfigShape::of::<C>(),
                actual: config.shape(),
            })?
            .clone();
        (self.build)(config).map_err(FactoryError::Construction)
    }
}

/// A factory of any kind.
#[derive(Clone, Copy)]
pub enum Factory<'r> {
    Input(&'r dyn PluginFactory<dyn Input>),
    Output(&'r dyn PluginFactory<dyn Output>),
    Loader(&'r dyn PluginFactory<dyn Loader>),
    Parser(&'r dyn PluginFactory<dyn Parser>),
}

impl Factory<'_> {
    pub fn kind(&self) -> PluginKind {
        match self {
            Factory::Input(_) => PluginKind::Input,
            Factory::Output(_) => PluginKind::Output,
            Factory::Loader(_) => PluginKind::Loader,
            Factory::Parser(_) => PluginKind::Parser,
        }
    }

    pub fn shape(&self) -> ConfigShape {
        match self {
            Factory::Input(f) => f.shape(),
            Factory::Output(f) => f.shape(),
            Factory::Loader(f) => f.shape(),
            Factory::Parser(f) => f.shape(),
        }
    }

    pub fn empty_config(&self) -> PluginConfig {
        match self {
            Factory::Input(f) => f.empty_config(),
            Factory::Output(f) => f.empty_config(),
            Factory::Loader(f) => f.empty_config(),
            Factory::Parser(f) => f.empty_config(),
        }
    }
}

impl std::fmt::Debug for Factory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("kind", &self.kind())
            .field("shape", &self.shape())
            .finish()
    }
}
