//! Registry of plugin factories, indexed by kind and name.

use indexmap::IndexMap;

use super::{
    Input, Loader, Output, Parser, PluginKind,
    config::{ConfigShape, ConfigType, PluginConfig, SerializeError},
    factory::{Factory, FactoryError, FromConfig, PluginFactory, TypedFactory},
};

type Factories<P> = IndexMap<String, Box<dyn PluginFactory<P>>>;

/// The factories of all the plugins that the agent knows about.
///
/// The registry is built once, at process start, and is read-only afterwards.
/// Use [`Registry::builder`] to create it.
#[derive(Default)]
pub struct Registry {
    inputs: Factories<dyn Input>,
    outputs: Factories<dyn Output>,
    loaders: Factories<dyn Loader>,
    parsers: Factories<dyn Parser>,
}

/// Builder for [`Registry`].
///
/// Registration errors are reported by [`build`](Self::build), all at once.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: Registry,
    errors: Vec<RegistrationError>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid {kind} name {name:?}: plugin names must be non-empty and contain no whitespace")]
    InvalidName { kind: PluginKind, name: String },
    #[error("duplicate {kind} plugin {name}")]
    Duplicate { kind: PluginKind, name: String },
    #[error("bad configuration for {kind} plugin {name}")]
    BadConfig {
        kind: PluginKind,
        name: String,
        #[source]
        source: SerializeError,
    },
    #[error("{kind} plugin {name} expects configurations of shape {expected} but its empty configuration is a {actual}")]
    ShapeMismatch {
        kind: PluginKind,
        name: String,
        expected: ConfigShape,
        actual: ConfigShape,
    },
}

/// Errors returned by [`Registry::build`].
#[derive(Debug, thiserror::Error)]
#[error("{} invalid plugin registration(s): {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct RegistrationErrors(pub Vec<RegistrationError>);

/// Error returned when a plugin cannot be created.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown {kind} plugin {name}")]
    Unknown { kind: PluginKind, name: String },
    #[error("failed to create {kind} plugin {name}")]
    Factory {
        kind: PluginKind,
        name: String,
        #[source]
        source: FactoryError,
    },
}

macro_rules! registration_methods {
    ($kind:expr, $field:ident, $plugin:ident, $add:ident, $add_fn:ident, $add_factory:ident) => {
        #[doc = concat!("Registers a new ", stringify!($field), " plugin of type `T`.")]
        pub fn $add<T: FromConfig + $plugin + 'static>(self, name: impl Into<String>) -> Self {
            self.$add_fn(name, |config: T::Config| Ok(Box::new(T::from_config(config)?)))
        }

        #[doc = concat!("Registers a new ", stringify!($field), " plugin, built by a function.")]
        pub fn $add_fn<C, F>(self, name: impl Into<String>, build: F) -> Self
        where
            C: ConfigType,
            F: Fn(C) -> anyhow::Result<Box<dyn $plugin>> + Send + Sync + 'static,
        {
            self.$add_factory(name, Box::new(TypedFactory::new(build)))
        }

        #[doc = concat!("Registers a new ", stringify!($field), " plugin with a custom factory.")]
        pub fn $add_factory(mut self, name: impl Into<String>, factory: Box<dyn PluginFactory<dyn $plugin>>) -> Self {
            let name = name.into();
            if let Err(e) = self.check(&name, $kind, factory.shape(), factory.empty_config()) {
                self.errors.push(e);
            } else if self.registry.$field.contains_key(&name) {
                self.errors.push(RegistrationError::Duplicate { kind: $kind, name });
            } else {
                self.registry.$field.insert(name, factory);
            }
            self
        }
    };
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    registration_methods!(PluginKind::Input, inputs, Input, add_input, add_input_fn, add_input_factory);
    registration_methods!(PluginKind::Output, outputs, Output, add_output, add_output_fn, add_output_factory);
    registration_methods!(PluginKind::Loader, loaders, Loader, add_loader, add_loader_fn, add_loader_factory);
    registration_methods!(PluginKind::Parser, parsers, Parser, add_parser, add_parser_fn, add_parser_factory);

    fn check(
        &self,
        name: &str,
        kind: PluginKind,
        expected: ConfigShape,
        empty: PluginConfig,
    ) -> Result<(), RegistrationError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(RegistrationError::InvalidName {
                kind,
                name: name.to_owned(),
            });
        }
        // the decoder fills the empty config, the factory must accept it as is
        if empty.shape() != expected {
            return Err(RegistrationError::ShapeMismatch {
                kind,
                name: name.to_owned(),
                expected,
                actual: empty.shape(),
            });
        }
        empty.to_table().map_err(|source| RegistrationError::BadConfig {
            kind,
            name: name.to_owned(),
            source,
        })?;
        Ok(())
    }

    /// Builds the registry, or returns every registration error.
    pub fn build(self) -> Result<Registry, RegistrationErrors> {
        if self.errors.is_empty() {
            Ok(self.registry)
        } else {
            Err(RegistrationErrors(self.errors))
        }
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Looks up the factory of a plugin.
    pub fn factory(&self, kind: PluginKind, name: &str) -> Option<Factory<'_>> {
        match kind {
            PluginKind::Input => self.input(name).map(Factory::Input),
            PluginKind::Output => self.output(name).map(Factory::Output),
            PluginKind::Loader => self.loader(name).map(Factory::Loader),
            PluginKind::Parser => self.parser(name).map(Factory::Parser),
        }
    }

    pub fn input(&self, name: &str) -> Option<&dyn PluginFactory<dyn Input>> {
        self.inputs.get(name).map(|f| f.as_ref())
    }

    pub fn output(&self, name: &str) -> Option<&dyn PluginFactory<dyn Output>> {
        self.outputs.get(name).map(|f| f.as_ref())
    }

    pub fn loader(&self, name: &str) -> Option<&dyn PluginFactory<dyn Loader>> {
        self.loaders.get(name).map(|f| f.as_ref())
    }

    pub fn parser(&self, name: &str) -> Option<&dyn PluginFactory<dyn Parser>> {
        self.parsers.get(name).map(|f| f.as_ref())
    }

    /// Returns the names of the plugins of the given kind, in registration order.
    pub fn names(&self, kind: PluginKind) -> Vec<&str> {
        match kind {
            PluginKind::Input => self.inputs.keys().map(String::as_str).collect(),
            PluginKind::Output => self.outputs.keys().map(String::as_str).collect(),
            PluginKind::Loader => self.loaders.keys().map(String::as_str).collect(),
            PluginKind::Parser => self.parsers.keys().map(String::as_str).collect(),
        }
    }

    /// Returns the view of this registry that configuration decoders use.
    pub fn configs(&self) -> ConfigRegistry<'_> {
        ConfigRegistry { registry: self }
    }

    pub fn create_input(&self, name: &str, config: &PluginConfig) -> Result<Box<dyn Input>, BuildError> {
        create(PluginKind::Input, name, self.input(name), config)
    }

    pub fn create_output(&self, name: &str, config: &PluginConfig) -> Result<Box<dyn Output>, BuildError> {
        create(PluginKind::Output, name, self.output(name), config)
    }

    pub fn create_loader(&self, name: &str, config: &PluginConfig) -> Result<Box<dyn Loader>, BuildError> {
        create(PluginKind::Loader, name, self.loader(name), config)
    }

    pub fn create_parser(&self, name: &str, config: &PluginConfig) -> Result<Box<dyn Parser>, BuildError> {
        create(PluginKind::Parser, name, self.parser(name), config)
    }
}

fn create<P: ?Sized>(
    kind: PluginKind,
    name: &str,
    factory: Option<&dyn PluginFactory<P>>,
    config: &PluginConfig,
) -> Result<Box<P>, BuildError> {
    let factory = factory.ok_or_else(|| BuildError::Unknown {
        kind,
        name: name.to_owned(),
    })?;
    factory.build(config).map_err(|source| BuildError::Factory {
        kind,
        name: name.to_owned(),
        source,
    })
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("inputs", &self.names(PluginKind::Input))
            .field("outputs", &self.names(PluginKind::Output))
            .field("loaders", &self.names(PluginKind::Loader))
            .field("parsers", &self.names(PluginKind::Parser))
            .finish()
    }
}

/// Read-only view of the [`Registry`], which produces fresh plugin configurations.
#[derive(Debug, Clone, Copy)]
pub struct ConfigRegistry<'r> {
    registry: &'r Registry,
}

impl<'r> ConfigRegistry<'r> {
    /// Returns a fresh configuration for the given plugin, or `None` if the plugin is unknown.
    ///
    /// Each call returns a new value: decoding into it does not affect other declarations.
    pub fn plugin_config(&self, kind: PluginKind, name: &str) -> Option<PluginConfig> {
        self.registry.factory(kind, name).map(|f| f.empty_config())
    }

    /// Returns the names of the plugins of the given kind.
    pub fn names(&self, kind: PluginKind) -> Vec<&'r str> {
        self.registry.names(kind)
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }
}
