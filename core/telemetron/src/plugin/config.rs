//! Type-erased plugin configurations.

use std::{
    any::{Any, TypeId},
    fmt,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::config::claim::{Ignored, decode_tracked};

/// Requirements on the configuration structure of a plugin.
///
/// Implemented for every type that satisfies the bounds.
pub trait ConfigType: Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ConfigType for T where T: Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static {}

/// The shape of a configuration, that is, its concrete type.
#[derive(Debug, Clone, Copy)]
pub struct ConfigShape {
    type_id: TypeId,
    type_name: &'static str,
}

impl ConfigShape {
    pub fn of<C: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ConfigShape {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ConfigShape {}

impl fmt::Display for ConfigShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Object-safe view of a [`ConfigType`].
trait ConfigValue: fmt::Debug + Send + Sync {
    fn shape(&self) -> ConfigShape;
    fn decode(&mut self, fragment: toml::Table) -> Result<Ignored, toml::de::Error>;
    fn to_value(&self) -> Result<toml::Value, toml::ser::Error>;
    fn as_any(&self) -> &dyn Any;
    fn clone_value(&self) -> Box<dyn ConfigValue>;
}

impl<C: ConfigType> ConfigValue for C {
    fn shape(&self) -> ConfigShape {
        ConfigShape::of::<C>()
    }

    fn decode(&mut self, fragment: toml::Table) -> Result<Ignored, toml::de::Error> {
        let (value, ignored) = decode_tracked::<C>(fragment)?;
        *self = value;
        Ok(ignored)
    }

    fn to_value(&self) -> Result<toml::Value, toml::ser::Error> {
        toml::Value::try_from(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_value(&self) -> Box<dyn ConfigValue> {
        Box::new(self.clone())
    }
}

/// The configuration of one plugin instance, whose concrete type is only known
/// by the plugin factory.
///
/// A fresh `PluginConfig` holds the default value of the configuration type.
/// It is populated by [`decode`](Self::decode) and consumed by the factory,
/// which downcasts it back to the concrete type.
#[derive(Debug)]
pub struct PluginConfig {
    value: Box<dyn ConfigValue>,
}

/// Error returned by [`PluginConfig::to_table`].
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("configuration {shape} cannot be serialized")]
    Serialize {
        shape: ConfigShape,
        #[source]
        source: toml::ser::Error,
    },
    #[error("configuration {shape} does not serialize to a table but to a {actual}")]
    NotATable { shape: ConfigShape, actual: &'static str },
}

impl PluginConfig {
    pub fn new<C: ConfigType>(value: C) -> Self {
        Self { value: Box::new(value) }
    }

    /// Returns a configuration that holds `C::default()`.
    pub fn empty<C: ConfigType>() -> Self {
        Self::new(C::default())
    }

    pub fn shape(&self) -> ConfigShape {
        self.value.shape()
    }

    /// Populates the configuration from a fragment of a configuration source.
    ///
    /// Keys of the fragment that the configuration type does not know about are ignored,
    /// and returned.
    pub fn decode(&mut self, fragment: &toml::Table) -> Result<Ignored, toml::de::Error> {
        self.value.decode(fragment.clone())
    }

    /// Serializes the configuration to a TOML table.
    pub fn to_table(&self) -> Result<toml::Table, SerializeError> {
        expect_table(self.shape(), self.value.to_value())
    }

    /// Returns a reference to the concrete configuration, if it is of type `C`.
    pub fn downcast_ref<C: 'static>(&self) -> Option<&C> {
        self.value.as_any().downcast_ref::<C>()
    }

    /// Returns `true` if the configuration is of type `C`.
    pub fn is<C: 'static>(&self) -> bool {
        self.shape() == ConfigShape::of::<C>()
    }
}

fn expect_table(
    shape: ConfigShape,
    serialized: Result<toml::Value, toml::ser::Error>,
) -> Result<toml::Table, SerializeError> {
    match serialized {
        Ok(toml::Value::Table(t)) => Ok(t),
        Ok(other) => Err(SerializeError::NotATable {
            shape,
            actual: other.type_str(),
        }),
        Err(source) => Err(SerializeError::Serialize { shape, source }),
    }
}

impl Clone for PluginConfig {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone_value(),
        }
    }
}

/// Two configurations are equal if they have the same shape and the same serialized content.
impl PartialEq for PluginConfig {
    fn eq(&self, other: &Self) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        match (self.to_table(), other.to_table()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
