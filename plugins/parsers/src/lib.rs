//! Parser plugins.
//!
//! `influx` is the default data format of every input that accepts a parser.

use telemetron::plugin::registry::RegistryBuilder;

pub mod collectd;
pub mod influx;

pub use collectd::CollectdParser;
pub use influx::InfluxParser;

/// Registers the `influx` and `collectd` parsers.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .add_parser::<InfluxParser>(telemetron::config::DEFAULT_DATA_FORMAT)
        .add_parser::<CollectdParser>("collectd")
}
