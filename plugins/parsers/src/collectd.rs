//! collectd binary network protocol.
//!
//! A packet is a sequence of parts. Each part starts with a 16-bit type and a 16-bit length
//! (header included), both big-endian. Identification parts (host, plugin, type...) set the
//! state that applies to the next value parts.
//!
//! Signed packets are verified with HMAC-SHA256 against the users of the auth file.
//! Encrypted packets are not supported.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use telemetron::{
    metric::{FieldValue, Metric},
    plugin::{Parser, factory::FromConfig},
};
use thiserror::Error;

const PART_HOST: u16 = 0x0000;
const PART_TIME: u16 = 0x0001;
const PART_PLUGIN: u16 = 0x0002;
const PART_PLUGIN_INSTANCE: u16 = 0x0003;
const PART_TYPE: u16 = 0x0004;
const PART_TYPE_INSTANCE: u16 = 0x0005;
const PART_VALUES: u16 = 0x0006;
const PART_INTERVAL: u16 = 0x0007;
const PART_TIME_HR: u16 = 0x0008;
const PART_INTERVAL_HR: u16 = 0x0009;
const PART_SIGNATURE: u16 = 0x0200;
const PART_ENCRYPTION: u16 = 0x0210;

const HEADER_LEN: usize = 4;
const SIGNATURE_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File of `user: password` lines, used to verify signed packets.
    pub collectd_auth_file: Option<PathBuf>,
    pub collectd_security_level: SecurityLevel,
    pub collectd_parse_multivalue: MultiValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Unsigned packets are accepted. Signatures are checked when an auth file is set.
    #[default]
    None,
    /// Every packet must be signed by a user of the auth file.
    Sign,
}

/// How values of a multi-value data set become metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValue {
    /// One metric per value, with a `value` field.
    #[default]
    Split,
    /// One metric with the fields `value0`, `value1`, ...
    Join,
}

#[derive(Debug)]
pub struct CollectdParser {
    users: Option<HashMap<String, String>>,
    security_level: SecurityLevel,
    multivalue: MultiValue,
}

impl FromConfig for CollectdParser {
    type Config = Config;

    fn from_config(config: Config) -> anyhow::Result<Self> {
        let users = match &config.collectd_auth_file {
            Some(path) => Some(read_auth_file(path)?),
            None => None,
        };
        if config.collectd_security_level == SecurityLevel::Sign && users.is_none() {
            anyhow::bail!("collectd_security_level = \"sign\" requires a collectd_auth_file");
        }
        Ok(Self {
            users,
            security_level: config.collectd_security_level,
            multivalue: config.collectd_parse_multivalue,
        })
    }
}

impl Parser for CollectdParser {
    fn parse(&self, buf: &[u8]) -> anyhow::Result<Vec<Metric>> {
        Ok(self.parse_packet(buf)?)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PacketError {
    #[error("truncated part at offset {0}")]
    Truncated(usize),
    #[error("invalid length {length} for part {kind:#06x} at offset {offset}")]
    InvalidLength { kind: u16, length: usize, offset: usize },
    #[error("invalid string in part {0:#06x}")]
    InvalidString(u16),
    #[error("unknown data source type {0}")]
    UnknownDataSource(u8),
    #[error("packet is not signed")]
    Unsigned,
    #[error("packet signed by unknown user {0:?}")]
    UnknownUser(String),
    #[error("invalid signature for user {0:?}")]
    BadSignature(String),
    #[error("encrypted packets are not supported")]
    Encrypted,
}

/// Identification state carried from one part to the next.
#[derive(Debug, Default, Clone)]
struct State {
    host: String,
    plugin: String,
    plugin_instance: String,
    kind: String,
    type_instance: String,
    time: Option<SystemTime>,
}

impl CollectdParser {
    pub fn parse_packet(&self, buf: &[u8]) -> Result<Vec<Metric>, PacketError> {
        let mut metrics = Vec::new();
        let mut state = State::default();
        let mut offset = 0;
        let mut signed = false;

        while offset < buf.len() {
            let (kind, body, next) = read_part(buf, offset)?;
            match kind {
                PART_SIGNATURE => {
                    self.verify(body, &buf[next..])?;
                    signed = true;
                }
                PART_ENCRYPTION => return Err(PacketError::Encrypted),
                _ if self.security_level == SecurityLevel::Sign && !signed => return Err(PacketError::Unsigned),
                PART_HOST => state.host = read_string(kind, body)?,
                PART_PLUGIN => state.plugin = read_string(kind, body)?,
                PART_PLUGIN_INSTANCE => state.plugin_instance = read_string(kind, body)?,
                PART_TYPE => state.kind = read_string(kind, body)?,
                PART_TYPE_INSTANCE => state.type_instance = read_string(kind, body)?,
                PART_TIME => {
                    let secs = read_u64(kind, body, offset)?;
                    state.time = UNIX_EPOCH.checked_add(Duration::from_secs(secs));
                }
                PART_TIME_HR => {
                    state.time = UNIX_EPOCH.checked_add(from_high_resolution(read_u64(kind, body, offset)?));
                }
                PART_INTERVAL | PART_INTERVAL_HR => {
                    read_u64(kind, body, offset)?;
                }
                PART_VALUES => {
                    let values = read_values(body, offset)?;
                    self.push_metrics(&state, values, &mut metrics);
                }
                other => log::debug!("skipping collectd part {other:#06x}"),
            }
            offset = next;
        }
        if self.security_level == SecurityLevel::Sign && !signed {
            return Err(PacketError::Unsigned);
        }
        Ok(metrics)
    }

    /// Checks the HMAC of the signature part. It covers the user name and the rest of the packet.
    fn verify(&self, body: &[u8], signed_data: &[u8]) -> Result<(), PacketError> {
        if body.len() < SIGNATURE_LEN {
            return Err(PacketError::InvalidLength {
                kind: PART_SIGNATURE,
                length: body.len() + HEADER_LEN,
                offset: 0,
            });
        }
        let (signature, user) = body.split_at(SIGNATURE_LEN);
        let user = std::str::from_utf8(user).map_err(|_| PacketError::InvalidString(PART_SIGNATURE))?;
        let Some(users) = &self.users else {
            log::debug!("no auth file, accepting packet signed by {user:?} unverified");
            return Ok(());
        };
        let password = users
            .get(user)
            .ok_or_else(|| PacketError::UnknownUser(user.to_owned()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(password.as_bytes())
            .map_err(|_| PacketError::BadSignature(user.to_owned()))?;
        mac.update(user.as_bytes());
        mac.update(signed_data);
        mac.verify_slice(signature)
            .map_err(|_| PacketError::BadSignature(user.to_owned()))
    }

    fn push_metrics(&self, state: &State, values: Vec<FieldValue>, out: &mut Vec<Metric>) {
        let mut base = Metric::new(metric_name(state)).with_tag("host", state.host.clone());
        for (key, value) in [
            ("instance", &state.plugin_instance),
            ("type_instance", &state.type_instance),
        ] {
            if !value.is_empty() {
                base = base.with_tag(key, value.clone());
            }
        }
        if let Some(time) = state.time {
            base = base.with_timestamp(time);
        }

        if values.len() == 1 {
            out.extend(values.into_iter().map(|v| base.clone().with_field("value", v)));
            return;
        }
        match self.multivalue {
            MultiValue::Split => {
                for (i, v) in values.into_iter().enumerate() {
                    out.push(base.clone().with_tag("index", i.to_string()).with_field("value", v));
                }
            }
            MultiValue::Join => {
                let joined = values
                    .into_iter()
                    .enumerate()
                    .fold(base, |m, (i, v)| m.with_field(format!("value{i}"), v));
                out.push(joined);
            }
        }
    }
}

fn metric_name(state: &State) -> String {
    if state.kind.is_empty() || state.kind == state.plugin {
        state.plugin.clone()
    } else {
        format!("{}_{}", state.plugin, state.kind)
    }
}

/// Reads the part at `offset`, returns its type, its body and the offset of the next part.
fn read_part(buf: &[u8], offset: usize) -> Result<(u16, &[u8], usize), PacketError> {
    let header = buf
        .get(offset..offset + HEADER_LEN)
        .ok_or(PacketError::Truncated(offset))?;
    let kind = u16::from_be_bytes([header[0], header[1]]);
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Err(PacketError::InvalidLength { kind, length, offset });
    }
    let body = buf
        .get(offset + HEADER_LEN..offset + length)
        .ok_or(PacketError::Truncated(offset))?;
    Ok((kind, body, offset + length))
}

/// Strings are null-terminated.
fn read_string(kind: u16, body: &[u8]) -> Result<String, PacketError> {
    let raw = body.strip_suffix(&[0]).ok_or(PacketError::InvalidString(kind))?;
    String::from_utf8(raw.to_vec()).map_err(|_| PacketError::InvalidString(kind))
}

fn read_u64(kind: u16, body: &[u8], offset: usize) -> Result<u64, PacketError> {
    let bytes: [u8; 8] = body.try_into().map_err(|_| PacketError::InvalidLength {
        kind,
        length: body.len() + HEADER_LEN,
        offset,
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Values are encoded as a count, one type byte per value, then one 8-byte value each.
/// Gauges are little-endian doubles, the other types are big-endian integers.
fn read_values(body: &[u8], offset: usize) -> Result<Vec<FieldValue>, PacketError> {
    let invalid = || PacketError::InvalidLength {
        kind: PART_VALUES,
        length: body.len() + HEADER_LEN,
        offset,
    };
    let count_bytes: [u8; 2] = body.get(..2).and_then(|b| b.try_into().ok()).ok_or_else(invalid)?;
    let count = u16::from_be_bytes(count_bytes) as usize;
    if body.len() != 2 + count * 9 {
        return Err(invalid());
    }
    let (types, data) = body[2..].split_at(count);
    types
        .iter()
        .zip(data.chunks_exact(8))
        .map(|(&ds, chunk)| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            match ds {
                // counter
                0 => Ok(FieldValue::UnsignedInteger(u64::from_be_bytes(bytes))),
                // gauge
                1 => Ok(FieldValue::Float(f64::from_le_bytes(bytes))),
                // derive
                2 => Ok(FieldValue::Integer(i64::from_be_bytes(bytes))),
                // absolute
                3 => Ok(FieldValue::UnsignedInteger(u64::from_be_bytes(bytes))),
                other => Err(PacketError::UnknownDataSource(other)),
            }
        })
        .collect()
}

/// High resolution times are in units of 2^-30 seconds.
fn from_high_resolution(value: u64) -> Duration {
    let secs = value >> 30;
    let frac = value & ((1 << 30) - 1);
    Duration::new(secs, ((frac * 1_000_000_000) >> 30) as u32)
}

fn read_auth_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read collectd auth file {path:?}"))?;
    let mut users = HashMap::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (user, password) = line
            .split_once(':')
            .with_context(|| format!("{path:?} line {}: expected `user: password`", i + 1))?;
        let user = user.trim();
        anyhow::ensure!(!user.is_empty(), "{path:?} line {}: empty user name", i + 1);
        users.insert(user.to_owned(), password.trim().to_owned());
    }
    Ok(users)
}
