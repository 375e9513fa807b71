//! Detection of the keys that no configuration structure has consumed.
//!
//! The body of a declaration is decoded by several structures: the settings common to
//! the plugin kind, the plugin configuration and, for inputs, the parser configuration.
//! Each decoding records the keys that it ignored. A key of the body is *unclaimed*
//! when every decoding ignored it, or ignored one of its parents.

use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// The keys that one decoding has ignored, relative to the decoded body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ignored(Vec<Vec<Segment>>);

impl Ignored {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Formats the ignored keys, for instance `server.port` or `servers[1].host`.
    pub fn paths(&self) -> Vec<String> {
        self.0.iter().map(|key| format_key("", key)).collect()
    }

    /// Returns `true` if `key`, or one of its parents, has been ignored.
    fn covers(&self, key: &[Segment]) -> bool {
        self.0.iter().any(|ignored| key.starts_with(ignored))
    }
}

/// Deserializes `body` into a `T`, and records the keys that `T` did not consume.
pub fn decode_tracked<T: DeserializeOwned>(body: toml::Table) -> Result<(T, Ignored), toml::de::Error> {
    let mut ignored = Vec::new();
    let value = serde_ignored::deserialize(toml::Value::Table(body), |path| {
        let mut key = Vec::new();
        push_segments(&path, &mut key);
        ignored.push(key);
    })?;
    Ok((value, Ignored(ignored)))
}

fn push_segments(path: &serde_ignored::Path<'_>, out: &mut Vec<Segment>) {
    use serde_ignored::Path;
    match path {
        Path::Root => (),
        Path::Seq { parent, index } => {
            push_segments(parent, out);
            out.push(Segment::Index(*index));
        }
        Path::Map { parent, key } => {
            push_segments(parent, out);
            out.push(Segment::Key(key.to_string()));
        }
        Path::Some { parent } | Path::NewtypeStruct { parent } | Path::NewtypeVariant { parent } => {
            push_segments(parent, out)
        }
    }
}

/// Appends the path of every key of `source` that all the `decodings` have ignored.
///
/// Only the outermost unclaimed key of a subtree is reported.
pub fn unclaimed_keys(source: &toml::Table, decodings: &[&Ignored], path: &str, out: &mut Vec<String>) {
    let mut key = Vec::new();
    walk_table(source, decodings, &mut key, path, out);
}

fn walk_table(table: &toml::Table, decodings: &[&Ignored], key: &mut Vec<Segment>, base: &str, out: &mut Vec<String>) {
    for (name, value) in table {
        key.push(Segment::Key(name.clone()));
        walk_value(value, decodings, key, base, out);
        key.pop();
    }
}

fn walk_value(value: &toml::Value, decodings: &[&Ignored], key: &mut Vec<Segment>, base: &str, out: &mut Vec<String>) {
    if decodings.iter().all(|d| d.covers(key)) {
        out.push(format_key(base, key));
        return;
    }
    match value {
        toml::Value::Table(table) => walk_table(table, decodings, key, base, out),
        toml::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                key.push(Segment::Index(i));
                walk_value(item, decodings, key, base, out);
                key.pop();
            }
        }
        _ => (),
    }
}

fn format_key(base: &str, key: &[Segment]) -> String {
    let mut res = base.to_owned();
    for segment in key {
        match segment {
            Segment::Key(k) => {
                if !res.is_empty() {
                    res.push('.');
                }
                res.push_str(k);
            }
            Segment::Index(i) => res.push_str(&format!("[{i}]")),
        }
    }
    res
}
