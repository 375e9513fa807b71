//! Reading of configuration sources.

use std::{borrow::Cow, env::VarError, io, path::Path};

/// Error returned by [`read_source`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not read {path}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("env var substitution failed in {path}")]
    Substitution {
        path: String,
        #[source]
        source: InvalidSubstitutionError,
    },
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum InvalidSubstitutionError {
    /// The environment variable does not exist.
    #[error("the environment variable {0} does not exist")]
    Missing(String),
    /// The value of the variable is not valid UTF-8.
    #[error("value of env var {0} is not valid UTF-8")]
    InvalidValue(String),
    /// The name of the variable is empty or contains a forbidden character.
    #[error("env var name {0:?} is not valid")]
    InvalidName(String),
    /// A `${` is never closed.
    #[error("wrong use of the substitution syntax, it should be ${{ENV_VAR}}")]
    WrongSyntax,
}

/// Reads a configuration file, and optionally replaces `${ENV_VAR}` by the value of the variable.
pub fn read_source(path: &Path, substitute: bool) -> Result<String, SourceError> {
    let content = std::fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if !substitute {
        return Ok(content);
    }
    match substitute_env(&content) {
        Ok(Cow::Borrowed(_)) => Ok(content),
        Ok(Cow::Owned(s)) => Ok(s),
        Err(source) => Err(SourceError::Substitution {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Replaces each `${ENV_VAR}` by the value of the environment variable `ENV_VAR`.
///
/// `\${` is an escaped substitution: it yields a literal `${`.
/// If the input contains no substitution, it is returned as is.
pub fn substitute_env(input: &str) -> Result<Cow<'_, str>, InvalidSubstitutionError> {
    let Some(first) = input.find("${") else {
        return Ok(Cow::Borrowed(input));
    };

    let mut res = String::with_capacity(input.len());
    let mut rest = input;
    let mut next = Some(first);
    while let Some(begin) = next {
        let escaped = begin > 0 && rest.as_bytes()[begin - 1] == b'\\';
        if escaped {
            res.push_str(&rest[..begin - 1]);
            res.push_str("${");
            rest = &rest[begin + 2..];
        } else {
            res.push_str(&rest[..begin]);
            let after = &rest[begin + 2..];
            let end = after.find('}').ok_or(InvalidSubstitutionError::WrongSyntax)?;
            let name = &after[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(InvalidSubstitutionError::InvalidName(name.to_owned()));
            }
            match std::env::var(name) {
                Ok(value) => res.push_str(&value),
                Err(VarError::NotPresent) => return Err(InvalidSubstitutionError::Missing(name.to_owned())),
                Err(VarError::NotUnicode(_)) => return Err(InvalidSubstitutionError::InvalidValue(name.to_owned())),
            }
            rest = &after[end + 1..];
        }
        next = rest.find("${");
    }
    res.push_str(rest);
    Ok(Cow::Owned(res))
}

/// Deeply merges `overrides` into `original`.
///
/// Tables are merged recursively, any other value is replaced.
pub fn merge_override(original: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (original.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(table)) => merge_override(existing, table),
            (_, value) => {
                original.insert(key, value);
            }
        }
    }
}
