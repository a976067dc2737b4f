//! Casting raw attribute values, and grouping them per node.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::attr::AttributeValues;
use crate::error::{Error, Result};
use crate::source::AttributeSource;

/// Named conversion from a raw string to a JSON value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Cast {
    /// Keep the string as is.
    #[default]
    Str,
    Int,
    Float,
    /// `true`/`false`, `yes`/`no` or `1`/`0`, case-insensitive.
    Bool,
    /// Parse the string as a JSON document.
    Json,
}

impl Cast {
    pub const ALL: [Cast; 5] = [Cast::Str, Cast::Int, Cast::Float, Cast::Bool, Cast::Json];

    pub fn name(self) -> &'static str {
        match self {
            Cast::Str => "str",
            Cast::Int => "int",
            Cast::Float => "float",
            Cast::Bool => "bool",
            Cast::Json => "json",
        }
    }

    pub fn apply(self, raw: &str) -> Result<Value> {
        let fail = || Error::Cast {
            value: raw.to_string(),
            cast: self.name(),
        };
        match self {
            Cast::Str => Ok(Value::String(raw.to_string())),
            Cast::Int => raw.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
            Cast::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(fail),
            Cast::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            Cast::Json => serde_json::from_str(raw).map_err(|_| fail()),
        }
    }
}

impl FromStr for Cast {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cast::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::InvalidFormat(format!("unknown cast '{s}'")))
    }
}

impl fmt::Display for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Groups `(id, raw)` pairs into `{id: [values]}`, casting each raw value.
///
/// Values of one id keep their input order.
pub fn group_values<S, F>(source: S, mut cast: F) -> Result<AttributeValues>
where
    S: AttributeSource,
    F: FnMut(S::Raw) -> Result<Value>,
{
    let mut grouped = AttributeValues::new();
    for item in source.values() {
        let (id, raw) = item?;
        grouped.entry(id).or_default().push(cast(raw)?);
    }
    Ok(grouped)
}
