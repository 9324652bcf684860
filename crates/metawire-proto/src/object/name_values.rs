//! Name-value records.
//!
//! Avatar and attachment metadata travels as newline-delimited text
//! records: `name type class sendto value`, whitespace-separated, with the
//! value running to the end of the line. The type set is a closed
//! enumeration; an unknown type, class or sendto token is malformed (these
//! records are version-locked, unlike the binary enums elsewhere).

use glam::Vec3;

use crate::error::{ProtocolError, Result};

const CONTEXT: &str = "NameValue";

/// Value type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameValueType {
    /// Free-form string
    String,
    /// IEEE float
    F32,
    /// Signed 32-bit integer
    S32,
    /// Three-component vector
    Vec3,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Asset identifier, carried as a string
    Asset,
}

impl NameValueType {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "STRING" => Self::String,
            "F32" => Self::F32,
            "S32" => Self::S32,
            "VEC3" => Self::Vec3,
            "U32" => Self::U32,
            "U64" => Self::U64,
            "ASSET" => Self::Asset,
            _ => return None,
        })
    }

    fn token(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::F32 => "F32",
            Self::S32 => "S32",
            Self::Vec3 => "VEC3",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::Asset => "ASSET",
        }
    }
}

/// Mutability class token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameValueClass {
    /// Read-only
    ReadOnly,
    /// Read-write
    ReadWrite,
    /// Change triggers a callback
    Callback,
}

impl NameValueClass {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "R" => Self::ReadOnly,
            "RW" => Self::ReadWrite,
            "CB" => Self::Callback,
            _ => return None,
        })
    }

    fn token(self) -> &'static str {
        match self {
            Self::ReadOnly => "R",
            Self::ReadWrite => "RW",
            Self::Callback => "CB",
        }
    }
}

/// Replication target token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameValueSendTo {
    /// Simulator only
    Sim,
    /// Simulator and its data store
    DataSim,
    /// Simulator and viewers
    SimViewer,
    /// Simulator, data store, and viewers
    DataSimViewer,
}

impl NameValueSendTo {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "S" => Self::Sim,
            "DS" => Self::DataSim,
            "SV" => Self::SimViewer,
            "DSV" => Self::DataSimViewer,
            _ => return None,
        })
    }

    fn token(self) -> &'static str {
        match self {
            Self::Sim => "S",
            Self::DataSim => "DS",
            Self::SimViewer => "SV",
            Self::DataSimViewer => "DSV",
        }
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum NameValueContent {
    /// Free-form string
    String(String),
    /// IEEE float
    F32(f32),
    /// Signed integer
    S32(i32),
    /// Vector, carried as `<x, y, z>`
    Vec3(Vec3),
    /// Unsigned integer
    U32(u32),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Asset identifier string
    Asset(String),
}

/// One parsed name-value record.
#[derive(Debug, Clone, PartialEq)]
pub struct NameValue {
    /// Attribute name
    pub name: String,
    /// Mutability class
    pub class: NameValueClass,
    /// Replication target
    pub sendto: NameValueSendTo,
    /// Typed value
    pub value: NameValueContent,
}

impl NameValue {
    /// Value type token for this record's content.
    pub fn value_type(&self) -> NameValueType {
        match &self.value {
            NameValueContent::String(_) => NameValueType::String,
            NameValueContent::F32(_) => NameValueType::F32,
            NameValueContent::S32(_) => NameValueType::S32,
            NameValueContent::Vec3(_) => NameValueType::Vec3,
            NameValueContent::U32(_) => NameValueType::U32,
            NameValueContent::U64(_) => NameValueType::U64,
            NameValueContent::Asset(_) => NameValueType::Asset,
        }
    }

    /// Serialize to the wire's line form.
    pub fn to_line(&self) -> String {
        let value = match &self.value {
            NameValueContent::String(s) | NameValueContent::Asset(s) => s.clone(),
            NameValueContent::F32(v) => format!("{v}"),
            NameValueContent::S32(v) => format!("{v}"),
            NameValueContent::Vec3(v) => format!("<{}, {}, {}>", v.x, v.y, v.z),
            NameValueContent::U32(v) => format!("{v}"),
            NameValueContent::U64(v) => format!("{v}"),
        };
        format!(
            "{} {} {} {} {}",
            self.name,
            self.value_type().token(),
            self.class.token(),
            self.sendto.token(),
            value
        )
    }
}

/// Parse a newline-delimited name-value text block. Empty lines are
/// skipped.
pub fn parse(text: &str) -> Result<Vec<NameValue>> {
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_line(line).map_err(|reason| ProtocolError::Malformed {
            context: CONTEXT,
            offset: line_no,
            reason,
        })?);
    }
    Ok(records)
}

/// Serialize records back to the wire's newline-delimited form.
pub fn to_text(records: &[NameValue]) -> String {
    records.iter().map(NameValue::to_line).collect::<Vec<_>>().join("\n")
}

fn parse_line(line: &str) -> std::result::Result<NameValue, String> {
    let mut tokens = line.splitn(5, char::is_whitespace);
    let name = tokens.next().filter(|t| !t.is_empty()).ok_or("missing name")?;
    let type_token = tokens.next().ok_or("missing type")?;
    let class_token = tokens.next().ok_or("missing class")?;
    let sendto_token = tokens.next().ok_or("missing sendto")?;
    let value = tokens.next().unwrap_or("");

    let value_type = NameValueType::parse(type_token)
        .ok_or_else(|| format!("unknown type token {type_token:?}"))?;
    let class = NameValueClass::parse(class_token)
        .ok_or_else(|| format!("unknown class token {class_token:?}"))?;
    let sendto = NameValueSendTo::parse(sendto_token)
        .ok_or_else(|| format!("unknown sendto token {sendto_token:?}"))?;

    let content = match value_type {
        NameValueType::String => NameValueContent::String(value.to_owned()),
        NameValueType::Asset => NameValueContent::Asset(value.to_owned()),
        NameValueType::F32 => NameValueContent::F32(
            value.trim().parse().map_err(|_| format!("bad F32 value {value:?}"))?,
        ),
        NameValueType::S32 => NameValueContent::S32(
            value.trim().parse().map_err(|_| format!("bad S32 value {value:?}"))?,
        ),
        NameValueType::U32 => NameValueContent::U32(
            value.trim().parse().map_err(|_| format!("bad U32 value {value:?}"))?,
        ),
        NameValueType::U64 => NameValueContent::U64(
            value.trim().parse().map_err(|_| format!("bad U64 value {value:?}"))?,
        ),
        NameValueType::Vec3 => NameValueContent::Vec3(parse_vec3(value)?),
    };

    Ok(NameValue { name: name.to_owned(), class, sendto, value: content })
}

fn parse_vec3(value: &str) -> std::result::Result<Vec3, String> {
    let inner = value.trim().trim_start_matches('<').trim_end_matches('>');
    let mut parts = inner.split(',').map(str::trim);
    let mut component = || -> std::result::Result<f32, String> {
        parts
            .next()
            .ok_or_else(|| format!("bad VEC3 value {value:?}"))?
            .parse()
            .map_err(|_| format!("bad VEC3 value {value:?}"))
    };
    let x = component()?;
    let y = component()?;
    let z = component()?;
    Ok(Vec3::new(x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_avatar_records() {
        let text = "FirstName STRING R SV Jane\nLastName STRING R SV Doe\nTitle STRING RW SV Builder of Things";
        let records = parse(text).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "FirstName");
        assert_eq!(records[0].class, NameValueClass::ReadOnly);
        assert_eq!(records[0].sendto, NameValueSendTo::SimViewer);
        assert_eq!(records[0].value, NameValueContent::String("Jane".to_owned()));
        // STRING values keep embedded spaces.
        assert_eq!(
            records[2].value,
            NameValueContent::String("Builder of Things".to_owned())
        );
    }

    #[test]
    fn parses_numeric_and_vector_values() {
        let text = "Score U32 RW DS 4200\nDelta S32 RW S -17\nWeight F32 RW S 2.5\nOffset VEC3 RW SV <1, -2, 3.5>\nBig U64 R DS 9000000000";
        let records = parse(text).unwrap();
        assert_eq!(records[0].value, NameValueContent::U32(4200));
        assert_eq!(records[1].value, NameValueContent::S32(-17));
        assert_eq!(records[2].value, NameValueContent::F32(2.5));
        assert_eq!(records[3].value, NameValueContent::Vec3(Vec3::new(1.0, -2.0, 3.5)));
        assert_eq!(records[4].value, NameValueContent::U64(9_000_000_000));
    }

    #[test]
    fn skips_empty_lines() {
        let text = "\nA STRING R S x\n\n\nB STRING R S y\n";
        let records = parse(text).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unknown_type_token_is_malformed() {
        assert!(parse("A BLOB R S x").is_err());
        assert!(parse("A STRING Q S x").is_err());
        assert!(parse("A STRING R NOWHERE x").is_err());
    }

    #[test]
    fn round_trips_through_text() {
        let text = "FirstName STRING R SV Jane\nScore U32 RW DS 42\nOffset VEC3 RW SV <1, -2, 3.5>";
        let records = parse(text).unwrap();
        assert_eq!(to_text(&records), text);
    }
}
