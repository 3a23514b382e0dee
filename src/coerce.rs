//! Turns untyped path/query maps and raw bodies into typed values.
//!
//! Routes declare a [`Shape`] (field name to [`FieldType`]); coercion
//! checks each declared field against the source map and produces
//! [`Params`], a JSON object whose values already have the declared types.
//! Handlers then deserialize [`Params`] into their own structs.

use std::collections::HashMap;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::TypedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    StringList,
    Int,
    IntList,
    Bool,
}

impl FromStr for FieldType {
    type Err = TypedError;

    /// Shapes declared from text fail fast on an unknown type name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "string-list" => Ok(Self::StringList),
            "int" => Ok(Self::Int),
            "int-list" => Ok(Self::IntList),
            "bool" => Ok(Self::Bool),
            other => Err(TypedError::bad_request(
                format!("{other} is not supported for params"),
                None,
            )),
        }
    }
}

/// Declared parameter fields, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    fields: Vec<(String, FieldType)>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    pub fn try_from_pairs(pairs: &[(&str, &str)]) -> Result<Self, TypedError> {
        pairs.iter().try_fold(Self::new(), |shape, (name, ty)| {
            Ok(shape.field(*name, ty.parse()?))
        })
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }
}

/// Declared body type. The raw body must parse as JSON and, for
/// [`BodyShape::of`], deserialize into the given type.
#[derive(Debug, Clone, Copy)]
pub struct BodyShape {
    name: &'static str,
    check: fn(&Value) -> Result<(), serde_json::Error>,
}

fn check_as<T: DeserializeOwned>(value: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(value).map(|_| ())
}

impl BodyShape {
    pub fn json() -> Self {
        Self {
            name: "json",
            check: |_| Ok(()),
        }
    }

    pub fn of<T: DeserializeOwned>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            check: check_as::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Coerced parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Deserializes into a handler-defined struct; a mismatch is the
    /// caller's fault.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, TypedError> {
        T::deserialize(&Value::Object(self.0.clone())).map_err(|err| {
            TypedError::bad_request(format!("params unmarshal failed : {err}"), None)
        })
    }

    /// Undeclared single-valued params, passed through as strings.
    pub fn raw_single(single: &HashMap<String, String>) -> Self {
        Self(
            single
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Undeclared query params, passed through as string lists.
    pub fn raw_multi(
        single: &HashMap<String, String>,
        multi: &HashMap<String, Vec<String>>,
    ) -> Self {
        let mut map: Map<String, Value> = multi
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        for (k, v) in single {
            map.entry(k.clone()).or_insert_with(|| json!([v]));
        }
        Self(map)
    }
}

impl From<Params> for Value {
    fn from(params: Params) -> Self {
        Value::Object(params.0)
    }
}

fn parse_int(key: &str, raw: &str, source: &Value) -> Result<i64, TypedError> {
    raw.parse::<i64>().map_err(|_| {
        TypedError::bad_request(
            format!("invalid value for int, {key}-{raw}"),
            Some(source.clone()),
        )
    })
}

/// Coerces `single` / `multi` against `shape`. Absent fields stay unset;
/// path parameters have no multi-valued source, so pass `None`.
pub fn coerce_params(
    shape: &Shape,
    single: &HashMap<String, String>,
    multi: Option<&HashMap<String, Vec<String>>>,
) -> Result<Params, TypedError> {
    let mut out = Map::new();
    for (key, ty) in shape.fields() {
        let value = match ty {
            FieldType::String => single.get(key).map(|v| Value::String(v.clone())),
            FieldType::StringList => multi.and_then(|m| m.get(key)).map(|v| json!(v)),
            FieldType::Int => match single.get(key) {
                Some(raw) => Some(json!(parse_int(key, raw, &json!(single))?)),
                None => None,
            },
            FieldType::IntList => match multi.and_then(|m| m.get(key)) {
                Some(raws) => {
                    let source = json!(multi);
                    let ints = raws
                        .iter()
                        .map(|raw| parse_int(key, raw, &source))
                        .collect::<Result<Vec<_>, _>>()?;
                    Some(json!(ints))
                }
                None => None,
            },
            FieldType::Bool => match single.get(key).map(String::as_str) {
                Some("true") => Some(Value::Bool(true)),
                Some("false") => Some(Value::Bool(false)),
                Some(raw) => {
                    return Err(TypedError::bad_request(
                        format!("invalid value for bool {key} - {raw}"),
                        Some(json!(single)),
                    ));
                }
                None => None,
            },
        };
        if let Some(value) = value {
            out.insert(key.clone(), value);
        }
    }
    Ok(Params(out))
}

/// Parses a raw JSON body against the declared shape. An empty body yields
/// `None`.
pub fn parse_body(shape: &BodyShape, raw: &str) -> Result<Option<Value>, TypedError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        TypedError::bad_request(
            format!("body unmarshal failed : {err}"),
            Some(Value::String(raw.to_string())),
        )
    })?;
    (shape.check)(&value).map_err(|err| {
        TypedError::bad_request(
            format!("body does not match {} : {err}", shape.name()),
            Some(value.clone()),
        )
    })?;
    Ok(Some(value))
}

/// Decodes a base64 request body sent with a binary content type.
pub fn decode_binary_body(raw: &str) -> Result<Vec<u8>, TypedError> {
    STANDARD.decode(raw).map_err(|err| {
        TypedError::bad_request(format!("body unmarshal failed : {err}"), None)
    })
}
