//! Operation descriptors and their builder.
//!
//! A descriptor names a registered filter and carries a snapshot of its fixed
//! parameters. It is a plain value: it serializes over the worker IPC channel
//! and is resolved against the worker's own [`FilterRegistry`], so no closure
//! or heap state crosses a process boundary.

use rkyv::{Archive, Deserialize, Serialize};

use super::filter::FilterRegistry;
use crate::error::{Error, Result};

/// Longest numeric tuple accepted as a parameter.
pub const MAX_TUPLE_LEN: usize = 8;

/// Longest string accepted as a parameter, in bytes.
pub const MAX_STR_LEN: usize = 256;

/// How a filter receives its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Forwarding {
    /// One slice view, mutated in place.
    InPlace1,
    /// One slice view plus the matching row of a paired per-slice array,
    /// both indexed by the same chunk range.
    InPlace2,
}

impl Forwarding {
    /// Short name used in listings.
    pub fn name(self) -> &'static str {
        match self {
            Self::InPlace1 => "in-place-1",
            Self::InPlace2 => "in-place-2",
        }
    }
}

/// A fixed parameter value.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl ParamValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Ints(_) => "int tuple",
            Self::Floats(_) => "float tuple",
        }
    }

    /// Convert an untyped JSON value.
    ///
    /// Only booleans, numbers, strings and short flat arrays of numbers are
    /// accepted; `null`, objects and nested or mixed arrays are rejected.
    pub fn from_json(value: &serde_json::Value) -> std::result::Result<Self, String> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| format!("number {} is out of range", n)),
            },
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Array(items) => {
                if items.iter().all(|v| v.as_i64().is_some()) {
                    Ok(Self::Ints(items.iter().filter_map(|v| v.as_i64()).collect()))
                } else if items.iter().all(|v| v.is_number()) {
                    Ok(Self::Floats(items.iter().filter_map(|v| v.as_f64()).collect()))
                } else {
                    Err("arrays may only contain numbers".to_string())
                }
            }
            Value::Null => Err("null is not a value".to_string()),
            Value::Object(_) => Err("objects are not supported".to_string()),
        }
    }

    /// Numeric value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        match self {
            Self::Str(s) if s.len() > MAX_STR_LEN => {
                Err(format!("string longer than {} bytes", MAX_STR_LEN))
            }
            Self::Ints(v) if v.len() > MAX_TUPLE_LEN => {
                Err(format!("tuple longer than {} elements", MAX_TUPLE_LEN))
            }
            Self::Floats(v) if v.len() > MAX_TUPLE_LEN => {
                Err(format!("tuple longer than {} elements", MAX_TUPLE_LEN))
            }
            _ => Ok(()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Floats(v)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Ints(v)
    }
}

impl From<(f64, f64)> for ParamValue {
    fn from(v: (f64, f64)) -> Self {
        Self::Floats(vec![v.0, v.1])
    }
}

impl From<(i64, i64)> for ParamValue {
    fn from(v: (i64, i64)) -> Self {
        Self::Ints(vec![v.0, v.1])
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

/// The fixed parameters of an operation, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct Parameters {
    params: Vec<Param>,
}

impl Parameters {
    /// No parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the parameters.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// A numeric parameter (integers are widened).
    pub fn f64(&self, name: &str) -> Result<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "a number", value)),
        }
    }

    /// An integer parameter.
    pub fn i64(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v)),
            Some(value) => Err(wrong_type(name, "an integer", value)),
        }
    }

    /// A string parameter.
    pub fn str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Str(v)) => Ok(Some(v.as_str())),
            Some(value) => Err(wrong_type(name, "a string", value)),
        }
    }

    /// A required numeric parameter.
    pub fn require_f64(&self, name: &str) -> Result<f64> {
        self.f64(name)?.ok_or_else(|| missing(name))
    }

    /// A required integer parameter.
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        self.i64(name)?.ok_or_else(|| missing(name))
    }

    /// Reject parameters not in `allowed`.
    pub fn expect_only(&self, allowed: &[&str]) -> Result<()> {
        match self.params.iter().find(|p| !allowed.contains(&p.name.as_str())) {
            Some(p) => Err(Error::UnsupportedParameter {
                name: p.name.clone(),
                reason: if allowed.is_empty() {
                    "this operation takes no parameters".to_string()
                } else {
                    format!("expected one of: {}", allowed.join(", "))
                },
            }),
            None => Ok(()),
        }
    }
}

fn wrong_type(name: &str, expected: &str, found: &ParamValue) -> Error {
    Error::UnsupportedParameter {
        name: name.to_string(),
        reason: format!("expected {}, found {}", expected, found.type_name()),
    }
}

fn missing(name: &str) -> Error {
    Error::UnsupportedParameter {
        name: name.to_string(),
        reason: "required parameter is missing".to_string(),
    }
}

/// A registered filter bound to a snapshot of its fixed parameters.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct OperationDescriptor {
    function_id: String,
    forwarding: Forwarding,
    parameters: Parameters,
}

impl OperationDescriptor {
    /// Start building a descriptor for the filter registered as `function_id`.
    pub fn builder(function_id: impl Into<String>) -> OperationBuilder {
        OperationBuilder {
            function_id: function_id.into(),
            params: Vec::new(),
            error: None,
        }
    }

    /// Registered name of the filter.
    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Forwarding convention of the filter.
    pub fn forwarding(&self) -> Forwarding {
        self.forwarding
    }

    /// The fixed parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
}

/// Builder for [`OperationDescriptor`].
///
/// Parameter problems are recorded as they are added and surface from
/// [`OperationBuilder::build`], before any worker is involved.
pub struct OperationBuilder {
    function_id: String,
    params: Vec<Param>,
    error: Option<Error>,
}

impl OperationBuilder {
    /// Add a typed parameter.
    pub fn param(self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.push(name, Ok(value.into()))
    }

    /// Add a parameter from an untyped JSON value.
    pub fn param_json(self, name: &str, value: &serde_json::Value) -> Self {
        self.push(name, ParamValue::from_json(value))
    }

    fn push(mut self, name: &str, value: std::result::Result<ParamValue, String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let checked = value.and_then(|value| {
            if name.is_empty() {
                return Err("parameter names cannot be empty".to_string());
            }
            if self.params.iter().any(|p| p.name == name) {
                return Err("parameter given more than once".to_string());
            }
            value.check()?;
            Ok(value)
        });
        match checked {
            Ok(value) => self.params.push(Param {
                name: name.to_string(),
                value,
            }),
            Err(reason) => {
                self.error = Some(Error::UnsupportedParameter {
                    name: name.to_string(),
                    reason,
                })
            }
        }
        self
    }

    /// Validate against the filter registered in `registry` and produce the descriptor.
    pub fn build(self, registry: &FilterRegistry) -> Result<OperationDescriptor> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let filter = registry
            .get(&self.function_id)
            .ok_or_else(|| Error::UnknownOperation(self.function_id.clone()))?;

        let parameters = Parameters {
            params: self.params,
        };
        filter.validate_parameters(&parameters)?;

        Ok(OperationDescriptor {
            forwarding: filter.forwarding(),
            function_id: self.function_id,
            parameters,
        })
    }
}
