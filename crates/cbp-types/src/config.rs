//! Predictor configuration model.
//!
//! A predictor configuration is a name, a version and an ordered list of
//! typed parameters. Order matters: it is the order in which parameters are
//! hashed and written to the generated header.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::errors::{CbpError, CbpResult, ConfigError};

/// Integer parameter with optional search bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntParam {
    pub val: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Floating point parameter with optional search bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatParam {
    pub val: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Presence-only compile flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolParam {
    pub val: bool,
}

/// One-of-N compile symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParam {
    pub val: String,
    pub possible_values: Vec<String>,
}

impl CategoricalParam {
    pub fn is_possible(&self, value: &str) -> bool {
        self.possible_values.iter().any(|v| v == value)
    }
}

/// A typed predictor parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterSpec {
    Int(IntParam),
    Float(FloatParam),
    Bool(BoolParam),
    Categorical(CategoricalParam),
}

/// A concrete parameter value, as proposed by a search strategy or parsed
/// from a study table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ParameterValue {
    /// Stable textual form used for hashing and generated headers.
    ///
    /// Booleans are `True`/`False` and floats follow Python's repr,
    /// so hashes stay compatible with result directories produced by the
    /// earlier tooling.
    pub fn canonical(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format_float(*v),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Str(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", format_float(*v)),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Shortest round-trip form with Python's float repr layout: fixed notation
/// with at least one fractional digit while the decimal exponent is in
/// `-4..16`, otherwise `<mantissa>e<sign><at least two digits>`.
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{v:e}");
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        let fixed = format!("{v}");
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

impl ParameterSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Categorical(_) => "categorical",
        }
    }

    pub fn value(&self) -> ParameterValue {
        match self {
            Self::Int(p) => ParameterValue::Int(p.val),
            Self::Float(p) => ParameterValue::Float(p.val),
            Self::Bool(p) => ParameterValue::Bool(p.val),
            Self::Categorical(p) => ParameterValue::Str(p.val.clone()),
        }
    }

    /// Replace the current value, checking it against the parameter type.
    ///
    /// Categorical values are not checked against `possible_values` here;
    /// that happens when the configuration is compiled.
    pub fn set_value(&mut self, name: &str, value: ParameterValue) -> CbpResult<()> {
        let type_name = self.type_name();
        let mismatch = |value: &ParameterValue| -> CbpError {
            ConfigError::InvalidValue {
                parameter: name.to_string(),
                type_name: type_name.to_string(),
                message: format!("cannot assign {value:?}"),
            }
            .into()
        };

        match (self, value) {
            (Self::Int(p), ParameterValue::Int(v)) => p.val = v,
            (Self::Float(p), ParameterValue::Float(v)) => p.val = v,
            (Self::Float(p), ParameterValue::Int(v)) => p.val = v as f64,
            (Self::Bool(p), ParameterValue::Bool(v)) => p.val = v,
            (Self::Bool(_), _) => {
                return Err(ConfigError::NotBool {
                    parameter: name.to_string(),
                }
                .into())
            }
            (Self::Categorical(p), ParameterValue::Str(v)) => p.val = v,
            (_, other) => return Err(mismatch(&other)),
        }
        Ok(())
    }

    /// Parse a literal (a study table cell) according to this parameter's type.
    pub fn parse_literal(&self, name: &str, literal: &str) -> CbpResult<ParameterValue> {
        let literal = literal.trim();
        let invalid = |message: String| -> CbpError {
            ConfigError::InvalidValue {
                parameter: name.to_string(),
                type_name: self.type_name().to_string(),
                message,
            }
            .into()
        };

        match self {
            Self::Int(_) => literal
                .parse::<i64>()
                .map(ParameterValue::Int)
                .map_err(|e| invalid(format!("\"{literal}\": {e}"))),
            Self::Float(_) => literal
                .parse::<f64>()
                .map(ParameterValue::Float)
                .map_err(|e| invalid(format!("\"{literal}\": {e}"))),
            Self::Bool(_) => parse_bool(literal)
                .map(ParameterValue::Bool)
                .ok_or_else(|| {
                    ConfigError::NotBool {
                        parameter: name.to_string(),
                    }
                    .into()
                }),
            Self::Categorical(_) => Ok(ParameterValue::Str(literal.to_string())),
        }
    }

    /// Build a spec from the YAML mapping found under `parameters.<name>`.
    pub fn from_yaml(name: &str, node: &Value) -> CbpResult<Self> {
        let map = node.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            parameter: name.to_string(),
            type_name: "unknown".to_string(),
            message: "parameter entry must be a mapping".to_string(),
        })?;

        let type_name = map
            .get("type")
            .and_then(scalar_to_string)
            .ok_or_else(|| ConfigError::MissingField {
                field: format!("parameters.{name}.type"),
            })?;
        let val = map.get("val").ok_or_else(|| ConfigError::MissingField {
            field: format!("parameters.{name}.val"),
        })?;

        let invalid = |message: &str| -> CbpError {
            ConfigError::InvalidValue {
                parameter: name.to_string(),
                type_name: type_name.clone(),
                message: message.to_string(),
            }
            .into()
        };

        let spec = match type_name.as_str() {
            "int" => Self::Int(IntParam {
                val: yaml_i64(val).ok_or_else(|| invalid("expected an integer"))?,
                min: optional_bound(map, "min", yaml_i64).map_err(|_| invalid("min must be an integer"))?,
                max: optional_bound(map, "max", yaml_i64).map_err(|_| invalid("max must be an integer"))?,
            }),
            "float" => Self::Float(FloatParam {
                val: yaml_f64(val).ok_or_else(|| invalid("expected a number"))?,
                min: optional_bound(map, "min", yaml_f64).map_err(|_| invalid("min must be a number"))?,
                max: optional_bound(map, "max", yaml_f64).map_err(|_| invalid("max must be a number"))?,
            }),
            "bool" => Self::Bool(BoolParam {
                val: val.as_bool().ok_or_else(|| ConfigError::NotBool {
                    parameter: name.to_string(),
                })?,
            }),
            "categorical" => {
                let possible = map
                    .get("possible_values")
                    .and_then(Value::as_sequence)
                    .ok_or_else(|| ConfigError::MissingField {
                        field: format!("parameters.{name}.possible_values"),
                    })?;
                let possible_values = possible
                    .iter()
                    .map(|v| scalar_to_string(v).ok_or_else(|| invalid("possible_values must be scalars")))
                    .collect::<CbpResult<Vec<_>>>()?;
                Self::Categorical(CategoricalParam {
                    val: scalar_to_string(val).ok_or_else(|| invalid("expected a scalar value"))?,
                    possible_values,
                })
            }
            other => {
                return Err(ConfigError::UnknownType {
                    parameter: name.to_string(),
                    type_name: other.to_string(),
                }
                .into())
            }
        };

        Ok(spec)
    }

    pub fn to_yaml(&self) -> Value {
        let mut map = Mapping::new();
        map.insert("type".into(), self.type_name().into());
        match self {
            Self::Int(p) => {
                map.insert("val".into(), p.val.into());
                if let Some(min) = p.min {
                    map.insert("min".into(), min.into());
                }
                if let Some(max) = p.max {
                    map.insert("max".into(), max.into());
                }
            }
            Self::Float(p) => {
                map.insert("val".into(), p.val.into());
                if let Some(min) = p.min {
                    map.insert("min".into(), min.into());
                }
                if let Some(max) = p.max {
                    map.insert("max".into(), max.into());
                }
            }
            Self::Bool(p) => {
                map.insert("val".into(), p.val.into());
            }
            Self::Categorical(p) => {
                map.insert("val".into(), p.val.clone().into());
                map.insert(
                    "possible_values".into(),
                    Value::Sequence(p.possible_values.iter().cloned().map(Value::from).collect()),
                );
            }
        }
        Value::Mapping(map)
    }
}

/// Strict boolean parsing for table cells: the literal `False` is false.
pub fn parse_bool(literal: &str) -> Option<bool> {
    match literal.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn yaml_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn yaml_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn optional_bound<T>(map: &Mapping, key: &str, parse: fn(&Value) -> Option<T>) -> Result<Option<T>, ()> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse(v).map(Some).ok_or(()),
    }
}

/// Render a YAML scalar as a plain string.
pub fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A complete predictor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    pub name: String,
    pub version: String,
    pub parameters: Vec<(String, ParameterSpec)>,
}

impl PredictorConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.push((name.into(), spec));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParameterSpec> {
        self.parameters
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    pub fn require(&self, name: &str) -> CbpResult<&ParameterSpec> {
        self.get(name).ok_or_else(|| {
            ConfigError::UnknownParameter {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn set_value(&mut self, name: &str, value: ParameterValue) -> CbpResult<()> {
        let spec = self.get_mut(name).ok_or_else(|| ConfigError::UnknownParameter {
            name: name.to_string(),
        })?;
        spec.set_value(name, value)
    }

    /// Apply a textual override (a study table cell) to a parameter.
    pub fn apply_override(&mut self, name: &str, literal: &str) -> CbpResult<()> {
        let value = self.require(name)?.parse_literal(name, literal)?;
        self.set_value(name, value)
    }

    pub fn value_of(&self, name: &str) -> Option<ParameterValue> {
        self.get(name).map(ParameterSpec::value)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|(n, _)| n.as_str())
    }

    /// Parse the `predictor` and `parameters` sections of a config document.
    ///
    /// Any `reproduction` block is ignored here; see [`Reproduction::from_document`].
    pub fn from_document(doc: &Value) -> CbpResult<Self> {
        let predictor = doc.get("predictor").ok_or_else(|| ConfigError::MissingField {
            field: "predictor".to_string(),
        })?;
        let name = predictor
            .get("name")
            .and_then(scalar_to_string)
            .ok_or_else(|| ConfigError::MissingField {
                field: "predictor.name".to_string(),
            })?;
        let version = predictor
            .get("version")
            .and_then(scalar_to_string)
            .ok_or_else(|| ConfigError::MissingField {
                field: "predictor.version".to_string(),
            })?;

        let mut config = Self::new(name, version);

        match doc.get("parameters") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(params)) => {
                for (key, node) in params {
                    let param_name = scalar_to_string(key).ok_or_else(|| ConfigError::MissingField {
                        field: "parameters.<name>".to_string(),
                    })?;
                    if config.get(&param_name).is_some() {
                        return Err(ConfigError::DuplicateParameter { name: param_name }.into());
                    }
                    let spec = ParameterSpec::from_yaml(&param_name, node)?;
                    config.parameters.push((param_name, spec));
                }
            }
            Some(_) => {
                return Err(ConfigError::MissingField {
                    field: "parameters (mapping)".to_string(),
                }
                .into())
            }
        }

        Ok(config)
    }

    /// Render the config as a YAML document, optionally preceded by a
    /// reproduction block.
    pub fn to_document(&self, reproduction: Option<&Reproduction>) -> Value {
        let mut doc = Mapping::new();
        if let Some(repro) = reproduction {
            doc.insert("reproduction".into(), repro.to_yaml());
        }

        let mut predictor = Mapping::new();
        predictor.insert("name".into(), self.name.clone().into());
        predictor.insert("version".into(), version_value(&self.version));
        doc.insert("predictor".into(), Value::Mapping(predictor));

        let mut params = Mapping::new();
        for (name, spec) in &self.parameters {
            params.insert(name.clone().into(), spec.to_yaml());
        }
        doc.insert("parameters".into(), Value::Mapping(params));

        Value::Mapping(doc)
    }
}

fn version_value(version: &str) -> Value {
    match version.parse::<i64>() {
        Ok(v) => v.into(),
        Err(_) => version.to_string().into(),
    }
}

/// Provenance block attached to persisted results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reproduction {
    pub date_of_run: String,
    #[serde(rename = "MPKI")]
    pub mpki: f64,
    pub num_traces: usize,
    pub config_hash: String,
    pub param_hash: String,
}

impl Reproduction {
    pub const DATE_FORMAT: &'static str = "%d/%m/%Y %H:%M:%S";

    pub fn new(hashes: &crate::hash::ConfigHashes, mpki: f64, num_traces: usize) -> Self {
        Self {
            date_of_run: chrono::Local::now().format(Self::DATE_FORMAT).to_string(),
            mpki,
            num_traces,
            config_hash: hashes.config_hash.clone(),
            param_hash: hashes.param_hash.clone(),
        }
    }

    /// Extract the `reproduction` block of a document, if any.
    ///
    /// Values are accepted as strings as well as numbers.
    pub fn from_document(doc: &Value) -> CbpResult<Option<Self>> {
        let Some(node) = doc.get("reproduction") else {
            return Ok(None);
        };
        if node.is_null() {
            return Ok(None);
        }

        fn field<'a>(node: &'a Value, key: &str) -> CbpResult<&'a Value> {
            node.get(key).ok_or_else(|| {
                ConfigError::MissingField {
                    field: format!("reproduction.{key}"),
                }
                .into()
            })
        }
        let bad = |key: &str| -> CbpError {
            ConfigError::InvalidValue {
                parameter: format!("reproduction.{key}"),
                type_name: "number".to_string(),
                message: "not numeric".to_string(),
            }
            .into()
        };

        Ok(Some(Self {
            date_of_run: field(node, "date_of_run")
                .ok()
                .and_then(scalar_to_string)
                .unwrap_or_default(),
            mpki: yaml_f64(field(node, "MPKI")?).ok_or_else(|| bad("MPKI"))?,
            num_traces: yaml_i64(field(node, "num_traces")?)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| bad("num_traces"))?,
            config_hash: field(node, "config_hash")
                .ok()
                .and_then(scalar_to_string)
                .unwrap_or_default(),
            param_hash: field(node, "param_hash")
                .ok()
                .and_then(scalar_to_string)
                .unwrap_or_default(),
        }))
    }

    pub fn to_yaml(&self) -> Value {
        let mut map = Mapping::new();
        map.insert("date_of_run".into(), self.date_of_run.clone().into());
        map.insert("MPKI".into(), self.mpki.into());
        map.insert("num_traces".into(), (self.num_traces as u64).into());
        map.insert("config_hash".into(), self.config_hash.clone().into());
        map.insert("param_hash".into(), self.param_hash.clone().into());
        Value::Mapping(map)
    }
}
