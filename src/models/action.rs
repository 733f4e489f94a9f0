use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// An action as declared by its `action.json` manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Positional parameters, passed to the command in declaration order.
    #[serde(default)]
    pub arguments: Vec<ActionParameter>,
    /// Named parameters, passed as `--name value`.
    #[serde(default)]
    pub options: Vec<ActionParameter>,
    /// Directory holding the manifest; the command runs from here.
    #[serde(skip)]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Json,
}

impl ParamType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            Self::Boolean => value.is_boolean(),
            Self::Json => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: Option<String>,
    pub default: Option<Value>,
}

/// Run parameters as posted by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Discard job output instead of capturing it.
    #[serde(default)]
    pub quiet: bool,
}
