//! Flattening of configuration structs into documented `path -> value` pairs.
//!
//! A config implements [`SerializeConfig`] by listing its leaf parameters with [`ser_param`] and
//! embedding its sub-configs with [`prepend_sub_config_name`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A dot separated path of a parameter, e.g. `timeouts.election_base_timeout`.
pub type ParamPath = String;

/// A single dumped parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedParam {
    pub description: String,
    pub content: Value,
}

pub trait SerializeConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam>;
}

/// Serializes a single leaf parameter.
pub fn ser_param<T: Serialize>(
    name: &str,
    value: &T,
    description: &str,
) -> (ParamPath, SerializedParam) {
    let content = serde_json::to_value(value)
        .unwrap_or_else(|err| panic!("Failed to serialize config parameter {name}: {err}"));
    (name.to_owned(), SerializedParam { description: description.to_owned(), content })
}

/// Prefixes every path of a sub-config dump with `sub_config_name.`.
pub fn prepend_sub_config_name(
    sub_config_dump: BTreeMap<ParamPath, SerializedParam>,
    sub_config_name: &str,
) -> BTreeMap<ParamPath, SerializedParam> {
    sub_config_dump
        .into_iter()
        .map(|(path, param)| (format!("{sub_config_name}.{path}"), param))
        .collect()
}
