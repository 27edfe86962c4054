/*!

# Session Schema

A state-history node opens every session by sending a JSON schema document
(an "abi") describing the binary layout of everything it will send afterwards.
The document is parsed into [`AbiDef`] and then flattened into a
[`TypeRegistry`] which resolves type names to decodable layouts.

Only `eosio::abi/1.x` documents are accepted.

Table declarations in the state-history schema (`name`, `type`,
`key_names`) do not match the contract abi flavour, so only the members the
client needs are read and everything else (actions, ricardian clauses, error
messages, extensions) is ignored.

*/

mod json;
mod registry;

pub use json::{name_to_string, symbol_to_string};
pub use registry::{AbiType, Builtin, Field, TypeRegistry};

use serde::Deserialize;

use crate::error::ProtocolError;

pub const ABI_VERSION_PREFIX: &str = "eosio::abi/1.";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AbiDef {
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TableDef {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub key_names: Vec<String>,
}

impl AbiDef {
    pub fn from_json(text: &str) -> Result<AbiDef, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::AbiJson(e.to_string()))
    }
}

pub fn check_abi_version(version: &str) -> Result<(), ProtocolError> {
    if version.starts_with(ABI_VERSION_PREFIX) {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedAbiVersion(version.to_string()))
    }
}
