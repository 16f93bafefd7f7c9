//! Field filtering of value trees against a chart's `values.schema.json`.
//!
//! Only the subset of JSON Schema needed to decide which fields a chart
//! accepts is modelled: `type`, `properties`, `additionalProperties`, `items`
//! and local `$ref`s into `$defs`. Everything else in a schema document is
//! ignored. Filtering never validates types, it only drops fields the schema
//! does not permit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::constants::VALUES_SCHEMA_FILE_NAME;

mod filter;
mod resolve;

pub use filter::filter;
pub use resolve::resolve;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("chart does not contain a {VALUES_SCHEMA_FILE_NAME:?}"))]
    SchemaNotFound,

    #[snafu(display("failed to parse {VALUES_SCHEMA_FILE_NAME:?}"))]
    ParseSchema { source: serde_json::Error },
}

/// One node of a JSON Schema document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SchemaNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, SchemaNode>>,

    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<AdditionalProperties>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,

    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(rename = "$defs", default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<BTreeMap<String, SchemaNode>>,
}

/// The `type` keyword, either a single type or a union such as
/// `["object", "null"]`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Union(Vec<String>),
}

impl SchemaType {
    /// The type used to dispatch filtering: the single type, or the first
    /// non-`null` member of a union.
    pub fn primary(&self) -> &str {
        match self {
            Self::Single(single) => single,
            Self::Union(union) => union
                .iter()
                .find(|member| *member != "null")
                .or_else(|| union.first())
                .map_or("", String::as_str),
        }
    }
}

/// The `additionalProperties` keyword.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    /// `true` keeps undeclared fields verbatim, `false` drops them.
    Allowed(bool),

    /// Undeclared fields are kept after filtering them against this schema.
    Schema(Box<SchemaNode>),
}

impl SchemaNode {
    /// The dispatch type of this node, empty if none is declared.
    pub fn primary_type(&self) -> &str {
        self.schema_type.as_ref().map_or("", SchemaType::primary)
    }
}

/// A file of a packaged chart, as listed in the chart archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Loads and resolves the values schema from a chart's raw file list.
pub fn load_from_chart_files(files: &[ChartFile]) -> Result<SchemaNode, Error> {
    let file = files
        .iter()
        .find(|file| file.name == VALUES_SCHEMA_FILE_NAME)
        .context(SchemaNotFoundSnafu)?;

    let schema: SchemaNode = serde_json::from_slice(&file.data).context(ParseSchemaSnafu)?;
    Ok(resolve(schema))
}
