//! MCP tool parameter structs with schemars-derived JSON schemas.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct DeduplicateParams {
    #[schemars(
        description = "Minimum cosine similarity (0-1) for two categories to share a community. Defaults to the configured value (0.955)"
    )]
    pub similarity_cutoff: Option<f64>,
    #[schemars(
        description = "Minimum fuzzy name similarity (0-1) for two categories to be sent for adjudication. Defaults to the configured value (0.05)"
    )]
    pub word_similarity: Option<f64>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SanitizeParams {
    #[schemars(
        description = "Only clean relationships of this type (e.g. 'MENTIONS'). Defaults to every type"
    )]
    pub relationship_type: Option<String>,
}
