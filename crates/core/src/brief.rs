//! Campaign brief parsing, validation, and content hashing.
//!
//! A brief is a structured file (JSON or YAML) describing one campaign. The
//! watcher hashes the raw bytes to detect changes and hands them to
//! [`parse_brief`]; a brief that parses is immutable from then on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{CampaignId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a campaign id.
const MAX_ID_LEN: usize = 128;

/// Maximum number of products in one brief.
const MAX_PRODUCTS: usize = 64;

/// Maximum number of required output categories in one brief.
const MAX_CATEGORIES: usize = 32;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Campaign priority. Ordering is `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

// ---------------------------------------------------------------------------
// Brief
// ---------------------------------------------------------------------------

/// On-disk shape of a brief file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BriefDocument {
    pub id: String,
    pub products: Vec<String>,
    pub required_categories: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<Timestamp>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub target_region: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
}

/// A validated campaign brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub id: CampaignId,
    pub products: Vec<String>,
    pub required_categories: Vec<String>,
    pub priority: Priority,
    pub deadline: Option<Timestamp>,
    pub message: Option<String>,
    pub target_region: Option<String>,
    pub target_audience: Option<String>,
    /// SHA-256 hex digest of the raw source bytes.
    pub content_hash: String,
    /// File the brief was read from.
    pub source_path: String,
}

impl CampaignBrief {
    /// Number of deliverables the brief asks for: products × categories.
    pub fn expected_count(&self) -> u32 {
        let total = self.products.len() * self.required_categories.len();
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

/// Serialization format of a brief file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BriefFormat {
    Json,
    Yaml,
}

impl BriefFormat {
    /// Map a file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(BriefFormat::Json),
            "yaml" | "yml" => Some(BriefFormat::Yaml),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BriefParseError {
    /// The bytes are not valid JSON/YAML for the brief shape.
    #[error("Malformed brief: {0}")]
    Syntax(String),

    /// The document parsed but its contents are not acceptable.
    #[error("Invalid brief: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a brief's raw bytes.
pub fn content_hash(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Parse and validate raw brief bytes.
pub fn parse_brief(
    data: &[u8],
    format: BriefFormat,
    source_path: &str,
) -> Result<CampaignBrief, BriefParseError> {
    let doc: BriefDocument = match format {
        BriefFormat::Json => {
            serde_json::from_slice(data).map_err(|e| BriefParseError::Syntax(e.to_string()))?
        }
        BriefFormat::Yaml => {
            serde_yaml::from_slice(data).map_err(|e| BriefParseError::Syntax(e.to_string()))?
        }
    };

    validate_document(&doc)?;

    Ok(CampaignBrief {
        id: doc.id,
        products: doc.products,
        required_categories: doc.required_categories,
        priority: doc.priority,
        deadline: doc.deadline,
        message: doc.message,
        target_region: doc.target_region,
        target_audience: doc.target_audience,
        content_hash: content_hash(data),
        source_path: source_path.to_string(),
    })
}

/// Validate a parsed brief document.
///
/// Rules:
/// - `id` is non-empty, at most `MAX_ID_LEN` chars, alphanumeric plus `.-_`.
/// - At least one product, none blank, at most `MAX_PRODUCTS`.
/// - At least one category, none blank or duplicated, at most `MAX_CATEGORIES`.
pub fn validate_document(doc: &BriefDocument) -> Result<(), BriefParseError> {
    if doc.id.is_empty() {
        return Err(BriefParseError::Invalid("id must not be empty".into()));
    }
    if doc.id.len() > MAX_ID_LEN {
        return Err(BriefParseError::Invalid(format!(
            "id must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !doc
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(BriefParseError::Invalid(
            "id may only contain alphanumeric, hyphen, underscore, or dot characters".into(),
        ));
    }

    if doc.products.is_empty() {
        return Err(BriefParseError::Invalid(
            "at least one product is required".into(),
        ));
    }
    if doc.products.len() > MAX_PRODUCTS {
        return Err(BriefParseError::Invalid(format!(
            "a brief may list at most {MAX_PRODUCTS} products"
        )));
    }
    if let Some(i) = doc.products.iter().position(|p| p.trim().is_empty()) {
        return Err(BriefParseError::Invalid(format!(
            "product at index {i} must not be blank"
        )));
    }

    if doc.required_categories.is_empty() {
        return Err(BriefParseError::Invalid(
            "at least one required category is required".into(),
        ));
    }
    if doc.required_categories.len() > MAX_CATEGORIES {
        return Err(BriefParseError::Invalid(format!(
            "a brief may list at most {MAX_CATEGORIES} categories"
        )));
    }
    let mut seen = HashSet::with_capacity(doc.required_categories.len());
    for (i, category) in doc.required_categories.iter().enumerate() {
        if category.trim().is_empty() {
            return Err(BriefParseError::Invalid(format!(
                "category at index {i} must not be blank"
            )));
        }
        if !seen.insert(category.as_str()) {
            return Err(BriefParseError::Invalid(format!(
                "duplicate category: \"{category}\""
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const VALID_JSON: &str = r#"{
        "id": "spring-launch",
        "products": ["sparkling-water", "cold-brew"],
        "required_categories": ["1:1", "9:16", "16:9"],
        "priority": "high",
        "deadline": "2026-11-01T12:00:00Z"
    }"#;

    #[test]
    fn parses_valid_json_brief() {
        let brief = parse_brief(VALID_JSON.as_bytes(), BriefFormat::Json, "briefs/a.json")
            .expect("brief should parse");
        assert_eq!(brief.id, "spring-launch");
        assert_eq!(brief.priority, Priority::High);
        assert_eq!(brief.expected_count(), 6);
        assert!(brief.deadline.is_some());
        assert_eq!(brief.content_hash, content_hash(VALID_JSON.as_bytes()));
        assert_eq!(brief.source_path, "briefs/a.json");
    }

    #[test]
    fn parses_yaml_brief_with_default_priority() {
        let yaml = "id: summer\nproducts: [tea]\nrequired_categories: ['1:1']\n";
        let brief = parse_brief(yaml.as_bytes(), BriefFormat::Yaml, "b.yaml").unwrap();
        assert_eq!(brief.priority, Priority::Normal);
        assert!(brief.deadline.is_none());
        assert_eq!(brief.expected_count(), 1);
    }

    #[test]
    fn malformed_json_is_syntax_error() {
        let err = parse_brief(b"{ not json", BriefFormat::Json, "x.json").unwrap_err();
        assert_matches!(err, BriefParseError::Syntax(_));
    }

    #[test]
    fn unknown_priority_is_syntax_error() {
        let json = r#"{"id":"a","products":["p"],"required_categories":["1:1"],"priority":"urgent"}"#;
        let err = parse_brief(json.as_bytes(), BriefFormat::Json, "x.json").unwrap_err();
        assert_matches!(err, BriefParseError::Syntax(_));
    }

    #[test]
    fn empty_products_rejected() {
        let json = r#"{"id":"a","products":[],"required_categories":["1:1"]}"#;
        let err = parse_brief(json.as_bytes(), BriefFormat::Json, "x.json").unwrap_err();
        assert_matches!(err, BriefParseError::Invalid(_));
    }

    #[test]
    fn duplicate_category_rejected() {
        let json = r#"{"id":"a","products":["p"],"required_categories":["1:1","1:1"]}"#;
        let err = parse_brief(json.as_bytes(), BriefFormat::Json, "x.json").unwrap_err();
        assert!(err.to_string().contains("duplicate category"));
    }

    #[test]
    fn id_with_path_separator_rejected() {
        let json = r#"{"id":"../etc","products":["p"],"required_categories":["1:1"]}"#;
        let err = parse_brief(json.as_bytes(), BriefFormat::Json, "x.json").unwrap_err();
        assert_matches!(err, BriefParseError::Invalid(_));
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(BriefFormat::from_extension("JSON"), Some(BriefFormat::Json));
        assert_eq!(BriefFormat::from_extension("yml"), Some(BriefFormat::Yaml));
        assert_eq!(BriefFormat::from_extension("txt"), None);
    }

    #[test]
    fn content_hash_is_stable_hex() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }
}
