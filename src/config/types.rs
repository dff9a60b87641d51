use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for one source
///
/// Placeholders in request templates are expected to be resolved from
/// pipeline parameters before the core sees this structure; the core only
/// substitutes its own bindings (cursors, dependency params, slice dates).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Source identifier, used to key staging rows and cursor state
    pub id: String,

    /// URL prefix applied to every relative request URL
    pub host: String,

    /// Headers sent with every request (auth tokens live here)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Global rate limit for this source, in requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Directory for the on-disk response cache; disabled when unset
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Debug mode truncates unbounded crawls after a few iterations
    #[serde(default)]
    pub debug: bool,

    /// Entity crawl specifications
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
}

fn default_rate_limit() -> u32 {
    5
}

/// Crawl specification for one entity
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntitySpec {
    /// Entity name items are emitted under
    pub name: String,

    /// Crawl strategy variant
    pub strategy: StrategyKind,

    /// Response body format
    #[serde(default)]
    pub format: ResponseFormat,

    /// Request template
    pub request: RequestTemplate,

    /// Dotted path to the result list in the response (List/Listing/Slicing)
    #[serde(default)]
    pub key: Option<String>,

    /// Pagination specification (Listing/Slicing)
    #[serde(default)]
    pub pagination: Option<PaginationSpec>,

    /// Date slice specification (Slicing)
    #[serde(default)]
    pub slice: Option<SliceSpec>,

    /// Upstream dependencies that trigger this entity's fetch
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// Maximum-value lookup (Looping)
    #[serde(default)]
    pub max_value: Option<MaxValueSpec>,

    /// Payload fields forming the deduplication key.
    ///
    /// One field uses its value directly, several are digested together,
    /// and none falls back to the content hash.
    #[serde(default)]
    pub dedup_keys: Vec<String>,
}

/// Closed set of crawl strategy variants
///
/// Unknown strategy strings fail at deserialization time, so dispatch never
/// sees an unhandled variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StrategyKind {
    DirectFetch,
    List,
    Looping,
    Listing,
    Slicing,
}

/// Response body formats the client knows how to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Atom,
    Xml,
}

/// Request template with named `{placeholder}` substitution points
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,

    /// URL template, relative to the source host unless absolute
    pub url: String,

    /// Query parameter templates
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// JSON body field templates
    #[serde(default)]
    pub body: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Where the pagination cursor is injected into a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorLocation {
    Query,
    Url,
    Body,
}

/// Pagination specification for Listing/Slicing strategies
///
/// The cursor advance rule is chosen in priority order: named cursor
/// function, response-path reference, fixed step, result-count fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationSpec {
    pub location: CursorLocation,

    /// Cursor field name (query param or body field); `Url` location uses
    /// the `{cursor}` placeholder in the URL template instead
    #[serde(default)]
    pub param: Option<String>,

    /// Initial cursor value for a fresh crawl
    #[serde(default)]
    pub start: Option<serde_json::Value>,

    /// Named cursor-extraction function from the closed registry
    #[serde(default)]
    pub ref_fn: Option<String>,

    /// Dotted response path holding the next cursor
    #[serde(default)]
    pub ref_path: Option<String>,

    /// Fixed cursor increment per page
    #[serde(default)]
    pub step: Option<i64>,

    /// Optional stop predicate evaluated against each response
    #[serde(default)]
    pub stop: Option<StopRule>,
}

/// Named stop policy: stops when the value at `path` equals `equals`,
/// or (with no `equals`) when it is falsy or absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StopRule {
    pub path: String,
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
}

/// Date slice specification for the Slicing strategy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SliceSpec {
    /// strftime-style format for `{from_date}`/`{to_date}` substitution
    pub date_format: String,

    /// Lower bound; defaults to the earliest representable date
    #[serde(default)]
    pub from: Option<chrono::NaiveDate>,

    /// Upper bound; defaults to the latest representable date
    #[serde(default)]
    pub to: Option<chrono::NaiveDate>,
}

/// Declares that this entity refetches whenever an upstream entity emits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencySpec {
    /// Upstream entity name
    pub entity: String,

    /// Field read from the upstream item
    pub field: String,

    /// Local parameter name the field value is bound to
    pub param: String,
}

/// Lookup request for the Looping strategy's maximum value
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaxValueSpec {
    pub url: String,

    /// Dotted path to the integer in the lookup response; the whole body
    /// must be an integer when unset
    #[serde(default)]
    pub path: Option<String>,
}

impl SourceConfig {
    /// Looks up the entity spec with the given name
    pub fn entity(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }
}
