//! Source configuration model
//!
//! This module contains the typed representation of a source's crawl
//! configuration, the TOML loader, and the fail-fast validation pass.

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    CursorLocation, DependencySpec, EntitySpec, MaxValueSpec, PaginationSpec, RequestTemplate,
    ResponseFormat, SliceSpec, SourceConfig, StopRule, StrategyKind,
};
pub use validation::validate;
