use crate::config::types::{
    CursorLocation, EntitySpec, PaginationSpec, SourceConfig, StrategyKind,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

const KNOWN_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Validates the entire source configuration
///
/// All structural errors surface here, at load time; the extraction engine
/// assumes a validated config and never re-checks strategy requirements.
pub fn validate(config: &SourceConfig) -> Result<(), ConfigError> {
    validate_identifier("source id", &config.id)?;

    if !config.host.is_empty() {
        Url::parse(&config.host)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid host '{}': {}", config.host, e)))?;
    }

    if config.rate_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit must be >= 1, got {}",
            config.rate_limit
        )));
    }

    let mut names = HashSet::new();
    for entity in &config.entities {
        validate_identifier("entity name", &entity.name)?;
        if !names.insert(entity.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate entity name '{}'",
                entity.name
            )));
        }
        validate_entity(entity)?;
    }

    // Dependencies must reference a declared entity
    for entity in &config.entities {
        for dep in &entity.dependencies {
            if !names.contains(dep.entity.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "entity '{}' depends on undeclared entity '{}'",
                    entity.name, dep.entity
                )));
            }
            if dep.param.is_empty() || dep.field.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}' has a dependency with an empty field or param",
                    entity.name
                )));
            }
        }
    }

    Ok(())
}

/// Source ids and entity names become table-name segments; keep them to a
/// safe identifier alphabet
fn validate_identifier(what: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", what)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must contain only alphanumeric characters, '_' or '-'",
            what, value
        )));
    }
    Ok(())
}

fn validate_entity(entity: &EntitySpec) -> Result<(), ConfigError> {
    let method = entity.request.method.to_uppercase();
    if !KNOWN_METHODS.contains(&method.as_str()) {
        return Err(ConfigError::Validation(format!(
            "entity '{}': unknown HTTP method '{}'",
            entity.name, entity.request.method
        )));
    }

    if entity.request.url.is_empty() {
        return Err(ConfigError::Validation(format!(
            "entity '{}': request url cannot be empty",
            entity.name
        )));
    }

    match entity.strategy {
        StrategyKind::DirectFetch => Ok(()),

        StrategyKind::List => {
            require_key(entity)?;
            Ok(())
        }

        StrategyKind::Looping => {
            if entity.max_value.is_none() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': Looping requires a max-value lookup",
                    entity.name
                )));
            }
            if !entity.request.url.contains("{value}") {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': Looping request url must contain a {{value}} placeholder",
                    entity.name
                )));
            }
            Ok(())
        }

        StrategyKind::Listing => {
            require_key(entity)?;
            let pagination = require_pagination(entity)?;
            validate_pagination(entity, pagination)
        }

        StrategyKind::Slicing => {
            require_key(entity)?;
            let pagination = require_pagination(entity)?;
            validate_pagination(entity, pagination)?;

            let slice = entity.slice.as_ref().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "entity '{}': Slicing requires a slice specification",
                    entity.name
                ))
            })?;
            if slice.date_format.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': slice date-format cannot be empty",
                    entity.name
                )));
            }
            Ok(())
        }
    }
}

fn require_key(entity: &EntitySpec) -> Result<(), ConfigError> {
    if entity.key.is_none() {
        return Err(ConfigError::Validation(format!(
            "entity '{}': strategy {:?} requires a response key path",
            entity.name, entity.strategy
        )));
    }
    Ok(())
}

fn require_pagination(entity: &EntitySpec) -> Result<&PaginationSpec, ConfigError> {
    entity.pagination.as_ref().ok_or_else(|| {
        ConfigError::Validation(format!(
            "entity '{}': strategy {:?} requires a pagination specification",
            entity.name, entity.strategy
        ))
    })
}

fn validate_pagination(entity: &EntitySpec, pagination: &PaginationSpec) -> Result<(), ConfigError> {
    match pagination.location {
        CursorLocation::Query | CursorLocation::Body => {
            if pagination.param.is_none() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': {:?} pagination requires a param name",
                    entity.name, pagination.location
                )));
            }
        }
        CursorLocation::Url => {
            if !entity.request.url.contains("{cursor}") {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': url pagination requires a {{cursor}} placeholder in the request url",
                    entity.name
                )));
            }
            if pagination.start.is_none() {
                return Err(ConfigError::Validation(format!(
                    "entity '{}': url pagination requires a start cursor",
                    entity.name
                )));
            }
        }
    }

    if let Some(name) = &pagination.ref_fn {
        if !crate::extract::cursor_fn_exists(name) {
            return Err(ConfigError::UnknownCursorFn(name.clone()));
        }
    }

    Ok(())
}
