//! Crawl strategy variants
//!
//! One runner drives all five strategies over a closed enum; the variant is
//! validated at config load, so dispatch never sees an unknown strategy.
//! Strategies emit items through the extraction context and persist their
//! cursor after every successful page.

use crate::config::{EntitySpec, PaginationSpec, StopRule, StrategyKind};
use crate::extract::parser::parse_body;
use crate::extract::request::{
    build_request, extract_items, inject_cursor, is_falsy, partial_format, path_get,
};
use crate::extract::ExtractContext;
use crate::state::{state_key, StateMap};
use crate::{ConfigError, Result, TributaryError};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Hard safety bound for the Looping strategy
pub const LOOP_ITERATION_CAP: u32 = 1000;

/// Pages/iterations fetched per strategy in debug mode
const DEBUG_PAGE_CAP: usize = 3;

/// Retries for a page that came back with zero results
const EMPTY_PAGE_RETRIES: u32 = 3;

const EMPTY_PAGE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Named cursor-extraction function over (response, page results)
pub type CursorFn = fn(&Value, &[Value]) -> Option<Value>;

/// Resolves a cursor function from the closed registry
///
/// This registry is the reserved extension hook for pagination schemes the
/// declarative advance rules cannot express; entries are code, never
/// config-supplied expressions.
pub fn cursor_fn(name: &str) -> Option<CursorFn> {
    match name {
        "last-item-id" => Some(last_item_id),
        _ => None,
    }
}

/// Whether a cursor function name is registered (used by config validation)
pub fn cursor_fn_exists(name: &str) -> bool {
    cursor_fn(name).is_some()
}

/// Cursor = `id` field of the last item on the page
fn last_item_id(_response: &Value, results: &[Value]) -> Option<Value> {
    results.last().and_then(|item| item.get("id")).cloned()
}

/// Advances the pagination cursor after a successful page
///
/// Priority order: named cursor function, response-path reference, fixed
/// step, result-count fallback.
pub fn advance_cursor(
    pagination: &PaginationSpec,
    current: Option<&Value>,
    response: &Value,
    results: &[Value],
) -> Option<Value> {
    if let Some(name) = &pagination.ref_fn {
        if let Some(f) = cursor_fn(name) {
            return f(response, results);
        }
    }
    if let Some(path) = &pagination.ref_path {
        return path_get(response, path).cloned();
    }
    let step = pagination.step.unwrap_or(results.len() as i64);
    let base = current.and_then(Value::as_i64).unwrap_or(0);
    Some(Value::from(base + step))
}

fn stop_triggered(stop: &StopRule, response: &Value) -> bool {
    match (&stop.equals, path_get(response, &stop.path)) {
        (Some(expected), Some(actual)) => expected == actual,
        (Some(_), None) => false,
        (None, Some(actual)) => is_falsy(actual),
        (None, None) => true,
    }
}

/// Drives one entity's crawl strategy
///
/// Owns the entity's cursor state exclusively for the duration of a run;
/// state is reloaded at `start` and persisted after every page.
pub struct StrategyRunner {
    source_id: String,
    spec: EntitySpec,
    params: BTreeMap<String, Value>,
    state: StateMap,
}

impl StrategyRunner {
    pub fn new(source_id: &str, spec: EntitySpec) -> Self {
        Self {
            source_id: source_id.to_string(),
            spec,
            params: BTreeMap::new(),
            state: StateMap::new(),
        }
    }

    /// Entity name this runner emits under
    pub fn entity(&self) -> &str {
        &self.spec.name
    }

    fn key(&self) -> String {
        state_key(&self.source_id, &self.spec.name)
    }

    /// Loads persisted state, then begins fetching unless this entity
    /// waits on dependencies
    pub async fn start(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        self.state = ctx.state.load(&self.key())?;
        if !self.spec.dependencies.is_empty() {
            tracing::debug!("Entity '{}' waits for dependency triggers", self.spec.name);
            return Ok(());
        }
        self.run(ctx).await
    }

    /// Reacts to a new item observed for another entity
    ///
    /// On a dependency match the named field is bound as a request
    /// parameter and the strategy's fetch re-runs with that binding in
    /// scope (not the top-level `start`).
    pub async fn notify(
        &mut self,
        entity: &str,
        item: &Value,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<()> {
        let matching: Vec<(String, String)> = self
            .spec
            .dependencies
            .iter()
            .filter(|dep| dep.entity == entity)
            .map(|dep| (dep.field.clone(), dep.param.clone()))
            .collect();

        for (field, param) in matching {
            match item.get(&field) {
                Some(value) if !value.is_null() => {
                    self.params.insert(param, value.clone());
                    self.run(ctx).await?;
                }
                _ => {
                    // Upstream payloads occasionally omit the field; the
                    // item itself is already staged, only this trigger is
                    // skipped
                    tracing::warn!(
                        "Item from '{}' missing dependency field '{}' for '{}'",
                        entity,
                        field,
                        self.spec.name
                    );
                }
            }
        }
        Ok(())
    }

    async fn run(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        match self.spec.strategy {
            StrategyKind::DirectFetch => self.run_direct(ctx).await,
            StrategyKind::List => self.run_list(ctx).await,
            StrategyKind::Looping => self.run_looping(ctx).await,
            StrategyKind::Listing => self.run_listing(ctx).await,
            StrategyKind::Slicing => self.run_slicing(ctx).await,
        }
    }

    /// Merges bound params into each item and hands the batch to the engine
    fn emit(&self, ctx: &mut ExtractContext<'_>, items: Vec<Value>) -> Result<()> {
        let mut merged = Vec::with_capacity(items.len());
        for mut item in items {
            if let Value::Object(map) = &mut item {
                for (k, v) in &self.params {
                    map.insert(k.clone(), v.clone());
                }
            }
            merged.push(item);
        }
        ctx.emit(&self.spec.name, merged)
    }

    fn key_path(&self) -> Result<String> {
        self.spec.key.clone().ok_or_else(|| {
            ConfigError::Validation(format!(
                "entity '{}' has no response key path",
                self.spec.name
            ))
            .into()
        })
    }

    // ===== DirectFetch =====

    async fn run_direct(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        let attrs = build_request(&self.spec.request, &self.params);
        let body = ctx.client.fetch(&attrs).await?;
        let parsed = parse_body(self.spec.format, &body)?;
        self.emit(ctx, vec![parsed])
    }

    // ===== List =====

    async fn run_list(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        let key = self.key_path()?;
        let attrs = build_request(&self.spec.request, &self.params);
        let body = ctx.client.fetch(&attrs).await?;
        let parsed = parse_body(self.spec.format, &body)?;

        let results = path_get(&parsed, &key)
            .map(extract_items)
            .ok_or_else(|| TributaryError::MissingField {
                entity: self.spec.name.clone(),
                path: key,
            })?;
        self.emit(ctx, results)
    }

    // ===== Looping =====

    async fn run_looping(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        let max_value = self.fetch_max_value(ctx).await?;
        tracing::debug!("Entity '{}' max_value: {}", self.spec.name, max_value);

        for (ind, value) in (1..=max_value).rev().enumerate() {
            if ctx.debug && ind >= DEBUG_PAGE_CAP {
                break;
            }
            if ind as u32 >= LOOP_ITERATION_CAP {
                return Err(TributaryError::IterationCap {
                    entity: self.spec.name.clone(),
                    limit: LOOP_ITERATION_CAP,
                });
            }

            let mut params = self.params.clone();
            params.insert("value".to_string(), Value::from(value));
            let attrs = build_request(&self.spec.request, &params);
            let body = ctx.client.fetch(&attrs).await?;
            let parsed = parse_body(self.spec.format, &body)?;
            self.emit(ctx, vec![parsed])?;
        }
        Ok(())
    }

    async fn fetch_max_value(&mut self, ctx: &mut ExtractContext<'_>) -> Result<i64> {
        let lookup = self.spec.max_value.clone().ok_or_else(|| {
            ConfigError::Validation(format!(
                "entity '{}' has no max-value lookup",
                self.spec.name
            ))
        })?;

        let attrs = crate::client::RequestAttributes {
            method: "GET".to_string(),
            url: partial_format(&lookup.url, &self.params),
            ..Default::default()
        };
        let body = ctx.client.fetch(&attrs).await?;
        let parsed = parse_body(self.spec.format, &body)?;

        let value = match &lookup.path {
            Some(path) => path_get(&parsed, path).cloned(),
            None => Some(parsed),
        };
        value
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| TributaryError::MissingField {
                entity: self.spec.name.clone(),
                path: lookup.path.unwrap_or_else(|| ".".to_string()),
            })
    }

    // ===== Listing =====

    async fn run_listing(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        let pagination = self.spec.pagination.clone().ok_or_else(|| {
            ConfigError::Validation(format!("entity '{}' has no pagination", self.spec.name))
        })?;
        let key = self.key_path()?;

        // Resume from the persisted cursor, else the configured start
        let mut cursor: Option<Value> = self
            .state
            .get("cursor")
            .filter(|v| !is_falsy(v))
            .cloned()
            .or_else(|| pagination.start.clone());

        let mut pages: usize = 0;
        loop {
            if ctx.debug && pages >= DEBUG_PAGE_CAP {
                break;
            }

            let (response, results) = self
                .fetch_page(ctx, &pagination, &key, cursor.as_ref())
                .await?;

            if results.is_empty() {
                tracing::debug!("No results for '{}', stopping", self.spec.name);
                break;
            }
            self.emit(ctx, results.clone())?;

            let next = advance_cursor(&pagination, cursor.as_ref(), &response, &results);
            self.state.insert(
                "cursor".to_string(),
                next.clone().unwrap_or(Value::Null),
            );
            ctx.state.save(&self.key(), &self.state)?;
            pages += 1;

            if let Some(stop) = &pagination.stop {
                if stop_triggered(stop, &response) {
                    tracing::debug!("Stop predicate for '{}' matched", self.spec.name);
                    break;
                }
            }

            match next {
                Some(value) if !is_falsy(&value) => cursor = Some(value),
                _ => break,
            }
        }
        Ok(())
    }

    /// Fetches one page, retrying zero-result responses with backoff
    ///
    /// Retries bypass the cache read; a cached empty page would defeat the
    /// retry entirely.
    async fn fetch_page(
        &mut self,
        ctx: &mut ExtractContext<'_>,
        pagination: &PaginationSpec,
        key: &str,
        cursor: Option<&Value>,
    ) -> Result<(Value, Vec<Value>)> {
        let mut attempt: u32 = 0;
        let mut delay = EMPTY_PAGE_RETRY_DELAY;

        loop {
            let mut attrs = build_request(&self.spec.request, &self.params);
            if let Some(cursor) = cursor {
                inject_cursor(&mut attrs, pagination, cursor);
            }

            let body = if attempt == 0 {
                ctx.client.fetch(&attrs).await?
            } else {
                ctx.client.fetch_fresh(&attrs).await?
            };
            let parsed = parse_body(self.spec.format, &body)?;

            let results = path_get(&parsed, key)
                .map(extract_items)
                .ok_or_else(|| TributaryError::MissingField {
                    entity: self.spec.name.clone(),
                    path: key.to_string(),
                })?;

            if !results.is_empty() || attempt >= EMPTY_PAGE_RETRIES {
                return Ok((parsed, results));
            }

            attempt += 1;
            tracing::debug!(
                "Zero results for '{}', retry {}/{}",
                self.spec.name,
                attempt,
                EMPTY_PAGE_RETRIES
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    // ===== Slicing =====

    async fn run_slicing(&mut self, ctx: &mut ExtractContext<'_>) -> Result<()> {
        let slice = self.spec.slice.clone().ok_or_else(|| {
            ConfigError::Validation(format!("entity '{}' has no slice spec", self.spec.name))
        })?;

        let from = slice
            .from
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1, 1, 1).expect("valid date"));
        let to = slice
            .to
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(9999, 12, 31).expect("valid date"));

        self.params.insert(
            "from_date".to_string(),
            Value::String(from.format(&slice.date_format).to_string()),
        );
        self.params.insert(
            "to_date".to_string(),
            Value::String(to.format(&slice.date_format).to_string()),
        );

        self.run_listing(ctx).await
    }
}
