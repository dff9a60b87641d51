//! Extraction engine
//!
//! This module contains the crawl side of the pipeline:
//! - Request building and template substitution
//! - Response parsing (JSON, Atom/XML)
//! - The five crawl strategies
//! - The engine that runs strategies and chains dependencies
//!
//! Strategies run sequentially within a source. Emitted items are delivered
//! to the sink per page and queued on an explicit notification queue; after
//! each strategy completes, the engine drains the queue, triggering any
//! strategy whose declared dependency matches an emitted item.

mod parser;
mod request;
mod strategy;

pub use parser::{parse_body, xml_to_value};
pub use request::{
    build_request, extract_items, inject_cursor, is_falsy, partial_format, path_get,
};
pub use strategy::{
    advance_cursor, cursor_fn, cursor_fn_exists, CursorFn, StrategyRunner, LOOP_ITERATION_CAP,
};

use crate::client::ApiClient;
use crate::config::SourceConfig;
use crate::state::StateStore;
use crate::Result;
use serde_json::Value;
use std::collections::VecDeque;

/// Sink receiving emitted items, one batch per fetched page
///
/// Implemented by the staging database; the engine never depends on what
/// the sink does with the rows.
pub trait ItemSink {
    fn load(&mut self, source_id: &str, entity: &str, items: &[Value]) -> Result<()>;
}

/// Shared mutable context for one extraction run
///
/// Owns the source's HTTP client (rate limiter and response cache are
/// shared across all strategies through it) and borrows the state store
/// and sink for the duration of the run.
pub struct ExtractContext<'a> {
    source_id: String,
    pub(crate) client: ApiClient,
    pub(crate) state: &'a mut dyn StateStore,
    sink: &'a mut dyn ItemSink,
    pending: VecDeque<(String, Value)>,
    pub(crate) debug: bool,
}

impl ExtractContext<'_> {
    /// Delivers a page of items to the sink and queues dependency
    /// notifications
    pub fn emit(&mut self, entity: &str, items: Vec<Value>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.sink.load(&self.source_id, entity, &items)?;
        for item in items {
            self.pending.push_back((entity.to_string(), item));
        }
        Ok(())
    }
}

/// Runs the extraction stage for one source
///
/// Strategies without dependencies start in declaration order; after each
/// one completes, pending items are drained through every runner so
/// dependent entities fetch with their bindings in scope. An unrecoverable
/// HTTP error aborts the whole stage.
///
/// # Arguments
///
/// * `config` - The validated source configuration
/// * `state` - Cursor state persistence
/// * `sink` - Destination for emitted items
pub async fn run_extraction<'a>(
    config: &SourceConfig,
    state: &'a mut dyn StateStore,
    sink: &'a mut dyn ItemSink,
) -> Result<()> {
    let client = ApiClient::new(config)?;
    let mut runners: Vec<StrategyRunner> = config
        .entities
        .iter()
        .map(|spec| StrategyRunner::new(&config.id, spec.clone()))
        .collect();

    let mut ctx = ExtractContext {
        source_id: config.id.clone(),
        client,
        state,
        sink,
        pending: VecDeque::new(),
        debug: config.debug,
    };

    for i in 0..runners.len() {
        tracing::info!("Run strategy: {}", runners[i].entity());
        runners[i].start(&mut ctx).await?;
        drain_pending(&mut runners, &mut ctx).await?;
    }

    Ok(())
}

/// Drains queued items, notifying every runner about each one
async fn drain_pending(
    runners: &mut [StrategyRunner],
    ctx: &mut ExtractContext<'_>,
) -> Result<()> {
    while let Some((entity, item)) = ctx.pending.pop_front() {
        for runner in runners.iter_mut() {
            runner.notify(&entity, &item, ctx).await?;
        }
    }
    Ok(())
}
