//! The interpreter: one entry point from query text to streamed results.
//!
//! Pipeline: strip, resolve parameters, look up or compile a plan, execute
//! against a fresh frame, forward header/rows/summary. Compiled plans are
//! shared through the TTL-bounded plan cache; parse results through the AST
//! cache. Executing `CREATE INDEX` invalidates every cached plan so the next
//! compilation can use the new index.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::QueryFlags;
use crate::query::cache::{AstCache, CachedPlan, PlanCache};
use crate::query::context::{AuthHandler, ExecutionContext, Parameters, StreamRegistry};
use crate::query::errors::QueryError;
use crate::query::frame::Frame;
use crate::query::parser::Parser;
use crate::query::plan::physical::LogicalOperator;
use crate::query::plan::planner::make_plan;
use crate::query::privileges::required_privileges;
use crate::query::stream::QueryStream;
use crate::query::stripped::StrippedQuery;
use crate::query::symbols::SymbolGenerator;
use crate::query::value::TypedValue;
use crate::storage::GraphAccessor;
use crate::types::Result as StorageResult;

pub struct Interpreter {
    flags: QueryFlags,
    plan_cache: PlanCache,
    ast_cache: AstCache,
    auth: Option<Arc<dyn AuthHandler>>,
    streams: Option<Arc<dyn StreamRegistry>>,
}

impl Interpreter {
    /// Validates the flags and builds an interpreter. Flag validation errors
    /// abort startup; they are never deferred to query time.
    pub fn new(flags: QueryFlags) -> StorageResult<Self> {
        flags.validate()?;
        let ttl = Duration::from_secs(flags.query_plan_cache_ttl as u64);
        Ok(Self {
            flags,
            plan_cache: PlanCache::new(ttl),
            ast_cache: AstCache::new(),
            auth: None,
            streams: None,
        })
    }

    pub fn with_auth_handler(mut self, auth: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_stream_registry(mut self, streams: Arc<dyn StreamRegistry>) -> Self {
        self.streams = Some(streams);
        self
    }

    /// Runs one query against the accessor's transaction, forwarding header,
    /// rows and the summary to `stream`. On error nothing further is emitted
    /// and the transaction's disposition stays with the caller.
    pub fn interpret<S: QueryStream>(
        &self,
        query: &str,
        accessor: &GraphAccessor,
        stream: &mut S,
        params: &HashMap<String, TypedValue>,
        in_explicit_transaction: bool,
    ) -> Result<(), QueryError> {
        let frontend_timer = Instant::now();

        let stripped = StrippedQuery::new(query)?;

        // Positional parameters: extracted literals first, then the caller's
        // named bindings.
        let mut parameters = Parameters::default();
        for (position, value) in stripped.literals() {
            parameters.add(*position, value.clone());
        }
        for (position, name) in stripped.parameters() {
            let value = params
                .get(name)
                .ok_or_else(|| QueryError::UnprovidedParameter(name.clone()))?;
            parameters.add(*position, value.clone());
        }

        let cached_plan = if self.flags.query_plan_cache {
            self.plan_cache.lookup(stripped.hash())
        } else {
            None
        };
        let parsing_time = frontend_timer.elapsed();

        let planning_timer = Instant::now();
        let cached_plan = match cached_plan {
            Some(plan) => plan,
            None => {
                let mut ast_storage = match self.ast_cache.lookup(stripped.hash()) {
                    Some(cached) => (*cached).clone(),
                    None => {
                        let parsed = Parser::parse(&stripped)?;
                        (*self.ast_cache.insert(stripped.hash(), Arc::new(parsed))).clone()
                    }
                };
                let mut symbol_table = SymbolGenerator::run(&ast_storage)?;
                let (plan, cost) = make_plan(
                    &mut ast_storage,
                    &mut symbol_table,
                    accessor,
                    &self.flags,
                )?;
                let compiled = Arc::new(CachedPlan::new(plan, cost, symbol_table, ast_storage));
                if self.flags.query_plan_cache {
                    // Racing compilations are tolerated; the first insert wins
                    // and everyone executes the winner.
                    self.plan_cache.insert(stripped.hash(), compiled)
                } else {
                    compiled
                }
            }
        };
        let planning_time = planning_timer.elapsed();

        if let Some(auth) = &self.auth {
            auth.check(&required_privileges(&cached_plan.ast_storage().query))?;
        }

        let ctx = ExecutionContext {
            accessor,
            symbol_table: cached_plan.symbol_table().clone(),
            parameters,
            in_explicit_transaction,
            auth: self.auth.as_deref(),
            streams: self.streams.as_deref(),
        };

        let execution_timer = Instant::now();
        execute_plan(
            stream,
            cached_plan.plan(),
            &ctx,
            &stripped,
            cached_plan.ast_storage(),
        )?;
        let execution_time = execution_timer.elapsed();

        if accessor.is_index_created() {
            // New index: every cached plan may now be beatable, recompile.
            self.plan_cache.clear();
        }

        let mut summary = BTreeMap::new();
        summary.insert(
            "parsing_time".to_owned(),
            TypedValue::Float(parsing_time.as_secs_f64()),
        );
        summary.insert(
            "planning_time".to_owned(),
            TypedValue::Float(planning_time.as_secs_f64()),
        );
        summary.insert(
            "plan_execution_time".to_owned(),
            TypedValue::Float(execution_time.as_secs_f64()),
        );
        summary.insert(
            "cost_estimate".to_owned(),
            TypedValue::Float(cached_plan.cost()),
        );
        // Always "rw": the top operator cannot classify read-vs-write (a
        // MATCH DELETE RETURN query has Produce on top), so the summary keeps
        // the unclassified placeholder.
        summary.insert("type".to_owned(), TypedValue::from("rw"));
        stream.summary(summary)?;
        debug!(query, "query executed");
        Ok(())
    }

    /// Cached-plan count, exposed for cache instrumentation.
    pub fn plan_cache_len(&self) -> usize {
        self.plan_cache.len()
    }
}

fn execute_plan<S: QueryStream>(
    stream: &mut S,
    plan: &LogicalOperator,
    ctx: &ExecutionContext<'_>,
    stripped: &StrippedQuery,
    ast_storage: &crate::query::ast::AstStorage,
) -> Result<(), QueryError> {
    let mut frame = Frame::new(ctx.symbol_table.max_position());
    let output_symbols = plan.output_symbols();

    if !output_symbols.is_empty() {
        // RETURN-bearing query: stream rows out. Aliased and generated
        // symbols have no token position and keep their symbol name; the
        // rest show the user-written expression text.
        let header: Vec<String> = output_symbols
            .iter()
            .map(|symbol| {
                symbol
                    .token_position
                    .and_then(|position| stripped.named_expressions().get(&position).cloned())
                    .unwrap_or_else(|| symbol.name.clone())
            })
            .collect();
        stream.header(header)?;
        let mut cursor = plan.make_cursor(ast_storage);
        while cursor.pull(&mut frame, ctx)? {
            let values: Vec<TypedValue> = output_symbols
                .iter()
                .map(|symbol| frame[symbol].clone())
                .collect();
            stream.result(values)?;
        }
        return Ok(());
    }

    if plan.is_write_or_admin() {
        stream.header(Vec::new())?;
        let mut cursor = plan.make_cursor(ast_storage);
        while cursor.pull(&mut frame, ctx)? {}
        return Ok(());
    }

    Err(QueryError::runtime("unknown top level operator"))
}
