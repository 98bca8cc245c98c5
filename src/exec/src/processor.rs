// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Runs execution plans.

use std::sync::Arc;

use dl_dyncfg::ConfigSet;
use dl_repr::DialectCombo;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::connection::{CompengConnection, SourceConnection};
use crate::context::{OpExecutionContext, OpOutput};
use crate::error::ExecutionError;
use crate::executor::executor_for;
use crate::ops::{ExecutionPlan, Operation};
use crate::stream::{DataStream, StreamRows};
use crate::EXEC_MAX_CONCURRENT_OPS;

/// Runs the operations of a plan against a source database and the
/// computation engine.
///
/// Operations whose inputs are ready run concurrently, up to
/// [`EXEC_MAX_CONCURRENT_OPS`] at a time. Scratch tables are dropped once
/// the plan finishes, whether or not it succeeds, and in the background if
/// the run is abandoned.
#[derive(Debug)]
pub struct Processor {
    source: Arc<dyn SourceConnection>,
    compeng: Arc<dyn CompengConnection>,
    max_concurrent_ops: usize,
}

type Running<'a> = BoxFuture<'a, (&'a Operation, Result<OpOutput, ExecutionError>)>;

impl Processor {
    pub fn new(
        configs: &ConfigSet,
        source: Arc<dyn SourceConnection>,
        compeng: Arc<dyn CompengConnection>,
    ) -> Processor {
        Processor {
            source,
            compeng,
            max_concurrent_ops: EXEC_MAX_CONCURRENT_OPS.get(configs).max(1),
        }
    }

    /// The dialect of the source database.
    pub fn dialect(&self) -> DialectCombo {
        self.source.dialect()
    }

    /// Runs `plan`, returning its result stream.
    ///
    /// The result is materialized when the plan used scratch tables, as
    /// those are gone by the time this returns.
    pub async fn run(&self, plan: &ExecutionPlan) -> Result<DataStream, ExecutionError> {
        let mut scratch = ScratchGuard {
            ctx: OpExecutionContext::new(&plan.operations),
            compeng: Arc::clone(&self.compeng),
            explicitly_dropped: false,
        };
        let result = self.run_operations(plan, &mut scratch.ctx).await;
        let result = match result {
            Ok(mut stream) if !scratch.ctx.scratch_tables().is_empty() => {
                let rows = std::mem::replace(&mut stream.rows, StreamRows::Materialized(vec![]));
                match rows {
                    StreamRows::Materialized(rows) => {
                        stream.rows = StreamRows::Materialized(rows);
                        Ok(stream)
                    }
                    StreamRows::Lazy(chunks) => {
                        let lazy = DataStream::lazy(stream.id.clone(), vec![], chunks);
                        lazy.collect().await.map(|rows| {
                            stream.rows = StreamRows::Materialized(rows);
                            stream
                        })
                    }
                }
            }
            result => result,
        };
        scratch.drop_tables().await;
        match &result {
            Ok(stream) => info!(stream_id = %stream.id, "plan finished"),
            Err(e) => warn!(error = %e, "plan failed"),
        }
        result
    }

    async fn run_operations(
        &self,
        plan: &ExecutionPlan,
        ctx: &mut OpExecutionContext,
    ) -> Result<DataStream, ExecutionError> {
        let mut pending: Vec<&Operation> = plan.operations.iter().collect();
        let mut running: FuturesUnordered<Running<'_>> = FuturesUnordered::new();
        loop {
            let mut i = 0;
            while i < pending.len() && running.len() < self.max_concurrent_ops {
                let ready = pending[i].inputs().iter().all(|id| ctx.is_available(id));
                if !ready {
                    i += 1;
                    continue;
                }
                let op = pending.remove(i);
                let inputs = ctx.prepare(op)?;
                let executor = executor_for(op.kind(), &self.source, &self.compeng);
                debug!(op = op.output(), kind = %op.kind(), "starting operation");
                running.push(
                    async move {
                        let output = executor.execute(op, inputs).await;
                        (op, output)
                    }
                    .boxed(),
                );
            }
            match running.next().await {
                Some((op, output)) => ctx.finish(op.output(), output)?,
                None => break,
            }
        }
        if let Some(op) = pending.first() {
            let missing = op
                .inputs()
                .into_iter()
                .find(|id| !ctx.is_available(id))
                .unwrap_or_else(|| op.output());
            return Err(ExecutionError::MissingStream {
                stream_id: missing.to_string(),
            });
        }
        ctx.take_stream(&plan.result_stream_id)
    }

}

/// The context of a running plan, and with it the scratch tables the
/// plan's uploads created.
struct ScratchGuard {
    ctx: OpExecutionContext,
    compeng: Arc<dyn CompengConnection>,
    explicitly_dropped: bool,
}

impl ScratchGuard {
    async fn drop_tables(&mut self) {
        drop_tables(&*self.compeng, self.ctx.scratch_tables()).await;
        self.explicitly_dropped = true;
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.explicitly_dropped || self.ctx.scratch_tables().is_empty() {
            return;
        }
        let tables = self.ctx.scratch_tables().to_vec();
        let handle = match Handle::try_current() {
            Ok(x) => x,
            Err(_) => {
                warn!(?tables, "plan abandoned outside a runtime, leaving its scratch tables");
                return;
            }
        };
        debug!(?tables, "plan abandoned, dropping its scratch tables");
        let compeng = Arc::clone(&self.compeng);
        let span = debug_span!("drop::scratch_tables");
        let _ = handle.spawn(
            async move {
                drop_tables(&*compeng, &tables).await;
            }
            .instrument(span),
        );
    }
}

async fn drop_tables(compeng: &dyn CompengConnection, tables: &[String]) {
    for table in tables {
        if let Err(e) = compeng.drop_table(table).await {
            warn!(%table, error = %e, "failed to drop scratch table");
        }
    }
}
