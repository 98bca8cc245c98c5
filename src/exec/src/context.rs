// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The state of a plan while it runs.

use std::collections::BTreeMap;

use dl_query::render::ColumnInfo;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::executor::OpExecutor;
use crate::ops::Operation;
use crate::stream::{DataStream, LocalKeyRepresentation, StreamMeta};

/// Where an operation is in its lifecycle.
///
/// Operations move forward only: `Queued`, `Running`, then
/// `ProducingStream` while their output waits to be consumed, and finally
/// `Done` or `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpState {
    Queued,
    Running,
    ProducingStream,
    Done,
    Failed,
}

/// A scratch table filled by an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedTable {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub key: LocalKeyRepresentation,
    pub meta: Vec<StreamMeta>,
}

/// What an operation reads.
#[derive(Debug, Default)]
pub struct OpInputs {
    pub streams: Vec<DataStream>,
    pub tables: Vec<UploadedTable>,
}

impl OpInputs {
    /// The next stream, in the order the operation lists its inputs.
    pub fn next_stream(&mut self) -> Result<DataStream, ExecutionError> {
        if self.streams.is_empty() {
            return Err(ExecutionError::Internal("operation is missing an input stream".into()));
        }
        Ok(self.streams.remove(0))
    }
}

/// What an operation produced.
#[derive(Debug)]
pub enum OpOutput {
    Stream(DataStream),
    Table { dest: String, table: UploadedTable },
}

/// The streams and tables of a running plan, and the state of each of its
/// operations.
#[derive(Debug, Default)]
pub struct OpExecutionContext {
    streams: BTreeMap<String, DataStream>,
    tables: BTreeMap<String, UploadedTable>,
    /// Every scratch table an upload was started for, in start order.
    scratch_tables: Vec<String>,
    states: Vec<(String, OpState)>,
}

impl OpExecutionContext {
    pub fn new(operations: &[Operation]) -> OpExecutionContext {
        OpExecutionContext {
            states: operations
                .iter()
                .map(|op| (op.output().to_string(), OpState::Queued))
                .collect(),
            ..Default::default()
        }
    }

    pub fn state(&self, dest: &str) -> Option<OpState> {
        self.states
            .iter()
            .find(|(id, _)| id == dest)
            .map(|(_, state)| *state)
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, OpState)> {
        self.states.iter().map(|(id, state)| (id.as_str(), *state))
    }

    /// Moves the operation producing `dest` to `state`.
    pub fn transition(&mut self, dest: &str, state: OpState) {
        match self.states.iter_mut().find(|(id, _)| id == dest) {
            Some((_, current)) => {
                debug!(op = dest, from = ?current, to = ?state, "operation state change");
                *current = state;
            }
            None => warn!(op = dest, to = ?state, "state change of an unknown operation"),
        }
    }

    pub fn add_stream(&mut self, stream: DataStream) {
        self.streams.insert(stream.id.clone(), stream);
    }

    /// Whether the stream or table `id` has been produced and not yet
    /// consumed.
    pub fn is_available(&self, id: &str) -> bool {
        self.streams.contains_key(id) || self.tables.contains_key(id)
    }

    /// Removes the stream `id`, which its producer is then done with.
    pub fn take_stream(&mut self, id: &str) -> Result<DataStream, ExecutionError> {
        let stream = self
            .streams
            .remove(id)
            .ok_or_else(|| ExecutionError::MissingStream {
                stream_id: id.to_string(),
            })?;
        if self.state(id) == Some(OpState::ProducingStream) {
            self.transition(id, OpState::Done);
        }
        Ok(stream)
    }

    pub fn table(&self, id: &str) -> Result<&UploadedTable, ExecutionError> {
        self.tables
            .get(id)
            .ok_or_else(|| ExecutionError::MissingStream {
                stream_id: id.to_string(),
            })
    }

    /// Records that `table_name` may exist on the computation engine from
    /// now on.
    pub fn register_scratch_table(&mut self, table_name: &str) {
        if !self.scratch_tables.iter().any(|t| t == table_name) {
            self.scratch_tables.push(table_name.to_string());
        }
    }

    pub fn scratch_tables(&self) -> &[String] {
        &self.scratch_tables
    }

    /// Takes what `op` reads out of the context and marks it running.
    ///
    /// Streams are consumed; tables stay available to other operations.
    pub fn prepare(&mut self, op: &Operation) -> Result<OpInputs, ExecutionError> {
        let mut inputs = OpInputs::default();
        for id in op.inputs() {
            if self.tables.contains_key(id) {
                inputs.tables.push(self.table(id)?.clone());
            } else {
                inputs.streams.push(self.take_stream(id)?);
            }
        }
        if let Operation::Upload { table_name, .. } = op {
            self.register_scratch_table(table_name);
        }
        self.transition(op.output(), OpState::Running);
        Ok(inputs)
    }

    /// Records the outcome of the operation producing `dest`.
    pub fn finish(
        &mut self,
        dest: &str,
        output: Result<OpOutput, ExecutionError>,
    ) -> Result<(), ExecutionError> {
        match output {
            Ok(OpOutput::Stream(stream)) => {
                self.transition(dest, OpState::ProducingStream);
                self.add_stream(stream);
                Ok(())
            }
            Ok(OpOutput::Table { dest, table }) => {
                self.transition(&dest, OpState::Done);
                self.tables.insert(dest, table);
                Ok(())
            }
            Err(e) => {
                warn!(op = dest, error = %e, "operation failed");
                self.transition(dest, OpState::Failed);
                Err(e)
            }
        }
    }
}

/// Runs `op` with the inputs found in `ctx`, registering its output there.
pub async fn execute_operation(
    op: &Operation,
    ctx: &mut OpExecutionContext,
    executor: &dyn OpExecutor,
) -> Result<(), ExecutionError> {
    let inputs = ctx.prepare(op)?;
    let output = executor.execute(op, inputs).await;
    ctx.finish(op.output(), output)
}
