// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Serving of whole data requests.

use dl_dyncfg::ConfigSet;
use dl_formula::Registry;
use dl_formula_parser::ParseCache;
use dl_query::catalog::DatasetCatalog;
use dl_query::compiler::Compiler;
use dl_query::formalizer::make_query_spec;
use dl_query::legend::{make_legend, RawQuerySpec};
use dl_query::mutator::{mutate, ProcessorType};
use tracing::debug;

use crate::error::{Error, ExecutionError};
use crate::planner::ExecutionPlanner;
use crate::postprocess::ColumnTypeInfo;
use crate::processor::Processor;
use crate::result::ResultBlock;

/// Everything needed to serve requests against one dataset.
#[derive(Debug)]
pub struct RequestContext<'a> {
    pub registry: &'a Registry,
    pub catalog: &'a DatasetCatalog,
    pub parse_cache: &'a ParseCache,
    pub configs: &'a ConfigSet,
    pub processor: &'a Processor,
    pub processor_type: ProcessorType,
}

impl RequestContext<'_> {
    /// Compiles, plans and runs the single block of `raw`.
    pub async fn serve(&self, raw: &RawQuerySpec) -> Result<ResultBlock, Error> {
        let legend = make_legend(raw, self.catalog)?;
        let block = raw.single_block()?;
        let spec = make_query_spec(block, &legend, self.catalog, self.registry)?;
        let mq = Compiler::new(self.catalog, self.registry, self.parse_cache).compile(&spec)?;

        let dialect = self.processor.dialect();
        let mq = mutate(mq, dialect, self.processor_type, self.registry, self.configs)?;
        let plan = ExecutionPlanner {
            registry: self.registry,
            catalog: self.catalog,
            dialect,
            configs: self.configs,
        }
        .plan(&mq)?;
        debug!(
            block_id = spec.block_id,
            operations = plan.operations.len(),
            "planned request"
        );

        let columns = spec
            .select
            .iter()
            .map(|item| {
                let legend_item = legend.get(item.legend_item_id).ok_or_else(|| {
                    ExecutionError::Internal(format!("no legend item {}", item.legend_item_id))
                })?;
                let params = self
                    .catalog
                    .field_by_id(&legend_item.field_id)
                    .map(|f| f.params.clone())
                    .unwrap_or_default();
                Ok(ColumnTypeInfo {
                    data_type: legend_item.data_type,
                    params,
                })
            })
            .collect::<Result<Vec<_>, ExecutionError>>()?;

        let stream = self.processor.run(&plan).await?;
        Ok(ResultBlock::from_stream(spec.block_id, stream, &columns).await?)
    }
}
