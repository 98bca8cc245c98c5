// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Fixtures shared by the tests of this crate.

use dl_dyncfg::ConfigSet;
use dl_formula::Registry;
use dl_formula_parser::{ParseCache, ParseCacheMetrics};
use dl_ore::metrics::MetricsRegistry;
use dl_query::catalog::DatasetCatalog;
use dl_query::compiled::CompiledMultiQuery;
use dl_query::compiler::Compiler;
use dl_query::formalizer::make_query_spec;
use dl_query::legend::{make_legend, RawQuerySpec};

/// Orders, the cities they ship to and the regions of those cities.
pub fn catalog() -> DatasetCatalog {
    serde_json::from_str(
        r#"{
            "root_avatar_id": "orders",
            "avatars": [
                {"id": "orders", "table": "public.orders"},
                {"id": "cities", "table": "public.cities"},
                {"id": "regions", "table": "public.regions"}
            ],
            "relations": [
                {"left_avatar_id": "orders", "right_avatar_id": "cities", "join_type": "left",
                 "conditions": [{"left_column": "city_id", "right_column": "id"}]},
                {"left_avatar_id": "cities", "right_avatar_id": "regions", "join_type": "inner",
                 "conditions": [{"left_column": "region_id", "right_column": "id"}]}
            ],
            "fields": [
                {"id": "f1", "title": "Sales", "calc_mode": "direct", "avatar_id": "orders",
                 "column": "sales", "data_type": "FLOAT"},
                {"id": "f2", "title": "Day", "calc_mode": "direct", "avatar_id": "orders",
                 "column": "day", "data_type": "DATE"},
                {"id": "f3", "title": "City Id", "calc_mode": "direct", "avatar_id": "orders",
                 "column": "city_id", "data_type": "INTEGER"},
                {"id": "f4", "title": "City Key", "calc_mode": "direct", "avatar_id": "cities",
                 "column": "id", "data_type": "INTEGER"},
                {"id": "f5", "title": "City", "calc_mode": "direct", "avatar_id": "cities",
                 "column": "name", "data_type": "STRING"},
                {"id": "f6", "title": "Region Id", "calc_mode": "direct", "avatar_id": "cities",
                 "column": "region_id", "data_type": "INTEGER"},
                {"id": "f7", "title": "Region Key", "calc_mode": "direct", "avatar_id": "regions",
                 "column": "id", "data_type": "INTEGER"},
                {"id": "f8", "title": "Region", "calc_mode": "direct", "avatar_id": "regions",
                 "column": "name", "data_type": "STRING"},
                {"id": "f9", "title": "Created", "calc_mode": "direct", "avatar_id": "orders",
                 "column": "created", "data_type": "DATETIMETZ", "params": {"timezone": "Europe/Moscow"}},
                {"id": "f10", "title": "Running", "calc_mode": "formula",
                 "formula": "RSUM(SUM([Sales]))", "data_type": "FLOAT"}
            ]
        }"#,
    )
    .unwrap()
}

/// A request selecting `items`, each a `{"title", "role"}` object with
/// optional role parameters, as one block.
pub fn request(items: &str) -> RawQuerySpec {
    let items: Vec<serde_json::Value> = serde_json::from_str(items).unwrap();
    let mut ids = vec![];
    let items: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(i, mut item)| {
            let id = i + 1;
            ids.push(id);
            let title = item["title"].take();
            let object = item.as_object_mut().unwrap();
            object.remove("title");
            object.insert("id".into(), id.into());
            object.insert("field".into(), serde_json::json!({ "title": title }));
            item
        })
        .collect();
    serde_json::from_value(serde_json::json!({
        "items": items,
        "blocks": [{"block_id": 0, "legend_item_ids": ids}],
    }))
    .unwrap()
}

/// Every config the planning and execution layers read.
pub fn configs() -> ConfigSet {
    let configs = dl_formula_parser::all_dyncfgs(ConfigSet::default());
    let configs = dl_query::all_dyncfgs(configs);
    crate::all_dyncfgs(configs)
}

pub fn parse_cache() -> ParseCache {
    let configs = dl_formula_parser::all_dyncfgs(ConfigSet::default());
    ParseCache::new(&configs, ParseCacheMetrics::register_with(&MetricsRegistry::new()))
}

/// Compiles a request for `items` over `catalog`.
pub fn compile(catalog: &DatasetCatalog, items: &str) -> CompiledMultiQuery {
    let raw = request(items);
    let legend = make_legend(&raw, catalog).unwrap();
    let registry = Registry::builtin();
    let spec = make_query_spec(raw.single_block().unwrap(), &legend, catalog, &registry).unwrap();
    let cache = parse_cache();
    Compiler::new(catalog, &registry, &cache).compile(&spec).unwrap()
}
