// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A registry of every dl_dyncfg.

use dl_dyncfg::ConfigSet;

/// Returns a new ConfigSet containing every `Config` of the formula compiler
/// and the query planner.
///
/// Each time this is called, it returns a new ConfigSet disconnected from any
/// others. It may be cloned and passed around, and updates to any of these
/// copies will be reflected in the clones. Values from a `ConfigSet` may be
/// copied to a disconnected `ConfigSet` via `ConfigUpdates`.
pub fn all_dyncfgs() -> ConfigSet {
    let mut configs = ConfigSet::default();
    configs = dl_formula_parser::all_dyncfgs(configs);
    configs = dl_query::all_dyncfgs(configs);
    configs = dl_exec::all_dyncfgs(configs);
    configs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let configs = all_dyncfgs();
        let mut names: Vec<_> = configs.entries().map(|e| e.name()).collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
        assert!(names.contains(&"enable_local_joins"));
        assert!(names.contains(&"formula_parse_cache_size"));
    }
}
