// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pure formula rewrites.
//!
//! Every rewrite returns the input `Arc` itself when nothing in the formula
//! matched, so callers can detect a no-op with [`Arc::ptr_eq`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{Extract, Formula, FormulaBuilder, NodeId, NodeKind};

/// Renames field references according to `mapping`.
///
/// Fields whose names are not keys of `mapping` are left alone. Field names
/// listed in `BEFORE FILTER BY` clauses are renamed too.
pub fn remap_formula_obj_fields(
    formula: &Arc<Formula>,
    mapping: &BTreeMap<String, String>,
) -> Arc<Formula> {
    let rewritten = formula.rewrite(&mut |f, id, builder| match f.kind(id) {
        NodeKind::Field(name) => mapping.get(name).map(|new| builder.field(new.clone())),
        NodeKind::FuncCall(call)
            if call.before_filter_by.iter().any(|n| mapping.contains_key(n)) =>
        {
            let mut kind = f
                .kind(id)
                .map_children(|child| import_remapped(f, child, mapping, builder));
            if let NodeKind::FuncCall(call) = &mut kind {
                for name in &mut call.before_filter_by {
                    if let Some(new) = mapping.get(name) {
                        *name = new.clone();
                    }
                }
            }
            Some(builder.push(kind, f.node(id).position))
        }
        _ => None,
    });
    match rewritten {
        Some(formula) => Arc::new(formula),
        None => Arc::clone(formula),
    }
}

fn import_remapped(
    formula: &Formula,
    id: NodeId,
    mapping: &BTreeMap<String, String>,
    builder: &mut FormulaBuilder,
) -> NodeId {
    let sub = {
        let mut b = FormulaBuilder::new();
        let root = b.import(formula, id);
        Arc::new(b.finish(root))
    };
    let remapped = remap_formula_obj_fields(&sub, mapping);
    builder.import(&remapped, remapped.root())
}

/// Replaces every subtree whose extract is a key of `replacements` with the
/// corresponding formula.
///
/// Matching is top-down: once a subtree is replaced, nothing inside it is
/// examined.
pub fn replace_nodes(
    formula: &Arc<Formula>,
    replacements: &BTreeMap<Extract, Arc<Formula>>,
) -> Arc<Formula> {
    if replacements.is_empty() {
        return Arc::clone(formula);
    }
    let rewritten = formula.rewrite(&mut |f, id, builder| {
        if matches!(f.kind(id), NodeKind::Parenthesized(_)) {
            return None;
        }
        replacements
            .get(&f.extract(id))
            .map(|replacement| builder.import(replacement, replacement.root()))
    });
    match rewritten {
        Some(formula) => Arc::new(formula),
        None => Arc::clone(formula),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;

    fn arc(text: &str) -> Arc<Formula> {
        Arc::new(parse_formula(text).unwrap())
    }

    #[test]
    fn remap_fields() {
        let formula = arc("SUM([a]) + [b]");
        let mapping = BTreeMap::from([("a".to_string(), "x".to_string())]);
        let remapped = remap_formula_obj_fields(&formula, &mapping);
        assert_eq!(remapped.to_string(), "(+ (call sum ((field \"x\"))) (field \"b\"))");
        assert_eq!(formula.to_string(), "(+ (call sum ((field \"a\"))) (field \"b\"))");
    }

    #[test]
    fn remap_without_match_is_pointer_equal() {
        let formula = arc("SUM([a]) + [b]");
        let mapping = BTreeMap::from([("zzz".to_string(), "x".to_string())]);
        let remapped = remap_formula_obj_fields(&formula, &mapping);
        assert!(Arc::ptr_eq(&formula, &remapped));
    }

    #[test]
    fn remap_before_filter_by() {
        let formula = arc("RSUM(SUM([a]) BEFORE FILTER BY [a])");
        let mapping = BTreeMap::from([("a".to_string(), "x".to_string())]);
        let remapped = remap_formula_obj_fields(&formula, &mapping);
        assert_eq!(
            remapped.to_string(),
            "(call rsum ((call sum ((field \"x\")))) bfb[\"x\"])"
        );
    }

    #[test]
    fn replace_subtrees() {
        let formula = arc("(SUM([a])) / COUNT([b])");
        let sum = parse_formula("SUM([a])").unwrap();
        let replacements = BTreeMap::from([(sum.extract(sum.root()), Arc::new(Formula::field("s")))]);
        let replaced = replace_nodes(&formula, &replacements);
        assert_eq!(
            replaced.to_string(),
            "(/ (field \"s\") (call count ((field \"b\"))))"
        );
        let untouched = replace_nodes(&formula, &BTreeMap::new());
        assert!(Arc::ptr_eq(&formula, &untouched));
    }
}
