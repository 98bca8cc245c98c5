// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Formula abstract syntax tree.
//!
//! A [`Formula`] owns every node of its tree in a flat arena; nodes refer to
//! their children by [`NodeId`]. Formulas are immutable once built. Rewrites
//! (see [`Formula::rewrite`]) copy the nodes they keep into a fresh arena and
//! return a new formula, so a formula shared between a cache and a compiled
//! query is never changed behind either's back.
//!
//! A node may be referenced by more than one parent within a formula: a
//! comparison chain `a < b < c` desugars to `a < b AND b < c` with `b`
//! shared.

use std::fmt::{self, Write};

use chrono::{NaiveDate, NaiveDateTime};
use dl_ore::stack::maybe_grow;
use itertools::Itertools;

/// The index of a node within its formula's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The position of this node in the arena.
    pub fn index(&self) -> usize {
        usize::try_from(self.0).expect("u32 fits in usize")
    }
}

/// A literal value.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    GenericDatetime(NaiveDateTime),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::String(s) => {
                f.write_char('"')?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => f.write_char(c)?,
                    }
                }
                f.write_char('"')
            }
            Literal::Boolean(true) => f.write_str("TRUE"),
            Literal::Boolean(false) => f.write_str("FALSE"),
            Literal::Date(d) => write!(f, "#{}#", d.format("%Y-%m-%d")),
            Literal::Datetime(dt) => write!(f, "#{}#", dt.format("%Y-%m-%d %H:%M:%S")),
            Literal::GenericDatetime(dt) => write!(f, "##{}##", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// How a window function partitions its input.
#[derive(Clone, Debug, PartialEq)]
pub enum WindowGrouping {
    /// Over the whole result.
    Total,
    /// Partitioned by the listed dimensions.
    Within(Vec<NodeId>),
    /// Partitioned by every query dimension except the listed ones.
    Among(Vec<NodeId>),
}

/// A level-of-detail specifier of an aggregate call.
#[derive(Clone, Debug, PartialEq)]
pub enum LodSpecifier {
    Fixed(Vec<NodeId>),
    Include(Vec<NodeId>),
    Exclude(Vec<NodeId>),
}

/// One element of a call's `ORDER BY` clause.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderingItem {
    pub expr: NodeId,
    pub desc: bool,
}

/// A function call and the clauses that may trail its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncCall {
    /// The lower-cased function name.
    pub name: String,
    pub args: Vec<NodeId>,
    pub grouping: Option<WindowGrouping>,
    pub ordering: Vec<OrderingItem>,
    pub ignore_dimensions: Vec<NodeId>,
    /// The names of the fields listed in `BEFORE FILTER BY`.
    pub before_filter_by: Vec<String>,
    pub lod: Option<LodSpecifier>,
}

impl FuncCall {
    /// A plain call with no trailing clauses.
    pub fn plain(name: impl Into<String>, args: Vec<NodeId>) -> FuncCall {
        FuncCall {
            name: name.into(),
            args,
            grouping: None,
            ordering: vec![],
            ignore_dimensions: vec![],
            before_filter_by: vec![],
            lod: None,
        }
    }

    /// Every node the call refers to, arguments first, in a fixed order.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = self.args.clone();
        match &self.grouping {
            Some(WindowGrouping::Within(dims)) | Some(WindowGrouping::Among(dims)) => {
                out.extend(dims)
            }
            Some(WindowGrouping::Total) | None => {}
        }
        out.extend(self.ordering.iter().map(|o| o.expr));
        out.extend(&self.ignore_dimensions);
        match &self.lod {
            Some(LodSpecifier::Fixed(dims))
            | Some(LodSpecifier::Include(dims))
            | Some(LodSpecifier::Exclude(dims)) => out.extend(dims),
            None => {}
        }
        out
    }
}

/// The kinds of formula nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Literal(Literal),
    Null,
    /// A reference to a field by name.
    Field(String),
    FuncCall(FuncCall),
    /// A unary operator: `not`, `neg`, `isnull`, `istrue`, `isfalse`.
    Unary { name: String, expr: NodeId },
    /// A binary operator, named as in the operation registry.
    Binary {
        name: String,
        left: NodeId,
        right: NodeId,
    },
    /// `between` and `notbetween`.
    Ternary {
        name: String,
        first: NodeId,
        second: NodeId,
        third: NodeId,
    },
    /// `IF c THEN x ELSEIF ... ELSE y END`.
    IfBlock {
        if_list: Vec<(NodeId, NodeId)>,
        else_expr: NodeId,
    },
    /// `CASE e WHEN v THEN x ... ELSE y END`.
    CaseBlock {
        case_expr: NodeId,
        when_list: Vec<(NodeId, NodeId)>,
        else_expr: NodeId,
    },
    /// The parenthesized list on the right-hand side of `IN`.
    ExprList(Vec<NodeId>),
    Parenthesized(NodeId),
}

impl NodeKind {
    /// The direct children of a node, in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Literal(_) | NodeKind::Null | NodeKind::Field(_) => vec![],
            NodeKind::FuncCall(call) => call.children(),
            NodeKind::Unary { expr, .. } => vec![*expr],
            NodeKind::Binary { left, right, .. } => vec![*left, *right],
            NodeKind::Ternary {
                first,
                second,
                third,
                ..
            } => vec![*first, *second, *third],
            NodeKind::IfBlock { if_list, else_expr } => if_list
                .iter()
                .flat_map(|(c, e)| [*c, *e])
                .chain([*else_expr])
                .collect(),
            NodeKind::CaseBlock {
                case_expr,
                when_list,
                else_expr,
            } => [*case_expr]
                .into_iter()
                .chain(when_list.iter().flat_map(|(v, e)| [*v, *e]))
                .chain([*else_expr])
                .collect(),
            NodeKind::ExprList(items) => items.clone(),
            NodeKind::Parenthesized(expr) => vec![*expr],
        }
    }

    /// Returns a copy of this node with every child id passed through `f`.
    pub fn map_children<F>(&self, mut f: F) -> NodeKind
    where
        F: FnMut(NodeId) -> NodeId,
    {
        let mut map_all = |ids: &[NodeId]| ids.iter().map(|id| f(*id)).collect::<Vec<_>>();
        match self {
            NodeKind::Literal(_) | NodeKind::Null | NodeKind::Field(_) => self.clone(),
            NodeKind::FuncCall(call) => {
                let args = map_all(&call.args);
                let grouping = call.grouping.as_ref().map(|g| match g {
                    WindowGrouping::Total => WindowGrouping::Total,
                    WindowGrouping::Within(dims) => WindowGrouping::Within(map_all(dims)),
                    WindowGrouping::Among(dims) => WindowGrouping::Among(map_all(dims)),
                });
                let ordering = call
                    .ordering
                    .iter()
                    .map(|o| OrderingItem {
                        expr: map_all(&[o.expr])[0],
                        desc: o.desc,
                    })
                    .collect();
                let ignore_dimensions = map_all(&call.ignore_dimensions);
                let lod = call.lod.as_ref().map(|l| match l {
                    LodSpecifier::Fixed(dims) => LodSpecifier::Fixed(map_all(dims)),
                    LodSpecifier::Include(dims) => LodSpecifier::Include(map_all(dims)),
                    LodSpecifier::Exclude(dims) => LodSpecifier::Exclude(map_all(dims)),
                });
                NodeKind::FuncCall(FuncCall {
                    name: call.name.clone(),
                    args,
                    grouping,
                    ordering,
                    ignore_dimensions,
                    before_filter_by: call.before_filter_by.clone(),
                    lod,
                })
            }
            NodeKind::Unary { name, expr } => NodeKind::Unary {
                name: name.clone(),
                expr: map_all(&[*expr])[0],
            },
            NodeKind::Binary { name, left, right } => {
                let mapped = map_all(&[*left, *right]);
                NodeKind::Binary {
                    name: name.clone(),
                    left: mapped[0],
                    right: mapped[1],
                }
            }
            NodeKind::Ternary {
                name,
                first,
                second,
                third,
            } => {
                let mapped = map_all(&[*first, *second, *third]);
                NodeKind::Ternary {
                    name: name.clone(),
                    first: mapped[0],
                    second: mapped[1],
                    third: mapped[2],
                }
            }
            NodeKind::IfBlock { if_list, else_expr } => NodeKind::IfBlock {
                if_list: if_list
                    .iter()
                    .map(|(c, e)| {
                        let mapped = map_all(&[*c, *e]);
                        (mapped[0], mapped[1])
                    })
                    .collect(),
                else_expr: map_all(&[*else_expr])[0],
            },
            NodeKind::CaseBlock {
                case_expr,
                when_list,
                else_expr,
            } => NodeKind::CaseBlock {
                case_expr: map_all(&[*case_expr])[0],
                when_list: when_list
                    .iter()
                    .map(|(v, e)| {
                        let mapped = map_all(&[*v, *e]);
                        (mapped[0], mapped[1])
                    })
                    .collect(),
                else_expr: map_all(&[*else_expr])[0],
            },
            NodeKind::ExprList(items) => NodeKind::ExprList(map_all(items)),
            NodeKind::Parenthesized(expr) => NodeKind::Parenthesized(map_all(&[*expr])[0]),
        }
    }
}

/// A node and the 1-based character position of its first character in the
/// formula text.
///
/// Nodes built programmatically have position 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub position: usize,
}

/// A structural identity of a subtree.
///
/// Two subtrees have equal extracts if they are equal up to node positions,
/// parentheses and node sharing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Extract(String);

impl fmt::Display for Extract {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed formula.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Formula {
    /// A formula consisting of one field reference.
    pub fn field(name: impl Into<String>) -> Formula {
        let mut builder = FormulaBuilder::new();
        let root = builder.field(name);
        builder.finish(root)
    }

    /// A formula consisting of one literal.
    pub fn literal(lit: Literal) -> Formula {
        let mut builder = FormulaBuilder::new();
        let root = builder.literal(lit);
        builder.finish(root)
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Looks up a node by id.
    ///
    /// Panics if the id does not belong to this formula.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Shorthand for `self.node(id).kind`.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    /// The number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Reports whether the arena is empty, which never happens for a
    /// finished formula.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Strips any parentheses around `id`.
    pub fn skip_parens(&self, mut id: NodeId) -> NodeId {
        while let NodeKind::Parenthesized(inner) = self.kind(id) {
            id = *inner;
        }
        id
    }

    /// Visits every node reachable from `id` in pre-order. Shared nodes are
    /// visited once per parent.
    pub fn visit_pre<F>(&self, id: NodeId, f: &mut F)
    where
        F: FnMut(NodeId, &NodeKind),
    {
        maybe_grow(|| {
            let kind = self.kind(id);
            f(id, kind);
            for child in kind.children() {
                self.visit_pre(child, f);
            }
        })
    }

    /// The names of every field referenced from `id`, in order of first
    /// appearance and without duplicates.
    pub fn field_names(&self, id: NodeId) -> Vec<String> {
        let mut names: Vec<String> = vec![];
        self.visit_pre(id, &mut |_, kind| {
            if let NodeKind::Field(name) = kind {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    /// The structural identity of the subtree rooted at `id`.
    pub fn extract(&self, id: NodeId) -> Extract {
        let mut out = String::new();
        self.write_extract(id, &mut out);
        Extract(out)
    }

    fn write_extract(&self, id: NodeId, out: &mut String) {
        maybe_grow(|| self.write_extract_node(id, out))
    }

    fn write_extract_node(&self, id: NodeId, out: &mut String) {
        let write_list = |out: &mut String, ids: &[NodeId]| {
            out.push('(');
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                self.write_extract(*id, out);
            }
            out.push(')');
        };
        match self.kind(id) {
            NodeKind::Literal(lit) => {
                let _ = write!(out, "(lit {})", lit);
            }
            NodeKind::Null => out.push_str("(null)"),
            NodeKind::Field(name) => {
                let _ = write!(out, "(field {:?})", name);
            }
            NodeKind::FuncCall(call) => {
                let _ = write!(out, "(call {} ", call.name);
                write_list(out, &call.args);
                match &call.grouping {
                    None => {}
                    Some(WindowGrouping::Total) => out.push_str(" total"),
                    Some(WindowGrouping::Within(dims)) => {
                        out.push_str(" within");
                        write_list(out, dims);
                    }
                    Some(WindowGrouping::Among(dims)) => {
                        out.push_str(" among");
                        write_list(out, dims);
                    }
                }
                if !call.ordering.is_empty() {
                    out.push_str(" order");
                    for item in &call.ordering {
                        out.push(' ');
                        self.write_extract(item.expr, out);
                        out.push_str(if item.desc { " desc" } else { " asc" });
                    }
                }
                if !call.ignore_dimensions.is_empty() {
                    out.push_str(" ignore");
                    write_list(out, &call.ignore_dimensions);
                }
                if !call.before_filter_by.is_empty() {
                    let _ = write!(out, " bfb{:?}", call.before_filter_by);
                }
                match &call.lod {
                    None => {}
                    Some(LodSpecifier::Fixed(dims)) => {
                        out.push_str(" fixed");
                        write_list(out, dims);
                    }
                    Some(LodSpecifier::Include(dims)) => {
                        out.push_str(" include");
                        write_list(out, dims);
                    }
                    Some(LodSpecifier::Exclude(dims)) => {
                        out.push_str(" exclude");
                        write_list(out, dims);
                    }
                }
                out.push(')');
            }
            NodeKind::Unary { name, expr } => {
                let _ = write!(out, "({} ", name);
                self.write_extract(*expr, out);
                out.push(')');
            }
            NodeKind::Binary { name, left, right } => {
                let _ = write!(out, "({} ", name);
                self.write_extract(*left, out);
                out.push(' ');
                self.write_extract(*right, out);
                out.push(')');
            }
            NodeKind::Ternary {
                name,
                first,
                second,
                third,
            } => {
                let _ = write!(out, "({} ", name);
                write_list(out, &[*first, *second, *third]);
                out.push(')');
            }
            NodeKind::IfBlock { if_list, else_expr } => {
                out.push_str("(if");
                for (cond, expr) in if_list {
                    out.push(' ');
                    write_list(out, &[*cond, *expr]);
                }
                out.push_str(" else ");
                self.write_extract(*else_expr, out);
                out.push(')');
            }
            NodeKind::CaseBlock {
                case_expr,
                when_list,
                else_expr,
            } => {
                out.push_str("(case ");
                self.write_extract(*case_expr, out);
                for (val, expr) in when_list {
                    out.push(' ');
                    write_list(out, &[*val, *expr]);
                }
                out.push_str(" else ");
                self.write_extract(*else_expr, out);
                out.push(')');
            }
            NodeKind::ExprList(items) => write_list(out, items),
            NodeKind::Parenthesized(inner) => self.write_extract(*inner, out),
        }
    }

    /// Rebuilds the subtree at `root` top-down, letting `f` substitute any
    /// node with a node it builds into the new arena.
    ///
    /// When `f` returns `Some(id)` for a node, `id` (which must belong to the
    /// builder passed to `f`) takes that node's place and its children are not
    /// visited. Returns `None` if `f` never substituted anything, in which
    /// case callers should keep using `self`.
    pub fn rewrite<F>(&self, f: &mut F) -> Option<Formula>
    where
        F: FnMut(&Formula, NodeId, &mut FormulaBuilder) -> Option<NodeId>,
    {
        let mut builder = FormulaBuilder::new();
        let mut changed = false;
        let root = self.rewrite_node(self.root, f, &mut builder, &mut changed);
        if changed {
            Some(builder.finish(root))
        } else {
            None
        }
    }

    fn rewrite_node<F>(
        &self,
        id: NodeId,
        f: &mut F,
        builder: &mut FormulaBuilder,
        changed: &mut bool,
    ) -> NodeId
    where
        F: FnMut(&Formula, NodeId, &mut FormulaBuilder) -> Option<NodeId>,
    {
        maybe_grow(|| {
            if let Some(replacement) = f(self, id, builder) {
                *changed = true;
                return replacement;
            }
            let node = self.node(id);
            let kind = node
                .kind
                .map_children(|child| self.rewrite_node(child, f, builder, changed));
            builder.push(kind, node.position)
        })
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.extract(self.root))
    }
}

/// Builds a [`Formula`] bottom-up.
#[derive(Debug, Default)]
pub struct FormulaBuilder {
    nodes: Vec<Node>,
}

impl FormulaBuilder {
    /// Creates an empty builder.
    pub fn new() -> FormulaBuilder {
        FormulaBuilder { nodes: vec![] }
    }

    /// Adds a node whose children have already been added.
    pub fn push(&mut self, kind: NodeKind, position: usize) -> NodeId {
        debug_assert!(kind.children().iter().all(|c| c.index() < self.nodes.len()));
        let id = NodeId(u32::try_from(self.nodes.len()).expect("formula too large"));
        self.nodes.push(Node { kind, position });
        id
    }

    /// Looks up a node added earlier.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// Adds a field reference.
    pub fn field(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeKind::Field(name.into()), 0)
    }

    /// Adds a literal.
    pub fn literal(&mut self, lit: Literal) -> NodeId {
        self.push(NodeKind::Literal(lit), 0)
    }

    /// Adds a `NULL`.
    pub fn null(&mut self) -> NodeId {
        self.push(NodeKind::Null, 0)
    }

    /// Adds a plain function call.
    pub fn call(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::FuncCall(FuncCall::plain(name, args)), 0)
    }

    /// Adds a binary operator.
    pub fn binary(&mut self, name: &str, left: NodeId, right: NodeId) -> NodeId {
        self.push(
            NodeKind::Binary {
                name: name.into(),
                left,
                right,
            },
            0,
        )
    }

    /// Adds a unary operator.
    pub fn unary(&mut self, name: &str, expr: NodeId) -> NodeId {
        self.push(
            NodeKind::Unary {
                name: name.into(),
                expr,
            },
            0,
        )
    }

    /// Copies the subtree of `other` rooted at `id` into this builder.
    pub fn import(&mut self, other: &Formula, id: NodeId) -> NodeId {
        maybe_grow(|| {
            let node = other.node(id);
            let kind = node.kind.map_children(|child| self.import(other, child));
            self.push(kind, node.position)
        })
    }

    /// Finishes the formula with the given root.
    pub fn finish(self, root: NodeId) -> Formula {
        assert!(root.index() < self.nodes.len(), "root must be built");
        Formula {
            nodes: self.nodes,
            root,
        }
    }
}

/// Displays the function names called anywhere in a formula, for logging.
pub fn called_functions(formula: &Formula) -> String {
    let mut names = vec![];
    formula.visit_pre(formula.root(), &mut |_, kind| {
        if let NodeKind::FuncCall(call) = kind {
            names.push(call.name.clone());
        }
    });
    names.into_iter().unique().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_of_field(name: &str) -> Formula {
        let mut builder = FormulaBuilder::new();
        let field = builder.field(name);
        let paren = builder.push(NodeKind::Parenthesized(field), 5);
        let call = builder.call("sum", vec![paren]);
        builder.finish(call)
    }

    #[test]
    fn extract_ignores_parens_and_positions() {
        let with_parens = sum_of_field("x");
        let mut builder = FormulaBuilder::new();
        let field = builder.push(NodeKind::Field("x".into()), 7);
        let call = builder.call("sum", vec![field]);
        let plain = builder.finish(call);
        assert_eq!(with_parens.extract(with_parens.root()), plain.extract(plain.root()));
        assert_eq!(plain.to_string(), "(call sum ((field \"x\")))");
    }

    #[test]
    fn rewrite_without_match_returns_none() {
        let formula = sum_of_field("x");
        let out = formula.rewrite(&mut |_, _, _| None);
        assert!(out.is_none());
    }

    #[test]
    fn rewrite_replaces_subtree() {
        let formula = sum_of_field("x");
        let out = formula
            .rewrite(&mut |f, id, b| match f.kind(id) {
                NodeKind::Field(_) => Some(b.literal(Literal::Integer(1))),
                _ => None,
            })
            .unwrap();
        assert_eq!(out.to_string(), "(call sum ((lit 1)))");
        // The input is untouched.
        assert_eq!(formula.field_names(formula.root()), vec!["x".to_string()]);
    }

    #[test]
    fn import_copies_subtree() {
        let formula = sum_of_field("x");
        let mut builder = FormulaBuilder::new();
        let imported = builder.import(&formula, formula.root());
        let one = builder.literal(Literal::Integer(1));
        let root = builder.binary("+", imported, one);
        let combined = builder.finish(root);
        assert_eq!(combined.to_string(), "(+ (call sum ((field \"x\"))) (lit 1))");
        assert_eq!(called_functions(&combined), "sum");
    }
}
