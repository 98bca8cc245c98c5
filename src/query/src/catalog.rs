// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The dataset a request is planned against.
//!
//! A dataset is a set of *avatars* (source tables or subqueries, each known
//! under a stable id), *relations* that say how avatars join to each other,
//! and *fields*. A field is either a direct reference to an avatar column or
//! a formula over other fields, which it names by title.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dl_repr::{DataType, DataTypeParams};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;

/// A source table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: String,
    /// The table name, qualified as the source database expects it.
    pub table: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

/// One `left.column = right.column` term of a relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left_column: String,
    pub right_column: String,
}

/// How `right_avatar_id` joins onto `left_avatar_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarRelation {
    pub left_avatar_id: String,
    pub right_avatar_id: String,
    pub join_type: JoinType,
    pub conditions: Vec<JoinCondition>,
}

/// How a field's value is computed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "calc_mode", rename_all = "snake_case")]
pub enum CalcMode {
    Direct { avatar_id: String, column: String },
    Formula { formula: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub calc: CalcMode,
    pub data_type: DataType,
    #[serde(default)]
    pub params: DataTypeParams,
}

/// A reference to a field as written in a request.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    Id(String),
    Title(String),
}

impl std::fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FieldSelector::Id(id) => write!(f, "id {}", id),
            FieldSelector::Title(title) => write!(f, "[{}]", title),
        }
    }
}

/// The fields, avatars and relations of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCatalog {
    pub root_avatar_id: String,
    pub avatars: Vec<Avatar>,
    #[serde(default)]
    pub relations: Vec<AvatarRelation>,
    pub fields: Vec<FieldDef>,
}

impl DatasetCatalog {
    pub fn field_by_id(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_title(&self, title: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.title == title)
    }

    pub fn resolve(&self, selector: &FieldSelector) -> Result<&FieldDef, PlanningError> {
        let found = match selector {
            FieldSelector::Id(id) => self.field_by_id(id),
            FieldSelector::Title(title) => self.field_by_title(title),
        };
        found.ok_or_else(|| PlanningError::UnknownField {
            field: selector.to_string(),
        })
    }

    pub fn avatar(&self, id: &str) -> Result<&Avatar, PlanningError> {
        self.avatars
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| PlanningError::UnknownAvatar {
                avatar_id: id.to_string(),
            })
    }

    /// The direct fields that read from `avatar_id`.
    pub fn avatar_fields<'a>(&'a self, avatar_id: &'a str) -> impl Iterator<Item = &'a FieldDef> {
        self.fields.iter().filter(move |f| {
            matches!(&f.calc, CalcMode::Direct { avatar_id: a, .. } if a == avatar_id)
        })
    }

    /// The type of `avatar_id.column`, as declared by the direct field that
    /// reads it.
    pub fn column_type(&self, avatar_id: &str, column: &str) -> Option<DataType> {
        self.avatar_fields(avatar_id)
            .find(|f| matches!(&f.calc, CalcMode::Direct { column: c, .. } if c == column))
            .map(|f| f.data_type)
    }

    /// Plans the joins that bring every avatar in `required` into scope.
    ///
    /// The result starts with the root avatar, which has no relation, and
    /// lists every other avatar after the avatar it joins onto, together
    /// with the relation that joins it. Only avatars that are required or
    /// lie on the path from the root to a required avatar are included.
    pub fn join_plan(
        &self,
        required: &BTreeSet<String>,
    ) -> Result<Vec<(&Avatar, Option<&AvatarRelation>)>, PlanningError> {
        // Breadth-first search over relations, remembering how each avatar
        // was first reached.
        let mut reached: BTreeMap<&str, Option<&AvatarRelation>> = BTreeMap::new();
        let mut order = vec![self.root_avatar_id.as_str()];
        reached.insert(&self.root_avatar_id, None);
        let mut queue = VecDeque::from([self.root_avatar_id.as_str()]);
        while let Some(avatar) = queue.pop_front() {
            for relation in self.relations.iter().filter(|r| r.left_avatar_id == avatar) {
                let next = relation.right_avatar_id.as_str();
                if !reached.contains_key(next) {
                    reached.insert(next, Some(relation));
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }

        let mut needed: BTreeSet<&str> = BTreeSet::from([self.root_avatar_id.as_str()]);
        for avatar in required {
            self.avatar(avatar)?;
            let mut current = avatar.as_str();
            loop {
                let via = reached
                    .get(current)
                    .ok_or_else(|| PlanningError::UnreachableAvatar {
                        avatar_id: avatar.clone(),
                    })?;
                needed.insert(current);
                match via {
                    Some(relation) => current = relation.left_avatar_id.as_str(),
                    None => break,
                }
            }
        }

        order
            .into_iter()
            .filter(|a| needed.contains(a))
            .map(|a| Ok((self.avatar(a)?, reached[a])))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn catalog() -> DatasetCatalog {
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
                    {"id": "f2", "title": "Region", "calc_mode": "direct", "avatar_id": "regions",
                     "column": "name", "data_type": "STRING"},
                    {"id": "f4", "title": "Day", "calc_mode": "direct", "avatar_id": "orders",
                     "column": "day", "data_type": "DATE"},
                    {"id": "f3", "title": "Double", "calc_mode": "formula",
                     "formula": "[Sales] * 2", "data_type": "FLOAT"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolve_fields() {
        let catalog = catalog();
        assert_eq!(catalog.resolve(&FieldSelector::Id("f1".into())).unwrap().title, "Sales");
        assert_eq!(
            catalog.resolve(&FieldSelector::Title("Double".into())).unwrap().id,
            "f3"
        );
        assert_eq!(
            catalog.resolve(&FieldSelector::Title("Nope".into())),
            Err(PlanningError::UnknownField {
                field: "[Nope]".into()
            })
        );
        assert_eq!(catalog.column_type("orders", "sales"), Some(DataType::Float));
    }

    #[test]
    fn join_plan_includes_intermediate_avatars() {
        let catalog = catalog();
        let plan = catalog
            .join_plan(&BTreeSet::from(["regions".to_string()]))
            .unwrap();
        let ids: Vec<_> = plan.iter().map(|(a, _)| a.id.as_str()).collect();
        assert_eq!(ids, ["orders", "cities", "regions"]);
        assert!(plan[0].1.is_none());
        assert_eq!(plan[1].1.unwrap().join_type, JoinType::Left);

        let plan = catalog.join_plan(&BTreeSet::new()).unwrap();
        assert_eq!(plan.len(), 1);
    }
}
