// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The logical type of a formula, field or result column.
///
/// Every type that can appear in a literal has a `Const*` refinement. A
/// constant type only exists at compile time: it marks an expression whose
/// value is known before the query runs, and it is accepted anywhere its
/// non-constant counterpart is.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// A 64-bit signed integer.
    Integer,
    /// A 64-bit float.
    Float,
    /// A boolean.
    Boolean,
    /// A string.
    String,
    /// A calendar date.
    Date,
    /// A timestamp without a timezone.
    Datetime,
    /// A timestamp without a timezone whose source representation is
    /// dialect dependent.
    #[serde(rename = "GENERICDATETIME")]
    GenericDatetime,
    /// A timestamp with a timezone. The timezone itself is kept in
    /// [`DataTypeParams`].
    #[serde(rename = "DATETIMETZ")]
    DatetimeTz,
    /// A `[lat, lon]` pair.
    Geopoint,
    /// A list of rings of `[lat, lon]` pairs.
    Geopolygon,
    /// A UUID.
    Uuid,
    /// Serialized rich text.
    Markup,
    /// An array of strings that represents a path in a hierarchy.
    TreeStr,
    /// An array of integers.
    ArrayInt,
    /// An array of floats.
    ArrayFloat,
    /// An array of strings.
    ArrayStr,
    /// The type of the `NULL` literal.
    Null,
    /// A column type the dataset layer could not map.
    Unsupported,
    /// A constant [`DataType::Integer`].
    ConstInteger,
    /// A constant [`DataType::Float`].
    ConstFloat,
    /// A constant [`DataType::Boolean`].
    ConstBoolean,
    /// A constant [`DataType::String`].
    ConstString,
    /// A constant [`DataType::Date`].
    ConstDate,
    /// A constant [`DataType::Datetime`].
    ConstDatetime,
    /// A constant [`DataType::GenericDatetime`].
    #[serde(rename = "CONST_GENERICDATETIME")]
    ConstGenericDatetime,
    /// A constant [`DataType::DatetimeTz`].
    #[serde(rename = "CONST_DATETIMETZ")]
    ConstDatetimeTz,
    /// A constant [`DataType::Geopoint`].
    ConstGeopoint,
    /// A constant [`DataType::Geopolygon`].
    ConstGeopolygon,
    /// A constant [`DataType::Uuid`].
    ConstUuid,
    /// A constant [`DataType::Markup`].
    ConstMarkup,
    /// A constant [`DataType::TreeStr`].
    ConstTreeStr,
    /// A constant [`DataType::ArrayInt`].
    ConstArrayInt,
    /// A constant [`DataType::ArrayFloat`].
    ConstArrayFloat,
    /// A constant [`DataType::ArrayStr`].
    ConstArrayStr,
}

impl DataType {
    /// Reports whether this is a `Const*` type.
    pub fn is_const(&self) -> bool {
        self.non_const() != *self
    }

    /// Strips the constant refinement, if any.
    pub fn non_const(&self) -> DataType {
        use DataType::*;
        match self {
            ConstInteger => Integer,
            ConstFloat => Float,
            ConstBoolean => Boolean,
            ConstString => String,
            ConstDate => Date,
            ConstDatetime => Datetime,
            ConstGenericDatetime => GenericDatetime,
            ConstDatetimeTz => DatetimeTz,
            ConstGeopoint => Geopoint,
            ConstGeopolygon => Geopolygon,
            ConstUuid => Uuid,
            ConstMarkup => Markup,
            ConstTreeStr => TreeStr,
            ConstArrayInt => ArrayInt,
            ConstArrayFloat => ArrayFloat,
            ConstArrayStr => ArrayStr,
            other => *other,
        }
    }

    /// Returns the constant refinement of this type.
    ///
    /// [`DataType::Null`] and [`DataType::Unsupported`] have no refinement
    /// and are returned unchanged.
    pub fn as_const(&self) -> DataType {
        use DataType::*;
        match self.non_const() {
            Integer => ConstInteger,
            Float => ConstFloat,
            Boolean => ConstBoolean,
            String => ConstString,
            Date => ConstDate,
            Datetime => ConstDatetime,
            GenericDatetime => ConstGenericDatetime,
            DatetimeTz => ConstDatetimeTz,
            Geopoint => ConstGeopoint,
            Geopolygon => ConstGeopolygon,
            Uuid => ConstUuid,
            Markup => ConstMarkup,
            TreeStr => ConstTreeStr,
            ArrayInt => ConstArrayInt,
            ArrayFloat => ConstArrayFloat,
            ArrayStr => ConstArrayStr,
            other => other,
        }
    }

    /// Reports whether values of this type are arrays.
    pub fn is_array(&self) -> bool {
        matches!(
            self.non_const(),
            DataType::ArrayInt | DataType::ArrayFloat | DataType::ArrayStr | DataType::TreeStr
        )
    }

    /// Reports whether values of this type are numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self.non_const(), DataType::Integer | DataType::Float)
    }

    /// Reports whether values of this type are dates or timestamps.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self.non_const(),
            DataType::Date | DataType::Datetime | DataType::GenericDatetime | DataType::DatetimeTz
        )
    }

    /// The element type of an array type.
    pub fn array_item(&self) -> Option<DataType> {
        match self.non_const() {
            DataType::ArrayInt => Some(DataType::Integer),
            DataType::ArrayFloat => Some(DataType::Float),
            DataType::ArrayStr | DataType::TreeStr => Some(DataType::String),
            _ => None,
        }
    }

    /// The type a value of this type may be implicitly widened to, if any.
    fn upcast(&self) -> Option<DataType> {
        match self {
            DataType::Boolean => Some(DataType::Integer),
            DataType::Integer => Some(DataType::Float),
            DataType::Date => Some(DataType::Datetime),
            DataType::Datetime => Some(DataType::GenericDatetime),
            DataType::DatetimeTz => Some(DataType::GenericDatetime),
            DataType::TreeStr => Some(DataType::ArrayStr),
            _ => None,
        }
    }

    /// Reports whether a value of this type is accepted where `target` is
    /// expected, following implicit upcasts.
    ///
    /// A constant type is accepted wherever its non-constant counterpart is,
    /// but a constant `target` only accepts constants. `NULL` is accepted
    /// anywhere.
    pub fn casts_to(&self, target: &DataType) -> bool {
        if *self == DataType::Null {
            return true;
        }
        if target.is_const() && !self.is_const() {
            return false;
        }
        let target = target.non_const();
        let mut current = Some(self.non_const());
        while let Some(ty) = current {
            if ty == target {
                return true;
            }
            current = ty.upcast();
        }
        false
    }

    /// The narrowest type both `self` and `other` can be implicitly cast to.
    ///
    /// The result is constant only if both inputs are.
    pub fn common_supertype(&self, other: &DataType) -> Option<DataType> {
        let both_const = (self.is_const() || *self == DataType::Null)
            && (other.is_const() || *other == DataType::Null);
        let refine = |ty: DataType| if both_const { ty.as_const() } else { ty };
        if *self == DataType::Null {
            return Some(refine(other.non_const()));
        }
        if *other == DataType::Null {
            return Some(refine(self.non_const()));
        }
        let mut current = Some(self.non_const());
        while let Some(ty) = current {
            if other.casts_to(&ty) {
                return Some(refine(ty));
            }
            current = ty.upcast();
        }
        None
    }

    /// The upper-case name of this type, as shown to users.
    pub fn name(&self) -> &'static str {
        use DataType::*;
        match self {
            Integer => "INTEGER",
            Float => "FLOAT",
            Boolean => "BOOLEAN",
            String => "STRING",
            Date => "DATE",
            Datetime => "DATETIME",
            GenericDatetime => "GENERICDATETIME",
            DatetimeTz => "DATETIMETZ",
            Geopoint => "GEOPOINT",
            Geopolygon => "GEOPOLYGON",
            Uuid => "UUID",
            Markup => "MARKUP",
            TreeStr => "TREE_STR",
            ArrayInt => "ARRAY_INT",
            ArrayFloat => "ARRAY_FLOAT",
            ArrayStr => "ARRAY_STR",
            Null => "NULL",
            Unsupported => "UNSUPPORTED",
            ConstInteger => "CONST_INTEGER",
            ConstFloat => "CONST_FLOAT",
            ConstBoolean => "CONST_BOOLEAN",
            ConstString => "CONST_STRING",
            ConstDate => "CONST_DATE",
            ConstDatetime => "CONST_DATETIME",
            ConstGenericDatetime => "CONST_GENERICDATETIME",
            ConstDatetimeTz => "CONST_DATETIMETZ",
            ConstGeopoint => "CONST_GEOPOINT",
            ConstGeopolygon => "CONST_GEOPOLYGON",
            ConstUuid => "CONST_UUID",
            ConstMarkup => "CONST_MARKUP",
            ConstTreeStr => "CONST_TREE_STR",
            ConstArrayInt => "CONST_ARRAY_INT",
            ConstArrayFloat => "CONST_ARRAY_FLOAT",
            ConstArrayStr => "CONST_ARRAY_STR",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters that refine a [`DataType`] without changing how formulas
/// type-check.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DataTypeParams {
    /// The IANA timezone name of a [`DataType::DatetimeTz`] value.
    pub timezone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_refinement() {
        for ty in [DataType::Integer, DataType::TreeStr, DataType::DatetimeTz] {
            assert!(!ty.is_const());
            assert!(ty.as_const().is_const());
            assert_eq!(ty.as_const().non_const(), ty);
            assert!(ty.as_const().casts_to(&ty));
            assert!(!ty.casts_to(&ty.as_const()));
        }
        assert_eq!(DataType::Null.as_const(), DataType::Null);
        assert!(!DataType::Null.is_const());
    }

    #[test]
    fn implicit_upcasts() {
        struct TestCase {
            from: DataType,
            to: DataType,
            ok: bool,
        }
        let test_cases = [
            TestCase { from: DataType::Integer, to: DataType::Float, ok: true },
            TestCase { from: DataType::Boolean, to: DataType::Float, ok: true },
            TestCase { from: DataType::Float, to: DataType::Integer, ok: false },
            TestCase { from: DataType::ConstInteger, to: DataType::Float, ok: true },
            TestCase { from: DataType::Date, to: DataType::GenericDatetime, ok: true },
            TestCase { from: DataType::String, to: DataType::Date, ok: false },
            TestCase { from: DataType::Null, to: DataType::ConstString, ok: true },
            TestCase { from: DataType::TreeStr, to: DataType::ArrayStr, ok: true },
        ];
        for tc in test_cases {
            assert_eq!(tc.from.casts_to(&tc.to), tc.ok, "{} -> {}", tc.from, tc.to);
        }
    }

    #[test]
    fn supertypes() {
        assert_eq!(
            DataType::Integer.common_supertype(&DataType::Float),
            Some(DataType::Float)
        );
        assert_eq!(
            DataType::Float.common_supertype(&DataType::ConstInteger),
            Some(DataType::Float)
        );
        assert_eq!(
            DataType::ConstInteger.common_supertype(&DataType::ConstFloat),
            Some(DataType::ConstFloat)
        );
        assert_eq!(
            DataType::Null.common_supertype(&DataType::String),
            Some(DataType::String)
        );
        assert_eq!(DataType::String.common_supertype(&DataType::Integer), None);
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&DataType::ConstGenericDatetime).unwrap();
        assert_eq!(json, "\"CONST_GENERICDATETIME\"");
        let ty: DataType = serde_json::from_str("\"TREE_STR\"").unwrap();
        assert_eq!(ty, DataType::TreeStr);
    }
}
