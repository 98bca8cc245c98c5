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

//! Collection utilities.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Extension methods for collections.
pub trait CollectionExt<T>: Sized
where
    T: IntoIterator,
{
    /// Consumes the collection and returns its only element, or `None` if
    /// the collection is empty or holds more than one element.
    fn into_only(self) -> Option<T::Item>;

    /// Consumes the collection and returns its only element.
    ///
    /// This method panics with the given message if the collection does not
    /// have exactly one element.
    fn expect_element<Err: Display>(self, msg: Err) -> T::Item;
}

impl<T> CollectionExt<T> for T
where
    T: IntoIterator,
{
    fn into_only(self) -> Option<T::Item> {
        let mut iter = self.into_iter();
        match (iter.next(), iter.next()) {
            (Some(el), None) => Some(el),
            _ => None,
        }
    }

    fn expect_element<Err: Display>(self, msg: Err) -> T::Item {
        match self.into_only() {
            Some(el) => el,
            None => panic!("{}", msg),
        }
    }
}

/// Extension methods for ordered maps keyed by identifiers.
pub trait AssociativeExt<K, V> {
    /// Inserts a key and value if the key is not yet present.
    ///
    /// Returns the rejected value alongside the existing one if the key was
    /// already present, leaving the map unchanged.
    fn try_insert_unique(&mut self, k: K, v: V) -> Result<(), (V, &V)>;
}

impl<K: Ord, V> AssociativeExt<K, V> for BTreeMap<K, V> {
    fn try_insert_unique(&mut self, k: K, v: V) -> Result<(), (V, &V)> {
        match self.entry(k) {
            Entry::Vacant(e) => {
                e.insert(v);
                Ok(())
            }
            Entry::Occupied(e) => Err((v, e.into_mut())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_only() {
        assert_eq!(Vec::<i32>::new().into_only(), None);
        assert_eq!(vec![1].into_only(), Some(1));
        assert_eq!(vec![1, 2].into_only(), None);
    }

    #[test]
    #[should_panic(expected = "need one")]
    fn expect_element_panics() {
        vec![1, 2].expect_element("need one");
    }

    #[test]
    fn try_insert_unique() {
        let mut map = BTreeMap::new();
        assert!(map.try_insert_unique("a", 1).is_ok());
        let (rejected, existing) = map.try_insert_unique("a", 2).unwrap_err();
        assert_eq!((rejected, *existing), (2, 1));
        assert_eq!(map["a"], 1);
    }
}
