//! The shared collection of classes under transformation

use crate::jvm::model::ClassModel;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Map from binary class name to its mutable model
///
/// This is the transformation unit of record: every transform reads and
/// mutates it in place, one transform at a time. Iteration order is the
/// lexicographic name order, so repeated runs over the same input visit
/// classes in the same order.
#[derive(Default, Debug)]
pub struct ClassTable {
    classes: BTreeMap<String, ClassModel>,
}

impl ClassTable {
    pub fn new() -> ClassTable {
        ClassTable {
            classes: BTreeMap::new(),
        }
    }

    /// Build a table from parsed classes
    ///
    /// A repeated name replaces the earlier entry with a warning, matching
    /// how archives shadow duplicate entries.
    pub fn from_classes(classes: impl IntoIterator<Item = ClassModel>) -> ClassTable {
        let mut table = ClassTable::new();
        for class in classes {
            if table.classes.contains_key(&class.name) {
                log::warn!("Duplicate class entry '{}' replaces the earlier one", class.name);
            }
            table.insert(class);
        }
        table
    }

    /// Insert or replace a class, keyed by its own name
    pub fn insert(&mut self, class: ClassModel) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Remove a class by name
    pub fn remove(&mut self, name: &str) -> Option<ClassModel> {
        self.classes.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClassModel> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassModel> {
        self.classes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Snapshot of all class names, in iteration order
    ///
    /// Lets a transform walk the table while mutating entries one at a time.
    pub fn names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassModel> {
        self.classes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClassModel> {
        self.classes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl<'a> IntoIterator for &'a ClassTable {
    type Item = (&'a String, &'a ClassModel);
    type IntoIter = btree_map::Iter<'a, String, ClassModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::ClassAccessFlags;

    #[test]
    fn deterministic_order() {
        let table = ClassTable::from_classes(vec![
            ClassModel::new("b", ClassAccessFlags::PUBLIC),
            ClassModel::new("a", ClassAccessFlags::PUBLIC),
            ClassModel::new("c", ClassAccessFlags::PUBLIC),
        ]);
        assert_eq!(table.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_names_replace() {
        let mut first = ClassModel::new("a", ClassAccessFlags::PUBLIC);
        first.generic_signature = Some("bogus".to_owned());
        let second = ClassModel::new("a", ClassAccessFlags::FINAL);
        let table = ClassTable::from_classes(vec![first, second]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").unwrap().access_flags, ClassAccessFlags::FINAL);
    }
}
