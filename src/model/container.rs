//! Ordered, name-indexed containers for model entities.
use crate::error::ModelError;
use log::info;
use prettytable::{Cell, Row, Table};
use rustc_hash::FxHashMap;

/// Entities stored in a [`Container`] are identified by a unique name.
pub trait Named {
    fn name(&self) -> &str;
}

/// Entities that can be printed as a row of a plain-text table.
pub trait TableRow {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// A collection of entities kept in insertion order and indexed by name.
#[derive(Debug, Clone)]
pub struct Container<T> {
    kind: &'static str,
    items: Vec<T>,
    index: FxHashMap<String, usize>,
}

impl<T: Named> Container<T> {
    /// Creates an empty container. `kind` names the entity type in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn add(&mut self, item: T) -> Result<(), ModelError> {
        if self.index.contains_key(item.name()) {
            return Err(ModelError::Duplicate {
                kind: self.kind,
                name: item.name().to_string(),
            });
        }
        self.index.insert(item.name().to_string(), self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn add_all(&mut self, items: impl IntoIterator<Item = T>) -> Result<(), ModelError> {
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let position = self.index.remove(name)?;
        let item = self.items.remove(position);
        for index in self.index.values_mut() {
            if *index > position {
                *index -= 1;
            }
        }
        Some(item)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|i| &self.items[*i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        let index = *self.index.get(name)?;
        Some(&mut self.items[index])
    }

    /// Like [`Container::get`], but an unknown name is an error.
    pub fn try_get(&self, name: &str) -> Result<&T, ModelError> {
        self.get(name).ok_or_else(|| ModelError::Unknown {
            kind: self.kind,
            name: name.to_string(),
        })
    }

    pub fn try_get_mut(&mut self, name: &str) -> Result<&mut T, ModelError> {
        let kind = self.kind;
        self.get_mut(name).ok_or_else(|| ModelError::Unknown {
            kind,
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of the entity in insertion order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get_index(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl '_ + ExactSizeIterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl '_ + ExactSizeIterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn names(&self) -> impl '_ + Iterator<Item = &str> {
        self.items.iter().map(Named::name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All entities satisfying the predicate, in insertion order.
    pub fn select(&self, predicate: impl Fn(&T) -> bool) -> Vec<&T> {
        self.items.iter().filter(|item| predicate(item)).collect()
    }
}

impl<T: Named + TableRow> Container<T> {
    /// Builds a table with one header row and one row per entity.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_titles(Row::new(T::headers().into_iter().map(Cell::new).collect()));
        for item in &self.items {
            table.add_row(Row::new(item.row().iter().map(|cell| Cell::new(cell)).collect()));
        }
        table
    }

    pub fn print_table(&self) {
        info!("{} table:\n{}", self.kind, self.table());
    }
}

impl<'a, T> IntoIterator for &'a Container<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Entry(&'static str, f64);

    impl Named for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    impl TableRow for Entry {
        fn headers() -> Vec<&'static str> {
            vec!["name", "value"]
        }

        fn row(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn table_has_one_row_per_entity() {
        let mut container = Container::new("entry");
        container
            .add_all([Entry("k_on", 1.0), Entry("k_off", 0.25)])
            .unwrap();

        let table = container.table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_row(1).unwrap().get_cell(1).unwrap().get_content(), "0.25");

        let rendered = table.to_string();
        assert!(rendered.contains("name"));
        assert!(rendered.contains("k_off"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut container = Container::new("entry");
        container.add(Entry("k_on", 1.0)).unwrap();
        let result = container.add(Entry("k_on", 2.0));
        assert!(matches!(result, Err(ModelError::Duplicate { kind: "entry", .. })));
        assert_eq!(container.remove("k_on").unwrap().1, 1.0);
        assert!(container.is_empty());
    }
}
