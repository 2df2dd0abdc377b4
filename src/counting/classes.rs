//! Class whitelist (name ⇄ detector id) and per-class counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One whitelisted detector class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    pub id: u32,
}

impl ClassEntry {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Ordered, bidirectional class whitelist. The order fixes report columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWhitelist {
    labels: Vec<Arc<str>>,
    ids: Vec<u32>,
    by_id: HashMap<u32, usize>,
    by_name: HashMap<Arc<str>, usize>,
}

impl ClassWhitelist {
    pub fn new(entries: &[ClassEntry]) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::invalid("classes", "whitelist is empty"));
        }

        let mut whitelist = Self {
            labels: Vec::with_capacity(entries.len()),
            ids: Vec::with_capacity(entries.len()),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };

        for (index, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::invalid("classes", "class name is empty"));
            }
            let label: Arc<str> = entry.name.as_str().into();
            if whitelist.by_name.insert(label.clone(), index).is_some() {
                return Err(ConfigError::invalid(
                    "classes",
                    format!("duplicate class name `{}`", entry.name),
                ));
            }
            if whitelist.by_id.insert(entry.id, index).is_some() {
                return Err(ConfigError::invalid(
                    "classes",
                    format!("duplicate class id {}", entry.id),
                ));
            }
            whitelist.labels.push(label);
            whitelist.ids.push(entry.id);
        }

        Ok(whitelist)
    }

    /// Default vehicle classes with COCO ids.
    pub fn vehicles() -> Vec<ClassEntry> {
        vec![
            ClassEntry::new("car", 2),
            ClassEntry::new("motorbike", 3),
            ClassEntry::new("bus", 5),
            ClassEntry::new("truck", 7),
        ]
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Column index of a detector class id.
    pub fn index_of_id(&self, id: u32) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Column index of a class name.
    pub fn index_of_label(&self, label: &str) -> Option<usize> {
        self.by_name.get(label).copied()
    }

    pub fn label(&self, id: u32) -> Option<&Arc<str>> {
        self.index_of_id(id).map(|i| &self.labels[i])
    }

    pub fn id_of(&self, label: &str) -> Option<u32> {
        self.index_of_label(label).map(|i| self.ids[i])
    }

    /// Class names in column order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| &**l)
    }
}

/// Cumulative per-class counts, one slot per whitelisted class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCounts {
    classes: Arc<ClassWhitelist>,
    values: Vec<u64>,
}

impl ClassCounts {
    pub fn new(classes: Arc<ClassWhitelist>) -> Self {
        let values = vec![0; classes.len()];
        Self { classes, values }
    }

    /// Count for a class name; unknown names count zero.
    pub fn get(&self, label: &str) -> u64 {
        self.classes
            .index_of_label(label)
            .map_or(0, |i| self.values[i])
    }

    /// Increment the slot of a detector class id. Returns false for ids outside
    /// the whitelist.
    pub(crate) fn increment(&mut self, class_id: u32) -> bool {
        match self.classes.index_of_id(class_id) {
            Some(i) => {
                self.values[i] += 1;
                true
            }
            None => false,
        }
    }

    /// `(label, count)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.classes.labels().zip(self.values.iter().copied())
    }

    /// Counts in column order.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn total(&self) -> u64 {
        self.values.iter().sum()
    }

    pub fn classes(&self) -> &Arc<ClassWhitelist> {
        &self.classes
    }
}

impl fmt::Display for ClassCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist() -> Arc<ClassWhitelist> {
        Arc::new(ClassWhitelist::new(&ClassWhitelist::vehicles()).unwrap())
    }

    #[test]
    fn test_lookup_both_directions() {
        let classes = whitelist();
        assert_eq!(classes.label(5).map(|l| &**l), Some("bus"));
        assert_eq!(classes.id_of("truck"), Some(7));
        assert_eq!(classes.label(0), None);
        assert_eq!(classes.id_of("person"), None);
        assert_eq!(
            classes.labels().collect::<Vec<_>>(),
            vec!["car", "motorbike", "bus", "truck"]
        );
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ClassWhitelist::new(&[]).is_err());
        assert!(
            ClassWhitelist::new(&[ClassEntry::new("car", 2), ClassEntry::new("car", 3)]).is_err()
        );
        assert!(
            ClassWhitelist::new(&[ClassEntry::new("car", 2), ClassEntry::new("van", 2)]).is_err()
        );
    }

    #[test]
    fn test_counts() {
        let mut counts = ClassCounts::new(whitelist());
        assert!(counts.increment(2));
        assert!(counts.increment(2));
        assert!(counts.increment(7));
        assert!(!counts.increment(1));

        assert_eq!(counts.get("car"), 2);
        assert_eq!(counts.get("truck"), 1);
        assert_eq!(counts.get("bus"), 0);
        assert_eq!(counts.get("person"), 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.values(), &[2, 0, 0, 1]);
        assert_eq!(
            counts.to_string(),
            r#"{"car": 2, "motorbike": 0, "bus": 0, "truck": 1}"#
        );
    }
}
