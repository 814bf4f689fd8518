//! Candidate-duplicate detection via shared reference metadata.

use crate::model::Entry;
use std::collections::BTreeSet;

/// Compares two entries on the intersection of configured metadata keys,
/// typically a source-system transaction reference. A non-empty result
/// means "likely duplicate"; the decision is left to the host
/// reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReferenceDuplicates {
    keys: Vec<String>,
}

impl Default for ReferenceDuplicates {
    fn default() -> Self {
        ReferenceDuplicates {
            keys: vec!["ref".to_string()],
        }
    }
}

impl ReferenceDuplicates {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReferenceDuplicates {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn compare(&self, a: &Entry, b: &Entry) -> BTreeSet<String> {
        let refs_of = |entry: &Entry| -> BTreeSet<String> {
            self.keys
                .iter()
                .filter_map(|key| entry.meta().get(key).cloned())
                .collect()
        };

        refs_of(a).intersection(&refs_of(b)).cloned().collect()
    }
}
