//! Identities recognised during one session.

use std::collections::HashSet;

/// Grows monotonically: identities are added, never removed, so the
/// attendance count can only go up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    identities: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `detections` into the set, returning the identities that were
    /// not present before, in the order they were reported.
    pub fn extend_new<I, S>(&mut self, detections: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = Vec::new();
        for identity in detections {
            let identity = identity.into();
            if !self.identities.contains(&identity) {
                self.identities.insert(identity.clone());
                added.push(identity);
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }

    /// Sorted copy for reports.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut attendees: Vec<String> = self.identities.iter().cloned().collect();
        attendees.sort();
        attendees
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut seen = SeenSet::new();
        seen.extend_new(iter);
        seen
    }
}

/// `existing ∪ detections`.
pub fn merge<I, S>(mut existing: SeenSet, detections: I) -> SeenSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    existing.extend_new(detections);
    existing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sequence_counts_distinct_identities() {
        let seen = SeenSet::new();
        let seen = merge(seen, ["A", "B"]);
        let seen = merge(seen, ["B"]);
        let seen = merge(seen, ["C"]);

        assert_eq!(seen.len(), 3);
        assert_eq!(seen.to_sorted_vec(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_merge_is_monotonic_and_idempotent() {
        let batches: Vec<Vec<&str>> = vec![
            vec![],
            vec!["x"],
            vec!["x", "x"],
            vec!["y", "z", "x"],
            vec![],
            vec!["z"],
        ];

        let mut seen = SeenSet::new();
        for batch in &batches {
            let before = seen.clone();
            seen = merge(seen, batch.iter().copied());
            assert!(seen.len() >= before.len());
            assert!(before.iter().all(|id| seen.contains(id)));
            assert!(batch.iter().all(|id| seen.contains(id)));

            let again = merge(seen.clone(), batch.iter().copied());
            assert_eq!(again, seen);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_extend_new_reports_only_first_sightings() {
        let mut seen: SeenSet = ["alice"].into_iter().collect();
        let added = seen.extend_new(["bob", "alice", "bob", "carol"]);
        assert_eq!(added, vec!["bob", "carol"]);
        assert!(seen.extend_new(Vec::<String>::new()).is_empty());
    }
}
