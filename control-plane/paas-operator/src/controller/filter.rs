use std::collections::{BTreeMap, HashMap};

use paas_store::{ChangeNotification, ObjectKey};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    generation: Option<i64>,
    labels: BTreeMap<String, String>,
    deleting: bool,
}

impl From<&ChangeNotification> for Fingerprint {
    fn from(n: &ChangeNotification) -> Self {
        Self {
            generation: n.generation,
            labels: n.labels.clone(),
            deleting: n.deleting,
        }
    }
}

/// Admits a notification only when the object's spec generation, labels or
/// deletion marker moved. Status writes leave all three alone, so a pass
/// never triggers itself. A removal forgets the key, so a later object under
/// the same name always counts as new.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    seen: HashMap<ObjectKey, Fingerprint>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current state without admitting it, e.g. after an initial
    /// list that already enqueued the object.
    pub fn observe(&mut self, n: &ChangeNotification) {
        self.seen.insert(n.key.clone(), Fingerprint::from(n));
    }

    pub fn admit(&mut self, n: &ChangeNotification) -> bool {
        if n.removed {
            self.seen.remove(&n.key);
            return false;
        }
        let next = Fingerprint::from(n);
        match self.seen.get(&n.key) {
            Some(prev) if *prev == next => false,
            _ => {
                self.seen.insert(n.key.clone(), next);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::PAAS;

    fn note(generation: i64, team: &str, deleting: bool) -> ChangeNotification {
        ChangeNotification {
            kind: PAAS,
            key: ObjectKey::cluster("demo"),
            generation: Some(generation),
            labels: [("team".to_string(), team.to_string())].into(),
            deleting,
            removed: false,
        }
    }

    #[test]
    fn status_churn_is_dropped() {
        let mut f = ChangeFilter::new();
        assert!(f.admit(&note(1, "a", false)));
        // same generation and labels: a status-only write
        assert!(!f.admit(&note(1, "a", false)));
        assert!(f.admit(&note(2, "a", false)));
        assert!(f.admit(&note(2, "b", false)));
        assert!(f.admit(&note(2, "b", true)));
    }

    #[test]
    fn observed_state_is_not_admitted_again() {
        let mut f = ChangeFilter::new();
        f.observe(&note(1, "a", false));
        assert!(!f.admit(&note(1, "a", false)));
        assert!(f.admit(&note(1, "b", false)));
    }

    #[test]
    fn removal_forgets_the_key() {
        let mut f = ChangeFilter::new();
        assert!(f.admit(&note(1, "a", false)));

        let gone = ChangeNotification {
            removed: true,
            ..note(1, "a", false)
        };
        assert!(!f.admit(&gone));
        assert!(f.seen.is_empty());

        // Recreated under the same name with an identical fingerprint.
        assert!(f.admit(&note(1, "a", false)));
    }
}
