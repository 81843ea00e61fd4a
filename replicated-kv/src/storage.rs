//! The replicated log and the key-value state derived from it.
//!
//! Nothing but the log is stored. A key's value is recomputed on every read
//! by replaying, in order, each entry that targets the key. Appending an
//! entry replays its key once more and rolls the entry back if the history
//! becomes illegal.

use crate::error::StorageError;
use crate::modification::{Modification, ModificationType};

/// State of one key after replaying part of its history.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyState {
    pub exists: bool,
    pub value: Option<String>,
}

impl KeyState {
    /// Applies one entry on top of this state.
    ///
    /// CREATE is the only operation with a precondition; UPDATE, DELETE and
    /// CAS always succeed, with a mismatched CAS leaving the value untouched.
    pub fn apply(&mut self, modification: &Modification) -> Result<(), StorageError> {
        match modification.kind {
            ModificationType::Create => {
                if self.exists {
                    return Err(StorageError::DroppedModification {
                        sn: modification.sn,
                        id: modification.id,
                    });
                }
                self.exists = true;
                self.value = modification.value.clone();
            }
            ModificationType::Update => {
                self.value = modification.value.clone();
            }
            ModificationType::Delete => {
                self.exists = false;
                self.value = None;
            }
            ModificationType::Cas => {
                if self.value == modification.old_value {
                    self.value = modification.value.clone();
                }
            }
        }
        Ok(())
    }
}

/// Append-only log of modifications.
///
/// Entries are only ever pushed; the single removal is the rollback of an
/// entry that was just pushed and failed replay.
#[derive(Debug, Default)]
pub struct ReplicatedLog {
    entries: Vec<Modification>,
}

impl ReplicatedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Modification] {
        &self.entries
    }

    /// Sequence number for the next entry the leader originates.
    pub fn generate_sn(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Appends an entry.
    ///
    /// An entry past the end of the log fails with `GapDetected`. An entry
    /// whose `sn` is already taken is still appended; retransmissions are not
    /// deduplicated here.
    pub fn add_modification(&mut self, modification: Modification) -> Result<(), StorageError> {
        let next = self.generate_sn();
        if modification.sn > next {
            return Err(StorageError::GapDetected { from: next });
        }

        let id = modification.id;
        self.entries.push(modification);
        if let Err(err) = self.replay(id) {
            self.entries.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Folds every entry for `id`, in log order, over an empty state.
    pub fn replay(&self, id: u64) -> Result<KeyState, StorageError> {
        let mut state = KeyState::default();
        for modification in self.entries.iter().filter(|m| m.id == id) {
            state.apply(modification)?;
        }
        Ok(state)
    }

    pub fn get_value(&self, id: u64) -> Result<Option<String>, StorageError> {
        Ok(self.replay(id)?.value)
    }

    /// Clones every entry from `sn_from` to the end of the log.
    pub fn entries_from(&self, sn_from: u64) -> Vec<Modification> {
        let start = usize::try_from(sn_from).unwrap_or(usize::MAX);
        self.entries.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(entries: Vec<Modification>) -> ReplicatedLog {
        let mut log = ReplicatedLog::new();
        for entry in entries {
            log.add_modification(entry).expect("entry should apply");
        }
        log
    }

    #[test]
    fn generate_sn_tracks_log_length() {
        let mut log = ReplicatedLog::new();
        assert_eq!(log.generate_sn(), 0);
        log.add_modification(Modification::create(0, 0, "a".into()))
            .expect("create");
        assert_eq!(log.generate_sn(), 1);
    }

    #[test]
    fn replay_folds_only_matching_entries_in_order() {
        let log = log_with(vec![
            Modification::create(0, 0, "a".into()),
            Modification::create(1, 1, "x".into()),
            Modification::update(2, 0, "b".into()),
            Modification::cas(3, 1, "x".into(), "y".into()),
            Modification::update(4, 0, "c".into()),
        ]);

        assert_eq!(log.get_value(0), Ok(Some("c".into())));
        assert_eq!(log.get_value(1), Ok(Some("y".into())));
        assert_eq!(log.get_value(7), Ok(None));
    }

    #[test]
    fn duplicate_create_is_dropped_and_rolled_back() {
        let mut log = log_with(vec![Modification::create(0, 0, "a".into())]);

        let result = log.add_modification(Modification::create(1, 0, "b".into()));

        assert_eq!(
            result,
            Err(StorageError::DroppedModification { sn: 1, id: 0 })
        );
        assert_eq!(log.len(), 1);
        assert_eq!(log.get_value(0), Ok(Some("a".into())));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut log = log_with(vec![Modification::create(0, 0, "a".into())]);

        log.add_modification(Modification::delete(1, 0))
            .expect("first delete");
        assert_eq!(log.get_value(0), Ok(None));

        log.add_modification(Modification::delete(2, 0))
            .expect("second delete");
        assert_eq!(log.get_value(0), Ok(None));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn delete_resets_existence_so_create_succeeds_again() {
        let mut log = log_with(vec![
            Modification::create(0, 0, "a".into()),
            Modification::delete(1, 0),
        ]);

        log.add_modification(Modification::create(2, 0, "again".into()))
            .expect("create after delete");
        assert_eq!(log.get_value(0), Ok(Some("again".into())));
    }

    #[test]
    fn cas_with_matching_old_value_updates() {
        let mut log = log_with(vec![Modification::create(0, 0, "a".into())]);
        log.add_modification(Modification::cas(1, 0, "a".into(), "b".into()))
            .expect("cas");
        assert_eq!(log.get_value(0), Ok(Some("b".into())));
    }

    #[test]
    fn cas_mismatch_is_logged_as_a_no_op() {
        let mut log = log_with(vec![Modification::create(0, 0, "a".into())]);

        log.add_modification(Modification::cas(1, 0, "zzz".into(), "b".into()))
            .expect("mismatched cas still appends");

        assert_eq!(log.len(), 2);
        assert_eq!(log.get_value(0), Ok(Some("a".into())));
    }

    #[test]
    fn update_needs_no_existing_key() {
        let log = log_with(vec![Modification::update(0, 5, "v".into())]);
        assert_eq!(
            log.replay(5),
            Ok(KeyState {
                exists: false,
                value: Some("v".into())
            })
        );
    }

    #[test]
    fn entry_past_the_end_reports_first_missing_sn() {
        let mut log = log_with(
            (0..5)
                .map(|sn| Modification::create(sn, sn, format!("v{sn}")))
                .collect(),
        );

        let result = log.add_modification(Modification::create(8, 8, "v8".into()));

        assert_eq!(result, Err(StorageError::GapDetected { from: 5 }));
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn stale_sn_is_appended_without_dedup() {
        let mut log = log_with(vec![
            Modification::create(0, 0, "a".into()),
            Modification::update(1, 0, "b".into()),
        ]);

        log.add_modification(Modification::update(1, 0, "b".into()))
            .expect("retransmitted update");

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[2].sn, 1);
    }

    #[test]
    fn entries_from_returns_suffix() {
        let log = log_with(
            (0..4)
                .map(|sn| Modification::update(sn, 0, format!("v{sn}")))
                .collect(),
        );

        let suffix: Vec<u64> = log.entries_from(2).iter().map(|m| m.sn).collect();
        assert_eq!(suffix, vec![2, 3]);
        assert!(log.entries_from(4).is_empty());
        assert!(log.entries_from(100).is_empty());
    }
}
