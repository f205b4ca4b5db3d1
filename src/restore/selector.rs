// backuprestore/src/restore/selector.rs
use tracing::debug;

use crate::archive::ArchiveFormat;
use crate::errors::{RestoreError, Result};
use crate::store::BackupObject;

/// Picks the backup to restore from the full candidate set.
///
/// Every candidate must carry a recognized archive suffix; a single stray
/// object fails the whole selection. The maximum by key name and the maximum
/// by last-modified time must be the same object, otherwise the set is
/// reported as inconsistent with both candidates.
pub fn select_latest<I>(objects: I) -> Result<BackupObject>
where
    I: IntoIterator<Item = BackupObject>,
{
    let mut by_name: Option<BackupObject> = None;
    let mut by_time: Option<BackupObject> = None;
    let mut count = 0usize;

    for object in objects {
        if ArchiveFormat::from_key(&object.key).is_none() {
            return Err(RestoreError::UnrecognizedObject { key: object.key });
        }
        count += 1;

        if by_name.as_ref().is_none_or(|best| object.key > best.key) {
            by_name = Some(object.clone());
        }
        // Equal timestamps fall back to key order.
        if by_time.as_ref().is_none_or(|best| {
            (object.last_modified, &object.key) > (best.last_modified, &best.key)
        }) {
            by_time = Some(object);
        }
    }

    let (by_name, by_time) = match (by_name, by_time) {
        (Some(by_name), Some(by_time)) => (by_name, by_time),
        _ => return Err(RestoreError::NoBackupsFound),
    };
    debug!(candidates = count, by_name = %by_name.key, by_time = %by_time.key, "Computed maxima");

    if by_name.key != by_time.key {
        return Err(RestoreError::InconsistentBackupSet { by_name, by_time });
    }
    Ok(by_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn obj(key: &str, secs: i64) -> BackupObject {
        BackupObject::new(key, 100, at(secs))
    }

    #[test]
    fn test_selects_agreed_latest() {
        let selected = select_latest(vec![obj("2024-01-01.zip", 100), obj("2024-02-01.zip", 200)]).unwrap();
        assert_eq!(selected.key, "2024-02-01.zip");
    }

    #[test]
    fn test_disagreeing_maxima_are_inconsistent() {
        let err = select_latest(vec![obj("2024-01-01.zip", 300), obj("2024-02-01.zip", 200)]).unwrap_err();
        match err {
            RestoreError::InconsistentBackupSet { by_name, by_time } => {
                assert_eq!(by_name.key, "2024-02-01.zip");
                assert_eq!(by_time.key, "2024-01-01.zip");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_set_has_no_backups() {
        let err = select_latest(Vec::new()).unwrap_err();
        assert!(matches!(err, RestoreError::NoBackupsFound));
    }

    #[test]
    fn test_single_object_is_selected() {
        let selected = select_latest(vec![obj("apptranslator/only.tar.gz", 5)]).unwrap();
        assert_eq!(selected.key, "apptranslator/only.tar.gz");
    }

    #[test]
    fn test_unrecognized_object_fails_whole_selection() {
        let err = select_latest(vec![
            obj("apptranslator/2024-01-01.zip", 100),
            obj("apptranslator/README", 50),
            obj("apptranslator/2024-02-01.zip", 200),
        ])
        .unwrap_err();
        match err {
            RestoreError::UnrecognizedObject { key } => assert_eq!(key, "apptranslator/README"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_name() {
        let selected = select_latest(vec![obj("2024-02-01.zip", 200), obj("2024-01-01.zip", 200)]).unwrap();
        assert_eq!(selected.key, "2024-02-01.zip");
    }

    #[test]
    fn test_listing_order_does_not_matter() {
        let selected = select_latest(vec![
            obj("b/2024-03-01.zip", 300),
            obj("b/2024-01-01.zip", 100),
            obj("b/2024-02-01.zip", 200),
        ])
        .unwrap();
        assert_eq!(selected.key, "b/2024-03-01.zip");
    }

    fn candidate_keys() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[0-9]{8}_[0-9]{6}", 1..12)
            .prop_map(|keys| keys.into_iter().map(|k| format!("apptranslator/{}.zip", k)).collect())
    }

    proptest! {
        /// When names and times rise together, the shared maximum is selected.
        #[test]
        fn selects_common_maximum(keys in candidate_keys(), rotate in 0usize..12) {
            let mut objects: Vec<BackupObject> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| obj(k, 1_000 + i as i64 * 60))
                .collect();
            let expected = objects.last().unwrap().key.clone();
            let len = objects.len();
            objects.rotate_left(rotate % len);

            let selected = select_latest(objects).unwrap();
            prop_assert_eq!(selected.key, expected);
        }

        /// Whenever the newest upload is not the highest name, selection fails.
        #[test]
        fn rejects_differing_maxima(keys in candidate_keys(), newest in 0usize..12) {
            prop_assume!(keys.len() >= 2);
            let newest = newest % (keys.len() - 1);
            let objects: Vec<BackupObject> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| obj(k, if i == newest { 10_000 } else { 1_000 + i as i64 }))
                .collect();

            let result = select_latest(objects);
            prop_assert!(
                matches!(result, Err(RestoreError::InconsistentBackupSet { .. })),
                "expected inconsistency, got {:?}",
                result
            );
        }
    }
}
