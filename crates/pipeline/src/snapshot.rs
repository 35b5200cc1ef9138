//! Per-key staging snapshot.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use sync_core::{RecordKey, StagingRecord};
use sync_storage::StorageError;
use tracing::warn;

/// Reduce staging to one row per key, keeping the row with the greatest
/// modified timestamp.
///
/// Rows sharing the greatest timestamp collapse when their tracked values
/// are identical; differing values at that instant are an integrity error.
/// Older duplicates are dropped whatever their values, so the result does
/// not depend on the order of `rows`. Keys keep the order of their first
/// appearance.
pub fn latest_per_key(
    entity: &str,
    rows: Vec<StagingRecord>,
) -> Result<Vec<StagingRecord>, StorageError> {
    // Slot and greatest modified timestamp per key
    let mut index: HashMap<RecordKey, (usize, DateTime<Utc>)> =
        HashMap::with_capacity(rows.len());
    for row in &rows {
        let slots = index.len();
        index
            .entry(row.key.clone())
            .and_modify(|(_, max)| *max = (*max).max(row.modified_at))
            .or_insert((slots, row.modified_at));
    }

    let mut latest: Vec<Option<StagingRecord>> = vec![None; index.len()];
    for row in rows {
        let Some(&(slot, max)) = index.get(&row.key) else {
            continue;
        };
        if row.modified_at < max {
            warn!(
                entity = %entity,
                key = %row.key,
                "Duplicate staging key, dropping row modified at {}",
                row.modified_at
            );
            continue;
        }
        match &latest[slot] {
            None => latest[slot] = Some(row),
            Some(kept) if kept.attributes == row.attributes => {
                warn!(
                    entity = %entity,
                    key = %row.key,
                    "Duplicate staging key, identical row collapsed"
                );
            }
            Some(_) => {
                return Err(StorageError::Integrity(format!(
                    "staging for '{entity}' holds conflicting rows for key {} modified at {}",
                    row.key, row.modified_at
                )));
            }
        }
    }
    Ok(latest.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sync_core::Value;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 2, hour, 0, 0).unwrap()
    }

    fn row(id: i64, name: &str, hour: u32) -> StagingRecord {
        StagingRecord {
            key: RecordKey::single(id),
            attributes: vec![Value::text(name)],
            created_at: at(0),
            modified_at: at(hour),
            valid_from: at(hour),
            valid_to: None,
        }
    }

    #[test]
    fn test_latest_row_wins() {
        let rows = vec![row(1, "A", 1), row(2, "X", 1), row(1, "C", 3), row(1, "B", 2)];
        let latest = latest_per_key("customers", rows).unwrap();
        assert_eq!(latest, vec![row(1, "C", 3), row(2, "X", 1)]);
    }

    #[test]
    fn test_identical_duplicates_collapse() {
        let latest = latest_per_key("customers", vec![row(1, "A", 1), row(1, "A", 1)]).unwrap();
        assert_eq!(latest, vec![row(1, "A", 1)]);
    }

    #[test]
    fn test_conflicting_duplicates_rejected() {
        let err = latest_per_key("customers", vec![row(1, "A", 1), row(1, "B", 1)]).unwrap_err();
        assert!(matches!(err, StorageError::Integrity(_)));
        assert!(err.to_string().contains("key (1)"));
    }

    #[test]
    fn test_older_conflict_is_dropped_in_any_order() {
        let rows = [row(1, "A", 1), row(1, "B", 1), row(1, "C", 3)];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let permuted: Vec<StagingRecord> = order.iter().map(|&i| rows[i].clone()).collect();
            let latest = latest_per_key("customers", permuted).unwrap();
            assert_eq!(latest, vec![row(1, "C", 3)], "order {order:?}");
        }
    }

    #[test]
    fn test_latest_conflict_rejected_in_any_order() {
        let rows = [row(1, "A", 1), row(1, "B", 3), row(1, "C", 3)];
        for order in [[0, 1, 2], [1, 0, 2], [1, 2, 0], [2, 1, 0]] {
            let permuted: Vec<StagingRecord> = order.iter().map(|&i| rows[i].clone()).collect();
            let err = latest_per_key("customers", permuted).unwrap_err();
            assert!(matches!(err, StorageError::Integrity(_)), "order {order:?}");
        }
    }

    #[test]
    fn test_keys_keep_first_appearance_order() {
        let rows = vec![row(2, "X", 1), row(1, "A", 1), row(2, "Y", 2)];
        let latest = latest_per_key("customers", rows).unwrap();
        assert_eq!(latest, vec![row(2, "Y", 2), row(1, "A", 1)]);
    }

    #[test]
    fn test_empty_staging() {
        assert!(latest_per_key("customers", Vec::new()).unwrap().is_empty());
    }
}
