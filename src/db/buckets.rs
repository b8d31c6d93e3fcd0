//! Time bucketing with gap-fill.

use super::models::{Metric, ReadFilter, NO_DATA};
use crate::probe::Trace;

use std::collections::{BTreeSet, HashMap};

/// Observations of one monitor/service within one bucket, as aggregated by storage.
#[derive(Debug, Clone)]
pub struct BucketRow {
    pub monitor_id: String,
    pub service_id: String,
    /// Offset from `since` in whole buckets.
    pub index: i64,
    pub passed: i64,
    pub failed: i64,
    pub trace: Option<Trace>,
}

/// Expand sparse bucket rows into one metric per qualifying pair per bucket.
///
/// `known_pairs` are all monitor/service pairs the store has recorded; they are
/// used to expand selectors without service IDs and the absence of a filter.
pub fn fill_buckets(
    filter: &ReadFilter,
    known_pairs: &[(String, String)],
    rows: Vec<BucketRow>,
) -> Vec<Metric> {
    let count = filter.bucket_count();
    let pairs = qualifying_pairs(filter, known_pairs);

    let mut observed: HashMap<(String, String, i64), BucketRow> = HashMap::new();
    for row in rows {
        if row.index < 0 || row.index as usize >= count {
            continue;
        }
        let key = (row.monitor_id.clone(), row.service_id.clone());
        if pairs.contains(&key) {
            observed.insert((key.0, key.1, row.index), row);
        }
    }

    let mut metrics = Vec::with_capacity(pairs.len() * count);
    for (monitor_id, service_id) in pairs {
        for index in 0..count {
            let bucket = filter.bucket_start(index);
            let key = (monitor_id.clone(), service_id.clone(), index as i64);

            let metric = match observed.remove(&key) {
                Some(row) if row.passed + row.failed > 0 => Metric {
                    monitor_id: row.monitor_id,
                    service_id: row.service_id,
                    bucket,
                    health: row.passed as f64 / (row.passed + row.failed) as f64,
                    passed_checks: row.passed,
                    failed_checks: row.failed,
                    trace: row.trace,
                },
                _ => Metric {
                    monitor_id: monitor_id.clone(),
                    service_id: service_id.clone(),
                    bucket,
                    health: NO_DATA,
                    passed_checks: 0,
                    failed_checks: 0,
                    trace: None,
                },
            };
            metrics.push(metric);
        }
    }

    metrics
}

fn qualifying_pairs(
    filter: &ReadFilter,
    known_pairs: &[(String, String)],
) -> BTreeSet<(String, String)> {
    let Some(selectors) = &filter.active_services else {
        return known_pairs.iter().cloned().collect();
    };

    let mut pairs = BTreeSet::new();
    for selector in selectors {
        if selector.service_ids.is_empty() {
            pairs.extend(
                known_pairs
                    .iter()
                    .filter(|(m, _)| *m == selector.monitor_id)
                    .cloned(),
            );
        } else {
            pairs.extend(
                selector
                    .service_ids
                    .iter()
                    .map(|s| (selector.monitor_id.clone(), s.clone())),
            );
        }
    }
    pairs
}
