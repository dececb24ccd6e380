//! Notification interpreter - applies registry notifications to the tree.
//!
//! A `List` is authoritative: the tree is reset and rebuilt in batch mode.
//! An `Update` is a set of deltas applied one by one in single mode. Rows
//! that fail validation are logged and skipped; the rest of the batch still
//! applies.

use tracing::{debug, warn};

use skywatch_core::{DeltaKind, Notification, ProtoResult, RawRow, ServiceRecord};
use skywatch_tree::{EntityTree, InstanceData, InstanceRow};

/// Outcome of applying one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rows that mutated the tree.
    pub applied: usize,
    /// Rows skipped on purpose (unknown kind, unknown region, absent instance).
    pub ignored: usize,
    /// Keys of malformed rows.
    pub rejected: Vec<String>,
}

/// Decode a text frame and apply it.
///
/// Fails only when the frame is not a notification envelope; malformed
/// rows inside a valid envelope are reported in [`ApplyReport::rejected`].
pub fn apply_frame(tree: &mut EntityTree, text: &str) -> ProtoResult<ApplyReport> {
    let notification = Notification::decode(text)?;
    Ok(apply_notification(tree, notification))
}

pub fn apply_notification(tree: &mut EntityTree, notification: Notification) -> ApplyReport {
    match notification {
        Notification::List(rows) => apply_snapshot(tree, rows),
        Notification::Update(rows) => apply_deltas(tree, rows),
        Notification::Unknown(action) => {
            debug!(%action, "ignoring notification with unknown action");
            ApplyReport::default()
        }
    }
}

/// Map a registry record onto tree coordinates and instance fields.
pub fn instance_row(record: &ServiceRecord) -> InstanceRow {
    InstanceRow {
        region: record.region().to_string(),
        host: record.host().to_string(),
        data: instance_data(record),
    }
}

pub fn instance_data(record: &ServiceRecord) -> InstanceData {
    let id = record.instance_id();
    InstanceData {
        id: id.clone(),
        service: record.config.name.clone(),
        version: record.config.version.clone(),
        address: id,
        admin_address: record.admin_address(),
        registered: record.registered,
    }
}

fn apply_snapshot(tree: &mut EntityTree, rows: Vec<RawRow>) -> ApplyReport {
    let mut report = ApplyReport::default();
    let mut batch = Vec::with_capacity(rows.len());

    for row in &rows {
        match row.snapshot_record() {
            Ok(record) => batch.push(instance_row(&record)),
            Err(e) => {
                warn!(key = %row.key, error = %e, "skipping malformed snapshot row");
                report.rejected.push(row.key.clone());
            }
        }
    }

    tree.reset();
    report.applied = tree.apply_batch(batch);
    report
}

fn apply_deltas(tree: &mut EntityTree, rows: Vec<RawRow>) -> ApplyReport {
    let mut report = ApplyReport::default();

    for row in &rows {
        let delta = match row.delta() {
            Ok(Some(delta)) => delta,
            Ok(None) => {
                debug!(key = %row.key, kind = ?row.kind_name(), "ignoring delta of unknown type");
                report.ignored += 1;
                continue;
            }
            Err(e) => {
                warn!(key = %row.key, error = %e, "skipping malformed delta");
                report.rejected.push(row.key.clone());
                continue;
            }
        };

        let service = &delta.service;
        let region = service.region();
        let host = service.host();

        let applied = match delta.kind {
            DeltaKind::Add => {
                tree.upsert_instance(region, host, instance_data(service));
                true
            }
            DeltaKind::Update | DeltaKind::Remove if !tree.contains_region(region) => {
                // Tolerated: the region may not have been listed yet.
                debug!(
                    key = %row.key,
                    %region,
                    kind = ?delta.kind,
                    "delta targets a region that was never listed"
                );
                false
            }
            DeltaKind::Update => {
                tree.upsert_instance(region, host, instance_data(service));
                true
            }
            DeltaKind::Remove => tree.remove_instance(region, host, &service.instance_id()),
        };

        if applied {
            report.applied += 1;
        } else {
            report.ignored += 1;
        }
    }

    report
}
