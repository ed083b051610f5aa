//! Sanity engine: detects records whose ciphertext no longer matches its
//! stored checksum.
//!
//! Scans read ciphertext and checksums only; no key material is touched. A
//! failed record stays FAILED until an operator restores it from backup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use circlevault_crypto::Crypto;
use circlevault_shared::error::VaultError;
use circlevault_shared::ids::{CircleId, DataId};
use circlevault_shared::model::{SanityStatus, TrustLevel};

use crate::auth::MemberSession;
use crate::settings::SettingsRegistry;
use crate::state::AppState;
use crate::storage::records::{self, SanityCandidate};
use crate::storage::{circles, from_millis, to_millis, trustees, Store};
use crate::trust::require_trust;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SanityReport {
    pub checked: usize,
    pub failed: usize,
    /// The scan stopped early; unchecked records are picked up next time.
    pub interrupted: bool,
}

/// Which failures [`fetch_failures`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityFilter {
    Circle(CircleId),
    /// Every circle the caller holds ADMIN trust in.
    AdministeredCircles,
    /// All circles. System administrator only.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityFailure {
    pub data_id: DataId,
    pub circle_id: CircleId,
    pub name: String,
    pub detected: DateTime<Utc>,
}

pub struct SanityEngine {
    store: Arc<Store>,
    settings: Arc<SettingsRegistry>,
    batch_size: u32,
}

impl SanityEngine {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            settings: Arc::clone(&state.settings),
            batch_size: state.config.sanity.batch_size.max(1),
        }
    }

    /// Check every OK record not checked within the configured interval.
    /// Does nothing while sanity checks are disabled.
    pub fn scan(&self, now: DateTime<Utc>, cancel: &AtomicBool) -> Result<SanityReport, VaultError> {
        let settings = self.settings.snapshot();
        if !settings.sanity_enabled {
            tracing::debug!("sanity checks disabled, skipping scan");
            return Ok(SanityReport::default());
        }
        let crypto = settings.crypto()?;
        let cutoff = to_millis(now - Duration::days(i64::from(settings.sanity_interval_days)));
        let checked_at = to_millis(now);

        let mut report = SanityReport::default();
        loop {
            let batch = self
                .store
                .with_conn(|conn| records::due_for_check(conn, cutoff, self.batch_size))?;
            if batch.is_empty() {
                break;
            }
            if !self.check_batch(&crypto, batch, checked_at, cancel, &mut report)? {
                break;
            }
        }
        log_report("sanity scan finished", &report);
        Ok(report)
    }

    /// Check every OK record regardless of when it was last checked.
    pub fn scan_all(&self, cancel: &AtomicBool) -> Result<SanityReport, VaultError> {
        let crypto = self.settings.snapshot().crypto()?;
        let checked_at = to_millis(Utc::now());

        let mut report = SanityReport::default();
        let mut after = None;
        loop {
            let batch = self
                .store
                .with_conn(|conn| records::ok_after(conn, after, self.batch_size))?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            if !self.check_batch(&crypto, batch, checked_at, cancel, &mut report)? {
                break;
            }
        }
        log_report("full sanity scan finished", &report);
        Ok(report)
    }

    /// Returns false if the scan was cancelled.
    fn check_batch(
        &self,
        crypto: &Crypto,
        batch: Vec<SanityCandidate>,
        checked_at: i64,
        cancel: &AtomicBool,
        report: &mut SanityReport,
    ) -> Result<bool, VaultError> {
        for candidate in batch {
            if cancel.load(Ordering::Relaxed) {
                report.interrupted = true;
                return Ok(false);
            }
            let status = if crypto
                .verify_checksum(&candidate.data, &candidate.checksum)
                .unwrap_or(false)
            {
                SanityStatus::Ok
            } else {
                tracing::warn!(data_id = %candidate.id, "record failed its sanity check");
                report.failed += 1;
                SanityStatus::Failed
            };
            let recorded = self
                .store
                .with_conn(|conn| records::set_sanity(conn, candidate.id, status, checked_at))?;
            if !recorded {
                tracing::debug!(data_id = %candidate.id, "record flagged or deleted during scan");
            }
            report.checked += 1;
        }
        Ok(true)
    }
}

fn log_report(message: &str, report: &SanityReport) {
    if report.failed > 0 {
        tracing::warn!(
            checked = report.checked,
            failed = report.failed,
            interrupted = report.interrupted,
            "{message}"
        );
    } else {
        tracing::info!(
            checked = report.checked,
            interrupted = report.interrupted,
            "{message}"
        );
    }
}

/// Records flagged FAILED at or after `since`.
///
/// A single circle needs ADMIN trust in it or the system administrator.
pub fn fetch_failures(
    state: &AppState,
    session: &MemberSession,
    filter: SanityFilter,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SanityFailure>, VaultError> {
    let since = since.map(to_millis).unwrap_or(0);
    let rows = state.store.with_conn(|conn| match filter {
        SanityFilter::Circle(circle_id) => {
            if session.is_system_admin() {
                session.ensure_active()?;
                if circles::find(conn, circle_id)?.is_none() {
                    return Err(VaultError::Identification(format!("no circle {circle_id}")));
                }
            } else {
                require_trust(conn, session, circle_id, TrustLevel::Admin)?;
            }
            records::failures(conn, Some(circle_id), since)
        }
        SanityFilter::AdministeredCircles => {
            session.ensure_active()?;
            let mut rows = Vec::new();
            for circle_id in trustees::circles_with_level(conn, session.member_id(), TrustLevel::Admin)? {
                rows.extend(records::failures(conn, Some(circle_id), since)?);
            }
            Ok(rows)
        }
        SanityFilter::System => {
            session.ensure_admin()?;
            records::failures(conn, None, since)
        }
    })?;

    Ok(rows
        .into_iter()
        .map(|r| SanityFailure {
            data_id: r.id,
            circle_id: r.circle_id,
            name: r.name,
            detected: from_millis(r.sanity_checked.unwrap_or(r.created)),
        })
        .collect())
}
