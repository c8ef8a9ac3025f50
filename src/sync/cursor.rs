//! Per-account poll timestamps for the rate gate.
//!
//! Cursors are in-memory state owned by the engine for the life of the
//! process. Spacing is enforced per external account, not globally: a shared
//! bank credential serves several accounts that are each polled on their own
//! cadence.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};

/// The last successful poll time of each external account.
#[derive(Debug, Default)]
pub struct SyncCursors {
    last_synced: HashMap<String, OffsetDateTime>,
}

impl SyncCursors {
    /// A cursor map with no recorded polls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `external_account_id` may be polled at `now`.
    ///
    /// Accounts that have never been polled may always be polled. A provider
    /// without a minimum interval is only limited by the scheduler period.
    pub fn should_sync(
        &self,
        external_account_id: &str,
        min_interval: Option<Duration>,
        now: OffsetDateTime,
    ) -> bool {
        let Some(min_interval) = min_interval else {
            return true;
        };

        match self.last_synced.get(external_account_id) {
            Some(last) => now - *last >= min_interval,
            None => true,
        }
    }

    /// Record a successful poll of `external_account_id` at `now`.
    pub fn mark_synced(&mut self, external_account_id: &str, now: OffsetDateTime) {
        self.last_synced.insert(external_account_id.to_owned(), now);
    }

    /// Forget the cursor for an unlinked account.
    pub fn forget(&mut self, external_account_id: &str) {
        self.last_synced.remove(external_account_id);
    }
}
