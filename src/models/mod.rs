//! Data model types for the fetchqd daemon.
//!
//! All timestamps are whole seconds since the Unix epoch, matching the
//! INTEGER columns they are stored in. Row ids are SQLite rowids (`i64`).

use serde::{Deserialize, Serialize};

/// A recurring download subscription (a downloader + keyword pair checked
/// on an interval).
///
/// Invariant: `last_successful_check <= last_check`. A successful check
/// sets both to the same start time; a failed check advances only
/// `last_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub keywords: String,
    pub downloader: String,
    pub additional_data: Option<String>,
    pub last_check: Option<i64>,
    pub check_interval: i64,
    pub priority: i64,
    pub paused: bool,
    pub time_created: i64,
    pub last_successful_check: Option<i64>,
    pub filter: Option<String>,
    pub abort_after: i64,
    pub max_files_initial: i64,
    pub max_files_regular: Option<i64>,
    pub comment: Option<String>,
}

impl Subscription {
    /// True when this subscription has never completed a check.
    pub fn is_initial_check(&self) -> bool {
        self.last_check.is_none()
    }

    /// True when the most recent check did not succeed.
    pub fn in_error_state(&self) -> bool {
        self.last_check.is_some() && self.last_successful_check != self.last_check
    }
}

/// Payload for bulk add-or-update of subscriptions.
///
/// If `id` is present the payload updates only the supplied fields of an
/// existing row; otherwise it is an insert and `keywords` + `downloader`
/// are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpsert {
    pub id: Option<i64>,
    pub keywords: Option<String>,
    pub downloader: Option<String>,
    pub additional_data: Option<String>,
    pub check_interval: Option<i64>,
    pub priority: Option<i64>,
    pub paused: Option<bool>,
    pub filter: Option<String>,
    pub abort_after: Option<i64>,
    pub max_files_initial: Option<i64>,
    pub max_files_regular: Option<i64>,
    pub comment: Option<String>,
}

/// Processing status of a queued URL.
///
/// `-1` = pending, `0` = success, positive values carry the downloader's
/// exit bitmask. A row is re-queued by resetting `status` to `-1`
/// externally; the worker itself never resets it.
pub const URL_STATUS_PENDING: i64 = -1;
pub const URL_STATUS_OK: i64 = 0;

/// A one-off download of a single URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedUrl {
    pub id: i64,
    pub url: String,
    pub priority: i64,
    pub ignore_anchor: bool,
    pub additional_data: Option<String>,
    pub status_text: Option<String>,
    pub status: i64,
    pub time_added: i64,
    pub time_processed: Option<i64>,
    pub metadata_only: bool,
    pub overwrite_existing: bool,
    pub filter: Option<String>,
    pub max_files: Option<i64>,
    pub new_files: Option<i64>,
    pub already_seen_files: Option<i64>,
    pub paused: bool,
    pub comment: Option<String>,
    pub archived: bool,
    /// Set when this URL was produced by a reverse-lookup job.
    pub reverse_lookup_id: Option<i64>,
}

/// Payload for bulk add-or-update of queued URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuedUrlUpsert {
    pub id: Option<i64>,
    pub url: Option<String>,
    pub priority: Option<i64>,
    pub ignore_anchor: Option<bool>,
    pub additional_data: Option<String>,
    pub status: Option<i64>,
    pub status_text: Option<String>,
    pub metadata_only: Option<bool>,
    pub overwrite_existing: Option<bool>,
    pub filter: Option<String>,
    pub max_files: Option<i64>,
    pub paused: Option<bool>,
    pub comment: Option<String>,
    pub archived: Option<bool>,
    pub reverse_lookup_id: Option<i64>,
}

/// One completed subscription run (append-only history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCheck {
    pub id: i64,
    pub subscription_id: i64,
    pub time_started: i64,
    pub time_finished: i64,
    pub new_files: i64,
    pub already_seen_files: i64,
    /// `"ok"` or the decoded downloader error text.
    pub status: String,
    pub archived: bool,
}

/// Payload for bulk add-or-update of subscription check history rows.
/// Mostly used to archive old entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionCheckUpsert {
    pub id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub time_started: Option<i64>,
    pub time_finished: Option<i64>,
    pub new_files: Option<i64>,
    pub already_seen_files: Option<i64>,
    pub status: Option<String>,
    pub archived: Option<bool>,
}

/// Payload for bulk add-or-update of missed-check rows. Updates mostly
/// archive old entries or amend the note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissedCheckUpsert {
    pub id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub reason: Option<i64>,
    pub note: Option<String>,
    pub archived: Option<bool>,
}

/// Why a missed-check row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedCheckReason {
    /// Provisional: a run is in progress. Deleted on successful
    /// completion; a leftover row is durable evidence of a crash mid-run.
    InProgress,
    /// The run started more than twice its interval after the previous
    /// attempt.
    Stale,
    /// The run errored but still produced new files.
    ErroredWithFiles,
}

impl MissedCheckReason {
    pub fn as_i64(self) -> i64 {
        match self {
            MissedCheckReason::InProgress => 0,
            MissedCheckReason::Stale => 1,
            MissedCheckReason::ErroredWithFiles => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MissedCheckReason::InProgress),
            1 => Some(MissedCheckReason::Stale),
            2 => Some(MissedCheckReason::ErroredWithFiles),
            _ => None,
        }
    }
}

/// Durable evidence of stuck, stale or partially-failed subscription runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedCheck {
    pub id: i64,
    pub subscription_id: i64,
    pub reason: MissedCheckReason,
    pub note: Option<String>,
    pub time_added: i64,
    pub archived: bool,
}

/// A reverse-lookup job: find source URLs for a local file or a file URL.
///
/// Exactly one of `file_path` and `file_url` is set. Status uses the same
/// convention as [`QueuedUrl`]: `-1` pending, `0` success, positive error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseLookupJob {
    pub id: i64,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    /// Name of the lookup preset in the configuration to use.
    pub config: Option<String>,
    pub status: i64,
    pub status_text: Option<String>,
    pub paused: bool,
    /// Whether URLs produced by this job enter the single-URL queue paused.
    pub urls_paused: bool,
    pub priority: i64,
    pub result_count: Option<i64>,
    pub additional_results: Option<String>,
    pub time_added: i64,
    pub time_processed: Option<i64>,
}

/// Payload for bulk add-or-update of reverse-lookup jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseLookupJobUpsert {
    pub id: Option<i64>,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    pub config: Option<String>,
    pub status: Option<i64>,
    pub status_text: Option<String>,
    pub paused: Option<bool>,
    pub urls_paused: Option<bool>,
    pub priority: Option<i64>,
}

/// A row in the known-URL cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownUrl {
    pub url: String,
    /// `0` = generic "seen", other values are origin-specific classes.
    pub status: i64,
    pub subscription_id: Option<i64>,
    pub url_id: Option<i64>,
    pub time_added: Option<i64>,
}

/// Owner of a downloaded file or extracted URL: the subscription or
/// queued URL whose run produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Subscription(i64),
    Url(i64),
}

impl Owner {
    pub fn subscription_id(&self) -> Option<i64> {
        match self {
            Owner::Subscription(id) => Some(*id),
            Owner::Url(_) => None,
        }
    }

    pub fn url_id(&self) -> Option<i64> {
        match self {
            Owner::Url(id) => Some(*id),
            Owner::Subscription(_) => None,
        }
    }
}

/// Selector accepted by the bulk list endpoints: an explicit id set, a
/// contiguous id range, or everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSelector {
    pub ids: Option<Vec<i64>>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Include rows flagged as archived. Defaults to false.
    #[serde(default)]
    pub archived: bool,
}
