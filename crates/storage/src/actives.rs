//! Distinct-account activity counters.
//!
//! [`StoreActives`] records, per time bucket, the set of accounts seen in that
//! bucket. A bucket holds one key per account, so tracking the same account
//! twice in a bucket is a no-op and a bucket's cardinality is the number of
//! keys under its prefix:
//!
//! ```text
//! actives/daily/2026-03-14/{account_id:020}
//! actives/weekly/2026-03-09/{account_id:020}     (bucket = Monday of the ISO week)
//! actives/monthly/2026-03/{account_id:020}
//! ```
//!
//! Bucket boundaries are computed in a fixed UTC offset so that "today" means
//! the same thing on every instance. Every key is written with a TTL of
//! retention × bucket length, so stale buckets vanish without a sweeper;
//! [`Actives::prune`] removes them eagerly.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, Utc};

use crate::{backend::StorageBackend, error::StorageResult, types::AccountId};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// One bucket per calendar day.
    Daily,
    /// One bucket per ISO week, labelled by its Monday.
    Weekly,
    /// One bucket per calendar month.
    Monthly,
}

impl BucketKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Daily => "actives/daily/",
            Self::Weekly => "actives/weekly/",
            Self::Monthly => "actives/monthly/",
        }
    }

    /// Upper bound on the length of one bucket.
    fn span(self) -> Duration {
        match self {
            Self::Daily => DAY,
            Self::Weekly => DAY * 7,
            Self::Monthly => DAY * 31,
        }
    }

    /// Normalizes `date` to the first day of its bucket.
    fn start_of(self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => date,
            Self::Weekly => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(NaiveDate::MIN),
            Self::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// Start of the bucket `n` buckets before the one starting at `start`.
    fn step_back(self, start: NaiveDate, n: u32) -> NaiveDate {
        let stepped = match self {
            Self::Daily => start.checked_sub_days(Days::new(u64::from(n))),
            Self::Weekly => start.checked_sub_days(Days::new(u64::from(n) * 7)),
            Self::Monthly => start.checked_sub_months(Months::new(n)),
        };
        stepped.unwrap_or(NaiveDate::MIN)
    }

    /// Label of the bucket starting at `start`. Labels sort chronologically.
    fn label(self, start: NaiveDate) -> String {
        match self {
            Self::Daily | Self::Weekly => start.format("%Y-%m-%d").to_string(),
            Self::Monthly => start.format("%Y-%m").to_string(),
        }
    }
}

/// Retention depth for each bucket kind, in buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivesRetention {
    /// Daily buckets kept.
    pub days: u32,
    /// Weekly buckets kept.
    pub weeks: u32,
    /// Monthly buckets kept.
    pub months: u32,
}

impl Default for ActivesRetention {
    fn default() -> Self {
        Self { days: 365, weeks: 104, months: 60 }
    }
}

impl ActivesRetention {
    fn depth(&self, kind: BucketKind) -> u32 {
        match kind {
            BucketKind::Daily => self.days,
            BucketKind::Weekly => self.weeks,
            BucketKind::Monthly => self.months,
        }
        .max(1)
    }
}

/// Rolling distinct-account activity counters.
///
/// Every date argument may be any day inside the bucket of interest.
/// Reports map bucket label to count for each bucket in the retained window,
/// including empty ones.
#[async_trait]
pub trait Actives: Send + Sync {
    /// Marks `account_id` active in the day, week, and month containing `now`.
    async fn track(&self, account_id: AccountId, now: DateTime<Utc>) -> StorageResult<()>;

    /// Distinct accounts active on `date`.
    async fn daily_count(&self, date: NaiveDate) -> StorageResult<usize>;

    /// Distinct accounts active in the ISO week containing `week_start`.
    async fn weekly_count(&self, week_start: NaiveDate) -> StorageResult<usize>;

    /// Distinct accounts active in the month containing `month`.
    async fn monthly_count(&self, month: NaiveDate) -> StorageResult<usize>;

    /// Daily counts for the retained window ending at `now`.
    async fn daily_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>>;

    /// Weekly counts for the retained window ending at `now`.
    async fn weekly_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>>;

    /// Monthly counts for the retained window ending at `now`.
    async fn monthly_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>>;

    /// Removes every bucket older than its retention window.
    async fn prune(&self, now: DateTime<Utc>) -> StorageResult<()>;
}

/// [`Actives`] over a [`StorageBackend`], normally the cache tier.
#[derive(Clone)]
pub struct StoreActives {
    backend: Arc<dyn StorageBackend>,
    time_zone: FixedOffset,
    retention: ActivesRetention,
}

impl StoreActives {
    /// Creates counters stored in `backend`, bucketed in `time_zone`.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        time_zone: FixedOffset,
        retention: ActivesRetention,
    ) -> Self {
        Self { backend, time_zone, retention }
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.time_zone).date_naive()
    }

    fn bucket_prefix(kind: BucketKind, start: NaiveDate) -> Vec<u8> {
        format!("{}{}/", kind.prefix(), kind.label(start)).into_bytes()
    }

    async fn mark(
        &self,
        kind: BucketKind,
        date: NaiveDate,
        account_id: AccountId,
    ) -> StorageResult<()> {
        let mut key = Self::bucket_prefix(kind, kind.start_of(date));
        key.extend_from_slice(account_id.storage_segment().as_bytes());
        let ttl = kind.span() * self.retention.depth(kind);
        self.backend.set_with_ttl(key, Vec::new(), ttl).await
    }

    async fn count(&self, kind: BucketKind, date: NaiveDate) -> StorageResult<usize> {
        let prefix = Self::bucket_prefix(kind, kind.start_of(date));
        Ok(self.backend.get_prefix(&prefix).await?.len())
    }

    /// Oldest bucket label still inside the window ending at `now`.
    fn cutoff(&self, kind: BucketKind, now: DateTime<Utc>) -> String {
        let current = kind.start_of(self.local_date(now));
        kind.label(kind.step_back(current, self.retention.depth(kind) - 1))
    }

    /// Counts per bucket label across every stored bucket of `kind`.
    async fn scan(&self, kind: BucketKind) -> StorageResult<BTreeMap<String, usize>> {
        let entries = self.backend.get_prefix(kind.prefix().as_bytes()).await?;
        let mut counts = BTreeMap::new();
        for entry in entries {
            let Some(rest) = entry.key.strip_prefix(kind.prefix().as_bytes()) else {
                continue;
            };
            let label = rest.split(|b| *b == b'/').next().unwrap_or_default();
            *counts.entry(String::from_utf8_lossy(label).into_owned()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn report(
        &self,
        kind: BucketKind,
        now: DateTime<Utc>,
    ) -> StorageResult<BTreeMap<String, usize>> {
        let stored = self.scan(kind).await?;
        let current = kind.start_of(self.local_date(now));
        let report = (0..self.retention.depth(kind))
            .map(|n| kind.label(kind.step_back(current, n)))
            .map(|label| {
                let count = stored.get(&label).copied().unwrap_or(0);
                (label, count)
            })
            .collect();
        Ok(report)
    }

    async fn prune_kind(&self, kind: BucketKind, now: DateTime<Utc>) -> StorageResult<()> {
        let cutoff = self.cutoff(kind, now);
        for label in self.scan(kind).await?.into_keys().filter(|label| *label < cutoff) {
            let prefix = format!("{}{label}/", kind.prefix());
            self.backend.clear_prefix(prefix.as_bytes()).await?;
            tracing::debug!(bucket = %label, ?kind, "pruned actives bucket");
        }
        Ok(())
    }
}

#[async_trait]
impl Actives for StoreActives {
    #[tracing::instrument(skip(self), fields(account_id = %account_id))]
    async fn track(&self, account_id: AccountId, now: DateTime<Utc>) -> StorageResult<()> {
        let date = self.local_date(now);
        self.mark(BucketKind::Daily, date, account_id).await?;
        self.mark(BucketKind::Weekly, date, account_id).await?;
        self.mark(BucketKind::Monthly, date, account_id).await
    }

    async fn daily_count(&self, date: NaiveDate) -> StorageResult<usize> {
        self.count(BucketKind::Daily, date).await
    }

    async fn weekly_count(&self, week_start: NaiveDate) -> StorageResult<usize> {
        self.count(BucketKind::Weekly, week_start).await
    }

    async fn monthly_count(&self, month: NaiveDate) -> StorageResult<usize> {
        self.count(BucketKind::Monthly, month).await
    }

    async fn daily_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>> {
        self.report(BucketKind::Daily, now).await
    }

    async fn weekly_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>> {
        self.report(BucketKind::Weekly, now).await
    }

    async fn monthly_report(&self, now: DateTime<Utc>) -> StorageResult<BTreeMap<String, usize>> {
        self.report(BucketKind::Monthly, now).await
    }

    #[tracing::instrument(skip(self))]
    async fn prune(&self, now: DateTime<Utc>) -> StorageResult<()> {
        self.prune_kind(BucketKind::Daily, now).await?;
        self.prune_kind(BucketKind::Weekly, now).await?;
        self.prune_kind(BucketKind::Monthly, now).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::memory::MemoryBackend;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn actives(retention: ActivesRetention) -> StoreActives {
        let utc = FixedOffset::east_opt(0).unwrap();
        StoreActives::new(Arc::new(MemoryBackend::new()), utc, retention)
    }

    #[tokio::test]
    async fn test_track_twice_same_day_counts_once() {
        let actives = actives(ActivesRetention::default());

        actives.track(AccountId(1), at(2026, 3, 11, 9)).await.unwrap();
        actives.track(AccountId(1), at(2026, 3, 11, 17)).await.unwrap();

        assert_eq!(actives.daily_count(date(2026, 3, 11)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_days_in_one_week_count_once_weekly() {
        let actives = actives(ActivesRetention::default());

        // Tuesday and Thursday of the week starting Monday 2026-03-09.
        actives.track(AccountId(1), at(2026, 3, 10, 12)).await.unwrap();
        actives.track(AccountId(1), at(2026, 3, 12, 12)).await.unwrap();
        actives.track(AccountId(2), at(2026, 3, 12, 12)).await.unwrap();

        assert_eq!(actives.daily_count(date(2026, 3, 10)).await.unwrap(), 1);
        assert_eq!(actives.daily_count(date(2026, 3, 12)).await.unwrap(), 2);
        assert_eq!(actives.weekly_count(date(2026, 3, 9)).await.unwrap(), 2);
        // Any day of the week addresses the same bucket.
        assert_eq!(actives.weekly_count(date(2026, 3, 15)).await.unwrap(), 2);
        assert_eq!(actives.weekly_count(date(2026, 3, 16)).await.unwrap(), 0);
        assert_eq!(actives.monthly_count(date(2026, 3, 1)).await.unwrap(), 2);
    }

    #[rstest]
    #[case::utc(0, date(2026, 3, 11))]
    #[case::ahead(10 * 3600, date(2026, 3, 12))]
    #[case::behind(-10 * 3600, date(2026, 3, 11))]
    #[tokio::test]
    async fn test_buckets_follow_time_zone(#[case] offset_secs: i32, #[case] expected: NaiveDate) {
        let actives = StoreActives::new(
            Arc::new(MemoryBackend::new()),
            FixedOffset::east_opt(offset_secs).unwrap(),
            ActivesRetention::default(),
        );

        actives.track(AccountId(1), at(2026, 3, 11, 20)).await.unwrap();
        assert_eq!(actives.daily_count(expected).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_daily_report_covers_window_with_zeros() {
        let actives = actives(ActivesRetention { days: 3, weeks: 2, months: 2 });

        actives.track(AccountId(1), at(2026, 3, 9, 12)).await.unwrap();
        actives.track(AccountId(1), at(2026, 3, 11, 12)).await.unwrap();
        actives.track(AccountId(2), at(2026, 3, 11, 12)).await.unwrap();

        let report = actives.daily_report(at(2026, 3, 11, 23)).await.unwrap();
        let expected: BTreeMap<String, usize> =
            [("2026-03-09", 1), ("2026-03-10", 0), ("2026-03-11", 2)]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect();
        assert_eq!(report, expected);

        let monthly = actives.monthly_report(at(2026, 3, 11, 23)).await.unwrap();
        assert_eq!(monthly.get("2026-03"), Some(&2));
        assert_eq!(monthly.get("2026-02"), Some(&0));
    }

    #[tokio::test]
    async fn test_prune_removes_only_buckets_outside_window() {
        let actives = actives(ActivesRetention { days: 2, weeks: 1, months: 1 });

        actives.track(AccountId(1), at(2026, 1, 20, 12)).await.unwrap();
        actives.track(AccountId(1), at(2026, 3, 10, 12)).await.unwrap();
        actives.track(AccountId(2), at(2026, 3, 11, 12)).await.unwrap();

        actives.prune(at(2026, 3, 11, 12)).await.unwrap();

        assert_eq!(actives.daily_count(date(2026, 1, 20)).await.unwrap(), 0);
        assert_eq!(actives.weekly_count(date(2026, 1, 19)).await.unwrap(), 0);
        assert_eq!(actives.monthly_count(date(2026, 1, 1)).await.unwrap(), 0);
        assert_eq!(actives.daily_count(date(2026, 3, 10)).await.unwrap(), 1);
        assert_eq!(actives.daily_count(date(2026, 3, 11)).await.unwrap(), 1);
        assert_eq!(actives.weekly_count(date(2026, 3, 9)).await.unwrap(), 2);
        assert_eq!(actives.monthly_count(date(2026, 3, 1)).await.unwrap(), 2);
    }

    #[rstest]
    #[case(date(2026, 3, 9), date(2026, 3, 9))]
    #[case(date(2026, 3, 15), date(2026, 3, 9))]
    #[case(date(2026, 1, 1), date(2025, 12, 29))]
    fn test_weekly_bucket_starts_on_monday(#[case] day: NaiveDate, #[case] monday: NaiveDate) {
        assert_eq!(BucketKind::Weekly.start_of(day), monday);
    }
}
