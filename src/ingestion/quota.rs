use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Ok,
    Warning,
    Critical,
    Exceeded,
}

/// Tracks daily call volume per collector against a shared ceiling. Counts
/// reset naturally because the map key includes the UTC calendar date.
pub struct QuotaCounter {
    limit: u32,
    counts: DashMap<(String, NaiveDate), u32>,
}

impl QuotaCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counts: DashMap::new(),
        }
    }

    pub fn record_call(&self, collector: &str) -> QuotaStatus {
        let today = Utc::now().date_naive();
        let key = (collector.to_string(), today);
        let mut count = self.counts.entry(key).or_insert(0);
        *count += 1;
        let status = self.status_for(*count);

        if status == QuotaStatus::Warning {
            warn!(collector, count = *count, limit = self.limit, "approaching daily quota");
        } else if status == QuotaStatus::Critical {
            warn!(collector, count = *count, limit = self.limit, "near daily quota ceiling");
        } else if status == QuotaStatus::Exceeded {
            warn!(collector, count = *count, limit = self.limit, "daily quota exceeded");
        }

        status
    }

    pub fn count_today(&self, collector: &str) -> u32 {
        let today = Utc::now().date_naive();
        self.counts
            .get(&(collector.to_string(), today))
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn status_for(&self, count: u32) -> QuotaStatus {
        if count >= self.limit {
            QuotaStatus::Exceeded
        } else if count as f64 >= self.limit as f64 * 0.95 {
            QuotaStatus::Critical
        } else if count as f64 >= self.limit as f64 * 0.80 {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_at_configured_bands() {
        let quota = QuotaCounter::new(10);
        for _ in 0..7 {
            assert_eq!(quota.record_call("rss"), QuotaStatus::Ok);
        }
        assert_eq!(quota.record_call("rss"), QuotaStatus::Warning);
        for _ in 0..1 {
            assert_eq!(quota.record_call("rss"), QuotaStatus::Critical);
        }
        assert_eq!(quota.record_call("rss"), QuotaStatus::Exceeded);
    }

    #[test]
    fn collectors_are_tracked_independently() {
        let quota = QuotaCounter::new(10);
        quota.record_call("rss");
        quota.record_call("rss");
        assert_eq!(quota.count_today("rss"), 2);
        assert_eq!(quota.count_today("social"), 0);
    }
}
