//! Import progress reporting.

use chrono::Duration;

use crate::reader::PageEnd;

/// Where a row sits in the run, as passed to [`ImportProgress`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowInfo {
    /// Source-wide row number.
    pub row: u64,
    pub total_rows: Option<u64>,
    pub page: Option<u64>,
    pub total_pages: Option<u64>,
    /// Row number within its page, and the page's size.
    pub page_row: Option<(u64, u64)>,
    /// 1-based position amongst the rows this run processes.
    pub position: u64,
    pub rows_to_process: Option<u64>,
    /// Time since the run started.
    pub elapsed: Duration,
}

impl Default for RowInfo {
    fn default() -> Self {
        Self {
            row: 0,
            total_rows: None,
            page: None,
            total_pages: None,
            page_row: None,
            position: 0,
            rows_to_process: None,
            elapsed: Duration::zero(),
        }
    }
}

impl RowInfo {
    /// `Row: 3 of 10  |  Page: 1 of 2  |  Page row: 3 of 5`
    pub fn header(&self) -> String {
        let mut parts = Vec::new();
        parts.push(match self.total_rows {
            Some(total) => format!("Row: {} of {}", self.row, total),
            None => format!("Row: {}", self.row),
        });
        if let Some(page) = self.page {
            parts.push(match self.total_pages {
                Some(total) => format!("Page: {} of {}", page, total),
                None => format!("Page: {}", page),
            });
        }
        if let Some((row, size)) = self.page_row {
            parts.push(format!("Page row: {} of {}", row, size));
        }
        parts.join("  |  ")
    }

    /// Percentage complete and estimated time remaining, when the number of
    /// rows to process is known.
    pub fn footer(&self) -> Option<String> {
        let total = self.rows_to_process.filter(|t| *t > 0)?;
        let done = self.position.max(1);
        let percent = 100.0 / total as f64 * done as f64;
        let remaining_rows = total.saturating_sub(done) as i64;
        let per_row_ms = self.elapsed.num_milliseconds() / done as i64;
        let remaining = Duration::milliseconds(per_row_ms * remaining_rows);
        Some(format!(
            "Progress: {:.1}%  |  Time remaining: {}",
            percent,
            humanize_duration(remaining)
        ))
    }
}

/// `2 hours, 5 minutes`. At most the two largest non-zero units are shown.
pub fn humanize_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    if total == 0 {
        return "less than a second".to_string();
    }
    let units = [
        (total / 86_400, "day"),
        (total % 86_400 / 3_600, "hour"),
        (total % 3_600 / 60, "minute"),
        (total % 60, "second"),
    ];
    units
        .iter()
        .skip_while(|(n, _)| *n == 0)
        .take(2)
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| {
            if *n == 1 {
                format!("1 {}", unit)
            } else {
                format!("{} {}s", n, unit)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trait for receiving import progress updates.
pub trait ImportProgress {
    /// Called before each row is processed.
    fn on_row_started(&self, row: &RowInfo);

    /// Called after each row, whether or not it succeeded.
    fn on_row_completed(&self, row: &RowInfo, successful: bool);

    /// Called before the rows of a page are processed.
    fn on_page_started(&self, page: u64);

    /// Called after the rows of a page, with the reason reading stops there
    /// if it does.
    fn on_page_completed(&self, page: u64, end: Option<&PageEnd>);

    /// Called when a phase starts (e.g., "Importing news articles").
    fn on_phase(&self, message: &str);

    /// Called when the run is complete.
    fn on_complete(&self, message: &str);
}

/// A no-op progress reporter that discards all updates.
pub struct SilentProgress;

impl ImportProgress for SilentProgress {
    fn on_row_started(&self, _row: &RowInfo) {}
    fn on_row_completed(&self, _row: &RowInfo, _successful: bool) {}
    fn on_page_started(&self, _page: u64) {}
    fn on_page_completed(&self, _page: u64, _end: Option<&PageEnd>) {}
    fn on_phase(&self, _message: &str) {}
    fn on_complete(&self, _message: &str) {}
}

/// A progress reporter that logs to the `log` crate.
pub struct LogProgress;

impl ImportProgress for LogProgress {
    fn on_row_started(&self, row: &RowInfo) {
        log::info!("{}", row.header());
    }

    fn on_row_completed(&self, row: &RowInfo, successful: bool) {
        if !successful {
            log::info!("Row {} failed", row.row);
        }
        if let Some(footer) = row.footer() {
            log::info!("{}", footer);
        }
    }

    fn on_page_started(&self, page: u64) {
        log::info!("Processing page: {}", page);
    }

    fn on_page_completed(&self, page: u64, end: Option<&PageEnd>) {
        if let Some(end) = end {
            log::debug!("{}", end.message(page));
        }
    }

    fn on_phase(&self, message: &str) {
        log::info!("{}", message);
    }

    fn on_complete(&self, message: &str) {
        log::info!("{}", message);
    }
}
