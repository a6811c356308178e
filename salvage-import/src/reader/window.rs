//! Row and page windows, and the pager that walks them.

use serde_json::Value;
use thiserror::Error;

use super::{PageEnd, Reader, ReaderError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("Row and page numbers start at 1")]
    ZeroIndex,

    #[error("'stop-row' cannot be less than 'start-row'")]
    StopRowBeforeStartRow,

    #[error("'stop-page' cannot be less than 'start-page'")]
    StopPageBeforeStartPage,

    #[error("'{0}' cannot be used in conjunction with row, start-row or stop-row options")]
    PageWithRowOptions(&'static str),

    #[error("'{0}' is only supported by paginated readers")]
    NotPaginated(&'static str),

    #[error("'page-size' must be greater than zero")]
    ZeroPageSize,
}

/// Window options as given by the caller. Every field is optional;
/// [`window`](Self::window) checks the combination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowOptions {
    /// A single row. Shorthand for equal start and stop rows.
    pub row: Option<u64>,
    pub start_row: Option<u64>,
    pub stop_row: Option<u64>,
    /// A single page.
    pub page: Option<u64>,
    pub start_page: Option<u64>,
    pub stop_page: Option<u64>,
    pub page_size: Option<u64>,
}

/// A validated window. Row numbers count from 1 across the whole source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWindow {
    pub start_row: u64,
    pub stop_row: Option<u64>,
    pub start_page: u64,
    pub stop_page: Option<u64>,
    /// `None` for readers that load everything in one go.
    pub page_size: Option<u64>,
}

impl WindowOptions {
    pub fn rows(start_row: u64, stop_row: Option<u64>) -> Self {
        Self {
            start_row: Some(start_row),
            stop_row,
            ..Self::default()
        }
    }

    pub fn pages(start_page: u64, stop_page: Option<u64>) -> Self {
        Self {
            start_page: Some(start_page),
            stop_page,
            ..Self::default()
        }
    }

    /// Validate against a reader. `default_page_size` is the reader's own
    /// default, `None` for readers without pagination.
    pub fn window(&self, default_page_size: Option<u64>) -> Result<ReadWindow, WindowError> {
        let start_row = self.row.or(self.start_row);
        let stop_row = self.row.or(self.stop_row);
        if start_row == Some(0) || stop_row == Some(0) {
            return Err(WindowError::ZeroIndex);
        }
        if let (Some(start), Some(stop)) = (start_row, stop_row)
            && stop < start
        {
            return Err(WindowError::StopRowBeforeStartRow);
        }

        let Some(default_page_size) = default_page_size else {
            for (name, value) in [
                ("page", self.page),
                ("start-page", self.start_page),
                ("stop-page", self.stop_page),
                ("page-size", self.page_size),
            ] {
                if value.is_some() {
                    return Err(WindowError::NotPaginated(name));
                }
            }
            return Ok(ReadWindow {
                start_row: start_row.unwrap_or(1),
                stop_row,
                start_page: 1,
                stop_page: None,
                page_size: None,
            });
        };

        if start_row.is_some() || stop_row.is_some() {
            for (name, value) in [
                ("page", self.page),
                ("start-page", self.start_page),
                ("stop-page", self.stop_page),
            ] {
                if value.is_some() {
                    return Err(WindowError::PageWithRowOptions(name));
                }
            }
        }
        let start_page = self.page.or(self.start_page);
        let stop_page = self.page.or(self.stop_page);
        if start_page == Some(0) || stop_page == Some(0) {
            return Err(WindowError::ZeroIndex);
        }
        if let (Some(start), Some(stop)) = (start_page, stop_page)
            && stop < start
        {
            return Err(WindowError::StopPageBeforeStartPage);
        }
        let page_size = self.page_size.unwrap_or(default_page_size);
        if page_size == 0 {
            return Err(WindowError::ZeroPageSize);
        }

        Ok(ReadWindow {
            start_row: start_row.unwrap_or(1),
            stop_row,
            start_page: start_page.unwrap_or(1),
            stop_page,
            page_size: Some(page_size),
        })
    }
}

impl ReadWindow {
    /// Number of rows the window covers, if it can be known.
    pub fn rows_to_process(&self, total_rows: Option<u64>) -> Option<u64> {
        let first = self.first_offset() + 1;
        let last = match (self.stop_row, self.stop_page, self.page_size) {
            (Some(stop), _, _) => Some(stop),
            (None, Some(stop_page), Some(size)) => {
                let page_end = stop_page * size;
                Some(total_rows.map_or(page_end, |t| t.min(page_end)))
            }
            _ => total_rows,
        }?;
        Some(last.saturating_sub(first - 1))
    }

    /// Zero-based offset of the first row in the window.
    fn first_offset(&self) -> u64 {
        let page_offset = self
            .page_size
            .map_or(0, |size| (self.start_page - 1) * size);
        (self.start_row - 1) + page_offset
    }
}

/// One fetched page. Readers without pagination produce a single page
/// with no number.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: Option<u64>,
    /// The full page size, which the last page may fall short of.
    pub size: u64,
    /// Source-wide number of the first row on the page.
    pub first_row: u64,
    pub rows: Vec<Value>,
    /// Set when no page follows this one.
    pub end: Option<PageEnd>,
}

/// Walks a [`ReadWindow`] page by page.
#[derive(Debug, Clone)]
pub struct Pager {
    window: ReadWindow,
    next_page: Option<u64>,
    total_rows: Option<u64>,
}

impl Pager {
    pub fn new(window: ReadWindow) -> Self {
        Self {
            next_page: Some(window.start_page),
            window,
            total_rows: None,
        }
    }

    pub fn window(&self) -> &ReadWindow {
        &self.window
    }

    /// Ask the reader for its row count, once.
    pub fn load_totals(&mut self, reader: &mut dyn Reader) -> Result<(), ReaderError> {
        self.total_rows = reader.total_rows()?;
        Ok(())
    }

    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    pub fn total_pages(&self) -> Option<u64> {
        let size = self.window.page_size?;
        Some(self.total_rows?.div_ceil(size))
    }

    fn is_last_page(&self, offset: u64, size: u64) -> bool {
        self.total_rows.is_some_and(|total| offset + size >= total)
    }

    /// The next page, or `None` once the window is exhausted.
    pub fn next_page(&mut self, reader: &mut dyn Reader) -> Result<Option<Page>, ReaderError> {
        let Some(number) = self.next_page.take() else {
            return Ok(None);
        };

        let Some(size) = self.window.page_size else {
            let offset = self.window.start_row - 1;
            let limit = self.window.stop_row.map(|stop| stop - offset);
            let rows = reader.fetch(offset, limit)?;
            return Ok(Some(Page {
                number: None,
                size: rows.len() as u64,
                first_row: offset + 1,
                rows,
                end: None,
            }));
        };

        let offset = self.window.first_offset() + (number - self.window.start_page) * size;
        let mut limit = size;
        if let Some(stop) = self.window.stop_row {
            limit = limit.min(stop.saturating_sub(offset));
        }
        let rows = if limit == 0 {
            Vec::new()
        } else {
            reader.fetch(offset, Some(limit))?
        };
        let received = rows.len() as u64;

        let end = if received == 0 {
            Some(PageEnd::EmptyPage)
        } else if self.is_last_page(offset, size) {
            Some(PageEnd::LastPage)
        } else if self.window.stop_page == Some(number) {
            Some(PageEnd::StopPage)
        } else if self
            .window
            .stop_row
            .is_some_and(|stop| offset + received >= stop)
        {
            Some(PageEnd::StopRow)
        } else if received < size {
            Some(PageEnd::ShortPage {
                received,
                expected: size,
            })
        } else {
            None
        };
        if end.is_none() {
            self.next_page = Some(number + 1);
        }

        Ok(Some(Page {
            number: Some(number),
            size,
            first_row: offset + 1,
            rows,
            end,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Serves `total` numbered rows.
    struct Numbers {
        total: u64,
        known: bool,
        fetches: Vec<(u64, Option<u64>)>,
    }

    impl Numbers {
        fn new(total: u64, known: bool) -> Self {
            Self {
                total,
                known,
                fetches: Vec::new(),
            }
        }
    }

    impl Reader for Numbers {
        fn source(&self) -> String {
            "numbers".into()
        }

        fn default_page_size(&self) -> Option<u64> {
            Some(4)
        }

        fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
            Ok(self.known.then_some(self.total))
        }

        fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError> {
            self.fetches.push((offset, limit));
            let end = limit.map_or(self.total, |l| (offset + l).min(self.total));
            Ok((offset..end).map(|i| json!(i + 1)).collect())
        }
    }

    fn pages(reader: &mut Numbers, options: WindowOptions) -> Vec<Page> {
        let window = options.window(reader.default_page_size()).unwrap();
        let mut pager = Pager::new(window);
        pager.load_totals(&mut *reader).unwrap();
        let mut pages = Vec::new();
        while let Some(page) = pager.next_page(&mut *reader).unwrap() {
            pages.push(page);
        }
        pages
    }

    #[test]
    fn row_and_page_options_conflict() {
        let options = WindowOptions {
            start_row: Some(3),
            stop_page: Some(2),
            ..Default::default()
        };
        assert_eq!(
            options.window(Some(10)),
            Err(WindowError::PageWithRowOptions("stop-page"))
        );
        assert_eq!(
            WindowOptions::rows(5, Some(4)).window(None),
            Err(WindowError::StopRowBeforeStartRow)
        );
        assert_eq!(
            WindowOptions::pages(3, Some(2)).window(Some(10)),
            Err(WindowError::StopPageBeforeStartPage)
        );
        assert_eq!(
            WindowOptions::pages(1, None).window(None),
            Err(WindowError::NotPaginated("start-page"))
        );
        assert_eq!(
            WindowOptions::rows(0, None).window(None),
            Err(WindowError::ZeroIndex)
        );
    }

    #[test]
    fn single_row_sets_both_ends() {
        let options = WindowOptions {
            row: Some(7),
            ..Default::default()
        };
        let window = options.window(Some(10)).unwrap();
        assert_eq!(window.start_row, 7);
        assert_eq!(window.stop_row, Some(7));
        assert_eq!(window.page_size, Some(10));
    }

    #[test]
    fn pages_end_on_the_last_page_when_the_total_is_known() {
        let mut reader = Numbers::new(10, true);
        let pages = pages(&mut reader, WindowOptions::default());
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].first_row, 1);
        assert_eq!(pages[1].first_row, 5);
        assert_eq!(pages[2].rows, vec![json!(9), json!(10)]);
        assert_eq!(pages[2].end, Some(PageEnd::LastPage));
    }

    #[test]
    fn unknown_totals_end_on_a_short_or_empty_page() {
        let mut reader = Numbers::new(10, false);
        let short = pages(&mut reader, WindowOptions::default());
        assert_eq!(
            short.last().unwrap().end,
            Some(PageEnd::ShortPage {
                received: 2,
                expected: 4
            })
        );

        let mut reader = Numbers::new(8, false);
        let empty = pages(&mut reader, WindowOptions::default());
        assert_eq!(empty.len(), 3);
        assert_eq!(empty[2].end, Some(PageEnd::EmptyPage));
    }

    #[test]
    fn row_windows_page_from_the_start_row() {
        let mut reader = Numbers::new(20, true);
        let pages = pages(&mut reader, WindowOptions::rows(6, Some(11)));
        let rows: Vec<Value> = pages.iter().flat_map(|p| p.rows.clone()).collect();
        assert_eq!(rows, (6..=11).map(|i| json!(i)).collect::<Vec<_>>());
        assert_eq!(pages.last().unwrap().end, Some(PageEnd::StopRow));
        assert_eq!(reader.fetches, vec![(5, Some(4)), (9, Some(2))]);
    }

    #[test]
    fn stop_page_is_honoured() {
        let mut reader = Numbers::new(40, true);
        let pages = pages(&mut reader, WindowOptions::pages(2, Some(3)));
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].first_row, 5);
        assert_eq!(pages[1].end, Some(PageEnd::StopPage));
    }

    #[test]
    fn unpaginated_readers_read_one_slice() {
        let window = WindowOptions::rows(2, Some(3)).window(None).unwrap();
        let mut reader = Numbers::new(10, false);
        let mut pager = Pager::new(window);
        let page = pager.next_page(&mut reader).unwrap().unwrap();
        assert_eq!(page.number, None);
        assert_eq!(page.first_row, 2);
        assert_eq!(page.rows, vec![json!(2), json!(3)]);
        assert!(pager.next_page(&mut reader).unwrap().is_none());
    }

    #[test]
    fn rows_to_process_follows_the_window() {
        let window = WindowOptions::rows(6, None).window(Some(4)).unwrap();
        assert_eq!(window.rows_to_process(Some(10)), Some(5));
        assert_eq!(window.rows_to_process(None), None);
        let window = WindowOptions::pages(2, Some(2)).window(Some(4)).unwrap();
        assert_eq!(window.rows_to_process(Some(100)), Some(4));
    }
}
