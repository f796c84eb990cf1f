//! Progress derived from the controller's current aggregate.

use serde::Serialize;

use crate::aggregation::FoldedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub fetched_pages: u32,
    /// 0 until the first page has been fetched.
    pub total_pages: u32,
}

impl Progress {
    /// Derive progress from an aggregate (or its absence).
    pub fn of<A: FoldedView>(aggregate: Option<&A>, page_size: u32) -> Self {
        match aggregate {
            Some(agg) => {
                let pagination = agg.pagination();
                Self {
                    fetched_pages: pagination.page_no,
                    total_pages: total_pages(pagination.total_rows, page_size),
                }
            }
            None => Self::default(),
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        if self.total_pages == 0 {
            None
        } else {
            Some((self.fetched_pages as f64 / self.total_pages as f64).min(1.0))
        }
    }
}

/// `ceil(total_rows / page_size)`, saturating at `u32::MAX`.
pub fn total_pages(total_rows: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    u32::try_from(total_rows.div_ceil(page_size)).unwrap_or(u32::MAX)
}
