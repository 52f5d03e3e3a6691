//! Offset pagination for list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;
pub const MAX_PAGE: u32 = 10_000;

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_PAGE).contains(&self.page) && (1..=MAX_LIMIT).contains(&self.limit)
    }
}

/// Position of a page within the whole listing. All zero when nothing matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub current_page: u32,
    pub page_size: u32,
    pub first_page: u32,
    pub last_page: u64,
    pub total_records: u64,
}

impl PageMetadata {
    pub fn new(page: Page, total: u64) -> Self {
        if total == 0 || page.limit == 0 {
            return Self::default();
        }
        Self {
            current_page: page.page,
            page_size: page.limit,
            first_page: 1,
            last_page: total.div_ceil(u64::from(page.limit)),
            total_records: total,
        }
    }
}

/// A page of results with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub metadata: PageMetadata,
}
