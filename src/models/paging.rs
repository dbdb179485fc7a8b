//! Pagination helpers shared by list endpoints

use serde::{Deserialize, Serialize};

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListParams {
    /// Page number (1-indexed)
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl ListParams {
    /// Clamp to a valid page (>= 1) and page size (1..=100)
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

/// Paginated result container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, params: &ListParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        (self.total.max(0) as u64).div_ceil(self.per_page as u64) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}
