//! Common API utilities and shared types
//!
//! This module contains shared utilities used across multiple API endpoints.

use serde::Deserialize;

use crate::models::ListParams;

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size
pub fn default_per_page() -> u32 {
    20
}

/// Basic pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PaginationQuery {
    /// Clamped list parameters for the service layer
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamp() {
        let query: PaginationQuery = serde_json::from_str("{}").unwrap();
        let params = query.params();
        assert_eq!((params.page, params.per_page), (1, 20));

        let query = PaginationQuery {
            page: 0,
            per_page: 1000,
        };
        let params = query.params();
        assert_eq!((params.page, params.per_page), (1, 100));
    }
}
