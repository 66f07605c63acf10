//! Pagination parameters and the page envelope returned by paginated lists.

use serde::{Deserialize, Serialize};

use crate::error::{CrudError, CrudResult};

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;

/// `?page=&size=` query parameters (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

fn first_page() -> u64 {
    1
}

fn default_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: first_page(),
            size: default_size(),
        }
    }
}

impl PageParams {
    pub fn new(page: u64, size: u64) -> Self {
        Self { page, size }
    }

    pub fn validate(&self) -> CrudResult<()> {
        if self.page < 1 {
            return Err(CrudError::validation("page must be >= 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.size) {
            return Err(CrudError::validation(format!(
                "size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> PageWindow {
        PageWindow {
            offset: (self.page.saturating_sub(1)).saturating_mul(self.size),
            limit: self.size,
        }
    }
}

/// Row window (`OFFSET`/`LIMIT`) handed to stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, params: PageParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            size: params.size,
            pages: total.div_ceil(params.size.max(1)),
        }
    }
}
