use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Fixed page size for catalog listings.
pub const PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number (default 1).
    pub page: Option<u64>,
}

impl PageParams {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> usize {
        ((self.page() - 1) as usize) * PAGE_SIZE
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

pub fn paginated<T: Serialize>(items: Vec<T>, total: u64, page: u64) -> Paginated<T> {
    let pages = total.div_ceil(PAGE_SIZE as u64).max(1);
    Paginated {
        items,
        total,
        page,
        pages,
    }
}
