use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};
use crate::models::audit::AuditLog;
use crate::models::member::OrgMember;
use crate::models::team::TeamMember;
use crate::models::work_log::WorkLog;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub limit: u32,
}

impl PageParams {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> AppResult<Self> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_LIMIT);

        if page == 0 {
            return Err(AppError::validation("page must be at least 1"));
        }
        if limit == 0 || limit > MAX_LIMIT {
            return Err(AppError::validation(format!("limit must be between 1 and {MAX_LIMIT}")));
        }

        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(params: PageParams, total: i64) -> Self {
        let limit = i64::from(params.limit);
        let total = total.max(0);
        let total_pages = (total + limit - 1) / limit;
        let page = i64::from(params.page);

        Self {
            page: params.page,
            limit: params.limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[aliases(
    PaginatedMembers = Paginated<OrgMember>,
    PaginatedTeamMembers = Paginated<TeamMember>,
    PaginatedWorkLogs = Paginated<WorkLog>,
    PaginatedAuditLogs = Paginated<AuditLog>
)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, params: PageParams, total: i64) -> Self {
        Self {
            items,
            pagination: Pagination::new(params, total),
        }
    }
}

/// `%term%` for a LIKE clause, or `None` for a blank search.
pub fn like_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(page: u32, limit: u32, total: i64) -> Pagination {
        Pagination::new(PageParams::new(Some(page), Some(limit)).unwrap(), total)
    }

    #[test]
    fn twenty_three_rows_make_three_pages() {
        let first = meta(1, 10, 23);
        assert_eq!(first.total_pages, 3);
        assert!(!first.has_prev);
        assert!(first.has_next);

        let last = meta(3, 10, 23);
        assert!(!last.has_next);
        assert!(last.has_prev);
    }

    #[test]
    fn empty_result_has_no_pages() {
        let m = meta(1, 10, 0);
        assert_eq!(m.total_pages, 0);
        assert!(!m.has_next);
        assert!(!m.has_prev);
    }

    #[test]
    fn exact_multiple() {
        assert_eq!(meta(2, 10, 20).total_pages, 2);
        assert!(!meta(2, 10, 20).has_next);
    }

    #[test]
    fn bounds_are_validated() {
        assert!(PageParams::new(Some(0), None).is_err());
        assert!(PageParams::new(None, Some(0)).is_err());
        assert!(PageParams::new(None, Some(101)).is_err());
        let defaults = PageParams::new(None, None).unwrap();
        assert_eq!((defaults.page, defaults.limit), (1, 10));
        assert_eq!(PageParams::new(Some(3), Some(25)).unwrap().offset(), 50);
    }

    #[test]
    fn like_pattern_ignores_blank() {
        assert_eq!(like_pattern(Some("  ")), None);
        assert_eq!(like_pattern(Some("Ada")).as_deref(), Some("%ada%"));
    }
}
