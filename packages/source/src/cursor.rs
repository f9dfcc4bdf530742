//! Resumable pagination state.

use serde::{Deserialize, Serialize};

use crate::gov::Frontier;

/// Where a connector is within a query. Serializable so a harvest can be
/// logged and resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Before the first page.
    Start,
    /// Record offset (`start`, `retstart`, `offset`, bioRxiv cursor).
    Offset {
        /// Records already consumed.
        offset: u64,
    },
    /// 1-based page number.
    Page {
        /// Page to fetch next.
        page: u32,
    },
    /// Opaque continuation token (OAI `resumptionToken`, Crossref cursor).
    Token {
        /// Token returned by the previous page.
        token: String,
        /// Records consumed before this token.
        #[serde(default)]
        consumed: u64,
    },
    /// Crawl frontier.
    Frontier(Box<Frontier>),
}

impl Cursor {
    /// Offset of an offset cursor; `0` for [`Cursor::Start`].
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self {
            Self::Offset { offset } => *offset,
            _ => 0,
        }
    }

    /// Page of a page cursor; `1` for [`Cursor::Start`].
    #[must_use]
    pub const fn page(&self) -> u32 {
        match self {
            Self::Page { page } => *page,
            _ => 1,
        }
    }

    /// Token of a token cursor.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Records consumed so far by an offset or token cursor.
    #[must_use]
    pub const fn consumed(&self) -> u64 {
        match self {
            Self::Offset { offset } => *offset,
            Self::Token { consumed, .. } => *consumed,
            _ => 0,
        }
    }
}

/// Page-size and result-cap bookkeeping shared by offset and page based
/// APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    /// Requested page size.
    pub page_size: u32,
    /// Stop after this many records per query.
    pub max_results: Option<u64>,
}

impl Paging {
    /// Creates paging settings; a zero page size is bumped to one.
    #[must_use]
    pub fn new(page_size: u32, max_results: Option<u64>) -> Self {
        Self {
            page_size: page_size.max(1),
            max_results,
        }
    }

    /// Whether the result cap has been reached at `offset`.
    #[must_use]
    pub fn exhausted(&self, offset: u64) -> bool {
        self.max_results.is_some_and(|max| offset >= max)
    }

    /// Records to request for the page starting at `offset`, never reaching
    /// past `max_results`.
    #[must_use]
    pub fn request_size(&self, offset: u64) -> u32 {
        let remaining = self
            .max_results
            .map_or(u64::MAX, |max| max.saturating_sub(offset));
        u32::try_from(remaining.min(u64::from(self.page_size))).unwrap_or(self.page_size)
    }

    /// Offset of the page after one that started at `offset` and returned
    /// `returned` records, or `None` when iteration is over: empty page,
    /// short page, result cap reached, or reported total reached.
    #[must_use]
    pub fn next_offset(&self, offset: u64, returned: usize, total: Option<u64>) -> Option<u64> {
        if returned == 0 {
            return None;
        }
        let requested = u64::from(self.request_size(offset));
        let returned = returned as u64;
        let next = offset + returned;
        if returned < requested || self.exhausted(next) {
            return None;
        }
        if total.is_some_and(|total| next >= total) {
            return None;
        }
        Some(next)
    }

    /// Page-number variant of [`next_offset`](Self::next_offset).
    #[must_use]
    pub fn next_page(&self, page: u32, returned: usize, total: Option<u64>) -> Option<u32> {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(self.page_size);
        self.next_offset(offset, returned, total).map(|_| page + 1)
    }
}
