use crate::pagination::PaginationType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Why a listing traversal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoMorePages,
    MaxPages,
    MaxItems,
    EmptyPages,
    Cancelled,
    Error,
}

/// Hard limits applied to one traversal
#[derive(Debug, Clone, Copy)]
pub struct PaginationLimits {
    pub max_pages: u32,
    pub max_items: usize,
    pub empty_page_threshold: u32,
}

/// Bookkeeping for one listing traversal, owned by the caller
#[derive(Debug, Clone)]
pub struct PaginationSession {
    pub pagination_type: PaginationType,

    /// 1-based index of the page currently loaded
    pub current_page: u32,

    pub seen_item_keys: HashSet<String>,

    /// Pages in a row that contributed no new item
    pub consecutive_empty_pages: u32,

    pub items_collected: usize,

    pub stop_reason: Option<StopReason>,
}

impl PaginationSession {
    pub fn new(pagination_type: PaginationType) -> Self {
        Self {
            pagination_type,
            current_page: 1,
            seen_item_keys: HashSet::new(),
            consecutive_empty_pages: 0,
            items_collected: 0,
            stop_reason: None,
        }
    }

    /// Keeps the items whose key was not seen before, up to `max_items` in total
    ///
    /// A page that contributes nothing new counts toward the empty-page run.
    ///
    /// # Arguments
    ///
    /// * `items` - Items extracted from the current page
    /// * `key_of` - Returns an item's dedup key
    /// * `max_items` - Cap on items collected over the whole traversal
    ///
    /// # Returns
    ///
    /// The newly seen items, in page order
    pub fn record_items<T>(
        &mut self,
        items: Vec<T>,
        key_of: impl Fn(&T) -> &str,
        max_items: usize,
    ) -> Vec<T> {
        let mut fresh = Vec::new();

        for item in items {
            if self.items_collected >= max_items {
                break;
            }
            if self.seen_item_keys.insert(key_of(&item).to_string()) {
                self.items_collected += 1;
                fresh.push(item);
            }
        }

        if fresh.is_empty() {
            self.consecutive_empty_pages += 1;
        } else {
            self.consecutive_empty_pages = 0;
        }

        fresh
    }

    /// Returns the limit that ends the traversal before another advance, if any
    pub fn limit_reached(&self, limits: &PaginationLimits) -> Option<StopReason> {
        if self.items_collected >= limits.max_items {
            Some(StopReason::MaxItems)
        } else if self.consecutive_empty_pages >= limits.empty_page_threshold {
            Some(StopReason::EmptyPages)
        } else if self.current_page >= limits.max_pages {
            Some(StopReason::MaxPages)
        } else {
            None
        }
    }

    pub fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }

    /// Resumable summary stored in a checkpoint's `pagination_state`
    pub fn to_state(&self) -> serde_json::Value {
        serde_json::json!({
            "pagination_type": self.pagination_type,
            "current_page": self.current_page,
            "consecutive_empty_pages": self.consecutive_empty_pages,
            "items_collected": self.items_collected,
            "stop_reason": self.stop_reason,
        })
    }
}
