//! Page arithmetic for list views.

/// Page number, page size and total item count.
///
/// Pages are 1-based. Once the item count is known the page is clamped to
/// the existing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page: u64,
    items_per_page: u64,
    item_count: Option<u64>,
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page: 1,
            items_per_page: 1,
            item_count: None,
        }
    }
}

impl Paginator {
    pub fn new(page: u64, items_per_page: u64) -> Self {
        Self::default().with_page(page).with_items_per_page(items_per_page)
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.set_page(page);
        self
    }

    pub fn with_items_per_page(mut self, items_per_page: u64) -> Self {
        self.set_items_per_page(items_per_page);
        self
    }

    pub fn set_page(&mut self, page: u64) {
        self.page = page.max(1);
    }

    pub fn set_items_per_page(&mut self, items_per_page: u64) {
        self.items_per_page = items_per_page.max(1);
    }

    pub fn set_item_count(&mut self, item_count: u64) {
        self.item_count = Some(item_count);
    }

    /// Current page, clamped to the last page when the item count is known.
    pub fn page(&self) -> u64 {
        match self.last_page() {
            Some(last) => self.page.min(last),
            None => self.page,
        }
    }

    pub fn items_per_page(&self) -> u64 {
        self.items_per_page
    }

    pub fn item_count(&self) -> Option<u64> {
        self.item_count
    }

    /// Number of pages; an empty list still has one.
    pub fn page_count(&self) -> Option<u64> {
        self.item_count
            .map(|count| count.div_ceil(self.items_per_page).max(1))
    }

    pub fn last_page(&self) -> Option<u64> {
        self.page_count()
    }

    pub fn is_first(&self) -> bool {
        self.page() == 1
    }

    pub fn is_last(&self) -> bool {
        self.last_page().is_some_and(|last| self.page() >= last)
    }

    /// Index of the first item on the current page.
    pub fn offset(&self) -> u64 {
        (self.page() - 1) * self.items_per_page
    }

    /// Number of items on the current page.
    pub fn length(&self) -> u64 {
        match self.item_count {
            Some(count) => self
                .items_per_page
                .min(count.saturating_sub(self.offset())),
            None => self.items_per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_length() {
        let mut paginator = Paginator::new(3, 10);
        assert_eq!(paginator.offset(), 20);
        assert_eq!(paginator.length(), 10);

        paginator.set_item_count(25);
        assert_eq!(paginator.page_count(), Some(3));
        assert_eq!(paginator.length(), 5);
        assert!(paginator.is_last());
    }

    #[test]
    fn page_is_clamped_to_item_count() {
        let mut paginator = Paginator::new(9, 10);
        paginator.set_item_count(15);
        assert_eq!(paginator.page(), 2);
        assert_eq!(paginator.offset(), 10);

        paginator.set_item_count(0);
        assert_eq!(paginator.page(), 1);
        assert_eq!(paginator.length(), 0);
        assert!(paginator.is_first());
    }
}
