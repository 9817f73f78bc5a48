use serde::Serialize;

/// A page of a paginated listing
#[derive(Debug, Eq, PartialEq, Serialize)]
pub struct Page {
    /// One-based page number
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    #[serde(skip)]
    per_page: i64,
}

impl Page {
    /// Select a page of `count` items
    /// A missing or non-numeric page selects the first page, and a page out of range selects the last page.
    pub fn select(count: i64, per_page: i64, requested: Option<&str>) -> Self {
        // There is always at least one page, even if it is empty
        let num_pages = ((count + per_page - 1) / per_page).max(1);
        let number = match requested.map(|page| page.trim().parse::<i64>()) {
            None | Some(Err(_)) => 1,
            Some(Ok(number)) if (1..=num_pages).contains(&number) => number,
            Some(Ok(_)) => num_pages,
        };
        Self {
            number,
            num_pages,
            count,
            per_page,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}
