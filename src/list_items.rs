//! The reading list: list items and their optimistic mutations.
//!
//! The whole list is cached under one key, `list-items`. The create, update and
//! remove mutations each write their expected outcome into that entry straight
//! away, roll it back if the server refuses, and invalidate it when they settle.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::stream::BoxStream;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{RequestClient, RequestOptions};
use crate::books::{Book, set_query_data_for_book};
use crate::mutation::Mutation;
use crate::query::{Query, QueryClient, QueryError, QueryKey, QueryResult};

pub const LIST_ITEMS_SCOPE: &str = "list-items";

/// Rating of an item that hasn't been rated.
pub const UNRATED: i32 = -1;

const fn unrated() -> i32 {
    UNRATED
}

/// A book on the user's reading list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub id: String,
    pub book_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "unrated")]
    pub rating: i32,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub start_date: Option<i64>,
    /// Milliseconds since the Unix epoch. `None` while still reading.
    #[serde(default)]
    pub finish_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<Book>,
}

impl ListItem {
    pub fn is_finished(&self) -> bool {
        self.finish_date.is_some()
    }

    /// Placeholder appended while the server creates the real item.
    fn optimistic(book_id: &str) -> Self {
        Self {
            id: format!("optimistic-{book_id}"),
            book_id: book_id.to_string(),
            owner_id: String::new(),
            notes: String::new(),
            rating: UNRATED,
            start_date: Some(now_millis()),
            finish_date: None,
            book: None,
        }
    }
}

/// Input of the create mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewListItem {
    pub book_id: String,
}

impl NewListItem {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
        }
    }
}

/// Partial update of one list item. Unset fields are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    /// `Some(None)` clears the finish date (marks the book unread).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_date: Option<Option<i64>>,
}

impl ListItemUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            notes: None,
            rating: None,
            finish_date: None,
        }
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub const fn rating(mut self, rating: i32) -> Self {
        self.rating = Some(rating);
        self
    }

    #[must_use]
    pub const fn finish_date(mut self, finish_date: Option<i64>) -> Self {
        self.finish_date = Some(finish_date);
        self
    }

    /// Merges the set fields into `item`.
    pub fn apply(&self, item: &mut ListItem) {
        if let Some(notes) = &self.notes {
            item.notes.clone_from(notes);
        }
        if let Some(rating) = self.rating {
            item.rating = rating;
        }
        if let Some(finish_date) = self.finish_date {
            item.finish_date = finish_date;
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItemsResponse {
    list_items: Vec<ListItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItemResponse {
    list_item: ListItem,
}

pub fn list_items_key() -> QueryKey {
    QueryKey::new(LIST_ITEMS_SCOPE)
}

/// Reading-list queries and mutations for an authenticated client.
#[derive(Debug, Clone)]
pub struct ListItems {
    client: RequestClient,
    queries: Arc<QueryClient>,
}

impl ListItems {
    pub fn new(client: RequestClient) -> Self {
        let queries = Arc::clone(client.session().queries());
        Self { client, queries }
    }

    /// Fetches the reading list, served from the cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the request error once the retry policy gives up.
    pub async fn list(&self) -> Result<Vec<ListItem>, QueryError> {
        self.queries
            .fetch_query(&list_items_key(), || self.fetch())
            .await
    }

    /// The cached reading list, stale or not.
    pub fn cached(&self) -> Option<Vec<ListItem>> {
        self.queries.get_query_data(&list_items_key())
    }

    /// The cached item for `book_id`, reflecting optimistic writes.
    pub fn list_item(&self, book_id: &str) -> Option<ListItem> {
        self.cached()?
            .into_iter()
            .find(|item| item.book_id == book_id)
    }

    /// Observes the reading list.
    pub fn watch(&self) -> BoxStream<'static, QueryResult<Vec<ListItem>>> {
        let list_items = self.clone();
        Query::new(
            list_items_key(),
            move || {
                let list_items = list_items.clone();
                Box::pin(async move { list_items.fetch().await })
            },
            Arc::clone(&self.queries),
        )
        .stream()
    }

    /// Adds a book to the reading list.
    ///
    /// A placeholder item is appended while the request is in flight. Nothing
    /// is appended if the list isn't loaded or already has the book.
    pub fn create_mutation(&self) -> Mutation<NewListItem, ListItem, Vec<ListItem>> {
        let client = self.client.clone();
        Mutation::new(Arc::clone(&self.queries), list_items_key(), move |input: NewListItem| {
            let client = client.clone();
            Box::pin(async move {
                let options = RequestOptions::new().data(json!({"bookId": input.book_id}));
                let response: ListItemResponse =
                    client.request_json(LIST_ITEMS_SCOPE, options).await?;
                Ok(response.list_item)
            })
        })
        .optimistic(|items: Option<Vec<ListItem>>, input: &NewListItem| {
            let mut items = items?;
            if items.iter().any(|item| item.book_id == input.book_id) {
                return None;
            }
            items.push(ListItem::optimistic(&input.book_id));
            Some(items)
        })
    }

    /// Updates notes, rating or finish date of an item.
    pub fn update_mutation(&self) -> Mutation<ListItemUpdate, ListItem, Vec<ListItem>> {
        let client = self.client.clone();
        Mutation::new(Arc::clone(&self.queries), list_items_key(), move |update: ListItemUpdate| {
            let client = client.clone();
            Box::pin(async move {
                let options = RequestOptions::new()
                    .method(Method::PUT)
                    .data(serde_json::to_value(&update)?);
                let endpoint = format!("{LIST_ITEMS_SCOPE}/{}", update.id);
                let response: ListItemResponse = client.request_json(&endpoint, options).await?;
                Ok(response.list_item)
            })
        })
        .optimistic(|items: Option<Vec<ListItem>>, update: &ListItemUpdate| {
            let items = items?
                .into_iter()
                .map(|mut item| {
                    if item.id == update.id {
                        update.apply(&mut item);
                    }
                    item
                })
                .collect();
            Some(items)
        })
    }

    /// Removes an item by id.
    pub fn remove_mutation(&self) -> Mutation<String, (), Vec<ListItem>> {
        let client = self.client.clone();
        Mutation::new(Arc::clone(&self.queries), list_items_key(), move |id: String| {
            let client = client.clone();
            Box::pin(async move {
                let options = RequestOptions::new().method(Method::DELETE);
                client
                    .request(&format!("{LIST_ITEMS_SCOPE}/{id}"), options)
                    .await?;
                Ok(())
            })
        })
        .optimistic(|items: Option<Vec<ListItem>>, id: &String| {
            let items = items?.into_iter().filter(|item| item.id != *id).collect();
            Some(items)
        })
    }

    async fn fetch(&self) -> Result<Vec<ListItem>, QueryError> {
        let response: ListItemsResponse = self
            .client
            .request_json(LIST_ITEMS_SCOPE, RequestOptions::new())
            .await?;

        for book in response.list_items.iter().filter_map(|item| item.book.as_ref()) {
            set_query_data_for_book(&self.queries, book);
        }
        Ok(response.list_items)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
