//! Book search and lookup.
//!
//! Search results are cached per query under `bookSearch{query=...}`, and every
//! book they contain is seeded into `book{bookId=...}` with a one-hour
//! [`BOOK_QUERY_CONFIG`], so opening a book from a search needs no request.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{RequestClient, RequestOptions};
use crate::query::{Query, QueryClient, QueryConfig, QueryError, QueryKey, QueryResult};

pub const BOOK_SCOPE: &str = "book";
pub const BOOK_SEARCH_SCOPE: &str = "bookSearch";

/// Books rarely change, so seeded entries stay fresh for an hour.
pub const BOOK_QUERY_CONFIG: QueryConfig =
    QueryConfig::new(Duration::from_secs(60 * 60), Duration::from_secs(60 * 60));

const LOADING_ID_PREFIX: &str = "loading-book";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub cover_image_url: String,
    pub publisher: String,
    pub synopsis: String,
}

impl Book {
    /// Placeholder shown while a book is being fetched.
    pub fn loading() -> Self {
        Self {
            id: LOADING_ID_PREFIX.to_string(),
            title: "Loading...".to_string(),
            author: "loading...".to_string(),
            cover_image_url: "book-placeholder.svg".to_string(),
            publisher: "Loading Publishing".to_string(),
            synopsis: "Loading...".to_string(),
        }
    }

    /// Returns `true` for [`loading`](Self::loading) placeholders.
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(LOADING_ID_PREFIX)
    }
}

/// Ten placeholders shown while a search is running.
pub fn loading_books() -> Vec<Book> {
    (0..10)
        .map(|index| Book {
            id: format!("{LOADING_ID_PREFIX}-{index}"),
            ..Book::loading()
        })
        .collect()
}

pub fn book_key(book_id: &str) -> QueryKey {
    QueryKey::new(BOOK_SCOPE).with_param("bookId", book_id)
}

pub fn book_search_key(query: &str) -> QueryKey {
    QueryKey::new(BOOK_SEARCH_SCOPE).with_param("query", query)
}

/// Caches `book` under its own key with [`BOOK_QUERY_CONFIG`].
pub fn set_query_data_for_book(queries: &QueryClient, book: &Book) {
    queries.set_query_data_with_config(book_key(&book.id), book.clone(), &BOOK_QUERY_CONFIG);
}

#[derive(Deserialize)]
struct BooksResponse {
    books: Vec<Book>,
}

#[derive(Deserialize)]
struct BookResponse {
    book: Book,
}

/// Book queries for an authenticated client.
#[derive(Debug, Clone)]
pub struct Books {
    client: RequestClient,
    queries: Arc<QueryClient>,
}

impl Books {
    pub fn new(client: RequestClient) -> Self {
        let queries = Arc::clone(client.session().queries());
        Self { client, queries }
    }

    /// Searches books, serving fresh cached results without a request.
    ///
    /// # Errors
    ///
    /// Returns the request error once the retry policy gives up.
    pub async fn search(&self, query: &str) -> Result<Vec<Book>, QueryError> {
        self.queries
            .fetch_query(&book_search_key(query), || self.fetch_search(query))
            .await
    }

    /// Cached results for `query`, or [`loading_books`] while there are none.
    pub fn cached_search(&self, query: &str) -> Vec<Book> {
        self.queries
            .get_query_data(&book_search_key(query))
            .unwrap_or_else(loading_books)
    }

    /// Fetches one book, served from the cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the request error once the retry policy gives up. A missing book
    /// (404) is not retried.
    pub async fn book(&self, book_id: &str) -> Result<Book, QueryError> {
        self.queries
            .fetch_query(&book_key(book_id), || self.fetch_book(book_id))
            .await
    }

    /// The cached book, or [`Book::loading`] while there is none.
    pub fn cached_book(&self, book_id: &str) -> Book {
        self.queries
            .get_query_data(&book_key(book_id))
            .unwrap_or_else(Book::loading)
    }

    pub fn set_query_data_for_book(&self, book: &Book) {
        set_query_data_for_book(&self.queries, book);
    }

    /// Drops every cached search and prefetches the empty one.
    pub async fn refetch_search(&self) {
        let removed = self.queries.remove(&QueryKey::new(BOOK_SEARCH_SCOPE));
        debug!(removed, "book searches dropped");
        self.queries
            .prefetch_query(&book_search_key(""), || self.fetch_search(""))
            .await;
    }

    /// Observes the results for `query`.
    pub fn watch_search(&self, query: &str) -> BoxStream<'static, QueryResult<Vec<Book>>> {
        let books = self.clone();
        let owned = query.to_string();
        Query::new(
            book_search_key(query),
            move || {
                let books = books.clone();
                let query = owned.clone();
                Box::pin(async move { books.fetch_search(&query).await })
            },
            Arc::clone(&self.queries),
        )
        .stream()
    }

    /// Observes one book.
    pub fn watch_book(&self, book_id: &str) -> BoxStream<'static, QueryResult<Book>> {
        let books = self.clone();
        let owned = book_id.to_string();
        Query::new(
            book_key(book_id),
            move || {
                let books = books.clone();
                let book_id = owned.clone();
                Box::pin(async move { books.fetch_book(&book_id).await })
            },
            Arc::clone(&self.queries),
        )
        .stream()
    }

    async fn fetch_search(&self, query: &str) -> Result<Vec<Book>, QueryError> {
        let endpoint = format!("books?query={}", urlencoding::encode(query));
        let response: BooksResponse = self
            .client
            .request_json(&endpoint, RequestOptions::new())
            .await?;

        for book in &response.books {
            self.set_query_data_for_book(book);
        }
        Ok(response.books)
    }

    async fn fetch_book(&self, book_id: &str) -> Result<Book, QueryError> {
        let endpoint = format!("books/{}", urlencoding::encode(book_id));
        let response: BookResponse = self
            .client
            .request_json(&endpoint, RequestOptions::new())
            .await?;
        Ok(response.book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::auth::{MemoryTokenStore, Session};
    use crate::query::RetryPolicy;
    use reqwest::Method;
    use serde_json::json;

    fn books() -> (Books, MockTransport) {
        let mock = MockTransport::new();
        let queries = Arc::new(QueryClient::with_config(
            QueryConfig::default().with_retry(RetryPolicy::NEVER),
        ));
        let session = Session::new(Arc::new(MemoryTokenStore::new()), queries);
        let client = RequestClient::new(Arc::new(mock.clone()), "http://api.test", session)
            .with_token("t");
        (Books::new(client), mock)
    }

    fn book_json(id: &str, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "author": "Frank Herbert",
            "coverImageUrl": "cover.png",
            "publisher": "Chilton",
            "synopsis": "Spice",
            "pageCount": 412,
        })
    }

    #[test]
    fn test_loading_placeholders() {
        let book = Book::loading();
        assert_eq!(book.title, "Loading...");
        assert!(book.is_placeholder());

        let books = loading_books();
        assert_eq!(books.len(), 10);
        assert_eq!(books[3].id, "loading-book-3");
        assert!(books.iter().all(Book::is_placeholder));
    }

    #[test]
    fn test_keys() {
        assert_eq!(book_key("b1").param("bookId"), Some("b1"));
        assert!(book_search_key("dune").matches(&QueryKey::new(BOOK_SEARCH_SCOPE)));
        assert!(!book_key("b1").matches(&QueryKey::new(BOOK_SEARCH_SCOPE)));
    }

    #[tokio::test]
    async fn test_search_seeds_books() {
        let (books, mock) = books();
        mock.respond(
            Method::GET,
            "books?query=dune%20messiah",
            200,
            json!({"books": [book_json("b1", "Dune Messiah")]}),
        );

        let results = books.search("dune messiah").await.expect("search should succeed");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cover_image_url, "cover.png");

        // Seeded with the long-lived config, so no request is needed.
        assert_eq!(books.cached_book("b1").title, "Dune Messiah");
        let book = books.book("b1").await.expect("book should come from cache");
        assert_eq!(book.id, "b1");
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_fallbacks() {
        let (books, _mock) = books();
        assert_eq!(books.cached_search("x"), loading_books());
        assert_eq!(books.cached_book("missing"), Book::loading());
    }

    #[tokio::test]
    async fn test_book_not_found() {
        let (books, mock) = books();
        mock.respond(Method::GET, "books/nope", 404, json!({"message": "No book"}));

        let error = books.book("nope").await.expect_err("book should be missing");
        assert_eq!(error.status(), Some(404));
        assert_eq!(mock.count(&Method::GET, "books/nope"), 1);
    }

    #[tokio::test]
    async fn test_refetch_search() {
        let (books, mock) = books();
        mock.respond(Method::GET, "books?query=dune", 200, json!({"books": []}));
        mock.respond(
            Method::GET,
            "books?query=",
            200,
            json!({"books": [book_json("b2", "Emma")]}),
        );
        books.search("dune").await.expect("search should succeed");

        books.refetch_search().await;

        let queries = books.client.session().queries();
        assert_eq!(queries.get_query_data::<Vec<Book>>(&book_search_key("dune")), None);
        let empty = queries
            .get_query_data::<Vec<Book>>(&book_search_key(""))
            .expect("empty search should be prefetched");
        assert_eq!(empty[0].title, "Emma");
    }
}
