use std::collections::BTreeMap;
use std::fmt;

/// A structured cache key: a scope name plus optional parameters.
///
/// Keys double as filters. A filter matches every key with the same scope whose
/// parameters include all of the filter's parameters, so `list-items` matches
/// every list-item key and `bookSearch` matches every search.
///
/// # Example
///
/// ```
/// use bookshelf::query::QueryKey;
///
/// let key = QueryKey::new("book").with_param("bookId", "42");
/// assert_eq!(key.to_string(), "book{bookId=42}");
/// assert!(key.matches(&QueryKey::new("book")));
/// assert!(!key.matches(&QueryKey::new("book").with_param("bookId", "7")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    scope: String,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    /// Creates a key with no parameters.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter to the key.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Returns the scope name.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the value of a parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns `true` if this key is selected by `filter`.
    pub fn matches(&self, filter: &Self) -> bool {
        self.scope == filter.scope
            && filter
                .params
                .iter()
                .all(|(name, value)| self.params.get(name) == Some(value))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope)?;
        if self.params.is_empty() {
            return Ok(());
        }

        f.write_str("{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

impl From<&str> for QueryKey {
    fn from(scope: &str) -> Self {
        Self::new(scope)
    }
}

impl From<String> for QueryKey {
    fn from(scope: String) -> Self {
        Self::new(scope)
    }
}
