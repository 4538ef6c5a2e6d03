use std::fmt;

/// The discriminant of an [`AsyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing has been started yet, or the operation was reset.
    Idle,
    /// A unit of work is in flight.
    Pending,
    /// The last unit of work produced a value.
    Resolved,
    /// The last unit of work failed.
    Rejected,
}

impl Status {
    /// Returns the lowercase name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state held by an [`AsyncOperation`](super::AsyncOperation).
///
/// Data only exists in [`Resolved`](AsyncState::Resolved) and errors only in
/// [`Rejected`](AsyncState::Rejected), so an idle state never carries either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncState<T, E> {
    /// No work has been started.
    Idle,
    /// Work is in flight.
    Pending,
    /// Work finished with a value.
    Resolved(T),
    /// Work finished with an error.
    Rejected(E),
}

impl<T, E> Default for AsyncState<T, E> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T, E> AsyncState<T, E> {
    /// Returns the status of this state.
    pub const fn status(&self) -> Status {
        match self {
            Self::Idle => Status::Idle,
            Self::Pending => Status::Pending,
            Self::Resolved(_) => Status::Resolved,
            Self::Rejected(_) => Status::Rejected,
        }
    }

    /// Returns the data if the state is resolved, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Resolved(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the state is rejected, otherwise `None`.
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }

    /// Consumes the state and returns its data, if any.
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Resolved(data) => Some(data),
            _ => None,
        }
    }

    /// Returns `true` if nothing has been started.
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns `true` if work is in flight.
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns `true` if the last unit of work produced a value.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Returns `true` if the last unit of work failed.
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl<T, E> From<Result<T, E>> for AsyncState<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::Resolved(data),
            Err(error) => Self::Rejected(error),
        }
    }
}
