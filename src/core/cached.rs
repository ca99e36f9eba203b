//! Explicitly invalidated memoization.
//!
//! A [`Cached`] value is computed on first access and held until
//! [`Cached::invalidate`] is called. Nothing recomputes implicitly.

/// Lazily computed value with an explicit dirty flag.
#[derive(Clone, Debug)]
pub struct Cached<T> {
    value: Option<T>,
}

impl<T> Cached<T> {
    pub const fn empty() -> Self {
        Self { value: None }
    }

    /// Get the cached value, computing it if empty.
    pub fn get_or_insert_with(&mut self, f: impl FnOnce() -> T) -> &T {
        self.value.get_or_insert_with(f)
    }

    /// Get the cached value, computing it with a fallible function if empty.
    /// Nothing is cached on error.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, E> {
        let value = match self.value.take() {
            Some(value) => value,
            None => f()?,
        };
        Ok(self.value.insert(value))
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Store a freshly computed value, returning the previous one.
    pub fn replace(&mut self, value: T) -> Option<T> {
        self.value.replace(value)
    }

    /// Drop the cached value, returning it so the caller can release it.
    pub fn invalidate(&mut self) -> Option<T> {
        self.value.take()
    }
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self::empty()
    }
}
