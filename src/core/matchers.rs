//! Describable predicates for eventual assertions
//!
//! A [`Matcher`] is a predicate that can also describe what it expects and
//! why a given value failed, so that timeouts report what was actually seen.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

/// Predicate with a human readable description
pub trait Matcher<T: ?Sized> {
    /// Whether `actual` satisfies this matcher
    fn matches(&self, actual: &T) -> bool;

    /// What this matcher expects, e.g. `equal to "abc"`
    fn describe(&self) -> String;

    /// Why `actual` did not match
    fn describe_mismatch(&self, actual: &T) -> String
    where
        T: Debug,
    {
        format!("was {:?}", actual)
    }
}

impl<T: ?Sized, M: Matcher<T> + ?Sized> Matcher<T> for &M {
    fn matches(&self, actual: &T) -> bool {
        (**self).matches(actual)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn describe_mismatch(&self, actual: &T) -> String
    where
        T: Debug,
    {
        (**self).describe_mismatch(actual)
    }
}

/// Matches values equal to the expected one
#[derive(Debug, Clone)]
pub struct EqualTo<T>(T);

pub fn equal_to<T>(expected: T) -> EqualTo<T> {
    EqualTo(expected)
}

impl<T: PartialEq + Debug> Matcher<T> for EqualTo<T> {
    fn matches(&self, actual: &T) -> bool {
        actual == &self.0
    }

    fn describe(&self) -> String {
        format!("equal to {:?}", self.0)
    }
}

/// Matches any `Some` value
#[derive(Debug, Clone, Copy, Default)]
pub struct Present;

pub fn present() -> Present {
    Present
}

impl<T> Matcher<Option<T>> for Present {
    fn matches(&self, actual: &Option<T>) -> bool {
        actual.is_some()
    }

    fn describe(&self) -> String {
        "present".to_string()
    }
}

/// Matches `Some(v)` where `v` satisfies the inner matcher
#[derive(Debug, Clone)]
pub struct PresentAnd<M>(M);

pub fn present_and<M>(inner: M) -> PresentAnd<M> {
    PresentAnd(inner)
}

impl<T, M: Matcher<T>> Matcher<Option<T>> for PresentAnd<M> {
    fn matches(&self, actual: &Option<T>) -> bool {
        actual.as_ref().is_some_and(|value| self.0.matches(value))
    }

    fn describe(&self) -> String {
        format!("present and {}", self.0.describe())
    }

    fn describe_mismatch(&self, actual: &Option<T>) -> String
    where
        Option<T>: Debug,
    {
        match actual {
            None => "was absent".to_string(),
            Some(_) => format!("was {:?}", actual),
        }
    }
}

/// Collections with a length
pub trait HasLen {
    fn length(&self) -> usize;
}

impl<T> HasLen for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V, S> HasLen for HashMap<K, V, S> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V> HasLen for BTreeMap<K, V> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> HasLen for [T] {
    fn length(&self) -> usize {
        self.len()
    }
}

/// Matches collections of exactly `n` elements
#[derive(Debug, Clone, Copy)]
pub struct HasLength(usize);

pub fn has_len(expected: usize) -> HasLength {
    HasLength(expected)
}

impl<C: HasLen + ?Sized> Matcher<C> for HasLength {
    fn matches(&self, actual: &C) -> bool {
        actual.length() == self.0
    }

    fn describe(&self) -> String {
        format!("with length {}", self.0)
    }

    fn describe_mismatch(&self, actual: &C) -> String
    where
        C: Debug,
    {
        format!("had length {}", actual.length())
    }
}

/// Closure predicate with an explicit description
pub struct Satisfies<T: ?Sized> {
    description: String,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

pub fn satisfies<T: ?Sized, F>(description: impl Into<String>, predicate: F) -> Satisfies<T>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Satisfies {
        description: description.into(),
        predicate: Arc::new(predicate),
    }
}

impl<T: ?Sized> Clone for Satisfies<T> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T: ?Sized> Matcher<T> for Satisfies<T> {
    fn matches(&self, actual: &T) -> bool {
        (self.predicate)(actual)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
