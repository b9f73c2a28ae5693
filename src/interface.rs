use std::{borrow::Cow, sync::Arc};

use indexmap::IndexMap;

use crate::driver::ViewProvider;
use crate::error::{RenderResult, SafelateResult};
use crate::template::DeferredRender;

/// A ready made view model, for applications which don't have their own.
///
/// Objects keep their insertion order, so attribute dictionaries and URL
/// parameters render in the order they were added. With the `serde` feature,
/// any JSON document deserializes directly into a `Value`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// Output by `render()`.
    #[cfg_attr(feature = "serde", serde(skip))]
    Deferred(DeferredValue),
}

/// A shared [`DeferredRender`], compared by identity.
#[derive(Clone)]
pub struct DeferredValue(pub Arc<dyn DeferredRender + Send + Sync>);

impl std::fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeferredValue")
    }
}

impl PartialEq for DeferredValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Value {
    pub fn object<K: Into<String>, I: IntoIterator<Item = (K, Self)>>(entries: I) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn deferred<D: DeferredRender + Send + Sync + 'static>(deferred: D) -> Self {
        Self::Deferred(DeferredValue(Arc::new(deferred)))
    }

    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
            Self::Null
            | Self::Bool(_)
            | Self::Number(_)
            | Self::String(_)
            | Self::Deferred(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss, reason = "Views hold JSON numbers.")]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Value {
    #[allow(clippy::cast_precision_loss, reason = "Views hold JSON numbers.")]
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::Array(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// The [`ViewProvider`] for [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueProvider;

impl ViewProvider for ValueProvider {
    type View = Value;

    fn lookup(&self, view: &Value, path: &[String]) -> Option<Value> {
        path.iter()
            .try_fold(view, |value, key| value.get(key))
            .cloned()
    }

    fn to_string_representation<'v>(&self, value: &'v Value) -> Option<Cow<'v, str>> {
        match value {
            Value::String(text) => Some(Cow::Borrowed(text)),
            // Whole numbers display without a fractional part.
            Value::Number(number) => Some(Cow::Owned(number.to_string())),
            Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Deferred(_) => None,
        }
    }

    fn iterate_as_array(
        &self,
        value: &Value,
        each: &mut dyn FnMut(&Value) -> RenderResult<()>,
    ) -> RenderResult<()> {
        if let Value::Array(items) = value {
            for item in items {
                each(item)?;
            }
        }
        Ok(())
    }

    fn iterate_as_dictionary(
        &self,
        value: &Value,
        each: &mut dyn FnMut(&str, &Value) -> RenderResult<()>,
    ) -> RenderResult<()> {
        if let Value::Object(map) = value {
            for (key, item) in map {
                each(key, item)?;
            }
        }
        Ok(())
    }

    fn is_truthy(&self, value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(number)) => *number != 0.0 && !number.is_nan(),
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(_) | Value::Deferred(_)) => true,
        }
    }

    fn to_number(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Number(number) => Some(*number),
            Value::String(text) => text.trim().parse().ok(),
            Value::Null
            | Value::Bool(_)
            | Value::Array(_)
            | Value::Object(_)
            | Value::Deferred(_) => None,
        }
    }

    fn as_deferred<'v>(&self, value: &'v Value) -> Option<&'v dyn DeferredRender> {
        match value {
            Value::Deferred(deferred) => Some(&*deferred.0),
            Value::Null
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Array(_)
            | Value::Object(_) => None,
        }
    }
}

/// `SafelateInterface` is how applications work with a collection of named
/// templates, which can include each other with `template:name()`.
pub trait SafelateInterface {
    /// `add_template` parses a template and makes it available by name.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the template doesn't parse.
    fn add_template<N: Into<String>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> SafelateResult<()>;

    /// `render` renders the named template as a complete document.
    ///
    /// # Errors
    /// - If the template name is not found.
    /// - If rendering fails.
    fn render<N: AsRef<str>, P: ViewProvider>(
        &self,
        template_name: N,
        provider: &P,
        view: P::View,
    ) -> SafelateResult<String>;
}
