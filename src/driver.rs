use std::borrow::Cow;
use std::cell::RefCell;
use std::ops::Deref;

use crate::ast::FunctionNode;
use crate::binding::FunctionBinding;
use crate::error::{RenderError, RenderResult};
use crate::template::{DeferredRender, Template};
use crate::Context;

/// Limit on nested drivers, created by `do()`, `template:name()` and included templates.
pub const MAX_DRIVER_NESTING: usize = 64;
pub const DEFAULT_LOCALE_ID: &str = "en";

/// `ViewProvider` is how the embedding application exposes its data to templates.
///
/// The template engine never looks inside views itself. Everything it needs to
/// know about them goes through this trait, so views can be any type the
/// application likes: JSON values, objects from a scripting engine, database
/// rows, and so on. [`crate::ValueProvider`] is a ready made implementation for
/// [`crate::Value`].
pub trait ViewProvider {
    type View: Clone;

    /// Follows `path` from `view`. An empty path is the view itself.
    ///
    /// Returns `None` if any part of the path is missing.
    fn lookup(&self, view: &Self::View, path: &[String]) -> Option<Self::View>;

    /// Converts a value to the text to be escaped into the output. `None` outputs nothing.
    fn to_string_representation<'v>(&self, value: &'v Self::View) -> Option<Cow<'v, str>>;

    /// Calls `each` for every entry when `value` can be treated as an array.
    /// Values which aren't array-like iterate over nothing.
    fn iterate_as_array(
        &self,
        value: &Self::View,
        each: &mut dyn FnMut(&Self::View) -> RenderResult<()>,
    ) -> RenderResult<()>;

    /// Calls `each` for every key and value when `value` can be treated as a dictionary.
    fn iterate_as_dictionary(
        &self,
        value: &Self::View,
        each: &mut dyn FnMut(&str, &Self::View) -> RenderResult<()>,
    ) -> RenderResult<()>;

    /// Null, empty strings, empty arrays, false and zero are falsy. Everything else is truthy.
    fn is_truthy(&self, value: Option<&Self::View>) -> bool;

    /// Numeric value, used for plural selection in translated strings.
    fn to_number(&self, value: &Self::View) -> Option<f64> {
        self.to_string_representation(value)
            .and_then(|text| text.trim().parse().ok())
    }

    /// Returns the deferred render held in `value`, for `render()`.
    fn as_deferred<'v>(&self, value: &'v Self::View) -> Option<&'v dyn DeferredRender> {
        let _ = value;
        None
    }

    /// Fallback for `render()` when the value isn't a deferred render. Returns
    /// false if the value can't be rendered as HTML.
    fn render_object(&self, value: &Self::View, output: &mut String) -> RenderResult<bool> {
        let _ = (value, output);
        Ok(false)
    }
}

/// Provides translations for `i()` and the locale used for plurals.
pub trait Translator {
    fn locale_id(&self) -> &str;

    fn translate<'t>(&self, category: &str, text: &'t str) -> Cow<'t, str>;
}

/// Resolves the templates used by `template:name()`.
pub trait IncludedTemplateResolver {
    fn included_template(&self, name: &str) -> Option<&Template>;
}

/// Renders functions which aren't built into the template language.
pub trait FunctionRenderer<P: ViewProvider> {
    /// Returns `Ok(false)` if the function isn't known to this renderer.
    fn render_function(
        &self,
        output: &mut String,
        binding: &mut FunctionBinding<'_, '_, P>,
    ) -> RenderResult<bool>;
}

/// Something owned by this driver, or shared with the driver it was nested in.
enum Shared<'r, T> {
    Owned(T),
    Borrowed(&'r T),
}

impl<T> Deref for Shared<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

struct Hooks<'r, P: ViewProvider> {
    translator: Option<&'r dyn Translator>,
    templates: Option<&'r dyn IncludedTemplateResolver>,
    functions: Option<&'r dyn FunctionRenderer<P>>,
    max_nesting_depth: usize,
    debug_comments: bool,
}

impl<P: ViewProvider> Clone for Hooks<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ViewProvider> Copy for Hooks<'_, P> {}

/// Where `yield()` in a nested render sends its output: the blocks of the
/// function which created the nested driver, rendered by the caller.
pub(crate) struct YieldBinding<'r, P: ViewProvider> {
    pub(crate) function: &'r FunctionNode,
    pub(crate) driver: &'r Driver<'r, P>,
    pub(crate) view: P::View,
}

/// The mutable state of a single render.
///
/// Nodes can't store anything while rendering because they're shared between
/// threads, so the driver carries the state instead. A driver renders exactly
/// one template once. `do()` and included templates render with nested drivers
/// which share the hooks, the remembered views and the content marks of their
/// parent.
///
/// ```
/// use safelate::{Driver, Template, Value, ValueProvider};
///
/// let template = Template::parse("<p> \"Hello \" name </p>", "hello").unwrap();
/// let view = Value::object([("name", Value::from("<World>"))]);
/// let mut driver = Driver::new(&ValueProvider, view);
/// assert_eq!(template.render(&mut driver).unwrap(), "<p>Hello &lt;World&gt;</p>");
/// ```
pub struct Driver<'r, P: ViewProvider> {
    provider: &'r P,
    root_view: P::View,
    hooks: Hooks<'r, P>,
    parent: Option<&'r Driver<'r, P>>,
    depth: usize,
    template: Option<&'r Template>,
    remembered_views: Shared<'r, RefCell<Vec<Option<P::View>>>>,
    content_marks: Shared<'r, RefCell<Vec<bool>>>,
    yield_binding: Option<YieldBinding<'r, P>>,
}

impl<P: ViewProvider> std::fmt::Debug for Driver<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("depth", &self.depth)
            .field("max_nesting_depth", &self.hooks.max_nesting_depth)
            .field("template", &self.last_template_name())
            .finish_non_exhaustive()
    }
}

impl<'r, P: ViewProvider> Driver<'r, P> {
    pub fn new(provider: &'r P, root_view: P::View) -> Self {
        Self {
            provider,
            root_view,
            hooks: Hooks {
                translator: None,
                templates: None,
                functions: None,
                max_nesting_depth: MAX_DRIVER_NESTING,
                debug_comments: false,
            },
            parent: None,
            depth: 0,
            template: None,
            remembered_views: Shared::Owned(RefCell::new(Vec::new())),
            content_marks: Shared::Owned(RefCell::new(Vec::new())),
            yield_binding: None,
        }
    }

    pub fn with_translator(mut self, translator: &'r dyn Translator) -> Self {
        self.hooks.translator = Some(translator);
        self
    }

    pub fn with_included_template_resolver(
        mut self,
        templates: &'r dyn IncludedTemplateResolver,
    ) -> Self {
        self.hooks.templates = Some(templates);
        self
    }

    pub fn with_function_renderer(mut self, functions: &'r dyn FunctionRenderer<P>) -> Self {
        self.hooks.functions = Some(functions);
        self
    }

    pub const fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.hooks.max_nesting_depth = depth;
        self
    }

    /// Wraps rendered templates in `<!-- BEGIN name -->` and `<!-- END name -->` comments.
    pub const fn with_debug_comments(mut self, enabled: bool) -> Self {
        self.hooks.debug_comments = enabled;
        self
    }

    pub(crate) const fn debug_comments(&self) -> bool {
        self.hooks.debug_comments
    }

    // --- View access ---

    pub const fn provider(&self) -> &'r P {
        self.provider
    }

    pub const fn root_view(&self) -> &P::View {
        &self.root_view
    }

    pub fn lookup(&self, view: &P::View, path: &[String]) -> Option<P::View> {
        self.provider.lookup(view, path)
    }

    pub fn value_to_string<'v>(&self, value: &'v P::View) -> Option<Cow<'v, str>> {
        self.provider.to_string_representation(value)
    }

    pub fn is_truthy(&self, value: Option<&P::View>) -> bool {
        self.provider.is_truthy(value)
    }

    pub fn iterate_over_value_as_array(
        &self,
        value: &P::View,
        each: &mut dyn FnMut(&P::View) -> RenderResult<()>,
    ) -> RenderResult<()> {
        self.provider.iterate_as_array(value, each)
    }

    pub fn iterate_over_value_as_dictionary(
        &self,
        value: &P::View,
        each: &mut dyn FnMut(&str, &P::View) -> RenderResult<()>,
    ) -> RenderResult<()> {
        self.provider.iterate_as_dictionary(value, each)
    }

    // --- Driver chain ---

    pub const fn parent(&self) -> Option<&Driver<'r, P>> {
        self.parent
    }

    pub const fn nesting_depth(&self) -> usize {
        self.depth
    }

    pub const fn template(&self) -> Option<&'r Template> {
        self.template
    }

    /// Name of the template nearest to this driver. Errors are blamed on it
    /// when they happen outside any template.
    pub fn last_template_name(&self) -> Option<&str> {
        let mut search = Some(self);
        while let Some(driver) = search {
            if let Some(template) = driver.template {
                return Some(template.name());
            }
            search = driver.parent;
        }
        None
    }

    /// Creates an error which reports the template being rendered.
    pub fn render_error<M: Into<String>>(&self, message: M) -> RenderError {
        RenderError {
            message: message.into(),
            template: self.last_template_name().map(str::to_string),
        }
    }

    /// Creates a driver for rendering with a new root view, sharing this driver's state.
    ///
    /// # Errors
    ///
    /// Fails when the maximum nesting depth would be exceeded, which stops
    /// recursive templates before they exhaust the stack.
    pub fn nested_with_view(&self, root_view: P::View) -> RenderResult<Driver<'_, P>> {
        let depth = self.depth.saturating_add(1);
        if depth > self.hooks.max_nesting_depth {
            return Err(self.render_error("Template rendering nesting depth exceeded."));
        }
        tracing::trace!(depth, "nested template driver");
        Ok(Driver {
            provider: self.provider,
            root_view,
            hooks: self.hooks,
            parent: Some(self),
            depth,
            template: None,
            remembered_views: Shared::Borrowed(&*self.remembered_views),
            content_marks: Shared::Borrowed(&*self.content_marks),
            yield_binding: None,
        })
    }

    // --- Render state ---

    pub(crate) fn setup_for_render(&mut self, template: &'r Template) -> RenderResult<()> {
        if self.template.is_some() {
            return Err(self.render_error("Can't use same Driver twice"));
        }
        if self.parent.is_some() {
            // Included templates allocate their own remembered view indices.
            self.remembered_views = Shared::Owned(RefCell::new(Vec::new()));
        }
        self.template = Some(template);
        Ok(())
    }

    pub(crate) fn remember_view(&self, index: usize, view: &P::View) {
        let mut views = self.remembered_views.borrow_mut();
        if views.len() <= index {
            // Allocated on demand, so templates without enclosing views pay nothing.
            let wanted = self
                .template
                .map_or(0, Template::number_of_remembered_views)
                .max(index.saturating_add(1));
            views.resize(wanted, None);
        }
        if let Some(slot) = views.get_mut(index) {
            *slot = Some(view.clone());
        }
    }

    pub(crate) fn recall_view(&self, index: usize) -> Option<P::View> {
        self.remembered_views.borrow().get(index).cloned().flatten()
    }

    pub(crate) fn set_binding_for_yield(
        &mut self,
        binding: YieldBinding<'r, P>,
    ) -> RenderResult<()> {
        if self.yield_binding.is_some() {
            return Err(self.render_error("Unexpected second binding for yield()"));
        }
        self.yield_binding = Some(binding);
        Ok(())
    }

    pub fn can_yield_to_block(&self, block: Option<&str>) -> bool {
        self.yield_binding
            .as_ref()
            .is_some_and(|binding| binding.function.yield_target(block).is_some())
    }

    /// Renders a block of the function which created this driver. The block is
    /// rendered in the caller's driver and view.
    pub(crate) fn render_yield(
        &self,
        block: Option<&str>,
        output: &mut String,
        context: Context,
    ) -> RenderResult<()> {
        let Some(binding) = &self.yield_binding else {
            return Err(self.render_error(
                "yield() used in a position where it cannot refer to a renderable block",
            ));
        };
        match binding.function.yield_target(block) {
            Some(node) => node.render(output, binding.driver, &binding.view, context),
            None => Ok(()),
        }
    }

    pub(crate) fn push_content_mark(&self) {
        self.content_marks.borrow_mut().push(false);
    }

    /// Returns whether content was marked since the matching push. Marks
    /// propagate outwards to any enclosing `ifContent()`.
    pub(crate) fn pop_content_mark(&self) -> bool {
        let mut marks = self.content_marks.borrow_mut();
        let marked = marks.pop().unwrap_or(false);
        if marked {
            if let Some(outer) = marks.last_mut() {
                *outer = true;
            }
        }
        marked
    }

    pub(crate) fn mark_content(&self) {
        if let Some(top) = self.content_marks.borrow_mut().last_mut() {
            *top = true;
        }
    }

    // --- Delegation ---

    pub(crate) fn included_template(&self, name: &str) -> RenderResult<&'r Template> {
        let Some(templates) = self.hooks.templates else {
            return Err(self.render_error(
                "No IncludedTemplateResolver available for rendering included templates",
            ));
        };
        templates
            .included_template(name)
            .ok_or_else(|| self.render_error(format!("Included template '{}' not found", name)))
    }

    pub(crate) fn render_function(
        &self,
        output: &mut String,
        binding: &mut FunctionBinding<'_, '_, P>,
    ) -> RenderResult<()> {
        let handled = match self.hooks.functions {
            Some(renderer) => renderer.render_function(output, binding)?,
            None => false,
        };
        if handled {
            Ok(())
        } else {
            Err(self.render_error(format!(
                "No renderable implementation for function {}()",
                binding.function_name()
            )))
        }
    }

    // --- Localisation ---

    pub fn translate_text<'t>(&self, category: &str, text: &'t str) -> Cow<'t, str> {
        match self.hooks.translator {
            Some(translator) => translator.translate(category, text),
            None => Cow::Borrowed(text),
        }
    }

    pub fn locale_id(&self) -> &str {
        self.hooks
            .translator
            .map_or(DEFAULT_LOCALE_ID, |translator| translator.locale_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Value, ValueProvider};

    #[test]
    #[ntest::timeout(100)]
    fn test_nesting_depth_is_bounded() {
        let driver = Driver::new(&ValueProvider, Value::Null).with_max_nesting_depth(2);
        let one = driver.nested_with_view(Value::Null).unwrap();
        let two = one.nested_with_view(Value::Null).unwrap();
        assert_eq!(two.nesting_depth(), 2);
        let err = two.nested_with_view(Value::Null).unwrap_err();
        assert!(err.message.contains("nesting depth exceeded"));
    }

    /// Nests until the limit is hit, returning the deepest depth reached.
    fn nest_until_error(driver: &Driver<'_, ValueProvider>) -> (usize, RenderError) {
        match driver.nested_with_view(Value::Null) {
            Ok(nested) => nest_until_error(&nested),
            Err(err) => (driver.nesting_depth(), err),
        }
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_default_nesting_depth() {
        let driver = Driver::new(&ValueProvider, Value::Null);
        assert_eq!(
            format!("{:?}", driver),
            "Driver { depth: 0, max_nesting_depth: 64, template: None, .. }"
        );
        let (depth, err) = nest_until_error(&driver);
        assert_eq!(depth, MAX_DRIVER_NESTING);
        assert_eq!(err.message, "Template rendering nesting depth exceeded.");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_remembered_views_are_shared_with_nested_drivers() {
        let driver = Driver::new(&ValueProvider, Value::Null);
        driver.remember_view(1, &Value::from("saved"));
        let nested = driver.nested_with_view(Value::Null).unwrap();
        assert_eq!(nested.recall_view(1), Some(Value::from("saved")));
        assert_eq!(nested.recall_view(0), None);
        assert_eq!(nested.recall_view(7), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_content_marks_propagate_outwards() {
        let driver = Driver::new(&ValueProvider, Value::Null);
        driver.push_content_mark();
        driver.push_content_mark();
        driver.mark_content();
        assert!(driver.pop_content_mark());
        assert!(driver.pop_content_mark());
        driver.push_content_mark();
        assert!(!driver.pop_content_mark());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_driver_cannot_be_used_twice() {
        let template = Template::parse("\"x\"", "twice").unwrap();
        let mut driver = Driver::new(&ValueProvider, Value::Null);
        assert_eq!(template.render(&mut driver).unwrap(), "x");
        let err = template.render(&mut driver).unwrap_err();
        assert_eq!(err.message, "Can't use same Driver twice");
        assert_eq!(err.template.as_deref(), Some("twice"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_locale_defaults_without_translator() {
        let driver = Driver::new(&ValueProvider, Value::Null);
        assert_eq!(driver.locale_id(), DEFAULT_LOCALE_ID);
        assert_eq!(driver.translate_text("template", "Hello"), "Hello");
    }
}
