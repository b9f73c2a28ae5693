use std::sync::Arc;

use crate::Context;
use crate::ast::Node;
use crate::driver::{Driver, ViewProvider};
use crate::error::{RenderResult, SafelateError, SafelateResult};
use crate::escape::escape_into;
use crate::parser::{self, DefaultParserConfiguration, ParserConfiguration};

/// A parsed template, ready to render.
///
/// Parsing checks the template is well formed HTML and that every value will
/// be escaped for the place it appears in the document, so a template which
/// parses can't be used to inject markup. Templates are immutable and can be
/// rendered from many threads at once, each render using its own [`Driver`].
///
/// # Example
///
/// ```rust
/// use safelate::{Driver, Template, Value, ValueProvider};
///
/// let template = Template::parse(
///     "<ul> each(items) { <li> . </li> } </ul>",
///     "list",
/// ).unwrap();
///
/// let view = Value::object([("items", Value::Array(vec!["a".into(), "<b>".into()]))]);
/// let mut driver = Driver::new(&ValueProvider, view);
/// assert_eq!(
///     template.render(&mut driver).unwrap(),
///     "<ul><li>a</li><li>&lt;b&gt;</li></ul>"
/// );
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Template {
    name: String,
    source: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    root: Node,
    #[cfg_attr(feature = "serde", serde(skip))]
    number_of_remembered_views: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    debug_comments: Option<Vec<String>>,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            name: String,
            source: String,
        }

        // Only the source is stored, so the AST is rebuilt and checked again.
        let helper = TemplateHelper::deserialize(deserializer)?;
        Self::parse(helper.source, helper.name)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {}", e)))
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("number_of_remembered_views", &self.number_of_remembered_views)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Parses `source` with the default parser configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SafelateError::Parse`] with the line and column of the
    /// problem if the template is invalid.
    pub fn parse<S: Into<String>, N: Into<String>>(source: S, name: N) -> SafelateResult<Self> {
        Self::parse_with_configuration(source, name, &DefaultParserConfiguration)
    }

    /// Parses `source`, letting `configuration` adjust how functions are parsed.
    ///
    /// # Errors
    ///
    /// Returns [`SafelateError::Parse`] if the template is invalid, or the
    /// configuration rejects one of its functions.
    pub fn parse_with_configuration<S: Into<String>, N: Into<String>>(
        source: S,
        name: N,
        configuration: &dyn ParserConfiguration,
    ) -> SafelateResult<Self> {
        let source = source.into();
        let name = name.into();
        let parsed = match parser::parse(&source, configuration) {
            Ok(parsed) => parsed,
            Err(error) => return Err(SafelateError::parse(name, error)),
        };
        tracing::debug!(
            template = %name,
            remembered_views = parsed.number_of_remembered_views,
            "parsed template"
        );
        Ok(Self {
            name,
            source,
            root: parsed.root,
            number_of_remembered_views: parsed.number_of_remembered_views,
            debug_comments: parsed.debug_comments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Slots needed by the driver to remember views for `^{...}` blocks.
    pub const fn number_of_remembered_views(&self) -> usize {
        self.number_of_remembered_views
    }

    /// Names of included templates, or `None` if debug comments were disabled
    /// with `#option:disable-debug-comments`.
    pub fn debug_comments(&self) -> Option<&[String]> {
        self.debug_comments.as_deref()
    }

    /// A textual dump of the parsed tree, for debugging templates.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.root.dump(&mut out, "");
        out
    }

    /// Renders the template as a complete document.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RenderError`] if a function can't be rendered, the
    /// nesting depth is exceeded, or the driver has already been used.
    pub fn render<'r, P: ViewProvider>(
        &'r self,
        driver: &mut Driver<'r, P>,
    ) -> RenderResult<String> {
        let mut output = String::with_capacity(self.source.len().saturating_mul(2));
        self.render_into(&mut output, driver, Context::Text)?;
        Ok(output)
    }

    /// Renders the template into `output`, escaping for `context`.
    ///
    /// # Errors
    ///
    /// As [`Template::render`].
    pub fn render_into<'r, P: ViewProvider>(
        &'r self,
        output: &mut String,
        driver: &mut Driver<'r, P>,
        context: Context,
    ) -> RenderResult<()> {
        driver.setup_for_render(self)?;
        let comments = driver.debug_comments()
            && context == Context::Text
            && self.debug_comments.is_some();
        if comments {
            self.push_debug_comment(output, "BEGIN");
        }
        let driver: &Driver<'r, P> = driver;
        self.root.render(output, driver, driver.root_view(), context)?;
        if comments {
            self.push_debug_comment(output, "END");
        }
        Ok(())
    }

    fn push_debug_comment(&self, output: &mut String, marker: &str) {
        output.push_str("<!-- ");
        output.push_str(marker);
        output.push(' ');
        escape_into(&self.name, output, Context::Comment);
        output.push_str(" -->");
    }

    /// Captures a render of this template with `view`, for output later by
    /// `render()` in another template.
    pub fn deferred<P: ViewProvider>(self: &Arc<Self>, provider: P, view: P::View) -> Deferred<P> {
        Deferred {
            template: Arc::clone(self),
            provider,
            view,
        }
    }
}

/// A render which has been set up but not performed yet.
pub trait DeferredRender {
    /// Appends the rendered document text to `output`.
    ///
    /// # Errors
    ///
    /// Any error from rendering the captured template.
    fn render_deferred(&self, output: &mut String) -> RenderResult<()>;
}

/// A template and view captured by [`Template::deferred`].
///
/// Deferred renders use a fresh driver, so they don't see the hooks or the
/// enclosing views of the template which outputs them.
pub struct Deferred<P: ViewProvider> {
    template: Arc<Template>,
    provider: P,
    view: P::View,
}

impl<P: ViewProvider> Deferred<P> {
    pub fn template(&self) -> &Template {
        &self.template
    }
}

impl<P: ViewProvider> std::fmt::Debug for Deferred<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("template", &self.template.name)
            .finish_non_exhaustive()
    }
}

impl<P: ViewProvider> DeferredRender for Deferred<P> {
    fn render_deferred(&self, output: &mut String) -> RenderResult<()> {
        let mut driver = Driver::new(&self.provider, self.view.clone());
        self.template.render_into(output, &mut driver, Context::Text)
    }
}
