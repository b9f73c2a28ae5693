use std::collections::HashMap;

use crate::driver::{Driver, IncludedTemplateResolver, ViewProvider};
use crate::error::{SafelateError, SafelateResult};
use crate::interface::SafelateInterface;
use crate::parser::ParserConfiguration;
use crate::template::Template;

/// `SafelateEngine` is the primary implementation of the `SafelateInterface`
/// trait, holding a collection of named templates which can include each
/// other with `template:name()`.
///
/// # Examples
///
/// ```
/// use safelate::{SafelateEngine, SafelateInterface, Value, ValueProvider};
///
/// let mut engine = SafelateEngine::new();
/// engine.add_template("page", "<main> template:greeting() </main>").unwrap();
/// engine.add_template("greeting", "<p> \"Hello, \" name </p>").unwrap();
///
/// let view = Value::object([("name", Value::from("World"))]);
/// let output = engine.render("page", &ValueProvider, view).unwrap();
/// assert_eq!(output, "<main><p>Hello, World</p></main>");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default)]
pub struct SafelateEngine {
    templates: HashMap<String, Template>,
}

impl SafelateEngine {
    /// Creates a new engine with no templates.
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Adds a template, parsing it with `configuration`.
    ///
    /// # Errors
    ///
    /// * `SafelateError::TemplateExists` if a template with the given name already exists
    /// * `SafelateError::Parse` if the template is invalid
    pub fn add_template_with_configuration<N: Into<String>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
        configuration: &dyn ParserConfiguration,
    ) -> SafelateResult<()> {
        let name = name.into();
        if self.templates.contains_key(&name) {
            return Err(SafelateError::TemplateExists { template_name: name });
        }
        let template = Template::parse_with_configuration(source, name.clone(), configuration)?;
        tracing::debug!(template = %name, "registered template");
        self.templates.insert(name, template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Renders the named template with a driver set up by the caller, for
    /// example with a translator or function renderer. The engine is used to
    /// resolve included templates.
    ///
    /// # Errors
    ///
    /// * `SafelateError::MissingTemplate` if the template is not found
    /// * `SafelateError::Render` if rendering fails
    pub fn render_with_driver<'r, P: ViewProvider>(
        &'r self,
        template_name: &str,
        driver: Driver<'r, P>,
    ) -> SafelateResult<String> {
        let template = self.lookup(template_name)?;
        let mut driver = driver.with_included_template_resolver(self);
        Ok(template.render(&mut driver)?)
    }

    fn lookup(&self, template_name: &str) -> SafelateResult<&Template> {
        self.templates
            .get(template_name)
            .ok_or_else(|| SafelateError::MissingTemplate {
                template_name: template_name.to_string(),
            })
    }
}

impl SafelateInterface for SafelateEngine {
    /// Adds a new template to the engine with the given name and source.
    ///
    /// # Examples
    ///
    /// ```
    /// use safelate::{SafelateEngine, SafelateInterface};
    ///
    /// let mut engine = SafelateEngine::new();
    /// engine.add_template("greeting", "\"Hello, \" name").unwrap();
    /// assert!(engine.add_template("greeting", "\"Again\"").is_err());
    /// ```
    fn add_template<N: Into<String>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> SafelateResult<()> {
        self.add_template_with_configuration(name, source, &crate::DefaultParserConfiguration)
    }

    fn render<N: AsRef<str>, P: ViewProvider>(
        &self,
        template_name: N,
        provider: &P,
        view: P::View,
    ) -> SafelateResult<String> {
        self.render_with_driver(template_name.as_ref(), Driver::new(provider, view))
    }
}

impl IncludedTemplateResolver for SafelateEngine {
    fn included_template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Value, ValueProvider};

    fn engine(templates: &[(&str, &str)]) -> SafelateEngine {
        let mut engine = SafelateEngine::new();
        for (name, source) in templates {
            engine.add_template(*name, *source).unwrap();
        }
        engine
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_duplicate_template() {
        let mut engine = engine(&[("a", "\"x\"")]);
        let err = engine.add_template("a", "\"y\"").unwrap_err();
        assert_eq!(
            err,
            SafelateError::TemplateExists {
                template_name: "a".to_string()
            }
        );
        assert_eq!(engine.get("a").map(Template::source), Some("\"x\""));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_errors_are_not_registered() {
        let mut engine = SafelateEngine::new();
        let err = engine.add_template("bad", "<script>").unwrap_err();
        assert!(matches!(
            err,
            SafelateError::Parse { ref template_name, .. } if template_name == "bad"
        ));
        assert!(!engine.contains("bad"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_template() {
        let engine = engine(&[]);
        let err = engine.render("nope", &ValueProvider, Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Template not found: nope");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_included_templates_and_yield() {
        let engine = engine(&[
            ("page", "<div> template:layout() { <b> title </b> } sidebar { \"S\" } </div>"),
            (
                "layout",
                "<main> yield() </main> ifHasBlock(\"sidebar\") { <aside> yield:sidebar() </aside> }",
            ),
        ]);
        let view = Value::object([("title", Value::from("T"))]);
        assert_eq!(
            engine.render("page", &ValueProvider, view).unwrap(),
            "<div><main><b>T</b></main><aside>S</aside></div>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_included_template_names_includer() {
        let engine = engine(&[("outer", "template:missing()")]);
        let err = engine.render("outer", &ValueProvider, Value::Null).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Included template 'missing' not found (when rendering template 'outer')"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_recursive_inclusion_is_bounded() {
        let engine = engine(&[("loop", "template:loop()")]);
        let driver = Driver::new(&ValueProvider, Value::Null).with_max_nesting_depth(16);
        let err = engine.render_with_driver("loop", driver).unwrap_err();
        assert!(err.to_string().starts_with("Template rendering nesting depth exceeded."));
    }
}
