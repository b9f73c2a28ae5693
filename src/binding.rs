use crate::ast::{FunctionNode, Node};
use crate::driver::{Driver, ViewProvider};
use crate::error::RenderResult;
use crate::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentRequirement {
    Optional,
    Required,
}

/// The value of an argument to a function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgument<V> {
    /// A value looked up from the view.
    View(V),
    /// Any other argument, rendered as unescaped text.
    Text(String),
    /// A value path which didn't resolve to anything.
    Absent,
}

impl<V> FunctionArgument<V> {
    pub const fn as_view(&self) -> Option<&V> {
        match self {
            Self::View(view) => Some(view),
            Self::Text(_) | Self::Absent => None,
        }
    }
}

/// Passed to a [`crate::FunctionRenderer`] to give access to the arguments and
/// blocks of a function call the template language doesn't know about.
///
/// Arguments are consumed in order with the `next_*` methods.
pub struct FunctionBinding<'b, 'r, P: ViewProvider> {
    function: &'b FunctionNode,
    driver: &'b Driver<'r, P>,
    view: &'b P::View,
    context: Context,
    next_argument: usize,
}

impl<'b, 'r, P: ViewProvider> FunctionBinding<'b, 'r, P> {
    pub(crate) const fn new(
        function: &'b FunctionNode,
        driver: &'b Driver<'r, P>,
        view: &'b P::View,
        context: Context,
    ) -> Self {
        Self {
            function,
            driver,
            view,
            context,
            next_argument: 0,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    pub const fn driver(&self) -> &'b Driver<'r, P> {
        self.driver
    }

    pub const fn view(&self) -> &'b P::View {
        self.view
    }

    pub const fn context(&self) -> Context {
        self.context
    }

    pub fn has_arguments(&self) -> bool {
        !self.function.arguments.is_empty()
    }

    pub const fn restart_arguments(&mut self) {
        self.next_argument = 0;
    }

    /// Every argument as a value, ignoring the argument cursor.
    pub fn all_value_arguments(&self) -> RenderResult<Vec<FunctionArgument<P::View>>> {
        self.function
            .arguments
            .iter()
            .map(|argument| argument.value_for_function_argument(self.driver, self.view))
            .collect()
    }

    /// Renders the next argument without escaping. The caller must escape it
    /// before it goes anywhere near the output.
    pub fn next_unescaped_string_argument(
        &mut self,
        requirement: ArgumentRequirement,
    ) -> RenderResult<Option<String>> {
        let Some(argument) = self.next_argument(requirement)? else {
            return Ok(None);
        };
        let mut text = String::with_capacity(128);
        argument.render(&mut text, self.driver, self.view, Context::Unsafe)?;
        Ok(Some(text))
    }

    pub fn next_view_object_argument(
        &mut self,
        requirement: ArgumentRequirement,
    ) -> RenderResult<Option<FunctionArgument<P::View>>> {
        match self.next_argument(requirement)? {
            Some(argument) => argument
                .value_for_function_argument(self.driver, self.view)
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn next_literal_string_argument(
        &mut self,
        requirement: ArgumentRequirement,
    ) -> RenderResult<Option<&'b str>> {
        let Some(argument) = self.next_argument(requirement)? else {
            return Ok(None);
        };
        match argument.literal_str() {
            Some(text) => Ok(Some(text)),
            None => Err(self.driver.render_error(format!(
                "Literal string argument expected for {}()",
                self.function_name()
            ))),
        }
    }

    pub fn skip_argument(&mut self, requirement: ArgumentRequirement) -> RenderResult<()> {
        self.next_argument(requirement).map(|_| ())
    }

    pub fn no_more_arguments_expected(&self) -> RenderResult<()> {
        if self.next_argument < self.function.arguments.len() {
            return Err(self.driver.render_error(format!(
                "Too many arguments for {}()",
                self.function_name()
            )));
        }
        Ok(())
    }

    pub(crate) fn next_argument(
        &mut self,
        requirement: ArgumentRequirement,
    ) -> RenderResult<Option<&'b Node>> {
        let function: &'b FunctionNode = self.function;
        match function.arguments.get(self.next_argument) {
            Some(argument) => {
                self.next_argument = self.next_argument.saturating_add(1);
                Ok(Some(argument))
            }
            None if requirement == ArgumentRequirement::Required => {
                Err(self.driver.render_error(format!(
                    "Argument {} expected for {}()",
                    self.next_argument.saturating_add(1),
                    self.function_name()
                )))
            }
            None => Ok(None),
        }
    }

    /// `None` is the anonymous block.
    pub fn has_block(&self, name: Option<&str>) -> bool {
        self.function.block(name).is_some()
    }

    /// Renders a block of the function in the function's view. Missing blocks render nothing.
    pub fn render_block(
        &self,
        name: Option<&str>,
        output: &mut String,
        context: Context,
    ) -> RenderResult<()> {
        match self.function.block(name) {
            Some(block) => block.render(output, self.driver, self.view, context),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FunctionRenderer;
    use crate::{Template, Value, ValueProvider};

    /// `greet(name "!"){prefix}` renders the prefix block, the escaped name
    /// then the literal suffix.
    struct Greeter;

    impl FunctionRenderer<ValueProvider> for Greeter {
        fn render_function(
            &self,
            output: &mut String,
            binding: &mut FunctionBinding<'_, '_, ValueProvider>,
        ) -> RenderResult<bool> {
            match binding.function_name() {
                "greet" => {
                    binding.render_block(None, output, binding.context())?;
                    let name = binding
                        .next_unescaped_string_argument(ArgumentRequirement::Required)?
                        .unwrap_or_default();
                    crate::escape_into(&name, output, binding.context());
                    if let Some(suffix) =
                        binding.next_literal_string_argument(ArgumentRequirement::Optional)?
                    {
                        output.push_str(suffix);
                    }
                    binding.no_more_arguments_expected()?;
                    Ok(true)
                }
                "kind" => {
                    let argument =
                        binding.next_view_object_argument(ArgumentRequirement::Required)?;
                    let text = match argument {
                        Some(FunctionArgument::View(Value::Array(_))) => "array",
                        Some(FunctionArgument::View(_)) => "view",
                        Some(FunctionArgument::Text(_)) => "text",
                        Some(FunctionArgument::Absent) | None => "absent",
                    };
                    output.push_str(text);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    fn render(source: &str, view: Value) -> RenderResult<String> {
        let template = Template::parse(source, "binding").unwrap();
        let mut driver = Driver::new(&ValueProvider, view).with_function_renderer(&Greeter);
        template.render(&mut driver)
    }

    fn view() -> Value {
        Value::object([
            ("name", Value::from("<Ann>")),
            ("list", Value::Array(vec![Value::from(1)])),
        ])
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_generic_function_arguments_and_blocks() {
        assert_eq!(
            render("greet(name \"!\") { \"Hi \" }", view()).unwrap(),
            "Hi &lt;Ann&gt;!"
        );
        assert_eq!(render("greet(name)", view()).unwrap(), "&lt;Ann&gt;");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_argument_errors() {
        let err = render("greet()", view()).unwrap_err();
        assert_eq!(err.message, "Argument 1 expected for greet()");
        let err = render("greet(name name)", view()).unwrap_err();
        assert_eq!(err.message, "Literal string argument expected for greet()");
        let err = render("greet(name \"!\" \"?\")", view()).unwrap_err();
        assert_eq!(err.message, "Too many arguments for greet()");
        assert_eq!(err.template.as_deref(), Some("binding"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_view_object_arguments() {
        assert_eq!(render("kind(list)", view()).unwrap(), "array");
        assert_eq!(render("kind(name)", view()).unwrap(), "view");
        assert_eq!(render("kind(\"x\")", view()).unwrap(), "text");
        assert_eq!(render("kind(missing)", view()).unwrap(), "absent");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_function_is_render_error() {
        let err = render("nothing()", view()).unwrap_err();
        assert_eq!(err.message, "No renderable implementation for function nothing()");
    }
}
