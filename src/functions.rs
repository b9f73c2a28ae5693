//! The functions built into the template language.
//!
//! Each function is checked once when it's parsed, so rendering can assume the
//! arguments and blocks have the expected shape.

use crate::ast::{ELSE_BLOCK, FunctionKind, FunctionNode, Node};
use crate::binding::FunctionBinding;
use crate::driver::{Driver, ViewProvider, YieldBinding};
use crate::error::{ParseErrorKind, RenderResult};
use crate::translate::{self, DEFAULT_CATEGORY};
use crate::Context;

/// Which blocks a function accepts.
enum PermittedBlocks {
    Any,
    None,
    Only(&'static [Option<&'static str>]),
}

const CONDITIONAL_BLOCKS: &[Option<&str>] = &[None, Some(ELSE_BLOCK)];
const ANONYMOUS_BLOCK: &[Option<&str>] = &[None];

impl FunctionKind {
    pub(crate) fn from_name(name: &str) -> Result<Self, ParseErrorKind> {
        let kind = match name {
            "within" => Self::Within,
            "if" => Self::Conditional { invert: false },
            "unless" => Self::Conditional { invert: true },
            "ifAny" => Self::ConditionalMulti { invert: false, any: true },
            "ifAll" => Self::ConditionalMulti { invert: false, any: false },
            "unlessAny" => Self::ConditionalMulti { invert: true, any: true },
            "unlessAll" => Self::ConditionalMulti { invert: true, any: false },
            "each" => Self::Each,
            "switch" => Self::Switch,
            "do" => Self::Do,
            "render" => Self::Render,
            "concat" => Self::Concat,
            "unsafeHTML" => Self::UnsafeHtml,
            "unsafeAttributeValue" => Self::UnsafeAttributeValue,
            "yield" => Self::Yield { block: None },
            "ifContent" => Self::IfContent,
            "markContent" => Self::MarkContent,
            "ifHasBlock" => Self::IfHasBlock,
            "i" => Self::Translated {
                category: DEFAULT_CATEGORY.to_string(),
            },
            _ => return Self::from_prefixed_name(name),
        };
        Ok(kind)
    }

    fn from_prefixed_name(name: &str) -> Result<Self, ParseErrorKind> {
        if name.starts_with("template") {
            return match name.strip_prefix("template:") {
                Some(template) if !template.is_empty() => Ok(Self::Template {
                    name: template.to_string(),
                }),
                Some(_) | None => Err(ParseErrorKind::Message(
                    "Bad included template function name, must start 'template:'".to_string(),
                )),
            };
        }
        if name.starts_with("yield") {
            return match name.strip_prefix("yield:") {
                Some(block) if !block.is_empty() => Ok(Self::Yield {
                    block: Some(block.to_string()),
                }),
                Some(_) | None => Err(ParseErrorKind::Message(
                    "Bad named yield function name, must start 'yield:'".to_string(),
                )),
            };
        }
        match name.strip_prefix("i:") {
            Some("") => Err(ParseErrorKind::function(name, "must name a translation category")),
            Some(category) => Ok(Self::Translated {
                category: category.to_string(),
            }),
            None => Ok(Self::Generic),
        }
    }

    const fn permitted_blocks(&self) -> PermittedBlocks {
        match self {
            Self::Conditional { .. }
            | Self::ConditionalMulti { .. }
            | Self::IfContent
            | Self::IfHasBlock => PermittedBlocks::Only(CONDITIONAL_BLOCKS),
            Self::Within | Self::Each | Self::MarkContent => PermittedBlocks::Only(ANONYMOUS_BLOCK),
            Self::Render
            | Self::Concat
            | Self::UnsafeHtml
            | Self::UnsafeAttributeValue
            | Self::Yield { .. } => PermittedBlocks::None,
            Self::Switch
            | Self::Do
            | Self::Template { .. }
            | Self::Translated { .. }
            | Self::Generic => {
                PermittedBlocks::Any
            }
        }
    }

    const fn requires_anonymous_block(&self) -> bool {
        matches!(
            self,
            Self::Within
                | Self::Conditional { .. }
                | Self::ConditionalMulti { .. }
                | Self::Each
                | Self::Do
                | Self::IfContent
                | Self::MarkContent
                | Self::IfHasBlock
        )
    }

    const fn only_in_document_text(&self) -> bool {
        matches!(
            self,
            Self::Render
                | Self::UnsafeHtml
                | Self::Yield { .. }
                | Self::Template { .. }
                | Self::IfContent
                | Self::MarkContent
        )
    }
}

impl FunctionNode {
    /// Checked as each block is parsed. `None` is the anonymous block.
    pub(crate) fn check_block_permitted(&self, block: Option<&str>) -> Result<(), ParseErrorKind> {
        let permitted = match self.kind.permitted_blocks() {
            PermittedBlocks::Any => true,
            PermittedBlocks::None => false,
            PermittedBlocks::Only(names) => names.contains(&block),
        };
        if permitted {
            return Ok(());
        }
        let description = match block {
            None => "an anonymous".to_string(),
            Some(name) => format!("a {}", name),
        };
        Err(ParseErrorKind::function(
            &self.name,
            format!("may not take {} block", description),
        ))
    }

    /// Checks the arguments, blocks and position of a fully parsed function.
    pub(crate) fn validate(&self, context: Context) -> Result<(), ParseErrorKind> {
        if self.kind.requires_anonymous_block() && self.anonymous_block.is_none() {
            return Err(self.misuse("requires an anonymous block"));
        }
        if self.kind.only_in_document_text() && context != Context::Text {
            return Err(self.misuse("can only be used in document text"));
        }
        match &self.kind {
            FunctionKind::Within
            | FunctionKind::Conditional { .. }
            | FunctionKind::Each
            | FunctionKind::Switch
            | FunctionKind::Render => self.exactly_one_value_argument(),
            FunctionKind::ConditionalMulti { .. } => {
                if self.arguments.is_empty() {
                    return Err(self.misuse("must have at least one argument"));
                }
                if !self.arguments.iter().all(Node::represents_value_from_view) {
                    return Err(self.misuse("must only have values as arguments"));
                }
                Ok(())
            }
            FunctionKind::Do => {
                if self.arguments.is_empty() {
                    Ok(())
                } else {
                    self.exactly_one_value_argument()
                }
            }
            FunctionKind::UnsafeHtml => {
                self.exactly_one_argument()?;
                let named_unsafe = matches!(
                    self.arguments.first(),
                    Some(Node::Value(path))
                        if path.first().is_some_and(|first| first.starts_with("unsafe"))
                );
                self.require_unsafe_name(named_unsafe)
            }
            FunctionKind::UnsafeAttributeValue => {
                self.exactly_one_argument()?;
                if context != Context::AttributeValue {
                    return Err(self.misuse("can only be used in attribute values"));
                }
                let named_unsafe = matches!(
                    self.arguments.first(),
                    Some(Node::Value(path)) if path.iter().any(|part| part.starts_with("unsafe"))
                );
                self.require_unsafe_name(named_unsafe)
            }
            FunctionKind::Yield { .. }
            | FunctionKind::Template { .. }
            | FunctionKind::IfContent
            | FunctionKind::MarkContent => {
                if self.arguments.is_empty() {
                    Ok(())
                } else {
                    Err(self.misuse("does not take arguments"))
                }
            }
            FunctionKind::IfHasBlock => match self.arguments.as_slice() {
                [] | [Node::Literal(_)] => Ok(()),
                _ => Err(self.misuse("must have a single literal block name, or no arguments")),
            },
            FunctionKind::Translated { .. } => {
                self.exactly_one_argument()?;
                if self.arguments.first().and_then(Node::literal_str).is_none() {
                    return Err(self.misuse("must have a literal string as the argument"));
                }
                Ok(())
            }
            FunctionKind::Concat | FunctionKind::Generic => Ok(()),
        }
    }

    fn misuse(&self, message: &str) -> ParseErrorKind {
        ParseErrorKind::function(&self.name, message)
    }

    fn exactly_one_argument(&self) -> Result<(), ParseErrorKind> {
        if self.arguments.len() == 1 {
            Ok(())
        } else {
            Err(self.misuse("must take exactly one argument"))
        }
    }

    fn exactly_one_value_argument(&self) -> Result<(), ParseErrorKind> {
        self.exactly_one_argument()?;
        if self.arguments.iter().all(Node::represents_value_from_view) {
            Ok(())
        } else {
            Err(self.misuse("must have a value as the argument"))
        }
    }

    fn require_unsafe_name(&self, named_unsafe: bool) -> Result<(), ParseErrorKind> {
        if named_unsafe {
            Ok(())
        } else {
            Err(ParseErrorKind::UnsafeValueName {
                function: self.name.clone(),
            })
        }
    }

    /// The block `yield()` renders. The anonymous block of `do()` is the body
    /// doing the yielding, so it can't be yielded to.
    pub(crate) fn yield_target(&self, block: Option<&str>) -> Option<&Node> {
        if self.kind == FunctionKind::Do && block.is_none() {
            return None;
        }
        self.block(block)
    }

    fn else_block(&self) -> Option<&Node> {
        self.find_block(ELSE_BLOCK)
    }

    fn render_optional<P: ViewProvider>(
        block: Option<&Node>,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
        context: Context,
    ) -> RenderResult<()> {
        match block {
            Some(block) => block.render(output, driver, view, context),
            None => Ok(()),
        }
    }

    fn remember_view_if_necessary<P: ViewProvider>(&self, driver: &Driver<'_, P>, view: &P::View) {
        if let Some(index) = self.remember_index {
            driver.remember_view(index, view);
        }
    }

    fn single_argument_value<P: ViewProvider>(
        &self,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> Option<P::View> {
        self.arguments
            .first()
            .and_then(|argument| argument.value(driver, view))
    }

    pub(crate) fn render<P: ViewProvider>(
        &self,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
        context: Context,
    ) -> RenderResult<()> {
        match &self.kind {
            FunctionKind::Within => {
                self.remember_view_if_necessary(driver, view);
                match self.single_argument_value(driver, view) {
                    Some(inner) => Self::render_optional(
                        self.anonymous_block.as_ref(),
                        output,
                        driver,
                        &inner,
                        context,
                    ),
                    None => Ok(()),
                }
            }
            FunctionKind::Conditional { invert } => {
                let value = self.single_argument_value(driver, view);
                let truthy = driver.is_truthy(value.as_ref()) != *invert;
                self.render_conditional(truthy, output, driver, view, context)
            }
            FunctionKind::ConditionalMulti { invert, any } => {
                let mut values = self
                    .arguments
                    .iter()
                    .map(|argument| driver.is_truthy(argument.value(driver, view).as_ref()));
                let result = if *any { values.any(|t| t) } else { values.all(|t| t) };
                self.render_conditional(result != *invert, output, driver, view, context)
            }
            FunctionKind::Each => {
                self.remember_view_if_necessary(driver, view);
                let (Some(list), Some(block)) = (
                    self.single_argument_value(driver, view),
                    self.anonymous_block.as_ref(),
                ) else {
                    return Ok(());
                };
                driver.iterate_over_value_as_array(&list, &mut |entry| {
                    block.render(output, driver, entry, context)
                })
            }
            FunctionKind::Switch => {
                let selected = self
                    .single_argument_value(driver, view)
                    .and_then(|value| driver.value_to_string(&value).map(|s| s.into_owned()));
                let block = selected
                    .as_deref()
                    .and_then(|name| self.find_block(name))
                    .or(self.anonymous_block.as_ref());
                Self::render_optional(block, output, driver, view, context)
            }
            FunctionKind::Do => {
                let inner = if self.arguments.is_empty() {
                    view.clone()
                } else {
                    match self.single_argument_value(driver, view) {
                        Some(inner) => inner,
                        None => return Ok(()),
                    }
                };
                let Some(body) = &self.anonymous_block else {
                    return Ok(());
                };
                let mut nested = driver.nested_with_view(inner)?;
                nested.set_binding_for_yield(YieldBinding {
                    function: self,
                    driver,
                    view: view.clone(),
                })?;
                body.render(output, &nested, nested.root_view(), context)
            }
            FunctionKind::Render => {
                let Some(value) = self.single_argument_value(driver, view) else {
                    return Ok(());
                };
                let provider = driver.provider();
                if let Some(deferred) = provider.as_deferred(&value) {
                    return deferred.render_deferred(output);
                }
                if provider.render_object(&value, output)? {
                    return Ok(());
                }
                Err(driver.render_error("render() can only render deferred renders"))
            }
            FunctionKind::Concat => self
                .arguments
                .iter()
                .try_for_each(|argument| argument.render(output, driver, view, context)),
            FunctionKind::UnsafeHtml | FunctionKind::UnsafeAttributeValue => {
                if let Some(value) = self.single_argument_value(driver, view) {
                    if let Some(text) = driver.value_to_string(&value) {
                        output.push_str(&text);
                    }
                }
                Ok(())
            }
            FunctionKind::Yield { block } => driver.render_yield(block.as_deref(), output, context),
            FunctionKind::Template { name } => {
                self.render_included_template(name, output, driver, view, context)
            }
            FunctionKind::IfContent => {
                let start = output.len();
                driver.push_content_mark();
                let rendered = Self::render_optional(
                    self.anonymous_block.as_ref(),
                    output,
                    driver,
                    view,
                    context,
                );
                let marked = driver.pop_content_mark();
                rendered?;
                if marked {
                    return Ok(());
                }
                output.truncate(start);
                Self::render_optional(self.else_block(), output, driver, view, context)
            }
            FunctionKind::MarkContent => {
                let start = output.len();
                Self::render_optional(
                    self.anonymous_block.as_ref(),
                    output,
                    driver,
                    view,
                    context,
                )?;
                if output.len() > start {
                    driver.mark_content();
                }
                Ok(())
            }
            FunctionKind::IfHasBlock => {
                let block = self.arguments.first().and_then(Node::literal_str);
                let has_block = driver.can_yield_to_block(block);
                self.render_conditional(has_block, output, driver, view, context)
            }
            FunctionKind::Translated { category } => {
                translate::render_translated(self, category, output, driver, view, context)
            }
            FunctionKind::Generic => {
                let mut binding = FunctionBinding::new(self, driver, view, context);
                driver.render_function(output, &mut binding)
            }
        }
    }

    fn render_conditional<P: ViewProvider>(
        &self,
        condition: bool,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
        context: Context,
    ) -> RenderResult<()> {
        let block = if condition {
            self.anonymous_block.as_ref()
        } else {
            self.else_block()
        };
        Self::render_optional(block, output, driver, view, context)
    }

    fn render_included_template<P: ViewProvider>(
        &self,
        name: &str,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
        context: Context,
    ) -> RenderResult<()> {
        let template = driver.included_template(name)?;
        let mut nested = driver.nested_with_view(view.clone())?;
        nested.set_binding_for_yield(YieldBinding {
            function: self,
            driver,
            view: view.clone(),
        })?;
        tracing::trace!(
            template = name,
            depth = nested.nesting_depth(),
            "rendering included template"
        );
        template.render_into(output, &mut nested, context)
    }
}
