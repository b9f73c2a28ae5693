use indexmap::IndexMap;

use crate::ast::{Node, ParameterInstruction, TagNode, UrlNode};
use crate::binding::FunctionArgument;
use crate::driver::{Driver, ViewProvider};
use crate::error::RenderResult;
use crate::escape::escape_into;
use crate::html;
use crate::Context;

impl Node {
    pub(crate) fn render<P: ViewProvider>(
        &self,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
        context: Context,
    ) -> RenderResult<()> {
        match self {
            Self::Literal(text) => {
                output.push_str(text);
                Ok(())
            }
            Self::Value(path) => {
                if let Some(value) = driver.lookup(view, path) {
                    if let Some(text) = driver.value_to_string(&value) {
                        escape_into(&text, output, context);
                    }
                }
                Ok(())
            }
            Self::Tag(tag) => tag.render(output, driver, view),
            Self::Url(url) => url.render(output, driver, view),
            Self::ScriptTag(url) => {
                output.push_str("<script src=\"");
                url.render(output, driver, view)?;
                output.push_str("\"></script>");
                Ok(())
            }
            Self::Function(function) => function.render(output, driver, view, context),
            Self::List(children) if context == Context::AttributeValue => {
                render_space_separated(children, output, driver, view)
            }
            Self::List(children) => {
                for child in children {
                    child.render(output, driver, view, context)?;
                }
                Ok(())
            }
            Self::EnclosingView { index, block } => match driver.recall_view(*index) {
                Some(enclosing) => block.render(output, driver, &enclosing, context),
                None => Ok(()),
            },
        }
    }

    /// The view this node refers to, for nodes which represent values.
    pub(crate) fn value<P: ViewProvider>(
        &self,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> Option<P::View> {
        match self {
            Self::Value(path) => driver.lookup(view, path),
            Self::EnclosingView { index, block } => driver
                .recall_view(*index)
                .and_then(|enclosing| block.value(driver, &enclosing)),
            Self::Literal(_)
            | Self::Tag(_)
            | Self::Url(_)
            | Self::Function(_)
            | Self::List(_)
            | Self::ScriptTag(_) => None,
        }
    }

    pub(crate) fn value_for_function_argument<P: ViewProvider>(
        &self,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> RenderResult<FunctionArgument<P::View>> {
        if self.represents_value_from_view() {
            return Ok(self
                .value(driver, view)
                .map_or(FunctionArgument::Absent, FunctionArgument::View));
        }
        let mut text = String::new();
        self.render(&mut text, driver, view, Context::Unsafe)?;
        Ok(FunctionArgument::Text(text))
    }
}

/// Attribute values from lists, eg `class=["a" b]`, are separated by single
/// spaces, skipping entries which render nothing.
fn render_space_separated<P: ViewProvider>(
    children: &[Node],
    output: &mut String,
    driver: &Driver<'_, P>,
    view: &P::View,
) -> RenderResult<()> {
    let mut first = true;
    for child in children {
        let before = output.len();
        if !first {
            output.push(' ');
        }
        let start = output.len();
        child.render(output, driver, view, Context::AttributeValue)?;
        if output.len() == start {
            output.truncate(before);
        } else {
            first = false;
        }
    }
    Ok(())
}

impl TagNode {
    fn render<P: ViewProvider>(
        &self,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> RenderResult<()> {
        output.push_str(&self.start);
        for attribute in &self.attributes {
            let attribute_start = output.len();
            output.push_str(&attribute.prepared_name_equals);
            let value_start = output.len();
            attribute.value.render(output, driver, view, attribute.context)?;
            if output.len() == value_start {
                // Empty values remove the attribute entirely.
                output.truncate(attribute_start);
            } else {
                output.push('"');
            }
        }
        if let Some(dictionary) = &self.dictionary {
            if let Some(attributes) = dictionary.value(driver, view) {
                driver.iterate_over_value_as_dictionary(&attributes, &mut |key, value| {
                    if !html::valid_dictionary_attribute_name(&self.name, key) {
                        return Err(driver.render_error(format!(
                            "Bad attribute name for tag attribute dictionary expansion: '{}'",
                            key
                        )));
                    }
                    if let Some(text) = driver.value_to_string(value).filter(|t| !t.is_empty()) {
                        output.push(' ');
                        output.push_str(key);
                        output.push_str("=\"");
                        escape_into(&text, output, Context::AttributeValue);
                        output.push('"');
                    }
                    Ok(())
                })?;
            }
        }
        output.push('>');
        Ok(())
    }
}

impl UrlNode {
    pub(crate) fn render<P: ViewProvider>(
        &self,
        output: &mut String,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> RenderResult<()> {
        let mut context = Context::UrlPath;
        for node in &self.path {
            node.render(output, driver, view, context)?;
            context = Context::Url;
        }
        if !self.parameters.is_empty() {
            let parameters = self.collect_parameters(driver, view)?;
            let mut separator = '?';
            for (key, value) in &parameters {
                output.push(separator);
                escape_into(key, output, Context::Url);
                output.push('=');
                escape_into(value, output, Context::Url);
                separator = '&';
            }
        }
        if !self.fragment.is_empty() {
            let mut fragment = String::new();
            for node in &self.fragment {
                node.render(&mut fragment, driver, view, Context::UrlPath)?;
            }
            // A lone # is kept when it's the only thing in the URL.
            if !fragment.is_empty() || (self.path.is_empty() && self.parameters.is_empty()) {
                output.push('#');
                output.push_str(&fragment);
            }
        }
        Ok(())
    }

    /// Applies the parameter instructions in order. Keys keep the position of
    /// their first insertion unless removed.
    fn collect_parameters<P: ViewProvider>(
        &self,
        driver: &Driver<'_, P>,
        view: &P::View,
    ) -> RenderResult<IndexMap<String, String>> {
        let mut parameters = IndexMap::new();
        for instruction in &self.parameters {
            match instruction {
                ParameterInstruction::Set { key, value } => {
                    let mut text = String::new();
                    value.render(&mut text, driver, view, Context::Unsafe)?;
                    if !text.is_empty() {
                        parameters.insert(key.clone(), text);
                    }
                }
                ParameterInstruction::Remove { key } => {
                    parameters.shift_remove(key);
                }
                ParameterInstruction::MergeDictionary { value } => {
                    if let Some(dictionary) = value.value(driver, view) {
                        driver.iterate_over_value_as_dictionary(&dictionary, &mut |key, value| {
                            if let Some(text) =
                                driver.value_to_string(value).filter(|t| !t.is_empty())
                            {
                                parameters.insert(key.to_string(), text.into_owned());
                            }
                            Ok(())
                        })?;
                    }
                }
            }
        }
        Ok(parameters)
    }
}
