use std::collections::HashSet;

use crate::{
    Context,
    ast::{Attribute, FunctionKind, FunctionNode, Node, ParameterInstruction, TagNode, UrlNode},
    error::{ParseError, ParseErrorKind},
    escape::escape,
    html,
};

type ParseResult<T> = Result<T, ParseError>;

/// Limit on open lists, tags, functions and URLs, which keeps parser recursion
/// well inside a thread's stack.
pub(crate) const MAX_PARSE_NESTING: usize = 128;

/// Hooks which let the application adjust how functions are parsed.
pub trait ParserConfiguration {
    /// Functions which take a URL as their argument, in the same syntax as `url(...)`.
    fn function_arguments_are_url(&self, function_name: &str) -> bool {
        let _ = function_name;
        false
    }

    /// Called after each function has been parsed and checked. Return an error
    /// message to reject the template.
    fn validate_function(&self, function_name: &str, context: Context) -> Result<(), String> {
        let _ = (function_name, context);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParserConfiguration;

impl ParserConfiguration for DefaultParserConfiguration {}

/// The output of the parser, turned into a [`crate::Template`].
#[derive(Debug)]
pub(crate) struct ParsedTemplate {
    pub(crate) root: Node,
    pub(crate) number_of_remembered_views: usize,
    pub(crate) debug_comments: Option<Vec<String>>,
}

/// Markers which check everything opened is closed in the right order.
#[derive(Debug, PartialEq, Eq)]
enum Nesting {
    List,
    Tag(String),
    Function {
        changes_view: bool,
        remember_index: Option<usize>,
    },
    Url,
}

/// What `parse_one_value` found.
enum Item {
    Node(Node),
    EndOfList,
    EndOfTemplate,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    configuration: &'a dyn ParserConfiguration,
    context: Context,
    nesting: Vec<Nesting>,
    /// Set inside tags which can't contain other tags.
    childless_tag: Option<String>,
    in_enclosing_view_block: bool,
    next_remember_index: usize,
    quote_minimisation: bool,
    debug_comments: bool,
    included_templates: Vec<String>,
}

const fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\r')
}

const fn is_single_char_symbol(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '{' | '}' | '<' | '>' | '[' | ']' | '?' | '!' | '*' | '#' | '/' | '"' | '='
    )
}

/// `'` must stay reserved, as attribute escaping relies on it never appearing.
const fn is_reserved_character(c: char) -> bool {
    matches!(c, ',' | '\'' | ';' | '~' | '`')
}

fn can_omit_quotes(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, configuration: &'a dyn ParserConfiguration) -> Self {
        Parser {
            input,
            pos: 0,
            configuration,
            context: Context::Text,
            nesting: Vec::new(),
            childless_tag: None,
            in_enclosing_view_block: false,
            next_remember_index: 0,
            quote_minimisation: true,
            debug_comments: true,
            included_templates: Vec::new(),
        }
    }

    // --- Errors ---

    /// Errors are reported at the last character consumed before `position`.
    fn error_at(&self, position: usize, kind: ParseErrorKind) -> ParseError {
        let bytes = self.input.as_bytes();
        let mut p = position.saturating_sub(1);
        // Positions on a newline belong to the end of the previous line.
        while p > 0 && bytes.get(p) == Some(&b'\n') {
            p = p.saturating_sub(1);
        }
        self.error_exactly_at(p, kind)
    }

    fn error_exactly_at(&self, position: usize, kind: ParseErrorKind) -> ParseError {
        let mut end = position.min(self.input.len());
        // Include the whole character at the position.
        end = end.saturating_add(1);
        while end < self.input.len() && !self.input.is_char_boundary(end) {
            end = end.saturating_add(1);
        }
        let before = self.input.get(..end.min(self.input.len())).unwrap_or_default();
        let line_start = before.rfind('\n').map_or(0, |newline| newline.saturating_add(1));
        ParseError {
            line: before.matches('\n').count().saturating_add(1),
            column: before.get(line_start..).map_or(0, |line| line.chars().count()),
            kind,
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        self.error_at(self.pos, kind)
    }

    fn message(&self, message: &str) -> ParseError {
        self.error(ParseErrorKind::Message(message.to_string()))
    }

    fn message_at(&self, position: usize, message: &str) -> ParseError {
        self.error_at(position, ParseErrorKind::Message(message.to_string()))
    }

    // --- Tokenizer ---

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos..)?.chars().next()
    }

    fn read(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos = self.pos.saturating_add(c.len_utf8());
        Some(c)
    }

    fn starts_with_whitespace(&self, position: usize) -> bool {
        self.input
            .get(position..)
            .and_then(|rest| rest.chars().next())
            .is_some_and(is_whitespace)
    }

    fn peek(&self, s: &str) -> bool {
        self.input
            .get(self.pos..)
            .is_some_and(|rest| rest.starts_with(s))
    }

    /// Skips whitespace and `//` comments.
    fn consume_whitespace(&mut self) {
        loop {
            while self.peek_char().is_some_and(is_whitespace) {
                self.read();
            }
            if !self.peek("//") {
                break;
            }
            while let Some(c) = self.read() {
                if c == '\n' {
                    break;
                }
            }
        }
    }

    /// The next symbol, either a single character symbol or a run of other
    /// characters. `None` at the end of the template.
    fn symbol(&mut self) -> ParseResult<Option<&'a str>> {
        self.consume_whitespace();
        let start = self.pos;
        match self.read() {
            None => return Ok(None),
            Some(c) if is_single_char_symbol(c) => return Ok(self.input.get(start..self.pos)),
            Some(_) => self.pos = start,
        }
        while let Some(c) = self.peek_char() {
            if is_whitespace(c) || is_single_char_symbol(c) {
                break;
            }
            self.read();
            if is_reserved_character(c) {
                return Err(self.error(ParseErrorKind::ReservedCharacter(c)));
            }
            if c == '\t' {
                return Err(self.error(ParseErrorKind::TabCharacter));
            }
        }
        Ok(self.input.get(start..self.pos))
    }

    /// Reads a quoted string, after the opening `"` has been consumed.
    fn quoted_string(&mut self) -> ParseResult<String> {
        let start = self.pos;
        let mut text = String::new();
        while let Some(c) = self.read() {
            match c {
                '\\' => match self.read() {
                    Some('n') => text.push('\n'),
                    Some(escaped @ ('"' | '\\')) => text.push(escaped),
                    Some(other) => {
                        return Err(self.message(&format!(
                            "Unsupported escape code in quoted string: \\{}",
                            other
                        )));
                    }
                    None => break,
                },
                '<' | '>' => {
                    return Err(self.message(
                        "Angle brackets are not allowed in quoted strings. Use proper tags for security.",
                    ));
                }
                '"' => return Ok(text),
                other => text.push(other),
            }
        }
        Err(self.error_at(start, ParseErrorKind::unexpected_eof(Some("end of quoted string"))))
    }

    /// Literals are written by the template author and output as is, apart
    /// from URL paths which are escaped once here.
    fn literal_for_context(&self, text: String) -> String {
        match self.context {
            Context::Url => escape(&text, Context::UrlPath),
            Context::Text
            | Context::Comment
            | Context::AttributeValue
            | Context::Unsafe
            | Context::FunctionArguments
            | Context::Tag
            | Context::UrlPath => text,
        }
    }

    // --- Structure ---

    fn push_nesting(&mut self, nesting: Nesting) -> ParseResult<()> {
        if self.nesting.len() >= MAX_PARSE_NESTING {
            return Err(self.error(ParseErrorKind::TooDeeplyNested));
        }
        self.nesting.push(nesting);
        Ok(())
    }

    fn pop_nesting(
        &mut self,
        position: usize,
        expected: fn(&Nesting) -> bool,
    ) -> ParseResult<Nesting> {
        match self.nesting.pop() {
            Some(top) if expected(&top) => Ok(top),
            Some(_) | None => Err(self.error_exactly_at(position, ParseErrorKind::ImproperNesting)),
        }
    }

    fn parse_template(mut self) -> ParseResult<ParsedTemplate> {
        let nodes = self.parse_list(None, "template")?;
        let mut seen = HashSet::new();
        let included = std::mem::take(&mut self.included_templates);
        let debug_comments = self
            .debug_comments
            .then(|| included.into_iter().filter(|name| seen.insert(name.clone())).collect());
        Ok(ParsedTemplate {
            root: Node::from_list(nodes),
            number_of_remembered_views: self.next_remember_index,
            debug_comments,
        })
    }

    /// Parses values until `end`, or the end of the template when `end` is `None`.
    fn parse_list(&mut self, end: Option<char>, what: &str) -> ParseResult<Vec<Node>> {
        let list_start = self.pos;
        let mut last_node_start = self.pos;
        self.push_nesting(Nesting::List)?;
        let nesting_size = self.nesting.len();
        let mut nodes = Vec::new();
        let mut seen_end = false;
        loop {
            match self.parse_one_value(end)? {
                Item::Node(node) => self.push_node(&mut nodes, node),
                Item::EndOfList => {
                    seen_end = true;
                    break;
                }
                Item::EndOfTemplate => break,
            }
            if self.nesting.len() == nesting_size {
                last_node_start = self.pos;
            }
        }
        if end.is_some() && !seen_end {
            let expected = format!("end of {}", what);
            return Err(self.error_at(list_start, ParseErrorKind::unexpected_eof(Some(&expected))));
        }
        self.pop_nesting(last_node_start, |n| *n == Nesting::List)?;
        Ok(nodes)
    }

    /// Adjacent literals in document text are merged.
    fn push_node(&self, nodes: &mut Vec<Node>, node: Node) {
        if self.context == Context::Text {
            if let (Some(Node::Literal(previous)), Node::Literal(text)) =
                (nodes.last_mut(), &node)
            {
                previous.push_str(text);
                return;
            }
        }
        nodes.push(node);
    }

    fn parse_one_value(&mut self, end: Option<char>) -> ParseResult<Item> {
        let Some(s) = self.symbol()? else {
            return Ok(Item::EndOfTemplate);
        };
        let mut chars = s.chars();
        let first = chars.next().unwrap_or_default();
        let single = chars.next().is_none().then_some(first);
        match single {
            Some('"') => {
                let text = self.quoted_string()?;
                return Ok(Item::Node(Node::Literal(self.literal_for_context(text))));
            }
            Some('<') => return self.parse_tag().map(Item::Node),
            Some('[') => {
                if self.context == Context::Url {
                    return self.parse_url(']').map(Item::Node);
                }
                if self.context == Context::Text {
                    return Err(self.message("Lists are not allowed within document text"));
                }
                return Ok(Item::Node(Node::from_list(self.parse_list(Some(']'), "list")?)));
            }
            Some('#') => {
                self.parse_directive()?;
                return self.parse_one_value(end);
            }
            Some(c) if Some(c) == end => return Ok(Item::EndOfList),
            Some('{') => {
                return Err(self.message(
                    "Unexpected start of block. Blocks are only allowed as part of functions.",
                ));
            }
            Some(c) if is_single_char_symbol(c) => {
                return Err(self.error(ParseErrorKind::UnexpectedSymbol {
                    found: c.to_string(),
                }));
            }
            Some(_) | None => {}
        }
        match first {
            '^' => return self.parse_enclosing_view_block(s).map(Item::Node),
            '.' if single.is_some() => return Ok(Item::Node(Node::Value(Vec::new()))),
            '.' => {
                return Err(self.message(
                    "Value names cannot be prefixed with . (single dot is used for 'this')",
                ));
            }
            ':' => return Err(self.message("Value names cannot be prefixed with :")),
            _ => {}
        }
        // A function if the name is immediately followed by (
        let saved = self.pos;
        if self.symbol()? == Some("(") {
            if self.starts_with_whitespace(saved) {
                return Err(self.message_at(
                    saved.saturating_add(1),
                    "No space allowed between function name and opening bracket",
                ));
            }
            return self.parse_function(s).map(Item::Node);
        }
        self.pos = saved;
        let path: Vec<String> = s.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(self.message(&format!("Bad value name: {}", s)));
        }
        Ok(Item::Node(Node::Value(path)))
    }

    fn parse_one_value_required(&mut self, expected: &str, end: Option<char>) -> ParseResult<Node> {
        let start = self.pos;
        match self.parse_one_value(end)? {
            Item::Node(node) => Ok(node),
            Item::EndOfList | Item::EndOfTemplate => {
                Err(self.message_at(start, &format!("Expected {}", expected)))
            }
        }
    }

    fn parse_enclosing_view_block(&mut self, name: &str) -> ParseResult<Node> {
        if self.in_enclosing_view_block {
            return Err(
                self.message("Enclosing view blocks may not contain other enclosing view blocks")
            );
        }
        self.in_enclosing_view_block = true;
        if name.chars().any(|c| c != '^') {
            return Err(self.message("Enclosing view block names may not contain other characters"));
        }
        if self.symbol()? != Some("{") {
            return Err(self.message("Enclosing view block names must be followed by a block"));
        }
        let levels = name.len();
        let Some(index) = self.remember_index_for_enclosing_view(levels) else {
            return Err(self.message(&format!("There are not {} enclosing views", levels)));
        };
        let nodes = self.parse_list(Some('}'), "enclosing view block")?;
        if nodes.is_empty() {
            return Err(self.message("Enclosing view blocks cannot be empty"));
        }
        self.in_enclosing_view_block = false;
        Ok(Node::EnclosingView {
            index,
            block: Box::new(Node::from_list(nodes)),
        })
    }

    /// Asks the nth enclosing function which changes the view to remember the
    /// view it replaces, allocating a slot the first time.
    fn remember_index_for_enclosing_view(&mut self, levels: usize) -> Option<usize> {
        let target = levels.checked_sub(1)?;
        let next_index = &mut self.next_remember_index;
        let remember_index = self
            .nesting
            .iter_mut()
            .rev()
            .filter_map(|nesting| match nesting {
                Nesting::Function {
                    changes_view: true,
                    remember_index,
                } => Some(remember_index),
                Nesting::Function { .. } | Nesting::List | Nesting::Tag(_) | Nesting::Url => None,
            })
            .nth(target)?;
        Some(*remember_index.get_or_insert_with(|| {
            let index = *next_index;
            *next_index = next_index.saturating_add(1);
            index
        }))
    }

    // --- Functions ---

    /// Called after the opening ( has been consumed.
    fn parse_function(&mut self, name: &str) -> ParseResult<Node> {
        match name {
            "url" => return self.parse_url(')'),
            "scriptTag" => {
                if self.context != Context::Text {
                    return Err(self.error(ParseErrorKind::function(
                        name,
                        "can only be used in document text",
                    )));
                }
                let Node::Url(url) = self.parse_url(')')? else {
                    return Err(self.message("Expected URL"));
                };
                return Ok(Node::ScriptTag(url));
            }
            _ => {}
        }
        let function_start = self.pos;
        let outer_context = self.context;
        let kind = FunctionKind::from_name(name).map_err(|kind| self.error(kind))?;
        let changes_view = kind.changes_view();
        let mut function = FunctionNode::new(name.to_string(), kind);
        self.context = Context::FunctionArguments;
        function.arguments = if self.configuration.function_arguments_are_url(name) {
            vec![self.parse_url(')')?]
        } else {
            self.parse_list(Some(')'), "arguments")?
        };
        self.context = outer_context;
        self.push_nesting(Nesting::Function {
            changes_view,
            remember_index: None,
        })?;
        self.parse_blocks(&mut function)?;
        function
            .validate(outer_context)
            .map_err(|kind| self.error_at(function_start, kind))?;
        self.configuration
            .validate_function(name, outer_context)
            .map_err(|message| {
                self.error_at(function_start, ParseErrorKind::function(name, message))
            })?;
        let popped = self.pop_nesting(function_start, |n| matches!(n, Nesting::Function { .. }))?;
        if let Nesting::Function { remember_index, .. } = popped {
            function.remember_index = remember_index;
        }
        if let FunctionKind::Template { name } = &function.kind {
            self.included_templates.push(name.clone());
        }
        Ok(Node::Function(Box::new(function)))
    }

    /// The first block is anonymous, later blocks are named, eg `if(x) {...} else {...}`.
    fn parse_blocks(&mut self, function: &mut FunctionNode) -> ParseResult<()> {
        let mut anonymous = true;
        loop {
            let saved = self.pos;
            let mut name = None;
            if !anonymous {
                name = match self.symbol()? {
                    Some("\"") => Some(self.quoted_string()?),
                    Some(symbol) => Some(symbol.to_string()),
                    None => None,
                };
                if name.is_none() {
                    self.pos = saved;
                    return Ok(());
                }
            }
            let name_end = self.pos;
            if self.symbol()? != Some("{") {
                self.pos = saved;
                return Ok(());
            }
            let what = name
                .as_ref()
                .map_or_else(|| "block".to_string(), |n| format!("{} block", n));
            let block = Node::from_list(self.parse_list(Some('}'), &what)?);
            function
                .check_block_permitted(name.as_deref())
                .map_err(|kind| self.error_at(name_end, kind))?;
            match name {
                None => function.anonymous_block = Some(block),
                Some(name) => {
                    if function.find_block(&name).is_some() {
                        return Err(self.message(&format!("Repeated block for function: {}", name)));
                    }
                    function.blocks.push((name, block));
                }
            }
            anonymous = false;
        }
    }

    // --- Tags ---

    /// Called after the < has been consumed.
    fn parse_tag(&mut self) -> ParseResult<Node> {
        if self.context != Context::Text {
            return Err(self.message("Tags are not valid in this context"));
        }
        let tag_start = self.pos;
        let name = self.symbol()?;
        if name == Some("/") {
            let close = self.parse_close_tag(tag_start)?;
            self.childless_tag = None;
            return Ok(close);
        }
        if name == Some("!") {
            return self.parse_doctype(tag_start);
        }
        self.context = Context::Tag;
        let name = self.check_tag_name(name, false, tag_start)?;
        if matches!(name, "script" | "style") {
            return Err(self.error(ParseErrorKind::ForbiddenTag {
                tag: name.to_string(),
            }));
        }
        if let Some(childless) = &self.childless_tag {
            return Err(self.message(&format!("Cannot include other tags inside <{}>", childless)));
        }
        if html::cannot_contain_child_tags(name) {
            self.childless_tag = Some(name.to_string());
        }
        let mut tag = TagNode {
            name: name.to_string(),
            start: format!("<{}", name),
            attributes: Vec::new(),
            dictionary: None,
        };
        let mut seen_attributes = HashSet::new();
        let mut attribute_name: Option<&str> = None;
        loop {
            let Some(symbol) = self.symbol()? else {
                return Err(self.error(ParseErrorKind::unexpected_eof(Some("end of tag"))));
            };
            match symbol {
                ">" => break,
                "=" => {
                    let Some(attribute) = attribute_name.take() else {
                        return Err(self.error(ParseErrorKind::UnexpectedSymbol {
                            found: "= in tag".to_string(),
                        }));
                    };
                    if !seen_attributes.insert(attribute) {
                        return Err(self.error(ParseErrorKind::DuplicateAttribute {
                            attribute: attribute.to_string(),
                            tag: name.to_string(),
                        }));
                    }
                    self.context = if html::attribute_is_url(name, attribute) {
                        Context::Url
                    } else {
                        Context::AttributeValue
                    };
                    let value = self.parse_one_value_required("attribute value", None)?;
                    self.check_tag_attribute(attribute, &value)?;
                    self.add_attribute(&mut tag, attribute, value);
                    self.context = Context::Tag;
                }
                "*" => {
                    let value =
                        self.parse_one_value_required("value for attribute dictionary", Some('>'))?;
                    if tag.dictionary.is_some() {
                        return Err(self.message("Tag can only have one attribute dictionary"));
                    }
                    if !value.represents_value_from_view() {
                        return Err(self.message("Attribute dictionary for tag must be a value"));
                    }
                    tag.dictionary = Some(value);
                }
                "/" => return Err(self.error_at(tag_start, ParseErrorKind::SelfClosingTag)),
                other => {
                    if attribute_name.is_some() {
                        return Err(self.message("Expected = after attribute name"));
                    }
                    if !html::valid_tag_attribute_name(other) {
                        return Err(self.error(ParseErrorKind::InvalidAttributeName {
                            attribute: other.to_string(),
                        }));
                    }
                    attribute_name = Some(other);
                }
            }
        }
        if attribute_name.is_some() {
            return Err(self.message("No attribute value in tag"));
        }
        if !html::is_void_tag(name) {
            // Void tags are never closed, so aren't part of the nesting.
            self.push_nesting(Nesting::Tag(name.to_string()))?;
        }
        self.context = Context::Text;
        if tag.attributes.is_empty() && tag.dictionary.is_none() {
            tag.start.push('>');
            return Ok(Node::Literal(tag.start));
        }
        Ok(Node::Tag(Box::new(tag)))
    }

    /// Literal values are written into the start of the tag.
    fn add_attribute(&self, tag: &mut TagNode, name: &str, value: Node) {
        if let Node::Literal(text) = &value {
            tag.start.push(' ');
            tag.start.push_str(name);
            tag.start.push('=');
            if self.quote_minimisation && can_omit_quotes(text) {
                tag.start.push_str(text);
            } else {
                tag.start.push('"');
                tag.start.push_str(text);
                tag.start.push('"');
            }
            return;
        }
        let context = match (&value, self.context) {
            // The value is the whole URL, so it's escaped as a path.
            (Node::Value(_), Context::Url) => Context::UrlPath,
            (_, context) => context,
        };
        tag.attributes.push(Attribute {
            name: name.to_string(),
            prepared_name_equals: format!(" {}=\"", name),
            value,
            context,
        });
    }

    fn check_tag_attribute(&self, attribute: &str, value: &Node) -> ParseResult<()> {
        match attribute {
            "style" | "id" | "class" if !value.literal_only() => {
                Err(self.error(ParseErrorKind::LiteralOnlyAttribute {
                    attribute: attribute.to_string(),
                }))
            }
            "background" => Err(self.error(ParseErrorKind::ForbiddenAttribute {
                attribute: attribute.to_string(),
            })),
            _ => Ok(()),
        }
    }

    fn parse_close_tag(&mut self, tag_start: usize) -> ParseResult<Node> {
        let name = self.symbol()?;
        let name = self.check_tag_name(name, true, tag_start)?;
        match self.symbol()? {
            Some(">") => {}
            Some("/") => return Err(self.error_at(tag_start, ParseErrorKind::SelfClosingTag)),
            Some(_) | None => return Err(self.message("A closing tag may not have attributes")),
        }
        if html::is_void_tag(name) {
            return Err(self.message_at(tag_start, "Void tags may not have close tags"));
        }
        match self.nesting.pop() {
            Some(Nesting::Tag(open)) if open == name => Ok(Node::Literal(format!("</{}>", name))),
            Some(_) | None => Err(self.error_at(tag_start, ParseErrorKind::UnbalancedTag {
                tag: name.to_string(),
            })),
        }
    }

    fn check_tag_name(
        &self,
        name: Option<&'a str>,
        close: bool,
        tag_start: usize,
    ) -> ParseResult<&'a str> {
        let Some(name) = name else {
            return Err(self.error(ParseErrorKind::unexpected_eof(Some("tag name"))));
        };
        if name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
            return Ok(name);
        }
        Err(self.error_at(tag_start, ParseErrorKind::InvalidTagName {
            name: format!("{}{}", if close { "/" } else { "" }, name),
        }))
    }

    fn parse_doctype(&mut self, tag_start: usize) -> ParseResult<Node> {
        loop {
            match self.read() {
                Some('>') => break,
                Some(_) => {}
                None => {
                    return Err(self.error(ParseErrorKind::unexpected_eof(Some(
                        "end of <!DOCTYPE ...> declaration",
                    ))));
                }
            }
        }
        let doctype = self
            .input
            .get(tag_start.saturating_sub(1)..self.pos)
            .unwrap_or_default();
        if doctype == "<!DOCTYPE>" {
            return Err(self.message_at(
                tag_start,
                "<!DOCTYPE ...> declarations must specify the document type",
            ));
        }
        if !doctype.starts_with("<!DOCTYPE ") {
            return Err(self.message_at(
                tag_start,
                "Tags starting with <! may only be a <!DOCTYPE ...> declaration",
            ));
        }
        Ok(Node::Literal(doctype.to_string()))
    }

    // --- URLs ---

    fn parse_url(&mut self, end: char) -> ParseResult<Node> {
        let url_start = self.pos;
        let outer_context = self.context;
        self.context = Context::Url;
        self.push_nesting(Nesting::Url)?;
        let mut url = UrlNode::default();
        let mut in_parameters = false;
        loop {
            let symbol_start = self.pos;
            let Some(symbol) = self.symbol()? else {
                return Err(
                    self.error_at(url_start, ParseErrorKind::unexpected_eof(Some("end of URL")))
                );
            };
            let single = (symbol.len() == 1).then(|| symbol.chars().next()).flatten();
            if single == Some(end) {
                break;
            }
            let mut in_fragment = false;
            if in_parameters {
                match symbol {
                    "*" => {
                        let value =
                            self.parse_one_value_required("dictionary value after *", Some(end))?;
                        if !value.represents_value_from_view() {
                            return Err(self.message_at(
                                symbol_start.saturating_add(1),
                                "Expected dictionary value after *",
                            ));
                        }
                        url.parameters.push(ParameterInstruction::MergeDictionary { value });
                    }
                    "!" => {
                        let Some(key) = self.symbol()? else {
                            return Err(self.message("Expected key name"));
                        };
                        url.parameters.push(ParameterInstruction::Remove { key: key.to_string() });
                    }
                    "#" => in_fragment = true,
                    key => {
                        if !html::valid_restricted_name(key) {
                            return Err(self.message(&format!(
                                "Invalid literal URL parameter name: '{}'",
                                key
                            )));
                        }
                        if self.symbol()? != Some("=") {
                            return Err(self.message(
                                "After ?, URLs must be formed of key=value, !key or *dictionary",
                            ));
                        }
                        // Escaped when the URL is rendered.
                        self.context = Context::Unsafe;
                        let value = self
                            .parse_one_value_required("URL parameter value after =", Some(end))?;
                        self.context = Context::Url;
                        url.parameters.push(ParameterInstruction::Set {
                            key: key.to_string(),
                            value,
                        });
                    }
                }
            } else {
                match symbol {
                    "?" => in_parameters = true,
                    "#" => in_fragment = true,
                    "=" | "!" | "*" => {
                        return Err(self.message(&format!(
                            "In URLs, {} can only be used to declare parameters after the ? symbol",
                            symbol
                        )));
                    }
                    _ => {
                        self.pos = symbol_start;
                        self.consume_whitespace();
                        let node_start = self.pos;
                        let node = self.parse_one_value_required("URL component", None)?;
                        if !node.allowed_in_url() {
                            return Err(
                                self.message_at(node_start.saturating_add(1), "Not allowed in URL")
                            );
                        }
                        url.path.push(node);
                    }
                }
            }
            if in_fragment {
                loop {
                    match self.parse_one_value(Some(end))? {
                        Item::Node(node) => url.fragment.push(node),
                        Item::EndOfList => break,
                        Item::EndOfTemplate => {
                            return Err(self.error(ParseErrorKind::unexpected_eof(Some(
                                "end of URL fragment",
                            ))));
                        }
                    }
                }
                break;
            }
        }
        self.context = outer_context;
        self.pop_nesting(url_start, |n| *n == Nesting::Url)?;
        Ok(Node::Url(Box::new(url)))
    }

    // --- Directives ---

    /// Called after the # has been consumed.
    fn parse_directive(&mut self) -> ParseResult<()> {
        if self.nesting.len() != 1 {
            return Err(self.message(
                "Directives must be at the top level of the template, and cannot be nested inside tags or functions.",
            ));
        }
        let directive_start = self.pos;
        let Some(directive) = self.symbol()? else {
            return Err(self.error(ParseErrorKind::unexpected_eof(Some("directive name"))));
        };
        if self.starts_with_whitespace(directive_start) {
            return Err(self.message_at(
                directive_start.saturating_add(1),
                "No space allowed between # and directive name",
            ));
        }
        match directive {
            "option:no-tag-attribute-quote-minimisation"
            | "option:no-tag-attribute-quote-minimization" => {
                self.quote_minimisation = false;
            }
            "option:disable-debug-comments" => self.debug_comments = false,
            other => return Err(self.message(&format!("Unknown parser directive: #{}", other))),
        }
        Ok(())
    }
}

pub(crate) fn parse(
    input: &str,
    configuration: &dyn ParserConfiguration,
) -> ParseResult<ParsedTemplate> {
    Parser::new(input, configuration).parse_template()
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! lit {
        ($text:expr) => {
            Node::Literal($text.to_string())
        };
    }
    macro_rules! val {
        ($($part:expr),*) => {
            Node::Value(vec![$($part.to_string()),*])
        };
    }

    fn parse_root(input: &str) -> ParseResult<Node> {
        parse(input, &DefaultParserConfiguration).map(|parsed| parsed.root)
    }

    fn parse_error(input: &str) -> String {
        match parse_root(input) {
            Ok(node) => panic!("expected {:?} to fail, parsed {:?}", input, node),
            Err(error) => error.to_string(),
        }
    }

    fn function(node: &Node) -> &FunctionNode {
        match node {
            Node::Function(function) => function,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(parse_root("").unwrap(), lit!(""));
        assert_eq!(parse_root("  // just a comment\n").unwrap(), lit!(""));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_literals_are_verbatim_and_merged() {
        assert_eq!(
            parse_root("<p> \"Fish &amp; chips\" \" &nbsp;\" </p>").unwrap(),
            lit!("<p>Fish &amp; chips &nbsp;</p>")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_values() {
        assert_eq!(parse_root("a.b.c").unwrap(), val!("a", "b", "c"));
        assert_eq!(parse_root(".").unwrap(), Node::Value(vec![]));
        assert_eq!(
            parse_root("\"x\" name").unwrap(),
            Node::List(vec![lit!("x"), val!("name")])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bad_value_names() {
        assert!(parse_error(".x").contains("cannot be prefixed with ."));
        assert!(parse_error(":x").contains("cannot be prefixed with :"));
        assert!(parse_error("a..b").contains("Bad value name"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_quoted_string_escapes() {
        assert_eq!(parse_root(r#""a\"b\\c\nd""#).unwrap(), lit!("a\"b\\c\nd"));
        assert!(parse_error(r#""a\tb""#).contains("Unsupported escape code"));
        assert!(parse_error("\"<b>\"").contains("Angle brackets"));
        assert_eq!(
            parse_error("\"unterminated"),
            "Error at line 1 character 1: Unexpected end of template (expected end of quoted string)"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_reserved_characters() {
        assert_eq!(parse_error("a,b"), "Error at line 1 character 2: Reserved character: \",\"");
        assert_eq!(
            parse_error("\n\tx"),
            "Error at line 2 character 1: Tab character in source, indent with 4 spaces"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_positions() {
        assert_eq!(
            parse_error("<p>\n  <script>"),
            "Error at line 2 character 9: <script> tags are not allowed"
        );
        assert_eq!(parse_error("x\n)"), "Error at line 2 character 1: Unexpected )");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_attributes() {
        assert_eq!(
            parse_root("<div class=\"box\" title=\"Say &quot;hi&quot;\"></div>").unwrap(),
            lit!("<div class=box title=\"Say &quot;hi&quot;\"></div>")
        );
        assert_eq!(
            parse_root("<img src=\"/a b.png\">").unwrap(),
            lit!("<img src=\"/a%20b.png\">")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_quote_minimisation_directive() {
        assert_eq!(
            parse_root("#option:no-tag-attribute-quote-minimisation <br class=\"x\">").unwrap(),
            lit!("<br class=\"x\">")
        );
        assert_eq!(
            parse_root("#option:no-tag-attribute-quote-minimization <br class=\"x\">").unwrap(),
            lit!("<br class=\"x\">")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_directives_only_at_top_level() {
        assert!(
            parse_error("<p> #option:disable-debug-comments </p>")
                .contains("Directives must be at the top level")
        );
        assert!(
            parse_error("#option:unknown").contains("Unknown parser directive: #option:unknown")
        );
        assert!(parse_error("# option:disable-debug-comments").contains("No space allowed"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dynamic_attributes() {
        let Node::Tag(tag) = parse_root("<img alt=\"x\" src=link title=name>").unwrap() else {
            panic!("expected a tag");
        };
        assert_eq!(tag.start, "<img alt=x");
        let contexts: Vec<_> = tag
            .attributes
            .iter()
            .map(|a| (a.prepared_name_equals.as_str(), a.context))
            .collect();
        assert_eq!(
            contexts,
            vec![(" src=\"", Context::UrlPath), (" title=\"", Context::AttributeValue)]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_errors() {
        assert!(parse_error("<style>").contains("<style> tags are not allowed"));
        assert!(parse_error("<P>").contains("Invalid tag name <P>"));
        assert!(
            parse_error("<a title=\"x\" title=\"y\">")
                .contains("Duplicate 'title' attribute in <a>")
        );
        assert!(parse_error("<a onclick=\"x\">").contains("Invalid attribute name"));
        assert!(
            parse_error("<div class=name></div>")
                .contains("class attributes must always be a literal")
        );
        assert!(
            parse_error("<body background=\"x.png\"></body>")
                .contains("background attributes are not allowed")
        );
        assert!(parse_error("<br/>").contains("Self closing tags"));
        assert!(parse_error("<p></div>").contains("Unexpected tag </div>"));
        assert!(parse_error("<br></br>").contains("Void tags may not have close tags"));
        assert!(
            parse_error("<title><b></b></title>")
                .contains("Cannot include other tags inside <title>")
        );
        assert!(parse_error("<p>").contains("Improperly nested block"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_only_attributes() {
        assert!(parse_root("<div class=if(x) { \"a\" } else { \"b\" }></div>").is_ok());
        assert!(parse_root("<div id=[\"a\" \"b\"]></div>").is_ok());
        assert!(parse_root("<div class=unsafeAttributeValue(unsafeClass)></div>").is_ok());
        assert!(parse_error("<div style=if(x) { y }></div>").contains("style attributes"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doctype() {
        assert_eq!(parse_root("<!DOCTYPE html>").unwrap(), lit!("<!DOCTYPE html>"));
        assert!(parse_error("<!DOCTYPE>").contains("must specify the document type"));
        assert!(parse_error("<!-- x -->").contains("may only be a <!DOCTYPE"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_functions_and_blocks() {
        let root = parse_root("if(x) { \"yes\" } else { \"no\" }").unwrap();
        let conditional = function(&root);
        assert_eq!(conditional.kind, FunctionKind::Conditional { invert: false });
        assert_eq!(conditional.arguments, vec![val!("x")]);
        assert_eq!(conditional.anonymous_block, Some(lit!("yes")));
        assert_eq!(conditional.find_block("else"), Some(&lit!("no")));

        let root = parse_root("switch(x) {} \"quoted name\" { \"q\" } plain { \"p\" }").unwrap();
        let switch = function(&root);
        assert_eq!(switch.find_block("quoted name"), Some(&lit!("q")));
        assert_eq!(switch.find_block("plain"), Some(&lit!("p")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_function_errors() {
        assert!(
            parse_error("if (x) {}")
                .contains("No space allowed between function name and opening bracket")
        );
        assert!(parse_error("if(x) {} other {}").contains("if() may not take a other block"));
        assert!(parse_error("switch(x) {} a {} a {}").contains("Repeated block for function: a"));
        assert!(parse_error("if(x)").contains("if() requires an anonymous block"));
        assert!(parse_error("if(x y) {}").contains("if() must take exactly one argument"));
        assert!(
            parse_error("unsafeHTML(html)")
                .contains("must use a value whose name begins with 'unsafe'")
        );
        assert!(parse_error("{ x }").contains("Blocks are only allowed as part of functions"));
        assert!(
            parse_error("<a title=yield()>").contains("yield() can only be used in document text")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_function_arguments_are_unescaped() {
        let root = parse_root("concat(\"a&b\" x)").unwrap();
        assert_eq!(function(&root).arguments, vec![lit!("a&b"), val!("x")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lists() {
        assert!(parse_error("[a b]").contains("Lists are not allowed within document text"));
        let Node::Tag(tag) = parse_root("<hr class=[\"a\" if(x) { \"b\" }]>").unwrap() else {
            panic!("expected a tag");
        };
        assert!(matches!(
            tag.attributes.first(),
            Some(Attribute { value: Node::List(children), .. }) if children.len() == 2
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_urls() {
        let source = "url(\"/p\" id ? a=x !b *params # \"frag\")";
        let Node::Url(url) = parse_root(source).unwrap() else {
            panic!("expected a URL");
        };
        assert_eq!(url.path, vec![lit!("/p"), val!("id")]);
        assert_eq!(
            url.parameters,
            vec![
                ParameterInstruction::Set { key: "a".to_string(), value: val!("x") },
                ParameterInstruction::Remove { key: "b".to_string() },
                ParameterInstruction::MergeDictionary { value: val!("params") },
            ]
        );
        assert_eq!(url.fragment, vec![lit!("frag")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_url_errors() {
        assert!(parse_error("url(a=b)").contains("can only be used to declare parameters"));
        assert!(parse_error("url(? A=b)").contains("Invalid literal URL parameter name: 'A'"));
        assert!(parse_error("url(? a b)").contains("After ?, URLs must be formed"));
        assert_eq!(
            parse_error("url(each(x) { . })"),
            "Error at line 1 character 5: Not allowed in URL"
        );
        assert_eq!(
            parse_error("url(\"/a\"\n    each(x) { . })"),
            "Error at line 2 character 5: Not allowed in URL"
        );
        assert!(parse_error("url(\"/x\"").contains("expected end of URL"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_enclosing_views() {
        let source = "each(a) { each(b) { ^{name} ^^{title} } }";
        let parsed = parse(source, &DefaultParserConfiguration).unwrap();
        assert_eq!(parsed.number_of_remembered_views, 2);
        let outer = function(&parsed.root);
        assert_eq!(outer.remember_index, Some(1));
        let inner = function(outer.anonymous_block.as_ref().unwrap());
        assert_eq!(inner.remember_index, Some(0));
        assert_eq!(
            inner.anonymous_block,
            Some(Node::List(vec![
                Node::EnclosingView { index: 0, block: Box::new(val!("name")) },
                Node::EnclosingView { index: 1, block: Box::new(val!("title")) },
            ]))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_enclosing_view_errors() {
        assert!(parse_error("each(a) { ^^{x} }").contains("There are not 2 enclosing views"));
        assert!(
            parse_error("each(a) { ^{ ^{x} } }")
                .contains("may not contain other enclosing view blocks")
        );
        assert!(parse_error("each(a) { ^{} }").contains("cannot be empty"));
        assert!(parse_error("each(a) { ^x{y} }").contains("may not contain other characters"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_debug_comment_list() {
        let source = "template:a() template:b() template:a()";
        let parsed = parse(source, &DefaultParserConfiguration).unwrap();
        assert_eq!(parsed.debug_comments, Some(vec!["a".to_string(), "b".to_string()]));
        let source = "#option:disable-debug-comments template:a()";
        let parsed = parse(source, &DefaultParserConfiguration).unwrap();
        assert_eq!(parsed.debug_comments, None);
    }

    struct UrlArguments;

    impl ParserConfiguration for UrlArguments {
        fn function_arguments_are_url(&self, function_name: &str) -> bool {
            function_name == "link"
        }

        fn validate_function(&self, function_name: &str, _context: Context) -> Result<(), String> {
            if function_name == "forbidden" {
                Err("is not allowed here".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parser_configuration() {
        let root = parse("link(\"/x\" ? a=b)", &UrlArguments).unwrap().root;
        assert!(matches!(function(&root).arguments.as_slice(), [Node::Url(_)]));
        let err = parse("forbidden()", &UrlArguments).unwrap_err();
        assert!(err.to_string().ends_with("forbidden() is not allowed here"));
    }

    fn nested_conditionals(depth: usize) -> String {
        format!("{}\"x\"{}", "if(x){".repeat(depth), "}".repeat(depth))
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_nesting_is_bounded() {
        // Each conditional opens a function and its block.
        let depth = (MAX_PARSE_NESTING / 2).saturating_sub(1);
        assert!(parse_root(&nested_conditionals(depth)).is_ok());
        let err = parse_root(&nested_conditionals(2000)).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);

        let tags = "<div>".repeat(MAX_PARSE_NESTING);
        assert_eq!(parse_root(&tags).unwrap_err().kind, ParseErrorKind::TooDeeplyNested);
        let lists = format!("url({}", "[".repeat(2000));
        assert_eq!(parse_root(&lists).unwrap_err().kind, ParseErrorKind::TooDeeplyNested);
    }
}
