use std::fmt::Write;

use crate::Context;

/// Name of the block which `if()` and friends render when the condition is false.
pub(crate) const ELSE_BLOCK: &str = "else";

/// A node in the parsed template.
///
/// Nodes are immutable once the parser has built them, and hold no per-render
/// state, so a tree can be rendered from many threads at once.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// Text output exactly as is. The parser has already escaped it if needed.
    Literal(String),
    /// A dotted path into the current view. An empty path is the view itself.
    Value(Vec<String>),
    /// An open tag with at least one attribute which must be rendered.
    Tag(Box<TagNode>),
    Url(Box<UrlNode>),
    Function(Box<FunctionNode>),
    /// Two or more nodes.
    List(Vec<Node>),
    /// `^{...}`, rendering the block with a view remembered by an enclosing function.
    EnclosingView { index: usize, block: Box<Node> },
    /// `scriptTag(...)`
    ScriptTag(Box<UrlNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TagNode {
    pub(crate) name: String,
    /// Everything before the dynamic attributes, eg `<a class="x"`.
    pub(crate) start: String,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) dictionary: Option<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Attribute {
    pub(crate) name: String,
    /// ` name="`, ready for output.
    pub(crate) prepared_name_equals: String,
    pub(crate) value: Node,
    pub(crate) context: Context,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct UrlNode {
    pub(crate) path: Vec<Node>,
    pub(crate) parameters: Vec<ParameterInstruction>,
    pub(crate) fragment: Vec<Node>,
}

/// Applied in order when rendering a URL, to build the query string.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParameterInstruction {
    Set { key: String, value: Node },
    Remove { key: String },
    MergeDictionary { value: Node },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FunctionNode {
    pub(crate) name: String,
    pub(crate) kind: FunctionKind,
    pub(crate) arguments: Vec<Node>,
    pub(crate) anonymous_block: Option<Node>,
    pub(crate) blocks: Vec<(String, Node)>,
    /// Set when an enclosing view block refers to the view this function replaces.
    pub(crate) remember_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Within,
    Conditional { invert: bool },
    ConditionalMulti { invert: bool, any: bool },
    Each,
    Switch,
    Do,
    Render,
    Concat,
    UnsafeHtml,
    UnsafeAttributeValue,
    Yield { block: Option<String> },
    Template { name: String },
    IfContent,
    MarkContent,
    IfHasBlock,
    Translated { category: String },
    Generic,
}

impl Node {
    /// Lists of one collapse to their only child, empty lists to an empty literal.
    pub(crate) fn from_list(mut nodes: Vec<Self>) -> Self {
        match nodes.len() {
            0 => Self::Literal(String::new()),
            1 => nodes.pop().unwrap_or(Self::Literal(String::new())),
            _ => Self::List(nodes),
        }
    }

    pub(crate) fn literal_str(&self) -> Option<&str> {
        match self {
            Self::Literal(text) => Some(text),
            Self::Value(_)
            | Self::Tag(_)
            | Self::Url(_)
            | Self::Function(_)
            | Self::List(_)
            | Self::EnclosingView { .. }
            | Self::ScriptTag(_) => None,
        }
    }

    /// Does this node evaluate to something taken from the view?
    pub(crate) fn represents_value_from_view(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::EnclosingView { block, .. } => block.represents_value_from_view(),
            Self::Literal(_)
            | Self::Tag(_)
            | Self::Url(_)
            | Self::Function(_)
            | Self::List(_)
            | Self::ScriptTag(_) => false,
        }
    }

    /// Can this node only ever render literal text written by the template author?
    ///
    /// Used for the attributes where escaping alone is not enough.
    pub(crate) fn literal_only(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::List(children) => children.iter().all(Self::literal_only),
            Self::Function(function) => function.literal_only(),
            Self::Value(_)
            | Self::Tag(_)
            | Self::Url(_)
            | Self::EnclosingView { .. }
            | Self::ScriptTag(_) => false,
        }
    }

    pub(crate) fn allowed_in_url(&self) -> bool {
        match self {
            Self::Tag(_) | Self::Url(_) | Self::ScriptTag(_) => false,
            Self::Function(function) => !function.kind.changes_view(),
            Self::Literal(_) | Self::Value(_) | Self::List(_) | Self::EnclosingView { .. } => true,
        }
    }

    pub(crate) fn dump(&self, out: &mut String, prefix: &str) {
        let deeper = format!("{}  ", prefix);
        match self {
            Self::Literal(text) => {
                let _ = writeln!(out, "{}LITERAL {:?}", prefix, text);
            }
            Self::Value(path) if path.is_empty() => {
                let _ = writeln!(out, "{}VALUE .", prefix);
            }
            Self::Value(path) => {
                let _ = writeln!(out, "{}VALUE {}", prefix, path.join("."));
            }
            Self::Tag(tag) => {
                let _ = writeln!(
                    out,
                    "{}TAG {}> with {} attributes:",
                    prefix,
                    tag.start,
                    tag.attributes.len()
                );
                for attribute in &tag.attributes {
                    let _ = writeln!(out, "{}{}", deeper, attribute.name);
                    attribute.value.dump(out, &format!("{}  ", deeper));
                }
                if let Some(dictionary) = &tag.dictionary {
                    let _ = writeln!(out, "{}ATTRIBUTE DICTIONARY", deeper);
                    dictionary.dump(out, &format!("{}  ", deeper));
                }
            }
            Self::Url(url) => url.dump(out, prefix, "URL"),
            Self::ScriptTag(url) => url.dump(out, prefix, "SCRIPT TAG"),
            Self::Function(function) => function.dump(out, prefix),
            Self::List(children) => {
                let _ = writeln!(out, "{}LIST", prefix);
                for child in children {
                    child.dump(out, &deeper);
                }
            }
            Self::EnclosingView { index, block } => {
                let _ = writeln!(out, "{}ENCLOSING VIEW index={}", prefix, index);
                block.dump(out, &deeper);
            }
        }
    }
}

impl UrlNode {
    fn dump(&self, out: &mut String, prefix: &str, title: &str) {
        let _ = writeln!(out, "{}{}", prefix, title);
        for node in &self.path {
            node.dump(out, &format!("{}  ", prefix));
        }
        if !self.parameters.is_empty() {
            let _ = writeln!(out, "{}  PARAMETERS", prefix);
            let deeper = format!("{}      ", prefix);
            for instruction in &self.parameters {
                match instruction {
                    ParameterInstruction::Set { key, value } => {
                        let _ = writeln!(out, "{}    SET '{}' to", prefix, key);
                        value.dump(out, &deeper);
                    }
                    ParameterInstruction::Remove { key } => {
                        let _ = writeln!(out, "{}    REMOVE '{}'", prefix, key);
                    }
                    ParameterInstruction::MergeDictionary { value } => {
                        let _ = writeln!(out, "{}    ADD ALL KEYS IN", prefix);
                        value.dump(out, &deeper);
                    }
                }
            }
        }
        if !self.fragment.is_empty() {
            let _ = writeln!(out, "{}  FRAGMENT", prefix);
            for node in &self.fragment {
                node.dump(out, &format!("{}    ", prefix));
            }
        }
    }
}

impl FunctionNode {
    pub(crate) fn new(name: String, kind: FunctionKind) -> Self {
        Self {
            name,
            kind,
            arguments: Vec::new(),
            anonymous_block: None,
            blocks: Vec::new(),
            remember_index: None,
        }
    }

    pub(crate) fn find_block(&self, name: &str) -> Option<&Node> {
        self.blocks
            .iter()
            .find_map(|(block_name, node)| (block_name == name).then_some(node))
    }

    /// `None` is the anonymous block.
    pub(crate) fn block(&self, name: Option<&str>) -> Option<&Node> {
        match name {
            None => self.anonymous_block.as_ref(),
            Some(name) => self.find_block(name),
        }
    }

    pub(crate) fn has_any_blocks(&self) -> bool {
        self.anonymous_block.is_some() || !self.blocks.is_empty()
    }

    fn blocks_literal_only(&self) -> bool {
        self.anonymous_block.as_ref().is_none_or(Node::literal_only)
            && self.blocks.iter().all(|(_, node)| node.literal_only())
    }

    fn literal_only(&self) -> bool {
        match self.kind {
            FunctionKind::Conditional { .. }
            | FunctionKind::ConditionalMulti { .. }
            | FunctionKind::Switch
            | FunctionKind::IfHasBlock => self.blocks_literal_only(),
            FunctionKind::Concat => self.arguments.iter().all(Node::literal_only),
            // The name of the value has been checked, and the author has taken responsibility.
            FunctionKind::UnsafeAttributeValue => true,
            FunctionKind::Within
            | FunctionKind::Each
            | FunctionKind::Do
            | FunctionKind::Render
            | FunctionKind::UnsafeHtml
            | FunctionKind::Yield { .. }
            | FunctionKind::Template { .. }
            | FunctionKind::IfContent
            | FunctionKind::MarkContent
            | FunctionKind::Translated { .. }
            | FunctionKind::Generic => false,
        }
    }

    fn dump(&self, out: &mut String, prefix: &str) {
        let mut prefix = prefix.to_string();
        if let Some(index) = self.remember_index {
            let _ = writeln!(out, "{}REMEMBER VIEW index={}", prefix, index);
            prefix.push_str("  ");
        }
        let _ = writeln!(out, "{}{}", prefix, self.kind.dump_name(&self.name));
        let nested = format!("{}    ", prefix);
        if !self.arguments.is_empty() {
            let _ = writeln!(out, "{}  ARGUMENTS", prefix);
            for argument in &self.arguments {
                argument.dump(out, &nested);
            }
        }
        if let Some(block) = &self.anonymous_block {
            let _ = writeln!(out, "{}  ANONYMOUS BLOCK", prefix);
            block.dump(out, &nested);
        }
        for (name, block) in &self.blocks {
            let _ = writeln!(out, "{}  BLOCK {}", prefix, name);
            block.dump(out, &nested);
        }
    }
}

impl FunctionKind {
    /// Functions which render their blocks with a different view.
    pub(crate) const fn changes_view(&self) -> bool {
        matches!(self, Self::Each | Self::Within)
    }

    fn dump_name(&self, name: &str) -> String {
        match self {
            Self::Generic => format!("FUNCTION {}()", name),
            Self::Translated { .. } => "TRANSLATED-STRING".to_string(),
            Self::Within
            | Self::Conditional { .. }
            | Self::ConditionalMulti { .. }
            | Self::Each
            | Self::Switch
            | Self::Do
            | Self::Render
            | Self::Concat
            | Self::UnsafeHtml
            | Self::UnsafeAttributeValue
            | Self::Yield { .. }
            | Self::Template { .. }
            | Self::IfContent
            | Self::MarkContent
            | Self::IfHasBlock => name.to_uppercase(),
        }
    }
}
