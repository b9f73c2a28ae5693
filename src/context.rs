/// The lexical context at a position in a template.
///
/// The context decides which syntax is legal while parsing, and how values are
/// escaped while rendering. It is passed explicitly through every render call.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    /// Document text between tags.
    Text,
    /// Inside an open tag, between attributes.
    Tag,
    /// The value of a non-URL tag attribute.
    AttributeValue,
    /// A URL, or a non-path component of a URL.
    Url,
    /// The path of a URL, where reserved characters are left as they are.
    UrlPath,
    /// The argument list of a function call.
    FunctionArguments,
    /// No escaping at all.
    Unsafe,
    /// An HTML comment.
    Comment,
}

impl Context {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Tag => "TAG",
            Self::AttributeValue => "ATTRIBUTE_VALUE",
            Self::Url => "URL",
            Self::UrlPath => "URL_PATH",
            Self::FunctionArguments => "FUNCTION_ARGUMENTS",
            Self::Unsafe => "UNSAFE",
            Self::Comment => "COMMENT",
        }
    }

    /// True for the URL contexts, where each-like functions and tags may not appear.
    pub const fn is_url(self) -> bool {
        matches!(self, Self::Url | Self::UrlPath)
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
