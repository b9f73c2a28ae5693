pub type SafelateResult<T> = std::result::Result<T, SafelateError>;
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Unexpected end of template{expected}")]
    UnexpectedEof {
        /// Describes what was expected, e.g., " (expected end of block)"
        expected: String,
    },
    #[error("Unexpected {found}")]
    UnexpectedSymbol { found: String },
    #[error("Reserved character: \"{0}\"")]
    ReservedCharacter(char),
    #[error("Tab character in source, indent with 4 spaces")]
    TabCharacter,
    #[error("<{tag}> tags are not allowed")]
    ForbiddenTag { tag: String },
    #[error("Invalid tag name <{name}> (must be lower case, a-z0-9 only)")]
    InvalidTagName { name: String },
    #[error("Unexpected tag </{tag}>, tags must be balanced")]
    UnbalancedTag { tag: String },
    #[error("Self closing tags are not allowed")]
    SelfClosingTag,
    #[error("Duplicate '{attribute}' attribute in <{tag}>")]
    DuplicateAttribute { attribute: String, tag: String },
    #[error(
        "Invalid attribute name: '{attribute}' (attribute names must be lower case, and not begin with 'on')"
    )]
    InvalidAttributeName { attribute: String },
    #[error(
        "{attribute} attributes must always be a literal string or conditionals choosing between literal strings"
    )]
    LiteralOnlyAttribute { attribute: String },
    #[error("{attribute} attributes are not allowed")]
    ForbiddenAttribute { attribute: String },
    #[error("{function}() must use a value whose name begins with 'unsafe'")]
    UnsafeValueName { function: String },
    #[error("Improperly nested block, check tags are balanced")]
    ImproperNesting,
    #[error("Template is nested too deeply")]
    TooDeeplyNested,
    #[error("{function}() {message}")]
    Function { function: String, message: String },
    #[error("{0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<&str>) -> Self {
        Self::UnexpectedEof {
            expected: expected.map_or_else(String::new, |e| format!(" (expected {})", e)),
        }
    }

    pub fn function<N: Into<String>, M: Into<String>>(function: N, message: M) -> Self {
        Self::Function {
            function: function.into(),
            message: message.into(),
        }
    }
}

/// An error found while parsing, with a 1-based position in the template source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Error at line {line} character {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

/// An error raised while rendering.
///
/// `template` names the nearest template being rendered when the error occured,
/// found by walking up the chain of drivers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error(
    "{message}{}",
    .template.as_ref().map(|t| format!(" (when rendering template '{}')", t)).unwrap_or_default()
)]
pub struct RenderError {
    pub message: String,
    pub template: Option<String>,
}

impl RenderError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
            template: None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SafelateError {
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error("Parse error in template '{template_name}': {error}")]
    Parse {
        template_name: String,
        #[source]
        error: ParseError,
    },
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl SafelateError {
    pub(crate) fn parse<N: Into<String>>(template_name: N, error: ParseError) -> Self {
        Self::Parse {
            template_name: template_name.into(),
            error,
        }
    }
}
