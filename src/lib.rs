//! A security-conscious HTML templating language.
//!
//! Templates are parsed into a tree which knows, for every value, whether it
//! lands in document text, an attribute, a URL or a comment. Values are
//! escaped for that context when rendered, and the parser rejects anything
//! which would let data from the view inject markup or script.

mod ast;
mod binding;
mod context;
mod driver;
mod engine;
mod error;
mod escape;
mod functions;
mod html;
mod interface;
mod parser;
mod render;
mod template;
mod translate;

// Public exports.
pub use binding::{ArgumentRequirement, FunctionArgument, FunctionBinding};
pub use context::Context;
pub use driver::{
    DEFAULT_LOCALE_ID, Driver, FunctionRenderer, IncludedTemplateResolver, MAX_DRIVER_NESTING,
    Translator, ViewProvider,
};
pub use engine::SafelateEngine;
pub use error::{
    ParseError, ParseErrorKind, RenderError, RenderResult, SafelateError, SafelateResult,
};
pub use escape::{escape, escape_into};
pub use interface::{DeferredValue, SafelateInterface, Value, ValueProvider};
pub use parser::{DefaultParserConfiguration, ParserConfiguration};
pub use template::{Deferred, DeferredRender, Template};
