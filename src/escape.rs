use crate::Context;

/// Escapes `input` so it can be safely emitted in `context`.
///
/// # Panics
///
/// Panics when called with [`Context::Tag`] or [`Context::FunctionArguments`].
/// Nothing is ever rendered in those contexts, so this is a logic error in the
/// caller rather than a problem with the input.
///
/// ```
/// use safelate::{Context, escape};
///
/// assert_eq!(escape("a < b & c", Context::Text), "a &lt; b &amp; c");
/// assert_eq!(escape("x y/z", Context::Url), "x%20y%2Fz");
/// assert_eq!(escape("x y/z", Context::UrlPath), "x%20y/z");
/// ```
pub fn escape(input: &str, context: Context) -> String {
    let mut output = String::with_capacity(input.len().saturating_add(16));
    escape_into(input, &mut output, context);
    output
}

/// Escapes `input` for `context`, appending to `output`.
pub fn escape_into(input: &str, output: &mut String, context: Context) {
    match context {
        Context::Text | Context::Comment => escape_text(input, output, false),
        Context::AttributeValue => escape_text(input, output, true),
        Context::Url => escape_url(input, output, false),
        Context::UrlPath => escape_url(input, output, true),
        Context::Unsafe => output.push_str(input),
        Context::Tag | Context::FunctionArguments => {
            panic!("Unknown escaping context: {}", context.name())
        }
    }
}

fn escape_text(input: &str, output: &mut String, quote: bool) {
    let mut start = 0;
    for (pos, c) in input.char_indices() {
        let entity = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            '"' if quote => "&quot;",
            _ => continue,
        };
        output.push_str(input.get(start..pos).unwrap_or_default());
        output.push_str(entity);
        start = pos.saturating_add(1);
    }
    output.push_str(input.get(start..).unwrap_or_default());
}

/// Percent-encodes everything outside the RFC 3986 unreserved characters.
///
/// With `leave_reserved`, the reserved characters and any valid `%XX` sequence
/// already in the input pass through untouched.
fn escape_url(input: &str, output: &mut String, leave_reserved: bool) {
    let bytes = input.as_bytes();
    for (pos, &b) in bytes.iter().enumerate() {
        let keep = is_unreserved(b)
            || (leave_reserved
                && (is_reserved(b) || (b == b'%' && valid_escape_at(bytes, pos))));
        if keep {
            output.push(char::from(b));
        } else {
            // Non-ASCII chars arrive here byte by byte, already UTF-8 encoded.
            push_hex(output, b);
        }
    }
}

const fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

const fn is_reserved(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'#'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
    )
}

fn valid_escape_at(bytes: &[u8], pos: usize) -> bool {
    let hex = |offset: usize| {
        pos.checked_add(offset)
            .and_then(|i| bytes.get(i))
            .is_some_and(u8::is_ascii_hexdigit)
    };
    hex(1) && hex(2)
}

fn push_hex(output: &mut String, b: u8) {
    let digit = |n: u8| char::from_digit(u32::from(n), 16).map_or('0', |c| c.to_ascii_uppercase());
    output.push('%');
    output.push(digit(b >> 4));
    output.push(digit(b & 0x0f));
}
