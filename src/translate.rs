//! Translated strings, `i("...")`, with interpolation and plural formatting.
//!
//! Inside the translated text, `{name}` renders the block called `name`, `{}`
//! renders the anonymous block, and `{count,plural,one {# item} other {# items}}`
//! chooses a message using the plural rules of the driver's locale.
//!
//! Translated text is trusted like any other literal and is output as is.
//! Only the output of plural formatting is escaped.

use intl_pluralrules::{PluralCategory, PluralRuleType, PluralRules};
use unic_langid::LanguageIdentifier;

use crate::ast::{FunctionNode, Node};
use crate::driver::{DEFAULT_LOCALE_ID, Driver, ViewProvider};
use crate::error::RenderResult;
use crate::escape::escape_into;
use crate::Context;

pub(crate) const DEFAULT_CATEGORY: &str = "template";

pub(crate) fn render_translated<P: ViewProvider>(
    function: &FunctionNode,
    category: &str,
    output: &mut String,
    driver: &Driver<'_, P>,
    view: &P::View,
    context: Context,
) -> RenderResult<()> {
    let Some(text) = function.arguments.first().and_then(Node::literal_str) else {
        return Err(driver.render_error(format!(
            "{}() must have a literal string as the argument",
            function.name
        )));
    };
    let translated = driver.translate_text(category, text);
    if function.has_any_blocks() {
        interpolate(function, &translated, output, driver, view, context)
    } else {
        output.push_str(&translated);
        Ok(())
    }
}

fn interpolate<P: ViewProvider>(
    function: &FunctionNode,
    text: &str,
    output: &mut String,
    driver: &Driver<'_, P>,
    view: &P::View,
    context: Context,
) -> RenderResult<()> {
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        output.push_str(rest.get(..start).unwrap_or_default());
        let inside = rest.get(start.saturating_add(1)..).unwrap_or_default();
        let end = matching_brace(inside)
            .ok_or_else(|| driver.render_error("Missing end } from interpolation"))?;
        let interpolation = inside.get(..end).unwrap_or_default();
        match interpolation.split_once(',') {
            None => {
                let block = function.block(block_name(interpolation)).ok_or_else(|| {
                    driver.render_error(if interpolation.is_empty() {
                        "When interpolating, i() does not have an anonymous block".to_string()
                    } else {
                        format!(
                            "When interpolating, i() does not have block named {}",
                            interpolation
                        )
                    })
                })?;
                block.render(output, driver, view, context)?;
            }
            Some((value_block, format)) => {
                let formatted =
                    format_plural(function, interpolation, value_block, format, driver, view)?;
                escape_into(&formatted, output, context);
            }
        }
        rest = inside.get(end.saturating_add(1)..).unwrap_or_default();
    }
    output.push_str(rest);
    Ok(())
}

fn block_name(name: &str) -> Option<&str> {
    (!name.is_empty()).then_some(name)
}

/// Byte index of the `}` closing an already opened `{`, allowing nesting.
fn matching_brace(text: &str) -> Option<usize> {
    let mut nesting = 1_usize;
    for (index, c) in text.char_indices() {
        match c {
            '{' => nesting = nesting.saturating_add(1),
            '}' => {
                nesting = nesting.saturating_sub(1);
                if nesting == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn format_plural<P: ViewProvider>(
    function: &FunctionNode,
    interpolation: &str,
    value_block: &str,
    format: &str,
    driver: &Driver<'_, P>,
    view: &P::View,
) -> RenderResult<String> {
    let bad_plural =
        || driver.render_error(format!("When interpolating, bad plural: {}", interpolation));
    let pattern = match format.split_once(',') {
        Some(("plural", pattern)) => pattern,
        Some(_) | None => return Err(bad_plural()),
    };
    let Some(block) = function.block(block_name(value_block)) else {
        return Err(driver.render_error(format!(
            "When interpolating, can't find block for plural format: {}",
            interpolation
        )));
    };
    let Node::Value(path) = block else {
        return Err(driver.render_error(format!(
            "When interpolating, value block for plural is not a simple value node: {}",
            value_block
        )));
    };
    // Values which aren't numbers count as zero.
    let count = driver
        .lookup(view, path)
        .and_then(|value| driver.provider().to_number(&value))
        .unwrap_or(0.0);
    let plural = PluralFormat::parse(pattern).ok_or_else(bad_plural)?;
    Ok(plural.format(count, driver.locale_id()))
}

/// An ICU plural pattern, eg `offset:1 =0 {nobody} one {# other} other {# others}`.
#[derive(Debug, PartialEq)]
struct PluralFormat<'a> {
    offset: f64,
    messages: Vec<(PluralSelector<'a>, &'a str)>,
}

#[derive(Debug, PartialEq)]
enum PluralSelector<'a> {
    Exact(f64),
    Keyword(&'a str),
}

impl<'a> PluralFormat<'a> {
    fn parse(pattern: &'a str) -> Option<Self> {
        let mut offset = 0.0;
        let mut messages = Vec::new();
        let mut rest = pattern.trim_start();
        if let Some(after) = rest.strip_prefix("offset:") {
            let after = after.trim_start();
            let end = after.find(char::is_whitespace).unwrap_or(after.len());
            offset = after.get(..end)?.parse().ok()?;
            rest = after.get(end..)?.trim_start();
        }
        while !rest.is_empty() {
            let open = rest.find('{')?;
            let selector = rest.get(..open)?.trim();
            let selector = match selector.strip_prefix('=') {
                Some(number) => PluralSelector::Exact(number.parse().ok()?),
                None if !selector.is_empty() => PluralSelector::Keyword(selector),
                None => return None,
            };
            let inside = rest.get(open.saturating_add(1)..)?;
            let close = matching_brace(inside)?;
            messages.push((selector, inside.get(..close)?));
            rest = inside.get(close.saturating_add(1)..)?.trim_start();
        }
        let has_other = messages
            .iter()
            .any(|(selector, _)| *selector == PluralSelector::Keyword("other"));
        has_other.then_some(Self { offset, messages })
    }

    fn format(&self, count: f64, locale_id: &str) -> String {
        let exact = self.messages.iter().find_map(|(selector, message)| match selector {
            PluralSelector::Exact(number) if (number - count).abs() < f64::EPSILON => {
                Some(*message)
            }
            PluralSelector::Exact(_) | PluralSelector::Keyword(_) => None,
        });
        let adjusted = count - self.offset;
        let number = format_number(adjusted);
        let message = exact.or_else(|| {
            let keyword = category_keyword(plural_category(locale_id, &number));
            self.find_keyword(keyword).or_else(|| self.find_keyword("other"))
        });
        message.unwrap_or_default().replace('#', &number)
    }

    fn find_keyword(&self, keyword: &str) -> Option<&'a str> {
        self.messages.iter().find_map(|(selector, message)| {
            (*selector == PluralSelector::Keyword(keyword)).then_some(*message)
        })
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{:.0}", number)
    } else {
        format!("{}", number)
    }
}

fn plural_category(locale_id: &str, number: &str) -> PluralCategory {
    let rules = locale_id
        .parse::<LanguageIdentifier>()
        .ok()
        .and_then(|language| PluralRules::create(language, PluralRuleType::CARDINAL).ok())
        .or_else(|| {
            tracing::warn!(locale_id, "no plural rules for locale, using {}", DEFAULT_LOCALE_ID);
            let language = DEFAULT_LOCALE_ID.parse::<LanguageIdentifier>().ok()?;
            PluralRules::create(language, PluralRuleType::CARDINAL).ok()
        });
    rules
        .and_then(|rules| rules.select(number).ok())
        .unwrap_or(PluralCategory::OTHER)
}

const fn category_keyword(category: PluralCategory) -> &'static str {
    match category {
        PluralCategory::ZERO => "zero",
        PluralCategory::ONE => "one",
        PluralCategory::TWO => "two",
        PluralCategory::FEW => "few",
        PluralCategory::MANY => "many",
        PluralCategory::OTHER => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_matching_brace() {
        assert_eq!(matching_brace("abc}"), Some(3));
        assert_eq!(matching_brace("a{b}c}d"), Some(5));
        assert_eq!(matching_brace("a{b}"), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_plural_format() {
        let format =
            PluralFormat::parse("offset:1 =0 {none} one {# thing} other {# things}").unwrap();
        assert_eq!(format.offset, 1.0);
        assert_eq!(format.messages.len(), 3);
        assert_eq!(format.messages.first(), Some(&(PluralSelector::Exact(0.0), "none")));
        assert!(PluralFormat::parse("one {x}").is_none());
        assert!(PluralFormat::parse("one {x} other").is_none());
        assert!(PluralFormat::parse("other {x").is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_english_plurals() {
        let format = PluralFormat::parse("=0 {no items} one {# item} other {# items}").unwrap();
        assert_eq!(format.format(0.0, "en"), "no items");
        assert_eq!(format.format(1.0, "en"), "1 item");
        assert_eq!(format.format(5.0, "en"), "5 items");
        assert_eq!(format.format(1.5, "en"), "1.5 items");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_offset_adjusts_number_but_not_exact_match() {
        let format = PluralFormat::parse(
            "offset:1 =1 {just you} one {you and # other} other {you and # others}",
        )
        .unwrap();
        assert_eq!(format.format(1.0, "en"), "just you");
        assert_eq!(format.format(2.0, "en"), "you and 1 other");
        assert_eq!(format.format(4.0, "en"), "you and 3 others");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_locale_rules() {
        let format = PluralFormat::parse("one {one} few {few} many {many} other {other}").unwrap();
        assert_eq!(format.format(3.0, "pl"), "few");
        assert_eq!(format.format(5.0, "pl"), "many");
        assert_eq!(format.format(1.0, "ja"), "other");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_locale_falls_back() {
        let format = PluralFormat::parse("one {one} other {other}").unwrap();
        assert_eq!(format.format(1.0, "not a locale!"), "one");
    }
}
