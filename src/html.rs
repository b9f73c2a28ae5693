//! Knowledge about HTML tags and attributes used by the parser and renderer.

/// Void tags have no closing tag, and so never take part in tag nesting.
pub(crate) fn is_void_tag(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "command"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "keygen"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Tags whose text content isn't part of the document, so can't contain other tags.
pub(crate) fn cannot_contain_child_tags(name: &str) -> bool {
    matches!(name, "title" | "textarea")
}

/// Is the name safe in any context without escaping?
pub(crate) fn valid_restricted_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// Attribute names must be restricted names, and event handlers are never allowed.
pub(crate) fn valid_tag_attribute_name(name: &str) -> bool {
    valid_restricted_name(name) && !name.starts_with("on")
}

/// Attribute names which need security checks the parser does when it sees them
/// written out in a tag.
pub(crate) fn attribute_requires_special_handling(name: &str) -> bool {
    matches!(name, "style" | "id" | "class" | "background")
}

/// Checks an attribute name from an attribute dictionary, which can't be
/// checked at parse time.
pub(crate) fn valid_dictionary_attribute_name(tag: &str, name: &str) -> bool {
    valid_tag_attribute_name(name)
        && !attribute_is_url(tag, name)
        && !attribute_requires_special_handling(name)
}

/// Does the attribute of this tag contain a URL?
pub(crate) fn attribute_is_url(tag: &str, attribute: &str) -> bool {
    match tag {
        "form" => attribute == "action",
        "blockquote" | "del" | "ins" | "q" => attribute == "cite",
        "object" => attribute == "data",
        "input" => matches!(attribute, "src" | "formaction"),
        "button" => attribute == "formaction",
        "a" | "area" | "link" | "base" => attribute == "href",
        "menuitem" => attribute == "icon",
        "html" => attribute == "manifest",
        "video" => matches!(attribute, "src" | "poster"),
        "img" | "audio" | "embed" | "iframe" | "source" | "track" => attribute == "src",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_attribute_names() {
        assert!(valid_tag_attribute_name("data-x"));
        assert!(valid_tag_attribute_name("aria_label"));
        assert!(!valid_tag_attribute_name("onclick"));
        assert!(!valid_tag_attribute_name("Title"));
        assert!(!valid_tag_attribute_name(""));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dictionary_attribute_names() {
        assert!(valid_dictionary_attribute_name("a", "title"));
        assert!(!valid_dictionary_attribute_name("a", "href"));
        assert!(!valid_dictionary_attribute_name("div", "class"));
        assert!(!valid_dictionary_attribute_name("div", "onload"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_url_attributes() {
        assert!(attribute_is_url("a", "href"));
        assert!(attribute_is_url("img", "src"));
        assert!(!attribute_is_url("div", "href"));
        assert!(!attribute_is_url("a", "title"));
    }
}
