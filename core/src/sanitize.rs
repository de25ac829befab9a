//! Pure sanitization helpers shared by every backend.

const MAX_SUBJECT_LEN: usize = 255;

/// Strip CR, LF and other C0/C1 control characters, truncate to 255 characters
/// and trim surrounding whitespace.
///
/// Idempotent: `sanitize_subject(sanitize_subject(s)) == sanitize_subject(s)`.
pub fn sanitize_subject(s: &str) -> String {
    let stripped: String = s.chars().filter(|c| !is_control(*c)).collect();
    let truncated: String = stripped.chars().take(MAX_SUBJECT_LEN).collect();
    truncated.trim().to_string()
}

fn is_control(c: char) -> bool {
    // C0 (0x00-0x1F) and C1 (0x7F-0x9F) controls, including CR/LF.
    matches!(c, '\u{0}'..='\u{1F}' | '\u{7F}'..='\u{9F}')
}

/// CSS properties considered safe pure formatting: no positioning, no
/// `behavior`/`expression`/`-moz-binding`, nothing that can reach a URL.
const SAFE_CSS_PROPERTIES: &[&str] = &[
    "color",
    "background-color",
    "font-weight",
    "font-style",
    "font-size",
    "font-family",
    "text-align",
    "text-decoration",
    "line-height",
    "margin",
    "padding",
];

/// Keep only the declarations in a `style` attribute value whose property is
/// in [`SAFE_CSS_PROPERTIES`] and whose value contains no `url(`/`expression(`
/// (ammonia does not parse or sanitize CSS itself, so this is the attribute's
/// own filter).
fn filter_style_value(value: &str) -> Option<String> {
    let kept: Vec<String> = value
        .split(';')
        .filter_map(|declaration| {
            let (property, val) = declaration.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let val = val.trim();
            if val.is_empty() || !SAFE_CSS_PROPERTIES.contains(&property.as_str()) {
                return None;
            }
            let lower = val.to_ascii_lowercase();
            if lower.contains("url(") || lower.contains("expression(") || lower.contains("javascript:") {
                return None;
            }
            Some(format!("{property}: {val}"))
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("; "))
    }
}

/// Apply an HTML whitelist to `html`: tags limited to basic inline/structural
/// formatting, lists, tables and `img`; attributes limited to
/// `src, alt, title, width, height, style, class, align`; `style` further
/// restricted to [`SAFE_CSS_PROPERTIES`]; URL schemes limited to
/// `http, https, data, cid`.
pub fn sanitize_body(html: &str) -> String {
    use ammonia::Builder;
    use std::borrow::Cow;
    use std::collections::HashSet;

    let tags: HashSet<&str> = [
        "a", "b", "strong", "i", "em", "u", "s", "strike", "sub", "sup", "br", "p", "span", "div",
        "ul", "ol", "li", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
        "table", "thead", "tbody", "tfoot", "tr", "td", "th", "img", "hr", "pre", "code",
    ]
    .into_iter()
    .collect();

    let generic_attrs: HashSet<&str> = ["style", "class", "align", "title", "width", "height"].into_iter().collect();

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .generic_attributes(generic_attrs)
        .add_tag_attributes("a", ["href"])
        .add_tag_attributes("img", ["src", "alt"])
        .url_schemes(["http", "https", "data", "cid"].into_iter().collect())
        .attribute_filter(|_element, attribute, value| {
            if attribute == "style" {
                filter_style_value(value).map(Cow::Owned)
            } else {
                Some(Cow::Borrowed(value))
            }
        });

    builder.clean(html).to_string()
}

/// Strip path separators and control characters from a declared attachment
/// file name. Result is never empty; callers must treat an empty result as a
/// validation error.
///
/// Idempotent; its output never contains path separators or C0 controls.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !is_control(*c) && *c != '/' && *c != '\\')
        .collect()
}
