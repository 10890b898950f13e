//! Sanitization of externally sourced problem markup.

/// Turns untrusted markup into markup that is safe to hand to clients.
pub trait ContentRenderer: Send + Sync {
    fn sanitize(&self, markup: &str) -> String;
}

/// Elements removed together with everything inside them.
const DROPPED_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "textarea", "select",
    "svg", "math",
];

/// Elements kept as-is (minus disallowed attributes). Anything else, links included, is
/// unwrapped: the tag goes, its text stays.
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "div", "span", "em", "strong", "b", "i", "u", "s", "sub", "sup", "ul", "ol", "li",
    "img", "table", "thead", "tbody", "tr", "td", "th", "center", "hr", "code", "pre",
    "blockquote", "h1", "h2", "h3", "h4", "h5", "h6",
];

const ALLOWED_ATTRIBUTES: &[&str] = &["class", "alt", "title", "width", "height", "src", "align"];

/// Allowlist sanitizer used by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupSanitizer;

impl ContentRenderer for MarkupSanitizer {
    fn sanitize(&self, markup: &str) -> String {
        let mut out = String::with_capacity(markup.len());
        let mut rest = markup;

        while let Some(start) = rest.find('<') {
            out.push_str(&rest[..start]);
            rest = &rest[start..];

            if let Some(comment) = rest.strip_prefix("<!--") {
                rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
                continue;
            }

            let Some(end) = tag_end(rest) else {
                out.push_str("&lt;");
                rest = &rest[1..];
                continue;
            };
            let source = &rest[1..end];
            rest = &rest[end + 1..];

            let Some(tag) = Tag::parse(source) else {
                out.push_str("&lt;");
                out.push_str(&escape(source));
                out.push_str("&gt;");
                continue;
            };

            if DROPPED_WITH_CONTENT.contains(&tag.name.as_str()) {
                if !tag.closing && !tag.self_closing {
                    rest = skip_past_closing(rest, &tag.name);
                }
            } else if ALLOWED_TAGS.contains(&tag.name.as_str()) {
                tag.render_into(&mut out);
            }
        }

        out.push_str(rest);
        out
    }
}

struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attributes: Vec<(String, Option<String>)>,
}

impl Tag {
    fn parse(source: &str) -> Option<Self> {
        let (closing, body) = match source.strip_prefix('/') {
            Some(body) => (true, body),
            None => (false, source),
        };
        let body = body.trim_end();
        let self_closing = body.ends_with('/');
        let body = body.trim_end_matches('/');

        let name_len = body
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(body.len());
        if name_len == 0 {
            return None;
        }
        let name = body[..name_len].to_ascii_lowercase();

        Some(Self {
            name,
            closing,
            self_closing,
            attributes: parse_attributes(&body[name_len..]),
        })
    }

    fn render_into(&self, out: &mut String) {
        out.push('<');
        if self.closing {
            out.push('/');
            out.push_str(&self.name);
            out.push('>');
            return;
        }
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            if !attribute_allowed(name, value.as_deref()) {
                continue;
            }
            out.push(' ');
            out.push_str(name);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&escape(value));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
    }
}

fn parse_attributes(mut input: &str) -> Vec<(String, Option<String>)> {
    let mut attributes = Vec::new();
    loop {
        input = input.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if input.is_empty() {
            return attributes;
        }

        let name_len = input
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(input.len());
        let name = input[..name_len].to_ascii_lowercase();
        input = input[name_len..].trim_start();

        let value = match input.strip_prefix('=') {
            Some(after) => {
                let after = after.trim_start();
                let (value, remaining) = match after.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        let inner = &after[1..];
                        match inner.find(quote) {
                            Some(close) => (&inner[..close], &inner[close + 1..]),
                            None => (inner, ""),
                        }
                    }
                    _ => {
                        let len = after.find(char::is_whitespace).unwrap_or(after.len());
                        (&after[..len], &after[len..])
                    }
                };
                input = remaining;
                Some(value.to_string())
            }
            None => None,
        };

        if !name.is_empty() {
            attributes.push((name, value));
        }
    }
}

fn attribute_allowed(name: &str, value: Option<&str>) -> bool {
    if !ALLOWED_ATTRIBUTES.contains(&name) {
        return false;
    }
    match (name, value) {
        ("src", Some(url)) => url_allowed(url),
        ("src", None) => false,
        _ => true,
    }
}

/// Relative URLs and http(s) are fine; so are inline images. Every other scheme is not.
fn url_allowed(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    match compact.find(':') {
        Some(colon) if !compact[..colon].contains('/') => {
            matches!(&compact[..colon], "http" | "https") || compact.starts_with("data:image/")
        }
        _ => true,
    }
}

/// Index of the `>` closing the tag that starts at `input[0]`, ignoring quoted `>`.
fn tag_end(input: &str) -> Option<usize> {
    let mut quote = None;
    for (index, c) in input.char_indices().skip(1) {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(index),
            (None, '<') => return None,
            (None, _) => {}
        }
    }
    None
}

fn skip_past_closing<'a>(input: &'a str, name: &str) -> &'a str {
    let needle = format!("</{name}");
    let lowered = input.to_ascii_lowercase();
    match lowered.find(&needle) {
        Some(position) => {
            let after = &input[position..];
            after.find('>').map_or("", |end| &after[end + 1..])
        }
        None => "",
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(markup: &str) -> String {
        MarkupSanitizer.sanitize(markup)
    }

    #[test]
    fn scripts_are_removed_with_their_content() {
        assert_eq!(
            clean("<p>Find x.<script>alert('x')</script></p>"),
            "<p>Find x.</p>"
        );
        assert_eq!(clean("a<SCRIPT src=x>evil()</Script>b"), "ab");
    }

    #[test]
    fn links_are_unwrapped() {
        assert_eq!(
            clean(r#"See <a href="https://example.com">here</a>."#),
            "See here."
        );
    }

    #[test]
    fn event_handlers_and_script_urls_are_stripped() {
        assert_eq!(
            clean(r#"<img src="javascript:alert(1)" onerror="alert(2)" alt="x">"#),
            r#"<img alt="x">"#
        );
        assert_eq!(
            clean(r#"<img src=" JaVa script:alert(1)">"#),
            "<img>"
        );
    }

    #[test]
    fn latex_images_survive() {
        let markup = r#"<img src="//latex.artofproblemsolving.com/a/b.png" class="latex" alt="$x^2$" width="20" height="13">"#;
        assert_eq!(clean(markup), markup);
    }

    #[test]
    fn stray_angle_brackets_are_escaped() {
        assert_eq!(clean("if a < b then"), "if a &lt; b then");
    }

    #[test]
    fn comments_are_removed() {
        assert_eq!(clean("a<!-- <script> -->b"), "ab");
    }

    #[test]
    fn quoted_brackets_do_not_end_a_tag() {
        assert_eq!(
            clean(r#"<img alt="a > b" src="x.png">"#),
            r#"<img alt="a &gt; b" src="x.png">"#
        );
    }
}
