//! Markup clean-up ahead of PDF layout.
//!
//! The layout backend has no notion of a document URL, so relative references
//! are resolved against the page's `<base href>` up front. Rich-text editors
//! also leave non-breaking spaces (and their mis-decoded byte sequences) all
//! over the content; those are flattened to plain spaces.

use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, rewrite_str};

use super::types::PdfError;

/// Sequences replaced by a single space. Longer sequences come first so the
/// mangled two-character forms are not split by the bare U+00A0 rule.
const SPACE_ARTIFACTS: &[&str] = &[
    "\u{c2}\u{a0}",
    "\u{c3}\u{201a}",
    "&nbsp;",
    "&#160;",
    "&#xa0;",
    "&#xA0;",
    "\u{a0}",
];

/// Resolve relative links and repair space artifacts.
pub fn normalize(markup: &str) -> Result<String, PdfError> {
    let linked = fix_links(markup)?;
    Ok(fix_entities(&linked))
}

/// Rewrite relative `a`/`link` hrefs and `img` srcs against the first
/// `<base href>`. Markup without a base element is returned untouched.
pub fn fix_links(markup: &str) -> Result<String, PdfError> {
    match find_base_href(markup)? {
        Some(base) => rewrite_links(markup, &base),
        None => Ok(markup.to_string()),
    }
}

/// Replace non-breaking spaces and their encoding-mangled forms with a space.
/// Plain substring replacement; markup structure is not consulted.
pub fn fix_entities(markup: &str) -> String {
    let mut output = markup.to_string();
    for artifact in SPACE_ARTIFACTS {
        if output.contains(artifact) {
            output = output.replace(artifact, " ");
        }
    }
    output
}

fn find_base_href(markup: &str) -> Result<Option<String>, PdfError> {
    let base = Rc::new(RefCell::new(None::<String>));

    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("base[href]", {
                let base = Rc::clone(&base);
                move |el| {
                    let mut slot = base.borrow_mut();
                    if slot.is_none()
                        && let Some(href) = el.get_attribute("href")
                        && !href.trim().is_empty()
                    {
                        *slot = Some(href);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| PdfError::malformed(err.to_string()))?;

    Ok(base.borrow_mut().take())
}

fn rewrite_links(markup: &str, base: &str) -> Result<String, PdfError> {
    let href_base = base.to_string();
    let src_base = base.to_string();

    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![
                // The base is baked into every link below; keeping it would
                // resolve the now-absolute links a second time in some viewers.
                element!("base", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("a[href], link[href]", move |el| {
                    if let Some(href) = el.get_attribute("href")
                        && let Some(resolved) = resolve_against(&href_base, &href)
                    {
                        el.set_attribute("href", &resolved)?;
                    }
                    Ok(())
                }),
                element!("img[src]", move |el| {
                    if let Some(src) = el.get_attribute("src")
                        && let Some(resolved) = resolve_against(&src_base, &src)
                    {
                        el.set_attribute("src", &resolved)?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| PdfError::malformed(err.to_string()))
}

/// `Some(base + reference)` when the reference is relative, `None` otherwise.
fn resolve_against(base: &str, reference: &str) -> Option<String> {
    if is_relative_reference(reference) {
        Some(format!("{base}{reference}"))
    } else {
        None
    }
}

fn is_relative_reference(reference: &str) -> bool {
    !reference.is_empty()
        && !reference.starts_with('/')
        && !reference.contains("mailto:")
        && !reference.contains("://")
        && !has_scheme(reference)
}

fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_relative_anchor_and_repairs_nbsp() {
        let input = r#"<base href="http://x.test/"><a href="p.html">go</a>&nbsp;text"#;
        let output = normalize(input).expect("normalize");
        assert_eq!(output, r#"<a href="http://x.test/p.html">go</a> text"#);
    }

    #[test]
    fn normalizing_twice_matches_once() {
        let input = concat!(
            r#"<html><head><base href="https://cms.test/site/"></head><body>"#,
            r#"<a href="about/">About</a><img src="assets/logo.png">"#,
            r#"<a href="https://elsewhere.test/">x</a></body></html>"#,
        );
        let once = normalize(input).expect("first pass");
        let twice = normalize(&once).expect("second pass");
        assert_eq!(once, twice);
        assert!(once.contains(r#"href="https://cms.test/site/about/""#));
        assert!(once.contains(r#"src="https://cms.test/site/assets/logo.png""#));
    }

    #[test]
    fn leaves_absolute_mailto_and_root_links_alone() {
        let input = concat!(
            r#"<base href="http://x.test/">"#,
            r#"<a href="http://other.test/a">1</a>"#,
            r#"<a href="mailto:me@x.test">2</a>"#,
            r#"<a href="/root.html">3</a>"#,
            r#"<img src="data:image/png;base64,AAAA">"#,
            r#"<a href="">4</a>"#,
        );
        let output = fix_links(input).expect("fix links");
        assert!(output.contains(r#"href="http://other.test/a""#));
        assert!(output.contains(r#"href="mailto:me@x.test""#));
        assert!(output.contains(r#"href="/root.html""#));
        assert!(output.contains(r#"src="data:image/png;base64,AAAA""#));
        assert!(output.contains(r#"<a href="">4</a>"#));
    }

    #[test]
    fn rewrites_stylesheet_links() {
        let input = r#"<base href="http://x.test/"><link rel="stylesheet" href="print.css">"#;
        let output = fix_links(input).expect("fix links");
        assert_eq!(
            output,
            r#"<link rel="stylesheet" href="http://x.test/print.css">"#
        );
    }

    #[test]
    fn markup_without_base_is_untouched() {
        let input = r#"<p><a href="p.html">go</a></p>"#;
        assert_eq!(fix_links(input).expect("fix links"), input);
    }

    #[test]
    fn only_first_base_counts() {
        let input = r#"<base href="http://one.test/"><base href="http://two.test/"><a href="p">x</a>"#;
        let output = fix_links(input).expect("fix links");
        assert_eq!(output, r#"<a href="http://one.test/p">x</a>"#);
    }

    #[test]
    fn entity_repair_replaces_every_artifact() {
        let input = "a&nbsp;b\u{a0}c&#160;d\u{c2}\u{a0}e\u{c3}\u{201a}f";
        let output = fix_entities(input);
        assert_eq!(output, "a b c d e f");
        assert!(!output.contains("&nbsp;"));
    }

    #[test]
    fn entity_repair_runs_without_base() {
        let output = normalize("<p>one&nbsp;two</p>").expect("normalize");
        assert_eq!(output, "<p>one two</p>");
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("tel:123"));
        assert!(has_scheme("javascript:void(0)"));
        assert!(!has_scheme("p.html"));
        assert!(!has_scheme("1x:y"));
        assert!(is_relative_reference("#top"));
        assert!(is_relative_reference("docs/a.pdf"));
    }
}
