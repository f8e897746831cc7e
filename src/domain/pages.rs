//! Pages as the PDF export sees them: a URL-safe identifier, a title and the
//! rendered body markup.

use std::fmt;

use serde::Deserialize;

use super::error::DomainError;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Action name routed to the PDF export of a page.
pub const PDF_ACTION: &str = "topdf";

/// URL segment identifying a page (`about`, `release-notes-2024`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageIdentifier(String);

impl PageIdentifier {
    /// Validate a raw URL segment. Only lowercase ASCII letters, digits and
    /// inner hyphens are accepted so the identifier is safe in paths, file
    /// names and response headers alike.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let raw = value.into();
        if raw.is_empty() {
            return Err(DomainError::invalid_identifier(raw, "must not be empty"));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(DomainError::invalid_identifier(raw, "is too long"));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(DomainError::invalid_identifier(
                raw,
                "must not start or end with a hyphen",
            ));
        }
        if !raw
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-')
        {
            return Err(DomainError::invalid_identifier(
                raw,
                "may only contain lowercase letters, digits and hyphens",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that can produce a site-relative link to one of its actions.
pub trait PageLink {
    fn link(&self, action: &str) -> String;
}

#[derive(Clone, Debug)]
pub struct PageRecord {
    pub identifier: PageIdentifier,
    pub title: String,
    pub summary: Option<String>,
    pub content_html: String,
}

impl PageRecord {
    /// File name offered to browsers downloading the PDF export.
    pub fn pdf_file_name(&self) -> String {
        format!("{}.pdf", self.identifier)
    }

    pub fn pdf_link(&self) -> String {
        pdf_link(&self.identifier)
    }
}

impl PageLink for PageIdentifier {
    fn link(&self, action: &str) -> String {
        let action = action.trim_matches('/');
        if action.is_empty() {
            format!("/{self}")
        } else {
            format!("/{self}/{action}")
        }
    }
}

impl PageLink for PageRecord {
    fn link(&self, action: &str) -> String {
        self.identifier.link(action)
    }
}

/// Path of the PDF export for a page. Pure string building; nothing is rendered.
pub fn pdf_link(identifier: &PageIdentifier) -> String {
    format!("/{identifier}/{PDF_ACTION}/{identifier}.pdf")
}

/// On-disk shape of a page document.
#[derive(Debug, Clone, Deserialize)]
pub struct PageDocument {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub content: String,
}

impl PageDocument {
    pub fn into_record(self, identifier: PageIdentifier) -> PageRecord {
        PageRecord {
            identifier,
            title: self.title,
            summary: self.summary.filter(|value| !value.trim().is_empty()),
            content_html: self.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifier: &str) -> PageRecord {
        PageRecord {
            identifier: PageIdentifier::parse(identifier).expect("valid identifier"),
            title: "About".into(),
            summary: None,
            content_html: "<p>hi</p>".into(),
        }
    }

    #[test]
    fn identifier_accepts_slug_segments() {
        let id = PageIdentifier::parse("release-notes-2024").expect("valid");
        assert_eq!(id.as_str(), "release-notes-2024");
    }

    #[test]
    fn identifier_rejects_unsafe_segments() {
        for raw in ["", "About", "a/b", "-lead", "trail-", "with space", "dot.pdf"] {
            assert!(PageIdentifier::parse(raw).is_err(), "`{raw}` should fail");
        }
    }

    #[test]
    fn pdf_link_points_at_topdf_action() {
        let page = record("about");
        assert_eq!(page.pdf_link(), "/about/topdf/about.pdf");
        assert_eq!(page.pdf_file_name(), "about.pdf");
    }

    #[test]
    fn link_appends_action_segment() {
        let page = record("about");
        assert_eq!(page.link(""), "/about");
        assert_eq!(page.link("print"), "/about/print");
        assert_eq!(page.link("/print/"), "/about/print");
    }

    #[test]
    fn blank_summary_is_dropped() {
        let doc = PageDocument {
            title: "T".into(),
            summary: Some("   ".into()),
            content: "<p>x</p>".into(),
        };
        let record = doc.into_record(PageIdentifier::parse("t").expect("valid"));
        assert!(record.summary.is_none());
    }
}
