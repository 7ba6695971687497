//! A small, forgiving-free XML walker used during grammar bootstrap.
//!
//! Device and SCPD description documents are walked with dynamically-typed
//! DOM lookups that simply raise if a node is absent. This module makes
//! that absence explicit instead: every extraction returns an `Option`,
//! and grammar bootstrap (in `generator::soap` and `generator::esp`) turns
//! a missing required node into a clean [`enum@Error`] instead of a panic.

use roxmltree::Node;

/// Errors produced walking a device description or SCPD document.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The document text was not well-formed XML.
    #[error("malformed XML: {0}")]
    Malformed(#[from] roxmltree::Error),
    /// A node required to build the grammar was not present.
    #[error("required XML element `{0}` was absent")]
    MissingElement(String),
}

/// Parse `xml` into a DOM-like document.
pub fn parse(xml: &str) -> Result<roxmltree::Document<'_>, Error> {
    roxmltree::Document::parse(xml).map_err(Error::from)
}

/// All descendant elements of `root` (root included) whose local tag name
/// is exactly `tag`, in document order. Namespace prefixes are ignored, as
/// UPnP description documents do not put these elements in a namespace.
pub fn descendants_with_tag<'a, 'input>(
    root: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    root.descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == tag)
}

/// The first direct child element named `tag`, if any.
pub fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == tag)
}

/// The trimmed text content of the first direct child element named `tag`.
pub fn child_text(node: Node, tag: &str) -> Option<String> {
    child(node, tag).and_then(|c| c.text()).map(|t| t.trim().to_string())
}

/// Like [`child_text`], but fails with [`Error::MissingElement`] instead of
/// returning `None`. Used wherever grammar bootstrap cannot proceed
/// without the value.
pub fn require_child_text(node: Node, tag: &str) -> Result<String, Error> {
    child_text(node, tag).ok_or_else(|| Error::MissingElement(tag.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        <root>
          <service>
            <serviceId>urn:upnp-org:serviceId:Switch</serviceId>
            <SCPDURL>/scpd.xml</SCPDURL>
          </service>
          <service>
            <serviceId>urn:upnp-org:serviceId:Dimming</serviceId>
          </service>
        </root>
    "#;

    #[test]
    fn finds_every_matching_descendant() {
        let doc = parse(DOC).expect("valid xml");
        let services: Vec<_> = descendants_with_tag(doc.root(), "service").collect();
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn child_text_extracts_trimmed_value() {
        let doc = parse(DOC).expect("valid xml");
        let service = descendants_with_tag(doc.root(), "service").next().expect("one service");
        assert_eq!(child_text(service, "SCPDURL").as_deref(), Some("/scpd.xml"));
    }

    #[test]
    fn missing_required_node_is_an_error_not_a_panic() {
        let doc = parse(DOC).expect("valid xml");
        let services: Vec<_> = descendants_with_tag(doc.root(), "service").collect();
        let second = services[1];
        let err = require_child_text(second, "SCPDURL").unwrap_err();
        assert!(matches!(err, Error::MissingElement(tag) if tag == "SCPDURL"));
    }

    #[test]
    fn malformed_xml_is_reported() {
        let err = parse("<root><unclosed></root>").unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
