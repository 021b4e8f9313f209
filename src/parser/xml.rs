//! Stateless helper for pulling metadata out of XML documents.
//!
//! Book descriptions (FB2 `<description>`, EPUB package documents) are small, so they
//! are read into a light element tree with `quick-xml` and queried by local name.
//! Parsers hold an [`XmlHelper`] instead of sharing behavior through a common base.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Entities outside the five XML ones that show up in hand-made FB2 files.
fn resolve_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some("\u{a0}"),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "laquo" => Some("\u{ab}"),
        "raquo" => Some("\u{bb}"),
        "hellip" => Some("\u{2026}"),
        _ => None,
    }
}

/// One element: local name, attributes by local name, children and the text below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn open(start: &BytesStart<'_>) -> Self {
        let attributes = start
            .attributes()
            .filter_map(|attribute| attribute.ok())
            .map(|attribute| {
                let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
                let value = attribute
                    .unescape_value_with(resolve_entity)
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attribute.value).into_owned());
                (key, value)
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of attribute `name` (namespace prefix ignored).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text below this element with whitespace collapsed.
    pub fn text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// First descendant named `tag`, in document order.
    pub fn find(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find_map(|child| {
            if child.name == tag {
                Some(child)
            } else {
                child.find(tag)
            }
        })
    }

    /// Every descendant named `tag`, in document order.
    pub fn find_all<'a>(&'a self, tag: &str) -> Vec<&'a XmlNode> {
        let mut found = Vec::new();
        self.collect(tag, &mut found);
        found
    }

    fn collect<'a>(&'a self, tag: &str, found: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == tag {
                found.push(child);
            }
            child.collect(tag, found);
        }
    }

    /// Text of the first descendant named `tag`, or an empty string.
    pub fn find_text(&self, tag: &str) -> String {
        self.find(tag).map(XmlNode::text).unwrap_or_default()
    }
}

/// Closes the innermost open element into its parent.
fn close_one(stack: &mut Vec<XmlNode>) {
    if stack.len() > 1 {
        if let Some(node) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    for node in stack.iter_mut() {
        node.text.push_str(text);
    }
}

/// Element tree reading over decoded XML.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlHelper;

impl XmlHelper {
    /// Decodes raw XML bytes, honoring a BOM or the encoding named in the declaration.
    /// Unknown encodings fall back to UTF-8 with replacement characters.
    pub fn decode(&self, bytes: &[u8]) -> String {
        if let Some((encoding, _)) = Encoding::for_bom(bytes) {
            return encoding.decode(bytes).0.into_owned();
        }
        let encoding = Self::declared_encoding(bytes).unwrap_or(UTF_8);
        encoding.decode(bytes).0.into_owned()
    }

    fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
        let mut reader = Reader::from_reader(bytes);
        loop {
            match reader.read_event() {
                Ok(Event::Decl(decl)) => {
                    let label = decl.encoding()?.ok()?;
                    return Encoding::for_label(&label);
                }
                Ok(Event::Text(text)) if text.iter().all(u8::is_ascii_whitespace) => continue,
                _ => return None,
            }
        }
    }

    /// Reads `doc` into a tree under a nameless root node.
    ///
    /// Comments, processing instructions and the doctype are skipped. Elements left open
    /// at the end of input are closed, and stray end tags are ignored, so truncated
    /// descriptions still yield what they contain.
    pub fn parse(&self, doc: &str) -> Result<XmlNode, quick_xml::Error> {
        let mut reader = Reader::from_str(doc);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut stack = vec![XmlNode::default()];
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    append_text(&mut stack, " ");
                    stack.push(XmlNode::open(&start));
                }
                Event::Empty(start) => {
                    let node = XmlNode::open(&start);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                    if let Some(depth) = stack.iter().skip(1).rposition(|node| node.name == name) {
                        // stack index of the match is depth + 1
                        while stack.len() > depth + 1 {
                            close_one(&mut stack);
                        }
                        append_text(&mut stack, " ");
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape_with(resolve_entity)
                        .map(Cow::into_owned)
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => append_text(&mut stack, &String::from_utf8_lossy(&data)),
                Event::Eof => break,
                _ => {}
            }
        }
        while stack.len() > 1 {
            close_one(&mut stack);
        }
        Ok(stack.pop().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_and_attributes() {
        let xml = XmlHelper;
        let doc = r#"<root><a:item id="1">One &amp; <b>two</b></a:item><item id='2'/></root>"#;
        let root = xml.parse(doc).unwrap();
        let items = root.find_all("item");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text(), "One & two");
        assert_eq!(items[1].attribute("id"), Some("2"));
        assert!(root.find("items").is_none());
    }

    #[test]
    fn test_comments_and_quoted_brackets() {
        let xml = XmlHelper;
        let doc = r#"<info><!-- <title>Hidden</title> --><title>Shown</title><seq name="A > B"/></info>"#;
        let root = xml.parse(doc).unwrap();
        assert_eq!(root.find_text("title"), "Shown");
        assert_eq!(root.find("seq").and_then(|seq| seq.attribute("name")), Some("A > B"));
    }

    #[test]
    fn test_unclosed_and_unknown_entities() {
        let xml = XmlHelper;
        let root = xml
            .parse("<a><b>&laquo;Saga&raquo;</b><d>&foo;</d></x><c>open")
            .unwrap();
        assert_eq!(root.find_text("b"), "\u{ab}Saga\u{bb}");
        assert_eq!(root.find_text("d"), "&foo;");
        assert_eq!(root.find_text("c"), "open");
    }

    #[test]
    fn test_decode_declared_encoding() {
        let xml = XmlHelper;
        let mut bytes = br#"<?xml version="1.0" encoding="windows-1251"?><t>"#.to_vec();
        bytes.extend_from_slice(&[0xCF, 0xF3, 0xF8, 0xEA, 0xE8, 0xED]);
        bytes.extend_from_slice(b"</t>");
        let doc = xml.decode(&bytes);
        assert_eq!(xml.parse(&doc).unwrap().find_text("t"), "Пушкин");
    }
}
