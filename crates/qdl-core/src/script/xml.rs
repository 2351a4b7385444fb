//! Shallow XML document model shared by the script loaders.
//!
//! Scripts are flat: a root container whose immediate children carry all
//! information in attributes. Deeper nesting is parsed (so the document
//! must be well formed) but not retained.

use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::ScriptError;

/// An element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub root: String,
    pub children: Vec<Element>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&text, path)
    }

    pub fn parse_str(text: &str, path: &Path) -> Result<Self, ScriptError> {
        let parse_err = |message: String| ScriptError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut root: Option<String> = None;
        let mut root_closed = false;
        let mut children = Vec::new();
        let mut depth = 0usize;

        loop {
            let event = reader.read_event().map_err(|e| parse_err(e.to_string()))?;
            match event {
                Event::Start(element) => {
                    if depth == 0 {
                        if root_closed {
                            return Err(parse_err("multiple root elements".into()));
                        }
                        root = Some(element_name(&element));
                    } else if depth == 1 {
                        children.push(to_element(&element, path)?);
                    }
                    depth += 1;
                }
                Event::Empty(element) => {
                    if depth == 0 {
                        if root_closed {
                            return Err(parse_err("multiple root elements".into()));
                        }
                        root = Some(element_name(&element));
                        root_closed = true;
                    } else if depth == 1 {
                        children.push(to_element(&element, path)?);
                    }
                }
                Event::End(_) => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| parse_err("unexpected closing tag".into()))?;
                    if depth == 0 {
                        root_closed = true;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(parse_err("unexpected end of document".into()));
        }
        let root = root.ok_or_else(|| parse_err("no root element".into()))?;

        Ok(Self {
            path: path.to_path_buf(),
            root,
            children,
        })
    }

    /// Children with the given element name, in document order.
    pub fn elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |e| e.name == name)
    }

    /// Required string attribute.
    pub fn attr_str<'a>(&self, element: &'a Element, attribute: &str) -> Result<&'a str, ScriptError> {
        element
            .attr(attribute)
            .ok_or_else(|| ScriptError::MissingAttribute {
                path: self.path.clone(),
                element: element.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    /// Required non-negative decimal attribute.
    pub fn attr_u64(&self, element: &Element, attribute: &str) -> Result<u64, ScriptError> {
        let value = self.attr_str(element, attribute)?;
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| self.invalid_number(element, attribute, value))
    }

    pub fn attr_u32(&self, element: &Element, attribute: &str) -> Result<u32, ScriptError> {
        let value = self.attr_u64(element, attribute)?;
        u32::try_from(value).map_err(|_| self.invalid_number(element, attribute, value))
    }

    pub(crate) fn invalid_number(
        &self,
        element: &Element,
        attribute: &str,
        value: impl ToString,
    ) -> ScriptError {
        ScriptError::InvalidNumber {
            path: self.path.clone(),
            element: element.name.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    /// Fail unless the root element is `expected`.
    pub fn expect_root(&self, expected: &'static str, kind: &'static str) -> Result<(), ScriptError> {
        if self.root == expected {
            Ok(())
        } else {
            Err(ScriptError::WrongRoot {
                path: self.path.clone(),
                root: self.root.clone(),
                expected: kind,
            })
        }
    }
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

fn to_element(element: &BytesStart<'_>, path: &Path) -> Result<Element, ScriptError> {
    let parse_err = |message: String| ScriptError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let mut attributes = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| parse_err(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| parse_err(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name: element_name(element),
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Document, ScriptError> {
        Document::parse_str(text, Path::new("test.xml"))
    }

    #[test]
    fn test_children_in_order() {
        let doc = parse(
            r#"<?xml version="1.0"?>
            <data>
              <!-- comment -->
              <program label="a"/>
              <erase label="b"></erase>
              <program label="c"><nested x="1"/></program>
            </data>"#,
        )
        .unwrap();
        assert_eq!(doc.root, "data");
        let names: Vec<_> = doc.children.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["program", "erase", "program"]);
        let labels: Vec<_> = doc.elements("program").filter_map(|e| e.attr("label")).collect();
        assert_eq!(labels, ["a", "c"]);
    }

    #[test]
    fn test_empty_root() {
        let doc = parse("<patches/>").unwrap();
        assert_eq!(doc.root, "patches");
        assert!(doc.children.is_empty());
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse("").is_err());
        assert!(parse("<data><program></data>").is_err());
        assert!(parse("<data>").is_err());
        assert!(parse("<a/><b/>").is_err());
    }

    #[test]
    fn test_attribute_helpers() {
        let doc = parse(r#"<data><program num="12" bad="x1" esc="a&amp;b"/></data>"#).unwrap();
        let el = &doc.children[0];
        assert_eq!(doc.attr_u64(el, "num").unwrap(), 12);
        assert_eq!(doc.attr_str(el, "esc").unwrap(), "a&b");
        match doc.attr_u64(el, "bad") {
            Err(ScriptError::InvalidNumber { attribute, .. }) => assert_eq!(attribute, "bad"),
            other => panic!("unexpected {:?}", other),
        }
        match doc.attr_u64(el, "missing") {
            Err(ScriptError::MissingAttribute { attribute, .. }) => {
                assert_eq!(attribute, "missing")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negative_number_rejected() {
        let doc = parse(r#"<data><program n="-1"/></data>"#).unwrap();
        assert!(doc.attr_u64(&doc.children[0], "n").is_err());
    }
}
