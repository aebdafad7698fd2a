//! Minimal namespace-agnostic XML tree used to read SOAP responses.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// XML parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(String),
    #[error("XML document has no root element")]
    Empty,
}

/// An element with its local name, trimmed text, and child elements.
///
/// Namespace prefixes are dropped, so `soap:Body` and `Body` are the same
/// element to every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<XmlElement, XmlError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;
        loop {
            match reader
                .read_event()
                .map_err(|e| XmlError::Syntax(e.to_string()))?
            {
                Event::Start(start) => stack.push(XmlElement::named(&start)?),
                Event::Empty(start) => {
                    let element = XmlElement::named(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Syntax("unexpected closing tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let value = text
                            .unescape()
                            .map_err(|e| XmlError::Syntax(e.to_string()))?;
                        current.text.push_str(&value);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let bytes = data.into_inner();
                        let value = std::str::from_utf8(&bytes)
                            .map_err(|e| XmlError::Syntax(e.to_string()))?;
                        current.text.push_str(value);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Syntax("unclosed element at end of input".into()));
        }
        root.ok_or(XmlError::Empty)
    }

    fn named(start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
        let local = start.local_name();
        let name = std::str::from_utf8(local.as_ref())
            .map_err(|e| XmlError::Syntax(e.to_string()))?;
        Ok(XmlElement {
            name: name.to_string(),
            ..XmlElement::default()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Every child with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&XmlElement> {
        names
            .iter()
            .try_fold(self, |element, name| element.child(name))
    }

    /// Text of the element at `names`, if present and non-empty.
    pub fn path_text(&self, names: &[&str]) -> Option<&str> {
        self.path(names)
            .map(XmlElement::text)
            .filter(|text| !text.is_empty())
    }
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::Syntax("multiple root elements".into())),
    }
    Ok(())
}
