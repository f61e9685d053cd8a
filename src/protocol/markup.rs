//! Schema-agnostic parse of tag-delimited text.
//!
//! A tag with only text becomes [`Markup::Text`], a self-closing tag becomes
//! [`Markup::Empty`], a tag with children or attributes becomes a
//! [`Markup::Map`], and a tag repeated under one parent collapses into a
//! [`Markup::List`]. Whether a list means "array" or "one wrapped object" is
//! left for the decoder to settle against a schema.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use super::error::{ProtocolError, Result};

const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    Empty,
    Text(String),
    List(Vec<Markup>),
    Map(MarkupMap),
}

/// Tag name to child, in first-seen order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkupMap {
    entries: Vec<(String, Markup)>,
}

impl MarkupMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Markup> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts a child; a second child under the same key turns the entry into a list.
    pub fn insert(&mut self, key: impl Into<String>, value: Markup) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, Markup::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::replace(existing, Markup::Empty);
                *existing = Markup::List(vec![first, value]);
            }
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Markup)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// The sole entry, when there is exactly one.
    pub fn single(&self) -> Option<(&str, &Markup)> {
        match self.entries.as_slice() {
            [(k, v)] => Some((k.as_str(), v)),
            _ => None,
        }
    }
}

impl FromIterator<(String, Markup)> for MarkupMap {
    fn from_iter<T: IntoIterator<Item = (String, Markup)>>(iter: T) -> Self {
        let mut map = MarkupMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Markup {
    pub fn text(value: impl Into<String>) -> Self {
        Markup::Text(value.into())
    }

    /// Absent, self-closing, or text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Markup::Empty => true,
            Markup::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Markup::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MarkupMap> {
        match self {
            Markup::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Untyped JSON view, used where no schema constrains the value.
    pub fn to_value(&self) -> Value {
        match self {
            Markup::Empty => Value::Null,
            Markup::Text(s) => Value::String(s.clone()),
            Markup::List(items) => Value::Array(items.iter().map(Markup::to_value).collect()),
            Markup::Map(map) => {
                let mut object = Map::new();
                for (k, v) in map.iter() {
                    object.insert(k.to_string(), v.to_value());
                }
                Value::Object(object)
            }
        }
    }

    /// One-line description for diagnostics.
    pub fn preview(&self) -> String {
        match self {
            Markup::Empty => "an empty self-closing tag".to_string(),
            Markup::Text(s) => {
                let trimmed = s.trim();
                if trimmed.chars().count() > PREVIEW_CHARS {
                    let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
                    format!("\"{}...\"", cut)
                } else {
                    format!("\"{}\"", trimmed)
                }
            }
            Markup::List(items) => format!("{} repeated tags", items.len()),
            Markup::Map(map) => {
                let tags: Vec<String> = map.keys().map(|k| format!("<{}>", k)).collect();
                if tags.is_empty() {
                    "an empty tag".to_string()
                } else {
                    format!("nested tags {}", tags.join(", "))
                }
            }
        }
    }
}

#[derive(Default)]
struct ElementNode {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    cdata: Option<String>,
    children: Vec<ElementNode>,
    self_closing: bool,
}

impl ElementNode {
    fn from_start(reader: &Reader<&[u8]>, tag: &BytesStart) -> Result<Self> {
        Ok(Self {
            name: decode(reader, tag.name().as_ref())?,
            attributes: collect_attributes(reader, tag)?,
            ..Self::default()
        })
    }

    fn append_text(&mut self, text: &BytesText) -> Result<()> {
        self.text.push_str(&text.unescape()?);
        Ok(())
    }

    fn into_markup(self) -> Markup {
        if self.children.is_empty() && self.attributes.is_empty() {
            if self.self_closing {
                return Markup::Empty;
            }
            return match self.cdata {
                Some(raw) => Markup::Text(raw),
                None => Markup::Text(self.text.trim().to_string()),
            };
        }
        let mut map = MarkupMap::new();
        for (key, value) in self.attributes {
            map.insert(key, Markup::Text(value));
        }
        for child in self.children {
            let name = child.name.clone();
            map.insert(name, child.into_markup());
        }
        Markup::Map(map)
    }
}

/// Parses a markup fragment (zero or more sibling elements) into the mapping
/// form of an implicit parent. A fragment with no elements yields its text.
pub fn parse_markup(fragment: &str) -> Result<Markup> {
    let mut reader = Reader::from_str(fragment);
    reader.trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<ElementNode> = vec![ElementNode {
        name: String::new(),
        ..ElementNode::default()
    }];

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(tag) => {
                let node = ElementNode::from_start(&reader, &tag)?;
                stack.push(node);
            }
            Event::Empty(tag) => {
                let mut node = ElementNode::from_start(&reader, &tag)?;
                node.self_closing = true;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.append_text(&text)?;
                }
            }
            Event::CData(text) => {
                let decoded = reader.decoder().decode(text.as_ref())?.to_string();
                if let Some(current) = stack.last_mut() {
                    current.cdata.get_or_insert_with(String::new).push_str(&decoded);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(ProtocolError::Markup("unexpected closing tag".into()));
                }
                let node = stack
                    .pop()
                    .ok_or_else(|| ProtocolError::Markup("unexpected closing tag".into()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(ProtocolError::Markup(format!(
            "unclosed <{}>",
            stack.last().map(|n| n.name.as_str()).unwrap_or_default()
        )));
    }
    let root = stack
        .pop()
        .ok_or_else(|| ProtocolError::Markup("empty markup".into()))?;
    Ok(root.into_markup())
}

fn decode(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String> {
    Ok(reader.decoder().decode(raw)?.to_string())
}

fn collect_attributes(reader: &Reader<&[u8]>, tag: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        let key = decode(reader, attr.key.as_ref())?;
        let value = attr.unescape_value()?.to_string();
        attrs.push((key, value));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repeated_tags_collapse_into_list() {
        let markup = parse_markup("<tags><tag>a</tag><tag>b</tag></tags>").unwrap();
        assert_eq!(markup.to_value(), json!({"tags": {"tag": ["a", "b"]}}));
    }

    #[test]
    fn test_text_is_trimmed_and_unescaped() {
        let markup = parse_markup("<pattern>\n  a &lt; b &amp;&amp; c\n</pattern>").unwrap();
        assert_eq!(markup.to_value(), json!({"pattern": "a < b && c"}));
    }

    #[test]
    fn test_cdata_is_verbatim() {
        let markup = parse_markup("<body>\n<![CDATA[  if a < b {\n}\n]]>\n</body>").unwrap();
        assert_eq!(markup.to_value(), json!({"body": "  if a < b {\n}\n"}));
    }

    #[test]
    fn test_self_closing_is_empty() {
        let markup = parse_markup("<limit/><path></path>").unwrap();
        let map = markup.as_map().unwrap();
        assert_eq!(map.get("limit"), Some(&Markup::Empty));
        assert_eq!(map.get("path"), Some(&Markup::text("")));
    }

    #[test]
    fn test_attributes_become_keys() {
        let markup = parse_markup(r#"<file path="src/main.rs" mode="w"><line>1</line></file>"#)
            .unwrap();
        assert_eq!(
            markup.to_value(),
            json!({"file": {"path": "src/main.rs", "mode": "w", "line": "1"}})
        );
    }

    #[test]
    fn test_bare_text_fragment() {
        assert_eq!(parse_markup("  hello ").unwrap(), Markup::text("hello"));
    }

    #[test]
    fn test_mismatched_close_is_error() {
        assert!(parse_markup("<a><b>x</a></b>").is_err());
        assert!(parse_markup("<a><b>x</b>").is_err());
    }

    #[test]
    fn test_preview() {
        assert_eq!(Markup::text("x").preview(), "\"x\"");
        let markup = parse_markup("<a>1</a><b>2</b>").unwrap();
        assert_eq!(markup.preview(), "nested tags <a>, <b>");
    }
}
