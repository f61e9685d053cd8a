//! Finds complete call blocks in a growing buffer.
//!
//! Three tiers, first success wins per block:
//! 1. strict: a balanced `<call>…</call>` that parses as markup;
//! 2. recovered: the same block after stray `<`, `>` and `&` are escaped and
//!    only tags from the tool's own vocabulary are restored;
//! 3. fallback: permissive patterns for a registered tool name that tolerate
//!    a missing closing slash, a repeated opening tag used as a closer, or a
//!    self-closing parameters tag.
//!
//! The buffer is append-only, so byte spans stay valid across scans. A span
//! that has been resolved is never scanned again.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use tracing::debug;

use super::error::{ProtocolError, Result};
use super::markup::{parse_markup, Markup};
use super::registry::ToolRegistry;

pub const CALL_OPEN: &str = "<call>";
pub const CALL_CLOSE: &str = "</call>";
const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";
const BASE_VOCABULARY: [&str; 3] = ["call", "name", "parameters"];

static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>").expect("valid CDATA regex"));
static AMPERSAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+;|#x[0-9a-fA-F]+;|amp;|lt;|gt;|quot;|apos;)?")
        .expect("valid entity regex")
});
static ESCAPED_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"&lt;(/?)([A-Za-z_][\w.\-]*)((?:\s+[\w:.\-]+\s*=\s*"[^"]*")*)\s*(/?)&gt;"#)
        .expect("valid escaped tag regex")
});
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<name>\s*([^<]*?)\s*</?name>").expect("valid name regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionTier {
    Strict,
    Recovered,
    Fallback,
}

impl fmt::Display for DetectionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionTier::Strict => "strict",
            DetectionTier::Recovered => "recovered",
            DetectionTier::Fallback => "fallback",
        })
    }
}

/// One call block found in the buffer, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBlock {
    pub tool_name: String,
    pub parameters: Markup,
    /// Exact substring of the buffer that was matched.
    pub raw_source: String,
    pub span: Range<usize>,
    pub tier: DetectionTier,
}

pub struct BlockScanner {
    recovery: bool,
    fallback: bool,
    fallback_patterns: Vec<Regex>,
    claimed: Vec<Range<usize>>,
}

impl BlockScanner {
    pub fn new(registry: &ToolRegistry, recovery: bool, fallback: bool) -> Self {
        let fallback_patterns = if fallback {
            registry
                .list_tools()
                .iter()
                .filter_map(|name| fallback_pattern(name).ok())
                .collect()
        } else {
            Vec::new()
        };
        Self {
            recovery,
            fallback,
            fallback_patterns,
            claimed: Vec::new(),
        }
    }

    /// Every block completed in `buffer` since the last scan, ordered by
    /// where each block closes.
    pub fn scan(&mut self, buffer: &str, registry: &ToolRegistry) -> Vec<DetectedBlock> {
        let mut found: Vec<DetectedBlock> = Vec::new();
        for span in balanced_spans(buffer) {
            if self.is_claimed(&span) {
                continue;
            }
            let raw = &buffer[span.clone()];
            match self.parse_block(raw, registry) {
                Some((tool_name, parameters, tier)) => {
                    self.claimed.push(span.clone());
                    found.push(DetectedBlock {
                        tool_name,
                        parameters,
                        raw_source: raw.to_string(),
                        span,
                        tier,
                    });
                }
                // Left unclaimed: a later tier or a longer buffer may still resolve it.
                None => debug!(start = span.start, end = span.end, "Call block not parsed yet"),
            }
        }

        if self.fallback {
            for pattern in &self.fallback_patterns {
                for caps in pattern.captures_iter(buffer) {
                    let Some(whole) = caps.get(0) else {
                        continue;
                    };
                    let span = whole.range();
                    if self.is_claimed(&span) {
                        continue;
                    }
                    let tool_name = caps.name("tool").map(|m| m.as_str()).unwrap_or_default();
                    let params = caps.name("params").map(|m| m.as_str()).unwrap_or_default();
                    let vocabulary = vocabulary_for(tool_name, registry);
                    match parse_lenient(params, &vocabulary) {
                        Ok(parameters) => {
                            self.claimed.push(span.clone());
                            found.push(DetectedBlock {
                                tool_name: tool_name.to_string(),
                                parameters,
                                raw_source: whole.as_str().to_string(),
                                span,
                                tier: DetectionTier::Fallback,
                            });
                        }
                        Err(err) => {
                            debug!(tool = tool_name, error = %err, "Skipping unparseable call block");
                        }
                    }
                }
            }
        }

        found.sort_by_key(|block| block.span.end);
        found
    }

    fn is_claimed(&self, span: &Range<usize>) -> bool {
        self.claimed
            .iter()
            .any(|c| c.start < span.end && span.start < c.end)
    }

    fn parse_block(
        &self,
        raw: &str,
        registry: &ToolRegistry,
    ) -> Option<(String, Markup, DetectionTier)> {
        match parse_call(raw) {
            Ok((name, parameters)) => return Some((name, parameters, DetectionTier::Strict)),
            Err(err) => debug!(error = %err, "Strict parse of call block failed"),
        }
        if !self.recovery {
            return None;
        }
        let guessed = NAME_RE
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let cleaned = escape_unknown_markup(raw, &vocabulary_for(guessed, registry));
        match parse_call(&cleaned) {
            Ok((name, parameters)) => Some((name, parameters, DetectionTier::Recovered)),
            Err(err) => {
                debug!(error = %err, "Recovered parse of call block failed");
                None
            }
        }
    }
}

/// `<call>…</call>` spans with no second `<call>` opening inside them. Tags
/// inside CDATA sections are text and neither open nor close a span.
fn balanced_spans(buffer: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find_outside_cdata(buffer, cursor, CALL_OPEN) {
        let body_start = start + CALL_OPEN.len();
        let Some(close) = find_outside_cdata(buffer, body_start, CALL_CLOSE) else {
            break;
        };
        if let Some(inner) = find_outside_cdata(&buffer[..close], body_start, CALL_OPEN) {
            cursor = inner;
            continue;
        }
        let end = close + CALL_CLOSE.len();
        spans.push(start..end);
        cursor = end;
    }
    spans
}

/// Next `needle` at or after `from` that is not inside a CDATA section.
/// `None` as well while a CDATA section is still open.
fn find_outside_cdata(buffer: &str, from: usize, needle: &str) -> Option<usize> {
    let mut pos = from;
    loop {
        let hit = pos + buffer[pos..].find(needle)?;
        match buffer[pos..hit].find(CDATA_OPEN) {
            Some(rel) => {
                let body = pos + rel + CDATA_OPEN.len();
                pos = body + buffer[body..].find(CDATA_CLOSE)? + CDATA_CLOSE.len();
            }
            None => return Some(hit),
        }
    }
}

fn parse_call(xml: &str) -> Result<(String, Markup)> {
    let markup = parse_markup(xml)?;
    let call = markup
        .as_map()
        .and_then(|root| root.get("call"))
        .and_then(Markup::as_map)
        .ok_or_else(|| ProtocolError::Markup("call block has no content".into()))?;
    let name = call
        .get("name")
        .and_then(Markup::as_text)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProtocolError::Markup("call block has no <name>".into()))?;
    let parameters = call
        .get("parameters")
        .ok_or_else(|| ProtocolError::Markup("call block has no <parameters>".into()))?;
    Ok((name.to_string(), parameters.clone()))
}

fn parse_lenient(params: &str, vocabulary: &BTreeSet<String>) -> Result<Markup> {
    match parse_markup(params) {
        Ok(markup) => Ok(markup),
        Err(_) => parse_markup(&escape_unknown_markup(params, vocabulary)),
    }
}

fn vocabulary_for(tool_name: &str, registry: &ToolRegistry) -> BTreeSet<String> {
    match registry.get(tool_name) {
        Some(entry) => entry.vocabulary().clone(),
        None => BASE_VOCABULARY.iter().map(|s| s.to_string()).collect(),
    }
}

/// Escapes every `<`, `>` and bare `&` outside CDATA, then restores the
/// sequences that spell a tag from `vocabulary`.
pub fn escape_unknown_markup(text: &str, vocabulary: &BTreeSet<String>) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut cursor = 0;
    for cdata in CDATA_RE.find_iter(text) {
        out.push_str(&escape_segment(&text[cursor..cdata.start()], vocabulary));
        out.push_str(cdata.as_str());
        cursor = cdata.end();
    }
    out.push_str(&escape_segment(&text[cursor..], vocabulary));
    out
}

fn escape_segment(segment: &str, vocabulary: &BTreeSet<String>) -> String {
    let ampersands = AMPERSAND_RE.replace_all(segment, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            "&amp;".to_string()
        }
    });
    let escaped = ampersands.replace('<', "&lt;").replace('>', "&gt;");
    ESCAPED_TAG_RE
        .replace_all(&escaped, |caps: &Captures| {
            if vocabulary.contains(&caps[2]) {
                format!("<{}{}{}{}>", &caps[1], &caps[2], &caps[3], &caps[4])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn fallback_pattern(tool_name: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"(?s)<call>\s*<name>\s*(?P<tool>{})\s*</?name>\s*(?:<parameters>(?P<params>.*?)</?parameters>\s*|<parameters\s*/>\s*)?(?:</?call>|<call\s*/>)",
        regex::escape(tool_name)
    ))
}
