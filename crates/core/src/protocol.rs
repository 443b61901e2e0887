//! Tool-call protocol parser.
//!
//! Model replies embed at most one action as a tagged block inside free
//! text: `<tool_name><arg>value</arg></tool_name>`. The parser extracts the
//! first well-formed block, validates it against the [`ToolSchema`], and
//! discards surrounding prose. A reply with no tagged block at all is a
//! plain conversational answer, which is a valid outcome.
//!
//! An unterminated block whose tag names a known tool is a hard
//! [`ProtocolError::MalformedBlock`]: tool boundaries are never guessed
//! from partial text.

use crate::action::ParsedAction;
use crate::error::ProtocolError;
use crate::schema::ToolSchema;
use std::collections::BTreeMap;

/// A candidate opening tag found in the text.
struct OpenTag<'a> {
    name: &'a str,
    /// Byte offset of the `<`.
    start: usize,
    /// Byte offset just past the `>`.
    content_start: usize,
}

/// Find the next `<identifier>` opening tag at or after `from`.
fn next_open_tag(text: &str, from: usize) -> Option<OpenTag<'_>> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let name_start = i + 1;
        let mut j = name_start;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        let valid_start = j > name_start
            && (bytes[name_start].is_ascii_alphabetic() || bytes[name_start] == b'_');
        if valid_start && j < bytes.len() && bytes[j] == b'>' {
            return Some(OpenTag {
                name: &text[name_start..j],
                start: i,
                content_start: j + 1,
            });
        }
        i += 1;
    }
    None
}

/// Collect `<name>value</name>` argument blocks inside a tool block.
/// Unterminated inner tags are skipped; the required-argument check on the
/// caller's side surfaces anything that went missing because of it.
fn parse_arguments(content: &str) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    let mut pos = 0;
    while let Some(tag) = next_open_tag(content, pos) {
        let close = format!("</{}>", tag.name);
        match content[tag.content_start..].find(&close) {
            Some(rel) => {
                let value = content[tag.content_start..tag.content_start + rel].trim();
                args.insert(tag.name.to_string(), value.to_string());
                pos = tag.content_start + rel + close.len();
            }
            None => {
                pos = tag.start + 1;
            }
        }
    }
    args
}

/// Parse a model reply into a concrete action, validated against `schema`.
///
/// Returns [`ParsedAction::PlainText`] when no tagged block is present.
/// A found block that fails validation is an error, never a partially
/// filled action.
pub fn parse(text: &str, schema: &ToolSchema) -> Result<ParsedAction, ProtocolError> {
    let mut pos = 0;
    while let Some(tag) = next_open_tag(text, pos) {
        let close = format!("</{}>", tag.name);
        let Some(rel) = text[tag.content_start..].find(&close) else {
            if schema.contains(tag.name) {
                // A recognizable tool marker with no closing tag: refuse to
                // guess where the block ends.
                return Err(ProtocolError::MalformedBlock {
                    tool: tag.name.to_string(),
                });
            }
            pos = tag.start + 1;
            continue;
        };

        // First well-formed block wins; any later blocks are ignored.
        let name = tag.name.to_string();
        let spec = schema
            .get(&name)
            .ok_or_else(|| ProtocolError::UnknownTool { tool: name.clone() })?;

        let content = &text[tag.content_start..tag.content_start + rel];
        let arguments = parse_arguments(content);

        for required in &spec.required_params {
            match arguments.get(required) {
                Some(value) if !value.is_empty() => {}
                _ => {
                    return Err(ProtocolError::MissingRequiredArg {
                        tool: name,
                        arg: required.clone(),
                    });
                }
            }
        }

        return Ok(ParsedAction::ToolCall { name, arguments });
    }

    Ok(ParsedAction::PlainText {
        content: text.to_string(),
    })
}
