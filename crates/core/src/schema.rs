//! Tool schema — the fixed vocabulary of actions the model may request.
//!
//! The schema is built once at agent construction and shared read-only by
//! the completion client (which renders it into the system prompt) and the
//! protocol parser (which validates replies against it). Both sides speak
//! the same tagged syntax; this type is the single source of truth for it.

use serde::{Deserialize, Serialize};

/// Description and argument contract for a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// What the tool does (rendered into the prompt verbatim).
    pub description: String,

    /// Argument names that must be present with non-empty content.
    pub required_params: Vec<String>,

    /// Argument names the model may include.
    pub optional_params: Vec<String>,
}

/// Immutable mapping from tool name to its spec, in registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    tools: Vec<(String, ToolSpec)>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Builder-style; duplicate names replace the earlier entry.
    pub fn tool(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: &[&str],
        optional: &[&str],
    ) -> Self {
        let name = name.into();
        let spec = ToolSpec {
            description: description.into(),
            required_params: required.iter().map(|s| s.to_string()).collect(),
            optional_params: optional.iter().map(|s| s.to_string()).collect(),
        };
        if let Some(entry) = self.tools.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = spec;
        } else {
            self.tools.push((name, spec));
        }
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the schema as prompt text teaching the model the tagged
    /// call syntax. The parser accepts exactly what this describes.
    pub fn render_prompt(&self) -> String {
        let mut out = String::from("## Available tools\n\n");
        out.push_str(
            "Invoke a tool by emitting one tagged block in your reply, with one \
             inner tag per argument:\n\n<tool_name>\n<argument>value</argument>\n</tool_name>\n\n",
        );

        for (name, spec) in &self.tools {
            out.push_str(&format!("### {name}\n{}\n", spec.description));
            if !spec.required_params.is_empty() {
                out.push_str(&format!(
                    "Required arguments: {}\n",
                    spec.required_params.join(", ")
                ));
            }
            if !spec.optional_params.is_empty() {
                out.push_str(&format!(
                    "Optional arguments: {}\n",
                    spec.optional_params.join(", ")
                ));
            }
            let example_arg = spec
                .required_params
                .first()
                .or_else(|| spec.optional_params.first());
            if let Some(arg) = example_arg {
                out.push_str(&format!(
                    "Example: <{name}><{arg}>...</{arg}></{name}>\n"
                ));
            } else {
                out.push_str(&format!("Example: <{name}></{name}>\n"));
            }
            out.push('\n');
        }

        out.push_str(
            "IMPORTANT: Always format tool calls using the tags exactly as shown \
             above. Emit at most one tool call per reply. Do not use JSON for \
             tool calls.",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_schema() -> ToolSchema {
        ToolSchema::new()
            .tool("navigate", "Open a URL in the browser", &["url"], &[])
            .tool(
                "extract_content",
                "Extract content from the current page",
                &["goal"],
                &["format"],
            )
            .tool("finish", "End the research run", &[], &["status"])
    }

    #[test]
    fn register_and_lookup() {
        let schema = browser_schema();
        assert_eq!(schema.len(), 3);
        assert!(schema.contains("navigate"));
        assert!(!schema.contains("calculator"));

        let spec = schema.get("extract_content").unwrap();
        assert_eq!(spec.required_params, vec!["goal"]);
        assert_eq!(spec.optional_params, vec!["format"]);
    }

    #[test]
    fn duplicate_registration_replaces() {
        let schema = ToolSchema::new()
            .tool("navigate", "old", &["url"], &[])
            .tool("navigate", "new", &["url", "wait"], &[]);
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.get("navigate").unwrap().description, "new");
        assert_eq!(schema.get("navigate").unwrap().required_params.len(), 2);
    }

    #[test]
    fn prompt_enumerates_every_tool_in_tag_syntax() {
        let schema = browser_schema();
        let prompt = schema.render_prompt();

        assert!(prompt.contains("### navigate"));
        assert!(prompt.contains("Open a URL in the browser"));
        assert!(prompt.contains("Required arguments: url"));
        assert!(prompt.contains("<navigate><url>...</url></navigate>"));
        assert!(prompt.contains("### finish"));
        // Tools with no required args still get a syntactically valid example
        assert!(prompt.contains("<finish><status>...</status></finish>"));
    }

    #[test]
    fn names_preserve_registration_order() {
        let schema = browser_schema();
        assert_eq!(schema.names(), vec!["navigate", "extract_content", "finish"]);
    }
}
