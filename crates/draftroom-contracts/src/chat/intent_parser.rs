use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, EXPORT_COMMAND, MODEL_COMMAND, NO_ARG_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// `/export [format] [path]`; a lone argument that is not a known format is a path.
fn parse_export_args(arg: &str) -> (String, Option<String>) {
    let parts = split_args(arg);
    let is_format = |value: &str| {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "md" | "markdown" | "html" | "htm"
        )
    };
    match parts.as_slice() {
        [] => ("markdown".to_string(), None),
        [only] if is_format(only) => (only.to_ascii_lowercase(), None),
        [only] => ("markdown".to_string(), Some(only.clone())),
        [format, rest @ ..] => (format.to_ascii_lowercase(), Some(rest.join(" "))),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if command == MODEL_COMMAND.command {
                let mut intent = Intent::new(MODEL_COMMAND.action, text);
                intent
                    .command_args
                    .insert("model".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == EXPORT_COMMAND.command {
                let (format, path) = parse_export_args(arg);
                let mut intent = Intent::new(EXPORT_COMMAND.action, text);
                intent
                    .command_args
                    .insert("format".to_string(), Value::String(format));
                intent.command_args.insert(
                    "path".to_string(),
                    path.map(Value::String).unwrap_or(Value::Null),
                );
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::parse_intent;

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn plain_text_is_a_prompt() {
        let intent = parse_intent("  Summarise grounding in LLMs \n");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("Summarise grounding in LLMs"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/clear").action, "clear");
        assert_eq!(parse_intent("/SOURCES").action, "list_sources");
        assert_eq!(parse_intent("/sections").action, "list_sections");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_model_command() {
        let intent = parse_intent("/model gemini-2.5-flash");
        assert_eq!(intent.action, "set_model");
        assert_eq!(intent.command_args["model"], json!("gemini-2.5-flash"));
    }

    #[test]
    fn parse_export_variants() {
        let bare = parse_intent("/export");
        assert_eq!(bare.command_args["format"], json!("markdown"));
        assert_eq!(bare.command_args["path"], Value::Null);

        let html = parse_intent("/export HTML");
        assert_eq!(html.command_args["format"], json!("html"));
        assert_eq!(html.command_args["path"], Value::Null);

        let path_only = parse_intent("/export notes.md");
        assert_eq!(path_only.command_args["format"], json!("markdown"));
        assert_eq!(path_only.command_args["path"], json!("notes.md"));

        let quoted = parse_intent("/export html \"/tmp/my draft.html\"");
        assert_eq!(quoted.command_args["format"], json!("html"));
        assert_eq!(quoted.command_args["path"], json!("/tmp/my draft.html"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn lone_slash_is_a_prompt() {
        let intent = parse_intent("/ why not");
        assert_eq!(intent.action, "generate");
    }
}
