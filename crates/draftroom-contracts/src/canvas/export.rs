use std::str::FromStr;

use super::state::CanvasState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }

    pub fn render(self, canvas: &CanvasState) -> String {
        match self {
            Self::Markdown => render_markdown(canvas),
            Self::Html => render_html(canvas),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "md" | "markdown" => Ok(Self::Markdown),
            "html" | "htm" => Ok(Self::Html),
            other => Err(format!("unsupported export format '{other}'")),
        }
    }
}

pub fn render_markdown(canvas: &CanvasState) -> String {
    let mut out = String::new();
    for section in canvas.sections() {
        out.push_str(&format!("## {}\n\n", section.title));
        out.push_str(section.content.trim_end());
        out.push_str("\n\n");
    }
    if !canvas.sources().is_empty() {
        out.push_str("## Sources\n\n");
        for source in canvas.sources() {
            out.push_str(&format!(
                "- [{}](<{}>)\n",
                escape_link_text(&source.title),
                escape_link_destination(&source.uri)
            ));
        }
    }
    out
}

pub fn render_html(canvas: &CanvasState) -> String {
    let mut sections = String::new();
    for section in canvas.sections() {
        sections.push_str(&format!(
            "<section id='{id}'><h2>{title}</h2><div class='content'>{content}</div></section>",
            id = escape_html(&section.id),
            title = escape_html(&section.title),
            content = escape_html(&section.content),
        ));
    }

    let mut sources = String::new();
    for source in canvas.sources() {
        sources.push_str(&format!(
            "<li><a href='{uri}' target='_blank' rel='noopener noreferrer'>{title}</a></li>",
            uri = escape_html(&source.uri),
            title = escape_html(&source.title),
        ));
    }

    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>\n  <title>Draftroom Export</title>\n  <style>\n    body {{ font-family: Georgia, serif; background: #f8fafc; margin: 0; padding: 24px; }}\n    section {{ background: white; border-radius: 10px; padding: 16px 20px; margin-bottom: 16px; box-shadow: 0 2px 8px rgba(0,0,0,0.06); }}\n    .content {{ white-space: pre-wrap; line-height: 1.6; }}\n    .sources a {{ color: #4f46e5; text-decoration: none; }}\n  </style>\n</head>\n<body>\n  <h1>Draftroom Canvas</h1>\n  {sections}\n  <h2>Sources</h2>\n  <ul class='sources'>{sources}</ul>\n</body>\n</html>\n"
    )
}

fn escape_link_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '[' | ']' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

// Angle-bracket destinations may hold `(`, `)` and spaces but not `<`, `>` or line breaks.
fn escape_link_destination(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
