use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use draftroom_contracts::canvas::{CanvasState, ExportFormat};
use draftroom_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use draftroom_contracts::models::{ModelRegistry, DEFAULT_MODEL, GROUNDED_TEXT};
use draftroom_engine::{DraftEngine, SubmitOutcome};
use serde_json::Value;

const CLEAR_CONFIRMATION: &str = "Clear all drafted sections?";

#[derive(Debug, Parser)]
#[command(name = "draftroom", version, about = "Grounded research drafting canvas")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive canvas: each line is a prompt, slash commands manage the canvas.
    Chat(ChatArgs),
    /// Generate one section and print it with its sources.
    Run(RunArgs),
    /// List the models that can serve grounded generation.
    Models,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Also write the canvas to this path (`.html` renders HTML, anything else Markdown).
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("draftroom error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
        Command::Models => {
            print_models();
            Ok(0)
        }
    }
}

fn open_engine(out: &Path, events: Option<&Path>, model: &str) -> Result<DraftEngine> {
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    let engine = DraftEngine::new(out, &events_path, Some(model.to_string()))
        .context("failed to start drafting session")?;
    if let Some(reason) = engine.last_fallback_reason() {
        eprintln!("{reason} Using {}.", engine.model().name);
    }
    Ok(engine)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut engine = open_engine(&args.out, args.events.as_deref(), &args.model)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    println!(
        "Draftroom started with {}. Type a research prompt, or /help for commands.",
        engine.model().name
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "quit" => break,
            "generate" => {
                let prompt = intent.prompt.unwrap_or_default();
                println!("Researching with {}...", engine.model().name);
                print_outcome(&engine.generate(&prompt)?);
            }
            "list_sections" => print_sections(engine.canvas()),
            "list_sources" => print_sources(engine.canvas()),
            "status" => {
                println!(
                    "model={} sections={} sources={}",
                    engine.model().name,
                    engine.canvas().sections().len(),
                    engine.canvas().sources().len()
                );
                if let Some(err) = engine.last_error() {
                    println!("last error: {err}");
                }
            }
            "set_model" => {
                let requested = value_as_non_empty_string(intent.command_args.get("model"));
                match requested {
                    Some(model) => match engine.set_model(&model) {
                        Ok(spec) => println!("Model set to {}", spec.name),
                        Err(err) => println!("Model unchanged: {err:#}"),
                    },
                    None => println!("Current model: {}", engine.model().name),
                }
            }
            "export" => {
                let format = value_as_non_empty_string(intent.command_args.get("format"))
                    .unwrap_or_default();
                match format.parse::<ExportFormat>() {
                    Ok(format) => {
                        let path = value_as_non_empty_string(intent.command_args.get("path"))
                            .map(PathBuf::from);
                        let written = engine.export(format, path.as_deref())?;
                        println!("Exported to {}", written.display());
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "clear" => {
                if engine.canvas().is_empty() {
                    println!("Canvas is already empty.");
                } else if confirm(&mut input, CLEAR_CONFIRMATION)? {
                    engine.clear()?;
                    println!("Canvas cleared.");
                } else {
                    println!("Canvas kept.");
                }
            }
            _ => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    engine.finish()
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut engine = open_engine(&args.out, args.events.as_deref(), &args.model)?;
    let outcome = engine.generate(&args.prompt)?;
    let code = match &outcome {
        SubmitOutcome::Appended { section, .. } => {
            println!("{}\n", section.content);
            print_sources(engine.canvas());
            0
        }
        other => {
            print_outcome(other);
            1
        }
    };
    if let Some(path) = args.export.as_deref() {
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse::<ExportFormat>().ok())
            .unwrap_or_default();
        let written = engine.export(format, Some(path))?;
        println!("Exported to {}", written.display());
    }
    engine.finish()?;
    Ok(code)
}

fn print_models() {
    let registry = ModelRegistry::new(None);
    for model in registry.by_capability(GROUNDED_TEXT) {
        let marker = if model.name == DEFAULT_MODEL { " (default)" } else { "" };
        println!("{}\t{}{marker}", model.name, model.provider);
    }
}

fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Appended {
            section,
            sources_added,
        } => {
            println!("\n## {}\n\n{}\n", section.title, section.content);
            println!("({sources_added} new source(s))");
        }
        SubmitOutcome::Failed(err) => eprintln!("Generation failed: {err}"),
        SubmitOutcome::Rejected(rejection) => println!("Not submitted: {rejection}"),
    }
}

fn print_sections(canvas: &CanvasState) {
    if canvas.sections().is_empty() {
        println!("No sections drafted yet.");
        return;
    }
    for (idx, section) in canvas.sections().iter().enumerate() {
        println!("\n[{}] {} ({})\n{}", idx + 1, section.title, section.id, section.content);
    }
}

fn print_sources(canvas: &CanvasState) {
    if canvas.sources().is_empty() {
        println!("No sources cited yet.");
        return;
    }
    println!("Sources:");
    for (idx, source) in canvas.sources().iter().enumerate() {
        println!("  {}. {} <{}>", idx + 1, source.title, source.uri);
    }
}

fn confirm(input: &mut impl BufRead, question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
