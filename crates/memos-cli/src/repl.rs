//! REPL – Read-Eval-Print Loop for the MemOS chat shell.
//!
//! Any line that does not start with `/` is sent to the orchestrator as one
//! user message.
//!
//! Supported slash-commands:
//!   /help         – show this list
//!   /profile      – print the user profile
//!   /entities     – print every known entity
//!   /timeline     – print the event timeline
//!   /debug        – toggle printing the assembled instruction and surfaced memories
//!   /quit | /exit – gracefully exit the CLI

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use memos_memory::document::MemoryDocument;
use memos_runtime::Orchestrator;
use memos_types::TurnOutcome;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Profile,
    Entities,
    Timeline,
    Debug,
    Quit,
    Unknown(String),
    Chat(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if !line.starts_with('/') {
            return Command::Chat(line.to_string());
        }
        match line {
            "/help" => Command::Help,
            "/profile" => Command::Profile,
            "/entities" => Command::Entities,
            "/timeline" => Command::Timeline,
            "/debug" => Command::Debug,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub async fn run(orchestrator: &Orchestrator, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Cannot open terminal".red(), e);
            return;
        }
    };
    let mut debug = false;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let command = Command::parse(&line);
        if command != Command::Empty {
            editor.add_history_entry(line.trim()).ok();
        }

        match command {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::Profile => with_snapshot(orchestrator, render_profile),
            Command::Entities => with_snapshot(orchestrator, render_entities),
            Command::Timeline => with_snapshot(orchestrator, render_timeline),
            Command::Debug => {
                debug = !debug;
                let state = if debug { "on".green() } else { "off".yellow() };
                println!("  Debug output {}", state);
            }
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
            Command::Chat(message) => {
                let outcome = orchestrator.process_message(&message).await;
                if debug {
                    print!("{}", render_debug(&outcome).dimmed());
                }
                println!("{} {}", "memos>".bold().cyan(), outcome.answer);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "MemOS Commands".bold().underline());
    println!("  {}      – print the user profile", "/profile".bold().cyan());
    println!("  {}     – print every known entity", "/entities".bold().cyan());
    println!("  {}     – print the event timeline", "/timeline".bold().cyan());
    println!("  {}        – toggle instruction and memory dump", "/debug".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!("  Anything else is sent to the assistant.");
    println!();
}

fn with_snapshot(orchestrator: &Orchestrator, render: fn(&MemoryDocument) -> String) {
    match orchestrator.core().snapshot() {
        Ok(doc) => print!("{}", render(&doc)),
        Err(e) => println!("{}: {}", "Error reading memory".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

pub fn render_profile(doc: &MemoryDocument) -> String {
    let mut out = String::from("User Profile\n");
    let mut any = false;
    for (field, value) in doc.profile_lines() {
        any = true;
        let _ = writeln!(out, "  {field:<18}: {value}");
    }
    if !any {
        out.push_str("  (empty)\n");
    }
    if !doc.knowledge_base.is_empty() {
        out.push_str("Knowledge\n");
        for (topic, content) in &doc.knowledge_base {
            let _ = writeln!(out, "  {topic:<18}: {content}");
        }
    }
    out
}

pub fn render_entities(doc: &MemoryDocument) -> String {
    let mut out = String::from("Entities\n");
    if doc.entities.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }
    for entity in doc.entities.values() {
        let relationship = entity.relationship.as_deref().unwrap_or("unknown");
        let _ = write!(out, "  {} ({relationship})", entity.name);
        if !entity.attributes.is_empty() {
            let attributes: Vec<String> = entity
                .attributes
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect();
            let _ = write!(out, " – {}", attributes.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn render_timeline(doc: &MemoryDocument) -> String {
    let mut out = String::from("Timeline\n");
    if doc.events.is_empty() {
        out.push_str("  (no events)\n");
        return out;
    }
    for event in &doc.events {
        let _ = writeln!(out, "  [Turn {} | {}] {}", event.turn, event.date, event.description);
    }
    out
}

fn render_debug(outcome: &TurnOutcome) -> String {
    let mut out = String::from("── instruction ──\n");
    out.push_str(&outcome.assembled_instruction);
    out.push_str("\n── surfaced memories ──\n");
    if outcome.surfaced_memories.is_empty() {
        out.push_str("  (none)\n");
    }
    for hit in &outcome.surfaced_memories {
        let _ = writeln!(
            out,
            "  {} [turn {}, d={:.3}] {}",
            hit.id, hit.origin_turn, hit.distance, hit.content
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use memos_memory::document::TimelineEvent;
    use memos_types::MemoryHit;
    use serde_json::{Map, json};

    // ── parse ──

    #[test]
    fn plain_text_is_a_chat_message() {
        assert_eq!(Command::parse("  my dog is Bruno  "), Command::Chat("my dog is Bruno".into()));
    }

    #[test]
    fn slash_commands_are_recognised() {
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/profile"), Command::Profile);
        assert_eq!(Command::parse("/entities"), Command::Entities);
        assert_eq!(Command::parse("/timeline"), Command::Timeline);
        assert_eq!(Command::parse("/debug"), Command::Debug);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn unknown_slash_command_is_not_sent_to_the_model() {
        assert_eq!(Command::parse("/models"), Command::Unknown("/models".into()));
    }

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    // ── render ──

    #[test]
    fn empty_profile_renders_placeholder() {
        let out = render_profile(&MemoryDocument::default());
        assert!(out.contains("(empty)"));
        assert!(!out.contains("Knowledge"));
    }

    #[test]
    fn profile_lists_are_comma_joined() {
        let mut doc = MemoryDocument::default();
        doc.update_profile("name", "Ana");
        doc.update_profile("preferences", "tea");
        doc.update_profile("preferences", "jazz");
        doc.save_knowledge("Rust", "ownership rules");
        let out = render_profile(&doc);
        assert!(out.contains("Ana"));
        assert!(out.contains("tea, jazz"));
        assert!(out.contains("rust"));
        assert!(!out.contains("(empty)"));
    }

    #[test]
    fn entities_render_relationship_and_attributes() {
        let mut doc = MemoryDocument::default();
        let mut attrs = Map::new();
        attrs.insert("breed".into(), json!("beagle"));
        attrs.insert("age".into(), json!(4));
        doc.merge_entity("Bruno", Some("dog"), &attrs);
        let out = render_entities(&doc);
        assert!(out.contains("Bruno (dog)"));
        assert!(out.contains("breed=beagle"));
        assert!(out.contains("age=4"));
    }

    #[test]
    fn no_entities_renders_placeholder() {
        assert!(render_entities(&MemoryDocument::default()).contains("(none)"));
    }

    #[test]
    fn timeline_renders_turn_and_date() {
        let mut doc = MemoryDocument::default();
        doc.events.push(TimelineEvent {
            turn: 3,
            description: "Moved to Lisbon".into(),
            date: "2024-05-01".into(),
        });
        let out = render_timeline(&doc);
        assert!(out.contains("[Turn 3 | 2024-05-01] Moved to Lisbon"));
    }

    #[test]
    fn debug_dump_includes_instruction_and_hits() {
        let outcome = TurnOutcome {
            answer: "hi".into(),
            surfaced_memories: vec![MemoryHit {
                id: "mem-1".into(),
                content: "User likes tea".into(),
                origin_turn: 2,
                last_used_turn: 5,
                distance: 0.25,
            }],
            assembled_instruction: "Role: MemoryOS.".into(),
        };
        let out = render_debug(&outcome);
        assert!(out.contains("Role: MemoryOS."));
        assert!(out.contains("mem-1 [turn 2, d=0.250] User likes tea"));
    }
}
