// ABOUTME: Interactive chat loop over stdin with streaming replies.
// ABOUTME: Slash commands drive retry, edit, delete and starters; Ctrl-C stops a reply.

use anyhow::Result;
use parley_chat::{ChatSession, Message, MessagePart, Outcome, Prompt, Role, Starter};
use parley_ext::ExtensionHost;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use super::StdoutObserver;
use crate::builtins::{self, MESSAGE_FINALIZED};
use crate::config::Config;

const HELP: &str = "\
Commands:
  /retry          regenerate the last reply
  /edit <text>    replace your last message and regenerate
  /delete         remove the last exchange
  /starter <n>    send one of the starter prompts
  /show           print the last reply through the markdown renderers
  /history        print the conversation
  /help           show this help
  /quit           leave
Ctrl-C stops a reply in progress.";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Retry,
    Edit(String),
    Delete,
    Starter(usize),
    Show,
    History,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("retry", "") => Input::Retry,
        ("edit", text) if !text.is_empty() => Input::Edit(text.to_string()),
        ("delete", "") => Input::Delete,
        ("starter", n) => match n.parse() {
            Ok(n) if n > 0 => Input::Starter(n),
            _ => Input::Unknown(line.to_string()),
        },
        ("show", "") => Input::Show,
        ("history", "") => Input::History,
        ("help", "") => Input::Help,
        ("quit" | "exit", "") => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

fn last_with_role(history: &[Message], role: Role) -> Option<&Message> {
    history.iter().rev().find(|m| m.role == role)
}

fn print_starters(starters: &[Starter]) {
    println!("Try a starter with /starter <n>:");
    for (i, starter) in starters.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, starter.label, starter.description);
    }
}

fn prompt_marker() {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\n> ");
    let _ = stdout.flush();
}

pub async fn run(config: &Config) -> Result<()> {
    let session = config.session()?;
    session.set_observer(Arc::new(StdoutObserver));

    let host = ExtensionHost::initialize(
        &config.extensions,
        vec![builtins::core_plugin()],
        &builtins::resolver(),
    )
    .await;
    let starters = builtins::starters();

    println!(
        "parley {} - chatting with {} (type /help for commands)",
        env!("CARGO_PKG_VERSION"),
        config.provider.model
    );
    if let Some(empty) = host.table().content.get("empty-state") {
        println!("{empty}");
    }
    print_starters(&starters);

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut prompt = Prompt::new();

    loop {
        prompt_marker();
        let Some(line) = lines.next().await else {
            break;
        };
        let line = line?;

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Unknown(cmd) => println!("Unknown command: {cmd} (try /help)"),
            Input::Message(text) => {
                prompt.set_text(text);
                send_prompt(&session, &host, &mut prompt).await;
            }
            Input::Starter(n) => match starters.get(n - 1) {
                Some(starter) => {
                    starter.apply(&mut prompt);
                    println!("{}", parley_chat::parts_text(prompt.parts()));
                    send_prompt(&session, &host, &mut prompt).await;
                }
                None => println!("No starter {n}"),
            },
            Input::Retry => {
                let history = session.history();
                match last_with_role(&history, Role::Assistant) {
                    Some(reply) => drive(&session, &host, session.retry(reply.id)).await,
                    None => println!("Nothing to retry"),
                }
            }
            Input::Edit(text) => {
                let history = session.history();
                match last_with_role(&history, Role::User) {
                    Some(question) => {
                        let parts = vec![MessagePart::text(text)];
                        drive(&session, &host, session.edit(question.id, parts)).await
                    }
                    None => println!("Nothing to edit"),
                }
            }
            Input::Delete => match session.history().last() {
                Some(message) => match session.delete(message.id) {
                    Ok(()) => println!("Deleted last exchange"),
                    Err(e) => println!("{e}"),
                },
                None => println!("Nothing to delete"),
            },
            Input::Show => {
                let history = session.history();
                match last_with_role(&history, Role::Assistant) {
                    Some(reply) => println!("{}", host.table().render_markdown(&reply.text())),
                    None => println!("No reply yet"),
                }
            }
            Input::History => {
                for message in session.history() {
                    println!("[{}] {}", message.role, message.text());
                }
            }
        }
    }

    host.shutdown().await;
    Ok(())
}

async fn send_prompt(session: &ChatSession, host: &ExtensionHost, prompt: &mut Prompt) {
    if !prompt.can_send(&session.snapshot()) {
        return;
    }
    let parts = prompt.take();
    drive(session, host, session.send(parts)).await;
}

/// Await a generation, stopping it on Ctrl-C, then report and emit hooks
async fn drive(
    session: &ChatSession,
    host: &ExtensionHost,
    generation: impl Future<Output = parley_chat::Result<Outcome>>,
) {
    tokio::pin!(generation);
    let result = loop {
        tokio::select! {
            result = &mut generation => break result,
            _ = tokio::signal::ctrl_c() => {
                if session.stop() {
                    tracing::debug!("Stopped generation on Ctrl-C");
                }
            }
        }
    };
    println!();

    match result {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Stopped) => println!("[stopped]"),
        Ok(Outcome::Failed(reason)) => println!("[error: {reason}]"),
        Err(e) => {
            println!("{e}");
            return;
        }
    }

    if let Some(reply) = session.history().last().filter(|m| m.role == Role::Assistant) {
        if reply.shows_no_content() {
            println!("[no content]");
        }
        let payload = serde_json::json!({
            "id": reply.id.to_string(),
            "text": reply.text(),
        });
        host.hooks().emit(MESSAGE_FINALIZED, &payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_messages() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input(" hello "), Input::Message("hello".to_string()));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("/retry"), Input::Retry);
        assert_eq!(parse_input("/delete"), Input::Delete);
        assert_eq!(parse_input("/show"), Input::Show);
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/help"), Input::Help);
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(
            parse_input("/edit  what about   sets?"),
            Input::Edit("what about   sets?".to_string())
        );
        assert_eq!(parse_input("/starter 2"), Input::Starter(2));
    }

    #[test]
    fn test_parse_rejects_malformed_commands() {
        assert_eq!(parse_input("/edit"), Input::Unknown("/edit".to_string()));
        assert_eq!(parse_input("/starter 0"), Input::Unknown("/starter 0".to_string()));
        assert_eq!(parse_input("/starter x"), Input::Unknown("/starter x".to_string()));
        assert_eq!(parse_input("/retry now"), Input::Unknown("/retry now".to_string()));
        assert_eq!(parse_input("/dance"), Input::Unknown("/dance".to_string()));
    }

    #[test]
    fn test_last_with_role() {
        let history = vec![
            Message::user(vec![MessagePart::text("q1")]),
            Message::assistant(vec![MessagePart::markdown("a1")]),
            Message::user(vec![MessagePart::text("q2")]),
        ];
        assert_eq!(last_with_role(&history, Role::User).unwrap().text(), "q2");
        assert_eq!(last_with_role(&history, Role::Assistant).unwrap().text(), "a1");
        assert!(last_with_role(&[], Role::User).is_none());
    }
}
