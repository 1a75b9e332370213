use std::io::{ self, Write };
use log::debug;
use tokio::io::{ AsyncBufReadExt, BufReader };

use super::{ ChatSession, SessionState, SubmitRejection };
use crate::config::persona::SUGGESTED_QUESTIONS;
use crate::models::chat::Role;

const SPEAKER: &str = "Aarogya";

/// Interactive stdin/stdout chat. A line of `1`-`4` sends the matching suggested question.
pub async fn run_repl(session: ChatSession) -> io::Result<()> {
    let mut out = io::stdout();
    if let Some(greeting) = session.snapshot().conversation.last() {
        writeln!(out, "{}: {}", SPEAKER, greeting.text)?;
    }
    writeln!(out)?;
    writeln!(out, "Try asking:")?;
    for (i, question) in SUGGESTED_QUESTIONS.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, question)?;
    }
    writeln!(out, "Type /quit to leave.")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(out, "\nYou: ")?;
        out.flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = resolve_input(&line);
        if input == "/quit" {
            break;
        }

        let mut rx = session.subscribe();
        let start_len = session.snapshot().conversation.len();
        let mut turn = tokio::spawn({
            let session = session.clone();
            let input = input.to_string();
            async move { session.submit(&input).await }
        });

        let mut printed = String::new();
        let mut started = false;
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = rx.borrow_and_update().clone();
                    render_reply(&mut out, &state, start_len, &mut printed, &mut started)?;
                }
                result = &mut turn => {
                    let state = session.snapshot();
                    render_reply(&mut out, &state, start_len, &mut printed, &mut started)?;
                    match result {
                        Ok(Err(SubmitRejection::EmptyInput)) => {}
                        Ok(Err(rejection)) => writeln!(out, "({})", rejection)?,
                        Ok(Ok(outcome)) => debug!("Turn finished: {:?}", outcome),
                        Err(e) => writeln!(out, "(chat task failed: {})", e)?,
                    }
                    break;
                }
            }
        }
        if started {
            writeln!(out)?;
        }
    }

    Ok(())
}

fn resolve_input(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.parse::<usize>() {
        Ok(n) if (1..=SUGGESTED_QUESTIONS.len()).contains(&n) => SUGGESTED_QUESTIONS[n - 1],
        _ => trimmed,
    }
}

/// Prints whatever part of this turn's reply has not been printed yet.
/// A reply that no longer extends what was printed (fallback) is shown whole.
fn render_reply(
    out: &mut impl Write,
    state: &SessionState,
    start_len: usize,
    printed: &mut String,
    started: &mut bool
) -> io::Result<()> {
    let reply = state.conversation
        .entries()
        .iter()
        .skip(start_len)
        .find(|e| e.role == Role::Assistant);
    let reply = match reply {
        Some(reply) => reply,
        None => return Ok(()),
    };

    if !*started {
        write!(out, "{}: ", SPEAKER)?;
        *started = true;
    }
    match reply.text.strip_prefix(printed.as_str()) {
        Some(rest) => write!(out, "{}", rest)?,
        None => write!(out, "\n{}: {}", SPEAKER, reply.text)?,
    }
    printed.clear();
    printed.push_str(&reply.text);
    out.flush()
}
