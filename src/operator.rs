//! The person at the keyboard: prompts and user-facing messages.
//!
//! Tracing output goes to stderr; what the operator needs to read (help,
//! listings, attribute values, prompts) goes through an [`Operator`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Interactive counterpart of the controller.
#[async_trait]
pub trait Operator: Send {
    /// Show `prompt` and wait for one line; `None` when input is closed.
    async fn ask(&mut self, prompt: &str) -> Option<String>;

    /// Show a message.
    fn say(&mut self, text: &str);
}

/// Terminal operator reading stdin on a background task.
#[derive(Debug)]
pub struct ConsoleOperator {
    lines: mpsc::Receiver<String>,
}

impl ConsoleOperator {
    /// Start reading stdin. Must be called inside a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = stdin.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        self.lines.recv().await
    }

    fn say(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Operator with canned answers that records everything said to it.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<String>,
    /// Prompts shown, in order
    pub prompts: Vec<String>,
    /// Messages shown, in order
    pub messages: Vec<String>,
}

impl ScriptedOperator {
    /// Operator that answers with `answers` in order, then reports closed input.
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Everything said so far, one message per line.
    pub fn transcript(&self) -> String {
        self.messages.join("\n")
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front()
    }

    fn say(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_answers_in_order() {
        let mut op = ScriptedOperator::new(["y", "n"]);
        assert_eq!(op.ask("a? ").await.as_deref(), Some("y"));
        assert_eq!(op.ask("b? ").await.as_deref(), Some("n"));
        assert_eq!(op.ask("c? ").await, None);
        op.say("done");
        assert_eq!(op.prompts, vec!["a? ", "b? ", "c? "]);
        assert_eq!(op.transcript(), "done");
    }
}
