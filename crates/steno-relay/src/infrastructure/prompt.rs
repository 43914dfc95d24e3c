//! Operator accept prompt.
//!
//! Prints the peer's fingerprint and waits for a `y`/`n` line.  Prompts are
//! serialized: while one question is open, decisions for other connections
//! queue behind it instead of interleaving on the terminal.  End of input or
//! a read error counts as a rejection.
//!
//! An answer only ever counts for the question it was typed under:
//!
//! - A question can be abandoned while open (its connection closed, or a
//!   decision timeout fired).  The next question then starts with a notice
//!   that the previous one was withdrawn.
//! - Lines typed while no question is open are discarded before the next
//!   question is printed.

use std::net::SocketAddr;

use async_trait::async_trait;
use steno_core::crypto::Fingerprint;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::application::{AcceptDecisionSource, Decision};

/// Operator lines buffered between the input reader and the prompt.
const ANSWER_QUEUE_DEPTH: usize = 16;

/// Interprets one answer line.  Only `y` (any case) accepts.
pub fn parse_answer(answer: &str) -> Decision {
    if answer.trim().eq_ignore_ascii_case("y") {
        Decision::Accept
    } else {
        Decision::Reject
    }
}

/// Line-oriented prompt writing questions to `W`.
///
/// Input lines are read by a background task and handed to whichever
/// question is open when they arrive.
pub struct LinePrompt<W> {
    state: Mutex<PromptState<W>>,
}

struct PromptState<W> {
    answers: mpsc::Receiver<String>,
    output: W,
    /// Set while a question waits for its answer.  Still set when a new
    /// request takes the lock means the previous asker went away mid-question.
    open_question: Option<SocketAddr>,
}

/// The prompt the binary uses.
pub type StdinPrompt = LinePrompt<Stdout>;

impl StdinPrompt {
    /// Prompts on the process terminal.
    ///
    /// Must be called from within a Tokio runtime; the stdin reader is a
    /// spawned task.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<W> LinePrompt<W> {
    /// Creates a prompt reading answers from `input` and writing questions to
    /// `output`.
    ///
    /// # Parameters
    ///
    /// - `input`  – line source, usually buffered stdin.  Owned by a spawned
    ///   reader task until it reaches end of input.
    /// - `output` – where questions and notices are written.
    pub fn new<R>(input: R, output: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            state: Mutex::new(PromptState {
                answers: spawn_line_reader(input),
                output,
                open_question: None,
            }),
        }
    }
}

/// Forwards every input line into a channel until end of input.
fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<String>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ANSWER_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut lines = input.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("failed to read operator input: {e}");
                    break;
                }
            }
        }
    });
    rx
}

#[async_trait]
impl<W> AcceptDecisionSource for LinePrompt<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn request_decision(&self, fingerprint: &Fingerprint, peer: SocketAddr) -> Decision {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // ── Step 1: retire whatever the previous question left behind ────────
        let mut text = String::new();
        if let Some(gone) = state.open_question.take() {
            text.push_str(&format!(
                "\nQuestion for {gone} withdrawn; that connection is gone.\n"
            ));
        }
        while state.answers.try_recv().is_ok() {
            debug!("discarding operator input typed while no question was open");
        }

        // ── Step 2: ask; cancellation from here on leaves the marker set ─────
        state.open_question = Some(peer);
        text.push_str(&format!(
            "Connection from {peer}\n  fingerprint: {fingerprint}\nAccept connection? (y/n) "
        ));
        if let Err(e) = write_text(&mut state.output, &text).await {
            state.open_question = None;
            warn!("failed to write accept prompt: {e}; rejecting {peer}");
            return Decision::Reject;
        }

        // ── Step 3: wait for the answer ──────────────────────────────────────
        let answer = state.answers.recv().await;
        state.open_question = None;

        match answer {
            Some(line) => parse_answer(&line),
            None => {
                warn!("operator input closed; rejecting {peer}");
                Decision::Reject
            }
        }
    }
}

async fn write_text<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
