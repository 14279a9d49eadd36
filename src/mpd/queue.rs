use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// Poll cadence for the queue watchdog.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Ticks a written command may wait for its response (~180s).
pub const TICK_BUDGET: u32 = 360;

#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// Server rejected the command with an `ACK` line.
    #[error("{0}")]
    Ack(String),
    #[error("Timeout on {0}")]
    Timeout(String),
    #[error("connection error: {0}")]
    Transport(String),
    /// The connection dropped while the command was pending.
    #[error("connection reset")]
    ConnectionReset,
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    #[error("empty command")]
    EmptyCommand,
    #[error("session closed")]
    Closed,
}

/// A completed exchange: the response text with the terminator stripped,
/// plus the file any binary payload was written to.
#[derive(Debug)]
pub struct RawResponse {
    pub body: String,
    pub art_file: Option<PathBuf>,
}

pub type CommandResult = Result<RawResponse, CommandError>;

/// Transmission order for the transport writer.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteRequest {
    pub text: String,
    pub art_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Initial,
    Written,
}

struct QueuedCommand {
    text: String,
    art_file: Option<PathBuf>,
    state: CommandState,
    ticks: u32,
    body: String,
    finish: oneshot::Sender<CommandResult>,
}

/// Strict FIFO of pending commands. Exactly one command is ever on the
/// wire: the head, once `tick` has handed it to the transport. Everything
/// behind it waits, and transport events always settle the head.
#[derive(Default)]
pub struct CommandQueue {
    queue: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub fn new() -> CommandQueue {
        CommandQueue::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(
        &mut self,
        text: String,
        art_file: Option<PathBuf>,
        finish: oneshot::Sender<CommandResult>,
    ) {
        self.queue.push_back(QueuedCommand {
            text,
            art_file,
            state: CommandState::Initial,
            ticks: 0,
            body: String::new(),
            finish,
        });
    }

    /// Transmit the head right away if it is still unwritten. Runs after
    /// every completed response so a pipelined caller is not rate-limited
    /// to one command per tick.
    pub fn kick(&mut self, connected: bool) -> Option<WriteRequest> {
        let head = self.queue.front_mut()?;
        if !connected || head.state != CommandState::Initial {
            return None;
        }

        head.state = CommandState::Written;
        head.ticks = 0;
        Some(WriteRequest {
            text: head.text.clone(),
            art_file: head.art_file.clone(),
        })
    }

    /// One watchdog tick: transmit the head if it has not been written yet,
    /// and advance the wait count of a written head, failing it once the
    /// budget runs out. Unwritten commands never time out.
    pub fn tick(&mut self, connected: bool) -> Option<WriteRequest> {
        let write = self.kick(connected);

        let Some(head) = self.queue.front_mut() else {
            return write;
        };
        if head.state != CommandState::Written {
            return write;
        }

        if head.ticks <= TICK_BUDGET {
            head.ticks += 1;
            return write;
        }

        let command = self.pop();
        log::warn!("Timeout on {}", first_line(&command.text));
        let _ = command.finish.send(Err(CommandError::Timeout(command.text)));
        write
    }

    /// Settle the head with a successful response block. The protocol
    /// terminator is stripped here; parsing belongs to the caller that
    /// enqueued the command.
    pub fn complete(&mut self, data: &str, art_file: Option<PathBuf>) {
        let Some(mut command) = self.try_pop() else {
            log::warn!("response with no command pending: {data:?}");
            return;
        };

        command.body.push_str(strip_terminator(data));
        let body = command.body;
        let art_file = art_file.or(command.art_file);
        let _ = command.finish.send(Ok(RawResponse { body, art_file }));
    }

    /// Fail the head command, leaving the rest of the queue to proceed.
    pub fn fail_head(&mut self, error: CommandError) {
        let Some(command) = self.try_pop() else { return };
        log::warn!("error running command [{}]: {error}", first_line(&command.text));
        let _ = command.finish.send(Err(error));
    }

    /// Reject every pending command. Used when the connection is lost so no
    /// caller is left waiting on a future that can never resolve.
    pub fn fail_all(&mut self, error: CommandError) {
        for command in self.queue.drain(..) {
            let _ = command.finish.send(Err(error.clone()));
        }
    }

    fn pop(&mut self) -> QueuedCommand {
        self.try_pop().expect("pop on empty command queue")
    }

    fn try_pop(&mut self) -> Option<QueuedCommand> {
        self.queue.pop_front()
    }
}

fn strip_terminator(data: &str) -> &str {
    let data = data.strip_suffix('\n').unwrap_or(data);
    let data = data.strip_suffix(super::protocol::OK_LINE).unwrap_or(data);
    data.strip_suffix('\n').unwrap_or(data)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
