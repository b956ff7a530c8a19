//! The ring of in-flight tagged commands.

use std::collections::VecDeque;

use bitflags::bitflags;

/// Letter that starts every tag.
const TAG_PREFIX: char = 'a';
/// Tag counters wrap here, keeping tags at four digits.
const TAG_WRAP: u32 = 10_000;

/// Completion state of one tagged command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandState {
    New,
    Ok,
    No,
    Bad,
}

#[derive(Debug)]
pub(crate) struct Command {
    pub(crate) tag: String,
    pub(crate) state: CommandState,
}

/// Outcome of reading one response line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// More responses are expected.
    Continue,
    /// The server sent a `+` continuation request.
    Respond,
    /// Every outstanding command finished and the last one said OK.
    Ok,
    /// Every outstanding command finished and the last one said NO.
    No,
    /// Every outstanding command finished and the last one said BAD.
    Bad,
}

bitflags! {
    /// Modifiers for [`Session::exec`](crate::Session::exec).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExecFlags: u8 {
        /// A NO reply is expected; log it quietly.
        const FAIL_OK = 1;
        /// The command carries a password; keep its arguments out of the logs.
        const PASS = 1 << 1;
        /// Only queue the command, do not send it yet.
        const QUEUE = 1 << 2;
        /// Wait at most `poll_timeout` for the first reply.
        const POLL = 1 << 3;
    }
}

impl Default for ExecFlags {
    fn default() -> Self {
        ExecFlags::empty()
    }
}

/// Fixed-capacity FIFO of outstanding commands.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    commands: VecDeque<Command>,
    capacity: usize,
    seqno: u32,
}

impl CommandQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        CommandQueue {
            commands: VecDeque::with_capacity(capacity),
            capacity,
            seqno: 0,
        }
    }

    /// Reserve the next tag. `None` when the ring is full.
    pub(crate) fn push(&mut self) -> Option<String> {
        if self.commands.len() >= self.capacity {
            return None;
        }
        let tag = format!("{}{:04}", TAG_PREFIX, self.seqno);
        self.seqno = (self.seqno + 1) % TAG_WRAP;
        self.commands.push_back(Command {
            tag: tag.clone(),
            state: CommandState::New,
        });
        Some(tag)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.commands.len() >= self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    /// Record the completion carried by a tagged line.
    ///
    /// Only the oldest outstanding command with a matching tag is updated. Returns false if
    /// no outstanding command has that tag.
    pub(crate) fn complete(&mut self, tag: &str, state: CommandState) -> bool {
        match self
            .commands
            .iter_mut()
            .find(|c| c.state == CommandState::New && c.tag == tag)
        {
            Some(command) => {
                command.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove finished commands from the head of the ring. Returns how many were removed.
    pub(crate) fn pop_completed(&mut self) -> usize {
        let mut popped = 0;
        while let Some(front) = self.commands.front() {
            if front.state == CommandState::New {
                break;
            }
            self.commands.pop_front();
            popped += 1;
        }
        popped
    }

    pub(crate) fn clear(&mut self) {
        self.commands.clear();
    }
}
