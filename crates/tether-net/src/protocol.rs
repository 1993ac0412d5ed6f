//! Wire protocol: one text frame per input, one or two text frames per reply.
//!
//! Control inputs are sent as reserved frames (`__UP__`, `__DOWN__`,
//! `__TAB__<prefix>`, `__CTRL_C__`); everything else is a command line.

use tether_terminal::{Input, Reply};

const HISTORY_PREV: &str = "__UP__";
const HISTORY_NEXT: &str = "__DOWN__";
const COMPLETE_PREFIX: &str = "__TAB__";
const INTERRUPT: &str = "__CTRL_C__";

/// Sent to connections beyond the configured limit before closing them.
pub const REFUSED: &str = "Server busy: too many connections. Goodbye.\n";

/// Sent before closing a session that stayed silent too long.
pub const IDLE_TIMEOUT: &str = "\nIdle timeout. Goodbye.\n";

/// Decode one inbound text frame.
pub fn decode(frame: &str) -> Input {
    let frame = frame.trim_end_matches(['\r', '\n']);
    match frame {
        HISTORY_PREV => Input::HistoryPrev,
        HISTORY_NEXT => Input::HistoryNext,
        INTERRUPT => Input::Interrupt,
        _ => match frame.strip_prefix(COMPLETE_PREFIX) {
            Some(prefix) => Input::Complete(prefix.to_string()),
            None => Input::Line(frame.to_string()),
        },
    }
}

/// Encode a reply as the ordered list of frames to send.
///
/// Suggestion replies (no prompt, not closing) are sent verbatim; every
/// other output frame ends with a newline and is followed by the prompt.
pub fn encode(reply: &Reply) -> Vec<String> {
    let mut frames = Vec::with_capacity(2);
    if reply.prompt.is_none() && !reply.close {
        frames.extend(reply.output.clone());
        return frames;
    }
    if let Some(text) = &reply.output {
        frames.push(format!("{text}\n"));
    }
    if let Some(prompt) = &reply.prompt {
        frames.push(prompt.render());
    }
    frames
}

/// Error line for an inbound frame over `max` bytes.
pub fn line_too_long(max: usize) -> String {
    format!("error: line too long (max {max} bytes)\n")
}
