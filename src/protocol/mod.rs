//! Byte-to-line protocol layer.
//!
//! [`LineFramer`] assembles host bytes into normalized command lines and
//! intercepts the four single-byte real-time commands before any line
//! logic runs, so their latency is bounded by the chunk size fed per
//! call. Output is delivered through registered hooks when present,
//! otherwise through an internal event queue drained with
//! [`poll_event`](LineFramer::poll_event); either way, real-time events
//! and completed lines preserve byte order.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::ProtocolConfig;

/// Single-byte commands dispatched ahead of line assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// 0x18 (Ctrl-X): soft reset. Also clears the framer.
    Reset,
    /// `?`: status-report query.
    StatusQuery,
    /// `!`: feed hold.
    FeedHold,
    /// `~`: cycle start / resume.
    CycleStart,
}

/// Delivery status of a completed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Ok,
    /// The line exceeded the buffer; its text is truncated and untrimmed.
    Overflow,
}

/// One delivered line.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedLine {
    pub text: String,
    pub status: LineStatus,
}

/// Queue-mode output of the framer, in byte order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Realtime(RealtimeEvent),
    Line(CompletedLine),
}

/// Synchronous line sink.
pub type LineHook = Box<dyn FnMut(&str, LineStatus)>;
/// Synchronous real-time sink.
pub type RealtimeHook = Box<dyn FnMut(RealtimeEvent)>;

const RT_RESET: u8 = 0x18;
const RT_STATUS: u8 = b'?';
const RT_HOLD: u8 = b'!';
const RT_START: u8 = b'~';

/// Assembles bytes into lines per the wire rules:
///
/// 1. Real-time bytes are dispatched immediately and never buffered,
///    including inside comments.
/// 2. LF completes a line; CR is discarded.
/// 3. Non-printable, non-tab bytes are consumed silently.
/// 4. `( … )` spans and `;`-to-end-of-line are stripped when configured.
/// 5. Letters fold to uppercase when configured.
/// 6. A full buffer latches overflow until LF; the line is delivered
///    with [`LineStatus::Overflow`] and no trimming.
/// 7. Completed OK lines are trimmed; empty and gated `$` lines vanish.
pub struct LineFramer {
    cfg: ProtocolConfig,
    buf: Vec<u8>,
    overflow: bool,
    in_paren: bool,
    in_semi: bool,
    events: VecDeque<ProtocolEvent>,
    queued_lines: usize,
    line_hook: Option<LineHook>,
    realtime_hook: Option<RealtimeHook>,
}

impl LineFramer {
    pub fn new(cfg: &ProtocolConfig) -> Self {
        LineFramer {
            cfg: cfg.clone(),
            buf: Vec::with_capacity(cfg.line_buffer),
            overflow: false,
            in_paren: false,
            in_semi: false,
            events: VecDeque::new(),
            queued_lines: 0,
            line_hook: None,
            realtime_hook: None,
        }
    }

    /// Registers a synchronous line sink; bypasses the internal queue.
    pub fn set_line_hook(&mut self, hook: LineHook) {
        self.line_hook = Some(hook);
    }

    /// Registers a synchronous real-time sink; bypasses the internal queue.
    pub fn set_realtime_hook(&mut self, hook: RealtimeHook) {
        self.realtime_hook = Some(hook);
    }

    /// Number of lines currently waiting in the internal queue.
    pub fn queued_lines(&self) -> usize {
        self.queued_lines
    }

    /// Pops the oldest queued event (queue mode only).
    pub fn poll_event(&mut self) -> Option<ProtocolEvent> {
        let event = self.events.pop_front();
        if matches!(event, Some(ProtocolEvent::Line(_))) {
            self.queued_lines -= 1;
        }
        event
    }

    /// Feeds one chunk of host bytes through the framer.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed_byte(byte);
        }
    }

    fn feed_byte(&mut self, byte: u8) {
        // Real-time interception happens before any line logic, so these
        // bytes work inside comments and overflowing lines alike.
        match byte {
            RT_RESET => {
                self.clear_assembly();
                self.retain_realtime_events();
                self.dispatch_realtime(RealtimeEvent::Reset);
                return;
            }
            RT_STATUS => {
                self.dispatch_realtime(RealtimeEvent::StatusQuery);
                return;
            }
            RT_HOLD => {
                self.dispatch_realtime(RealtimeEvent::FeedHold);
                return;
            }
            RT_START => {
                self.dispatch_realtime(RealtimeEvent::CycleStart);
                return;
            }
            _ => {}
        }

        if byte == b'\n' {
            self.complete_line();
            return;
        }
        if byte == b'\r' {
            return;
        }

        // Semicolon comments eat everything to end of line (real-time
        // bytes were already handled above).
        if self.in_semi {
            return;
        }

        if self.in_paren {
            if byte == b')' {
                self.in_paren = false;
            }
            return;
        }

        if byte == b'(' && self.cfg.strip_paren_comments {
            self.in_paren = true;
            return;
        }
        if byte == b';' && self.cfg.strip_semicolon_comments {
            self.in_semi = true;
            return;
        }

        // Non-printable, non-tab bytes are consumed without effect.
        if byte != b'\t' && !(0x20..0x7F).contains(&byte) {
            return;
        }

        if self.overflow || self.buf.len() >= self.cfg.line_buffer {
            self.overflow = true;
            return;
        }

        let byte = if self.cfg.to_uppercase {
            byte.to_ascii_uppercase()
        } else {
            byte
        };
        self.buf.push(byte);
    }

    fn complete_line(&mut self) {
        let raw = String::from_utf8_lossy(&self.buf).into_owned();
        let overflow = self.overflow;
        self.clear_assembly();

        if overflow {
            self.deliver(raw, LineStatus::Overflow);
            return;
        }

        let trimmed = raw.trim_matches([' ', '\t']);
        if trimmed.is_empty() {
            return;
        }
        if trimmed.starts_with('$') && !self.cfg.allow_dollar_commands {
            debug!(line = trimmed, "dollar command gated off");
            return;
        }
        self.deliver(trimmed.to_string(), LineStatus::Ok);
    }

    fn deliver(&mut self, text: String, status: LineStatus) {
        if let Some(hook) = self.line_hook.as_mut() {
            hook(&text, status);
            return;
        }
        if self.queued_lines >= self.cfg.queue_depth {
            warn!(line = %text, "line queue full, dropping newest");
            return;
        }
        self.events
            .push_back(ProtocolEvent::Line(CompletedLine { text, status }));
        self.queued_lines += 1;
    }

    fn dispatch_realtime(&mut self, event: RealtimeEvent) {
        if let Some(hook) = self.realtime_hook.as_mut() {
            hook(event);
            return;
        }
        self.events.push_back(ProtocolEvent::Realtime(event));
    }

    fn clear_assembly(&mut self) {
        self.buf.clear();
        self.overflow = false;
        self.in_paren = false;
        self.in_semi = false;
    }

    /// Drops queued lines but keeps pending real-time events.
    fn retain_realtime_events(&mut self) {
        self.events
            .retain(|e| matches!(e, ProtocolEvent::Realtime(_)));
        self.queued_lines = 0;
    }
}
