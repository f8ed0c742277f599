//! Reliable-downlink engine: one in-flight command, ACK matching, retry
//! with timeout, and busy-vs-fail discrimination.
//!
//! BUSY never counts as a retry: it means the local radio deferred and
//! nothing went on the air, so the controller had no chance to answer.

use heapless::Vec;
use link_protocol::frame::MAX_FRAME;
use link_protocol::{Ack, AckStatus, Message, RadioPort, TxOutcome};
use tracing::{error, info};

use crate::{BUSY_WARN_AFTER_MS, BUSY_WARN_INTERVAL_MS, CMD_ACK_TIMEOUT_MS, CMD_MAX_RETRY};

/// State of the single in-flight reliable command.
#[derive(Debug)]
pub struct PendingCommand {
    pub msg_type: u8,
    pub seq: u8,
    frame: Vec<u8, MAX_FRAME>,
    pub retries: u8,
    last_send_ms: u32,
    /// True once the command has actually been transmitted (OK or FAIL);
    /// the ACK timer only runs from then.
    sent_once: bool,
    busy_since_ms: Option<u32>,
    last_busy_warn_ms: Option<u32>,
}

/// Operator-visible outcomes of one retry-service pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent {
    Retry { attempt: u8, msg_type: u8, seq: u8 },
    Failed { msg_type: u8, seq: u8 },
    BusyWarning,
}

/// A matched (or negatively matched) acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMatch {
    pub msg_type: u8,
    pub seq: u8,
    pub status: AckStatus,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommanderStats {
    pub submitted: u32,
    pub acked: u32,
    pub failed: u32,
}

pub struct Commander {
    next_seq: u8,
    pending: Option<PendingCommand>,
    stats: CommanderStats,
}

impl Commander {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: None,
            stats: CommanderStats::default(),
        }
    }

    pub fn stats(&self) -> CommanderStats {
        self.stats
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Monotonic u8 sequence, skipping 0 on wrap.
    fn alloc_seq(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = if seq == u8::MAX { 1 } else { seq + 1 };
        seq
    }

    /// Encode with the next sequence number, attempt one TX immediately,
    /// and install a PendingCommand when the type expects an ACK.
    /// Returns the allocated sequence number.
    pub fn submit<R: RadioPort>(&mut self, msg: &Message, radio: &mut R, now_ms: u32) -> u8 {
        let seq = self.alloc_seq();
        let msg_type = msg.msg_type() as u8;
        let frame = match msg.encode_frame(seq) {
            Ok(f) => f,
            Err(e) => {
                // Unreachable for catalogue messages; drop rather than panic.
                error!(msg_type, error = %e, "Command encode failed");
                return seq;
            }
        };

        let outcome = radio.transmit(&frame, now_ms);
        self.stats.submitted += 1;
        info!(msg_type, seq, ?outcome, "Command submitted");

        if msg.msg_type().expects_ack() {
            let sent = outcome != TxOutcome::Busy;
            self.pending = Some(PendingCommand {
                msg_type,
                seq,
                frame,
                retries: 0,
                last_send_ms: now_ms,
                sent_once: sent,
                busy_since_ms: if sent { None } else { Some(now_ms) },
                last_busy_warn_ms: None,
            });
        }
        seq
    }

    /// One retry-service pass; at most one event per call.
    pub fn service<R: RadioPort>(&mut self, radio: &mut R, now_ms: u32) -> Option<CommandEvent> {
        let Some(p) = self.pending.as_mut() else {
            return None;
        };

        if !p.sent_once {
            // Never actually on the air yet: keep trying, outside the
            // retry budget.
            return match radio.transmit(&p.frame, now_ms) {
                TxOutcome::Busy => note_busy(p, now_ms),
                TxOutcome::Ok | TxOutcome::Fail => {
                    p.sent_once = true;
                    p.last_send_ms = now_ms;
                    p.busy_since_ms = None;
                    None
                }
            };
        }

        if now_ms.wrapping_sub(p.last_send_ms) < CMD_ACK_TIMEOUT_MS {
            return None;
        }

        if p.retries >= CMD_MAX_RETRY {
            let event = CommandEvent::Failed {
                msg_type: p.msg_type,
                seq: p.seq,
            };
            self.stats.failed += 1;
            self.pending = None;
            return Some(event);
        }

        match radio.transmit(&p.frame, now_ms) {
            TxOutcome::Busy => note_busy(p, now_ms),
            TxOutcome::Ok | TxOutcome::Fail => {
                p.retries += 1;
                p.last_send_ms = now_ms;
                p.busy_since_ms = None;
                Some(CommandEvent::Retry {
                    attempt: p.retries,
                    msg_type: p.msg_type,
                    seq: p.seq,
                })
            }
        }
    }

    /// Match an incoming Ack against the pending command. A status of ERR
    /// is a terminal response and deactivates too.
    pub fn handle_ack(&mut self, ack: &Ack, seq: u8) -> Option<AckMatch> {
        let p = self.pending.as_ref()?;
        if ack.acked_msg_type != p.msg_type || seq != p.seq {
            return None;
        }
        let matched = AckMatch {
            msg_type: p.msg_type,
            seq: p.seq,
            status: ack.status,
        };
        self.stats.acked += 1;
        self.pending = None;
        Some(matched)
    }
}

impl Default for Commander {
    fn default() -> Self {
        Self::new()
    }
}

fn note_busy(p: &mut PendingCommand, now_ms: u32) -> Option<CommandEvent> {
    let since = *p.busy_since_ms.get_or_insert(now_ms);
    if now_ms.wrapping_sub(since) > BUSY_WARN_AFTER_MS {
        let warn_due = match p.last_busy_warn_ms {
            None => true,
            Some(w) => now_ms.wrapping_sub(w) > BUSY_WARN_INTERVAL_MS,
        };
        if warn_due {
            p.last_busy_warn_ms = Some(now_ms);
            return Some(CommandEvent::BusyWarning);
        }
    }
    None
}
