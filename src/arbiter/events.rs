// Arbiter Events
// Lifecycle notifications broadcast to observers

/// Ticket assigned to each submission, in submission order
pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterEvent {
    Queued { ticket: Ticket },
    /// Dropped by a newer preempting submission without touching the device
    Preempted { ticket: Ticket },
    ConsoleSuspended,
    Handshake { ticket: Ticket, attempt: u32 },
    Running { ticket: Ticket },
    Finished { ticket: Ticket, ok: bool },
    ConsoleResumed,
    ConsoleResumeFailed { error: String },
}
