#![forbid(unsafe_code)]

//! Control tokens for the overlay write channels.

/// Navigation and maintenance tokens shared by the overlay cells.
///
/// Which tokens a given cell acts on is part of that cell's contract:
/// history logs act on `Reset` and ignore the rest, undo stacks act on all
/// three, and the store-wide tracker accepts `Reset` only (anything else is
/// a host bug and panics).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Step the target back to the previous recorded value.
    Undo,
    /// Step the target forward to the next recorded value.
    Redo,
    /// Drop recorded state and re-seed from the current value.
    Reset,
}

/// Write-channel token for a combined history cell: the three control
/// tokens plus a catch-all carrying arguments forwarded verbatim to the
/// target's own write channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<A> {
    /// Delegate to the undo layer; ignored for read-only targets.
    Undo,
    /// Delegate to the undo layer; ignored for read-only targets.
    Redo,
    /// Reset both the log and the undo layer.
    Reset,
    /// Pass the arguments through to the target's write channel.
    Forward(A),
}
