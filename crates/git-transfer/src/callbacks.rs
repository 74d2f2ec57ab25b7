//! Caller hooks, invoked synchronously on the operation's thread.

use std::ops::ControlFlow;

pub use git_pack::TransferProgress;

use crate::push::PushUpdate;

/// Work-tree materialization progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutProgress {
    pub completed: usize,
    pub total: usize,
    /// Path of the file just written, relative to the work tree.
    pub path: String,
}

/// Receives progress and status from clone, fetch and push.
///
/// Every method has a no-op default. Returning `Break` from
/// [`on_transfer`](Self::on_transfer) cancels the transfer; nothing it
/// received is kept.
pub trait TransferCallbacks {
    fn on_transfer(&mut self, _progress: &TransferProgress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_checkout(&mut self, _progress: &CheckoutProgress) {}

    /// Text the remote sent on the progress channel.
    fn on_remote_message(&mut self, _message: &str) {}

    /// A ref the push did not update.
    fn on_push_status_error(&mut self, _update: &PushUpdate) {}
}

/// Callbacks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallbacks;

impl TransferCallbacks for NoCallbacks {}
