//! In-process polling loop.
//!
//! When a Wait/Retry/Invoke/Callback is outstanding but other activities are still alive,
//! suspension cannot fire on its own — nothing will ever deliver the backend's answer unless
//! something asks for it. This loop periodically pushes an empty [`OperationUpdate::poll`]
//! so the backend gets a chance to report the target operation as terminal.

use crate::context::Shared;
use durable_checkpoint::OperationUpdate;
use std::sync::Arc;

/// Spawn a background poll loop watching `target_id`. Exits as soon as that operation's
/// completion slot fires, or the execution has suspended for an unrelated reason (in which
/// case polling would be wasted — the executor is already unwinding).
pub(crate) fn spawn_poll_loop(shared: Arc<Shared>, target_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(shared.config.poll_initial_delay).await;
        loop {
            if shared.completions.peek(&target_id).is_some() || shared.activities.is_suspended() {
                return;
            }
            if shared.batcher.submit(OperationUpdate::poll()).await.is_err() {
                return;
            }
            if shared.completions.peek(&target_id).is_some() || shared.activities.is_suspended() {
                return;
            }
            tokio::time::sleep(shared.config.poll_period).await;
        }
    });
}
