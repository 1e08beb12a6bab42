//! Anti-flicker timer for the loading placeholder. The spinner only becomes
//! visible if the session is still unresolved once the delay elapses; fast
//! resolutions never show it at all. The timer is an owned handle, aborted
//! when the gate unmounts.

use crate::session::{Session, SessionStatus};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct SpinnerTimer {
    visible: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl SpinnerTimer {
    pub(crate) fn start(mut state: watch::Receiver<Session>, delay: Duration) -> Self {
        let (tx, visible) = watch::channel(false);
        let task = tokio::spawn(async move {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            // Wait out the delay, bailing if resolution lands first.
            loop {
                if state.borrow().status != SessionStatus::Unresolved {
                    return;
                }
                tokio::select! {
                    () = &mut sleep => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            if state.borrow().status != SessionStatus::Unresolved {
                return;
            }
            let _ = tx.send(true);

            // Hide again once the session resolves.
            while state.borrow().status == SessionStatus::Unresolved {
                if state.changed().await.is_err() {
                    break;
                }
            }
            let _ = tx.send(false);
        });

        Self { visible, task }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub(crate) fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for SpinnerTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
