use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::state::contest::RoomCode;

struct ArmedTimer {
    round_id: Uuid,
    handle: AbortHandle,
}

/// Round timers that are still sleeping, one per room.
///
/// Purely advisory: a timer that fires after its round was closed runs into the
/// lifecycle guard and does nothing.
#[derive(Default)]
pub struct RoundTimers {
    armed: DashMap<RoomCode, ArmedTimer>,
}

impl RoundTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a timer task, aborting any previous one for the room.
    pub fn arm(&self, code: RoomCode, round_id: Uuid, handle: AbortHandle) {
        if let Some(previous) = self.armed.insert(code, ArmedTimer { round_id, handle }) {
            previous.handle.abort();
        }
    }

    /// Abort the timer of `round_id`. Returns whether one was still sleeping.
    pub fn cancel(&self, code: &RoomCode, round_id: Uuid) -> bool {
        match self
            .armed
            .remove_if(code, |_, armed| armed.round_id == round_id)
        {
            Some((_, armed)) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the timer of `round_id` without aborting it; called by the timer once it fired.
    pub fn disarm(&self, code: &RoomCode, round_id: Uuid) {
        self.armed
            .remove_if(code, |_, armed| armed.round_id == round_id);
    }

    /// Abort whatever timer the room has.
    pub fn cancel_any(&self, code: &RoomCode) {
        if let Some((_, armed)) = self.armed.remove(code) {
            armed.handle.abort();
        }
    }

    pub fn is_armed(&self, code: &RoomCode) -> bool {
        self.armed.contains_key(code)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sleeper() -> tokio::task::JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn cancel_matches_round() {
        let timers = RoundTimers::new();
        let code = RoomCode::parse("ABCDEF").unwrap();
        let round = Uuid::new_v4();
        let task = sleeper();
        timers.arm(code.clone(), round, task.abort_handle());

        assert!(!timers.cancel(&code, Uuid::new_v4()));
        assert!(timers.is_armed(&code));

        assert!(timers.cancel(&code, round));
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!timers.is_armed(&code));
    }

    #[tokio::test]
    async fn rearming_aborts_previous_timer() {
        let timers = RoundTimers::new();
        let code = RoomCode::parse("ABCDEF").unwrap();
        let first = sleeper();
        timers.arm(code.clone(), Uuid::new_v4(), first.abort_handle());
        let second = sleeper();
        timers.arm(code.clone(), Uuid::new_v4(), second.abort_handle());

        assert!(first.await.unwrap_err().is_cancelled());
        timers.cancel_any(&code);
        assert!(second.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn disarm_leaves_task_running() {
        let timers = RoundTimers::new();
        let code = RoomCode::parse("ABCDEF").unwrap();
        let round = Uuid::new_v4();
        let task = tokio::spawn(async {});
        timers.arm(code.clone(), round, task.abort_handle());

        timers.disarm(&code, round);
        assert!(!timers.is_armed(&code));
        assert!(task.await.is_ok());
    }
}
