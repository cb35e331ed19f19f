// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use airspace_client::AirspaceState;

pub const TOAST_TITLE: &str = "Drone violation!";
const TOAST_DURATION: Duration = Duration::from_secs(6);
const MAX_TOASTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub message: String,
    pub expires_at: Instant,
}

/// Turns newly recorded violations into short-lived toasts.
#[derive(Debug, Default)]
pub struct ViolationNotifier {
    session: u64,
    seen: usize,
    toasts: VecDeque<Toast>,
}

impl ViolationNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a toast for every violation not seen before.
    pub fn observe(&mut self, state: &AirspaceState, now: Instant) {
        if state.session() != self.session {
            self.session = state.session();
            self.seen = 0;
        }

        let violations = state.violations();
        for violation in violations.iter_from(self.seen) {
            self.toasts.push_back(Toast {
                message: format!("Drone {} has a {} violation", violation.drone_id, violation.kind),
                expires_at: now + TOAST_DURATION,
            });
        }
        self.seen = violations.len();

        while self.toasts.len() > MAX_TOASTS {
            self.toasts.pop_front();
        }
    }

    /// Drop expired toasts and return the rest, oldest first.
    pub fn active(&mut self, now: Instant) -> impl Iterator<Item = &Toast> {
        self.toasts.retain(|t| t.expires_at > now);
        self.toasts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_client::ViolationEvent;
    use chrono::Utc;

    fn violation(id: &str, kind: &str) -> ViolationEvent {
        ViolationEvent {
            drone_id: id.to_string(),
            kind: kind.to_string(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_toast_per_new_violation() {
        let now = Instant::now();
        let mut notifier = ViolationNotifier::new();
        let state = AirspaceState::new().apply_violation(violation("D1", "no_fly_zone"));

        notifier.observe(&state, now);
        notifier.observe(&state, now);

        let state = state.apply_violation(violation("D1", "no_fly_zone"));
        notifier.observe(&state, now);

        let messages: Vec<_> = notifier.active(now).map(|t| t.message.clone()).collect();
        assert_eq!(
            messages,
            vec!["Drone D1 has a no_fly_zone violation", "Drone D1 has a no_fly_zone violation"]
        );
    }

    #[test]
    fn test_toasts_expire() {
        let now = Instant::now();
        let mut notifier = ViolationNotifier::new();
        notifier.observe(&AirspaceState::new().apply_violation(violation("D2", "altitude_violation")), now);

        assert_eq!(notifier.active(now).count(), 1);
        assert_eq!(notifier.active(now + TOAST_DURATION).count(), 0);
    }

    #[test]
    fn test_reset_session() {
        let now = Instant::now();
        let mut notifier = ViolationNotifier::new();
        let state = AirspaceState::new()
            .apply_violation(violation("D1", "other"))
            .apply_violation(violation("D2", "other"));
        notifier.observe(&state, now);

        let fresh = state.next_session().apply_violation(violation("D3", "out_of_path"));
        notifier.observe(&fresh, now);

        let last = notifier.active(now).last().map(|t| t.message.clone());
        assert_eq!(last.as_deref(), Some("Drone D3 has a out_of_path violation"));
    }

    #[test]
    fn test_new_session_with_longer_log() {
        let now = Instant::now();
        let mut notifier = ViolationNotifier::new();
        notifier.observe(&AirspaceState::new().apply_violation(violation("D1", "other")), now);

        let fresh = AirspaceState::new()
            .next_session()
            .apply_violation(violation("D4", "no_fly_zone"))
            .apply_violation(violation("D5", "altitude_violation"));
        notifier.observe(&fresh, now);

        let messages: Vec<_> = notifier.active(now).map(|t| t.message.clone()).collect();
        assert_eq!(
            messages,
            vec![
                "Drone D1 has a other violation",
                "Drone D4 has a no_fly_zone violation",
                "Drone D5 has a altitude_violation violation",
            ]
        );
    }
}
