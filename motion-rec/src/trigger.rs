//! Recording state machine.

use crate::config::Thresholds;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Recording,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    StartRecording,
    StopRecording,
}

/// Counts consecutive frames satisfying a condition.
///
/// Any frame that does not satisfy the condition puts the count back to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebounceCounter(u32);

impl DebounceCounter {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Count another qualifying frame and report whether `target` was reached.
    fn hit(&mut self, target: u32) -> bool {
        self.0 += 1;
        self.0 >= target
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Edge-triggered debounce turning per-frame motion scores into start/stop decisions.
///
/// While idle, `start_frames` consecutive scores strictly above the threshold start a recording.
/// While recording, `stop_frames` consecutive scores strictly below the threshold stop it. A
/// score equal to the threshold neither advances nor resets the counter in either state.
#[derive(Clone, Debug)]
pub struct Trigger {
    threshold: u32,
    start_frames: u32,
    stop_frames: u32,
    state: TriggerState,
    counter: DebounceCounter,
}

impl Trigger {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            threshold: thresholds.threshold,
            start_frames: thresholds.start_frames,
            stop_frames: thresholds.stop_frames,
            state: TriggerState::Idle,
            counter: DebounceCounter::default(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn counter(&self) -> DebounceCounter {
        self.counter
    }

    /// Feed the score of the next frame.
    pub fn step(&mut self, score: u32) -> Option<TriggerEvent> {
        let (qualifies, resets, target, next, event) = match self.state {
            TriggerState::Idle => (
                score > self.threshold,
                score < self.threshold,
                self.start_frames,
                TriggerState::Recording,
                TriggerEvent::StartRecording,
            ),
            TriggerState::Recording => (
                score < self.threshold,
                score > self.threshold,
                self.stop_frames,
                TriggerState::Idle,
                TriggerEvent::StopRecording,
            ),
        };

        if qualifies {
            if self.counter.hit(target) {
                self.state = next;
                self.counter.reset();
                return Some(event);
            }
        } else if resets {
            self.counter.reset();
        }

        None
    }

    /// Go back to idle, dropping any partial count.
    pub fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.counter.reset();
    }
}
