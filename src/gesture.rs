use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Classification thresholds. Units are logical pixels for distances
/// (terminal mode scales cells up before feeding samples in).
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Two taps inside this window form a double tap.
    pub double_tap: Duration,
    /// A press sustained this long without movement is a hold.
    pub hold: Duration,
    /// Vertical displacement past this cancels horizontal actions.
    pub vertical_cancel: f32,
    /// Movement below this still counts as a stationary press.
    pub tap_slop: f32,
    /// Horizontal swipe offset is clamped to this magnitude.
    pub swipe_clamp: f32,
    /// Releasing past this commits the swipe action.
    pub swipe_commit: f32,
    /// Committed reveals hide again after this long.
    pub reveal_hide: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            double_tap: Duration::from_millis(300),
            hold: Duration::from_millis(200),
            vertical_cancel: 30.0,
            tap_slop: 10.0,
            swipe_clamp: 100.0,
            swipe_commit: 50.0,
            reveal_hide: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Touch {
    pub x: f32,
    pub y: f32,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Tap { x: f32, y: f32 },
    DoubleTap { x: f32, y: f32 },
    HoldStart { x: f32, y: f32 },
    HoldEnd,
    /// Live horizontal offset (negative = left), already clamped.
    SwipeMove { offset: f32 },
    SwipeCommit,
    SwipeCancel,
    /// A committed reveal timed out.
    RevealExpired,
}

#[derive(Debug)]
struct ActiveTouch {
    start: Touch,
    swipe_offset: f32,
    swiping: bool,
    vertical: bool,
    holding: bool,
}

/// Tap/hold/swipe classifier shared by every gesture consumer. Stateless
/// apart from the per-target last-tap map (double taps must work across
/// concurrently mounted items) and in-flight touch bookkeeping. A touch
/// that is neither a clean tap nor a clean hold resolves to no action.
pub struct Detector {
    thresholds: Thresholds,
    last_tap: HashMap<String, Instant>,
    touches: HashMap<String, ActiveTouch>,
    reveals: HashMap<String, Instant>,
}

impl Detector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            last_tap: HashMap::new(),
            touches: HashMap::new(),
            reveals: HashMap::new(),
        }
    }

    pub fn touch_start(&mut self, target: &str, touch: Touch) {
        self.touches.insert(
            target.to_string(),
            ActiveTouch {
                start: touch,
                swipe_offset: 0.0,
                swiping: false,
                vertical: false,
                holding: false,
            },
        );
    }

    pub fn touch_move(&mut self, target: &str, touch: Touch) -> Vec<Event> {
        let thresholds = self.thresholds;
        let Some(active) = self.touches.get_mut(target) else {
            return Vec::new();
        };
        let dx = touch.x - active.start.x;
        let dy = (touch.y - active.start.y).abs();

        if dy > thresholds.vertical_cancel {
            // The finger is scrolling; nothing horizontal may fire for
            // this touch sequence, and a pending hold is off too.
            active.vertical = true;
            if active.swiping {
                active.swiping = false;
                active.swipe_offset = 0.0;
                return vec![Event::SwipeCancel];
            }
            return Vec::new();
        }

        if active.vertical || active.holding {
            return Vec::new();
        }

        if dx < -thresholds.tap_slop {
            active.swiping = true;
            active.swipe_offset = dx.max(-thresholds.swipe_clamp);
            return vec![Event::SwipeMove {
                offset: active.swipe_offset,
            }];
        }

        Vec::new()
    }

    pub fn touch_end(&mut self, target: &str, touch: Touch) -> Vec<Event> {
        let thresholds = self.thresholds;
        let Some(active) = self.touches.remove(target) else {
            return Vec::new();
        };

        if active.holding {
            return vec![Event::HoldEnd];
        }

        if active.swiping {
            if active.swipe_offset <= -thresholds.swipe_commit {
                self.reveals
                    .insert(target.to_string(), touch.at + thresholds.reveal_hide);
                return vec![Event::SwipeCommit];
            }
            return vec![Event::SwipeCancel];
        }

        if active.vertical {
            return Vec::new();
        }

        let duration = touch.at.duration_since(active.start.at);
        let moved = (touch.x - active.start.x).abs().max((touch.y - active.start.y).abs());
        if duration >= thresholds.hold || moved > thresholds.tap_slop {
            // Too slow for a tap but never classified as a hold: ambiguous,
            // so no action.
            return Vec::new();
        }

        match self.last_tap.get(target) {
            Some(last) if touch.at.duration_since(*last) < thresholds.double_tap => {
                self.last_tap.remove(target);
                vec![Event::DoubleTap {
                    x: active.start.x,
                    y: active.start.y,
                }]
            }
            _ => {
                self.last_tap.insert(target.to_string(), touch.at);
                vec![Event::Tap {
                    x: active.start.x,
                    y: active.start.y,
                }]
            }
        }
    }

    /// Time-driven classification: promotes stationary presses to holds
    /// and expires committed reveals. Call from the event-loop tick.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, Event)> {
        let thresholds = self.thresholds;
        let mut events = Vec::new();

        for (target, active) in self.touches.iter_mut() {
            if active.holding || active.swiping || active.vertical {
                continue;
            }
            if now.duration_since(active.start.at) >= thresholds.hold {
                active.holding = true;
                events.push((
                    target.clone(),
                    Event::HoldStart {
                        x: active.start.x,
                        y: active.start.y,
                    },
                ));
            }
        }

        let expired: Vec<String> = self
            .reveals
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(target, _)| target.clone())
            .collect();
        for target in expired {
            self.reveals.remove(&target);
            events.push((target, Event::RevealExpired));
        }

        events
    }

    /// Forget per-target state for items that scrolled out of the window.
    pub fn forget(&mut self, target: &str) {
        self.last_tap.remove(target);
        self.touches.remove(target);
        self.reveals.remove(target);
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(x: f32, y: f32, at: Instant) -> Touch {
        Touch { x, y, at }
    }

    fn quick_tap(detector: &mut Detector, target: &str, at: Instant) -> Vec<Event> {
        detector.touch_start(target, touch(50.0, 50.0, at));
        detector.touch_end(target, touch(50.0, 50.0, at + Duration::from_millis(60)))
    }

    #[test]
    fn clean_tap_classifies_as_tap() {
        let mut detector = Detector::default();
        let now = Instant::now();
        let events = quick_tap(&mut detector, "v1", now);
        assert_eq!(events, vec![Event::Tap { x: 50.0, y: 50.0 }]);
    }

    #[test]
    fn second_tap_within_window_is_double() {
        let mut detector = Detector::default();
        let now = Instant::now();
        quick_tap(&mut detector, "v1", now);
        let events = quick_tap(&mut detector, "v1", now + Duration::from_millis(150));
        assert_eq!(events, vec![Event::DoubleTap { x: 50.0, y: 50.0 }]);
    }

    #[test]
    fn double_tap_resets_so_third_tap_is_single() {
        let mut detector = Detector::default();
        let now = Instant::now();
        quick_tap(&mut detector, "v1", now);
        quick_tap(&mut detector, "v1", now + Duration::from_millis(150));
        let events = quick_tap(&mut detector, "v1", now + Duration::from_millis(300));
        assert_eq!(events, vec![Event::Tap { x: 50.0, y: 50.0 }]);
    }

    #[test]
    fn taps_too_far_apart_stay_single() {
        let mut detector = Detector::default();
        let now = Instant::now();
        quick_tap(&mut detector, "v1", now);
        let events = quick_tap(&mut detector, "v1", now + Duration::from_millis(500));
        assert_eq!(events, vec![Event::Tap { x: 50.0, y: 50.0 }]);
    }

    #[test]
    fn last_tap_map_is_keyed_per_target() {
        let mut detector = Detector::default();
        let now = Instant::now();
        quick_tap(&mut detector, "v1", now);
        let events = quick_tap(&mut detector, "v2", now + Duration::from_millis(100));
        assert_eq!(events, vec![Event::Tap { x: 50.0, y: 50.0 }]);
    }

    #[test]
    fn stationary_press_promotes_to_hold_on_tick() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("v1", touch(90.0, 40.0, now));
        assert!(detector.tick(now + Duration::from_millis(100)).is_empty());
        let events = detector.tick(now + Duration::from_millis(220));
        assert_eq!(
            events,
            vec![("v1".to_string(), Event::HoldStart { x: 90.0, y: 40.0 })]
        );
        let end = detector.touch_end("v1", touch(90.0, 40.0, now + Duration::from_millis(600)));
        assert_eq!(end, vec![Event::HoldEnd]);
    }

    #[test]
    fn long_press_without_tick_resolves_to_no_action() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("v1", touch(10.0, 10.0, now));
        let events = detector.touch_end("v1", touch(10.0, 10.0, now + Duration::from_millis(400)));
        assert!(events.is_empty());
    }

    #[test]
    fn vertical_movement_cancels_everything_horizontal() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("m1", touch(100.0, 100.0, now));
        let moved = detector.touch_move(
            "m1",
            touch(60.0, 100.0, now + Duration::from_millis(40)),
        );
        assert_eq!(moved, vec![Event::SwipeMove { offset: -40.0 }]);
        let cancelled = detector.touch_move(
            "m1",
            touch(60.0, 140.0, now + Duration::from_millis(80)),
        );
        assert_eq!(cancelled, vec![Event::SwipeCancel]);
        // Nothing horizontal may fire for the rest of the sequence.
        let more = detector.touch_move(
            "m1",
            touch(0.0, 140.0, now + Duration::from_millis(120)),
        );
        assert!(more.is_empty());
        let end = detector.touch_end("m1", touch(0.0, 140.0, now + Duration::from_millis(160)));
        assert!(end.is_empty());
    }

    #[test]
    fn vertical_movement_blocks_hold_promotion() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("v1", touch(90.0, 40.0, now));
        detector.touch_move("v1", touch(90.0, 80.0, now + Duration::from_millis(50)));
        assert!(detector.tick(now + Duration::from_millis(400)).is_empty());
    }

    #[test]
    fn swipe_offset_is_clamped() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("m1", touch(200.0, 50.0, now));
        let events = detector.touch_move(
            "m1",
            touch(0.0, 50.0, now + Duration::from_millis(60)),
        );
        assert_eq!(events, vec![Event::SwipeMove { offset: -100.0 }]);
    }

    #[test]
    fn release_past_threshold_commits_and_reveal_expires() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("m1", touch(200.0, 50.0, now));
        detector.touch_move("m1", touch(140.0, 50.0, now + Duration::from_millis(60)));
        let end = detector.touch_end("m1", touch(140.0, 50.0, now + Duration::from_millis(90)));
        assert_eq!(end, vec![Event::SwipeCommit]);

        let early = detector.tick(now + Duration::from_millis(1500));
        assert!(early.is_empty());
        let late = detector.tick(now + Duration::from_millis(2200));
        assert_eq!(late, vec![("m1".to_string(), Event::RevealExpired)]);
    }

    #[test]
    fn release_short_of_threshold_cancels() {
        let mut detector = Detector::default();
        let now = Instant::now();
        detector.touch_start("m1", touch(200.0, 50.0, now));
        detector.touch_move("m1", touch(170.0, 50.0, now + Duration::from_millis(60)));
        let end = detector.touch_end("m1", touch(170.0, 50.0, now + Duration::from_millis(90)));
        assert_eq!(end, vec![Event::SwipeCancel]);
    }
}
