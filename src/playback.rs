use std::collections::HashMap;

use crate::gesture;

/// Fraction of the item width (from the right edge) where a sustained
/// hold boosts playback speed.
pub const SPEED_BAND: f32 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Normal,
    Double,
}

/// Instruction for the underlying media element. Controllers never talk
/// to the element directly; the view executes these against it and
/// reports the one recoverable failure back via
/// [`Controller::autoplay_rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    SeekToStart,
    SetRate(Rate),
    SetMuted(bool),
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Platform policy refused to start playback; recoverable, the
    /// controller falls back to paused-with-affordance.
    #[error("autoplay rejected")]
    AutoplayRejected,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes [`Command`]s against a concrete media surface. The inline
/// mpv session implements this; tests use a recording fake.
pub trait MediaElement {
    fn apply(&mut self, command: Command) -> Result<(), MediaError>;
}

/// Side effect a gesture asked for that is not the controller's to
/// perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Idempotent "ensure liked" plus the transient heart overlay. The
    /// heart plays regardless of whether the like flag actually flips.
    EnsureLiked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    Playing,
    Paused,
}

/// Per-item playback state machine. Ephemeral: created when the item is
/// mounted, destroyed when it scrolls out. Activation is entirely driven
/// from outside; the controller holds no opinion about whether it should
/// be the one playing.
#[derive(Debug)]
pub struct Controller {
    state: State,
    rate: Rate,
    muted: bool,
    awaiting_tap: bool,
}

impl Controller {
    pub fn new(muted: bool) -> Self {
        Self {
            state: State::Inactive,
            rate: Rate::Normal,
            muted,
            awaiting_tap: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != State::Inactive
    }

    pub fn is_playing(&self) -> bool {
        self.state == State::Playing
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// True after an autoplay rejection: render a play affordance and
    /// wait for a tap.
    pub fn awaiting_tap(&self) -> bool {
        self.awaiting_tap
    }

    /// Attempt autoplay on activation.
    pub fn activate(&mut self) -> Vec<Command> {
        if self.is_active() {
            return Vec::new();
        }
        self.state = State::Playing;
        self.rate = Rate::Normal;
        self.awaiting_tap = false;
        vec![Command::SetMuted(self.muted), Command::Play]
    }

    /// Deactivation is immediate and unconditional: pause, rewind, clear
    /// the speed boost.
    pub fn deactivate(&mut self) -> Vec<Command> {
        if !self.is_active() {
            return Vec::new();
        }
        self.state = State::Inactive;
        self.rate = Rate::Normal;
        self.awaiting_tap = false;
        vec![
            Command::Pause,
            Command::SeekToStart,
            Command::SetRate(Rate::Normal),
        ]
    }

    /// The view calls this when [`Command::Play`] failed with
    /// [`MediaError::AutoplayRejected`]. Not an error state: paused,
    /// showing a play affordance.
    pub fn autoplay_rejected(&mut self) {
        if self.state == State::Playing {
            self.state = State::Paused;
            self.awaiting_tap = true;
        }
    }

    pub fn tap(&mut self) -> Vec<Command> {
        match self.state {
            State::Inactive => Vec::new(),
            State::Playing => {
                self.state = State::Paused;
                vec![Command::Pause]
            }
            State::Paused => {
                self.state = State::Playing;
                self.awaiting_tap = false;
                vec![Command::Play]
            }
        }
    }

    /// Double tap never unlikes and never toggles playback.
    pub fn double_tap(&self) -> Option<Effect> {
        if self.is_active() {
            Some(Effect::EnsureLiked)
        } else {
            None
        }
    }

    /// A hold that started in the right band while playing boosts the
    /// rate for as long as it is sustained.
    pub fn hold_start(&mut self, x: f32, item_width: f32) -> Vec<Command> {
        if self.state != State::Playing || self.rate == Rate::Double {
            return Vec::new();
        }
        if item_width <= 0.0 || x < item_width * (1.0 - SPEED_BAND) {
            return Vec::new();
        }
        self.rate = Rate::Double;
        vec![Command::SetRate(Rate::Double)]
    }

    pub fn hold_end(&mut self) -> Vec<Command> {
        if self.rate != Rate::Double {
            return Vec::new();
        }
        self.rate = Rate::Normal;
        vec![Command::SetRate(Rate::Normal)]
    }

    pub fn handle_gesture(
        &mut self,
        event: &gesture::Event,
        item_width: f32,
    ) -> (Vec<Command>, Option<Effect>) {
        match event {
            gesture::Event::Tap { .. } => (self.tap(), None),
            gesture::Event::DoubleTap { .. } => (Vec::new(), self.double_tap()),
            gesture::Event::HoldStart { x, .. } => (self.hold_start(*x, item_width), None),
            gesture::Event::HoldEnd => (self.hold_end(), None),
            _ => (Vec::new(), None),
        }
    }
}

/// The mounted window of controllers. Guarantees at most one item is
/// active at any instant regardless of how the active index jumps
/// around.
#[derive(Default)]
pub struct Window {
    controllers: HashMap<String, Controller>,
    muted: bool,
}

impl Window {
    pub fn new(muted: bool) -> Self {
        Self {
            controllers: HashMap::new(),
            muted,
        }
    }

    pub fn controller(&mut self, video_id: &str) -> &mut Controller {
        let muted = self.muted;
        self.controllers
            .entry(video_id.to_string())
            .or_insert_with(|| Controller::new(muted))
    }

    pub fn get(&self, video_id: &str) -> Option<&Controller> {
        self.controllers.get(video_id)
    }

    /// Moves activation to `target`, deactivating everything else first.
    /// Returns per-item command batches in the order they must run
    /// (deactivations before the activation).
    pub fn set_active(&mut self, target: Option<&str>) -> Vec<(String, Vec<Command>)> {
        let mut batches = Vec::new();
        for (id, controller) in self.controllers.iter_mut() {
            if Some(id.as_str()) != target && controller.is_active() {
                batches.push((id.clone(), controller.deactivate()));
            }
        }
        if let Some(target) = target {
            let commands = self.controller(target).activate();
            if !commands.is_empty() {
                batches.push((target.to_string(), commands));
            }
        }
        batches
    }

    /// Mute applies window-wide, to items already mounted and items yet
    /// to be.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        for controller in self.controllers.values_mut() {
            controller.muted = muted;
        }
    }

    pub fn active_id(&self) -> Option<&str> {
        self.controllers
            .iter()
            .find(|(_, controller)| controller.is_active())
            .map(|(id, _)| id.as_str())
    }

    pub fn active_count(&self) -> usize {
        self.controllers
            .values()
            .filter(|controller| controller.is_active())
            .count()
    }

    /// Drops controllers for unmounted items; their playback state is
    /// never persisted.
    pub fn retain(&mut self, mounted: impl Fn(&str) -> bool) {
        self.controllers.retain(|id, _| mounted(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::Event as Gesture;

    #[derive(Default)]
    struct FakeElement {
        applied: Vec<Command>,
        reject_play: bool,
    }

    impl MediaElement for FakeElement {
        fn apply(&mut self, command: Command) -> Result<(), MediaError> {
            if command == Command::Play && self.reject_play {
                return Err(MediaError::AutoplayRejected);
            }
            self.applied.push(command);
            Ok(())
        }
    }

    fn run(controller: &mut Controller, element: &mut FakeElement, commands: Vec<Command>) {
        for command in commands {
            if let Err(MediaError::AutoplayRejected) = element.apply(command) {
                controller.autoplay_rejected();
            }
        }
    }

    #[test]
    fn activation_attempts_autoplay() {
        let mut controller = Controller::new(false);
        let mut element = FakeElement::default();
        let commands = controller.activate();
        run(&mut controller, &mut element, commands);
        assert!(controller.is_playing());
        assert_eq!(element.applied, vec![Command::SetMuted(false), Command::Play]);
    }

    #[test]
    fn autoplay_rejection_falls_back_to_paused_affordance() {
        let mut controller = Controller::new(false);
        let mut element = FakeElement {
            reject_play: true,
            ..FakeElement::default()
        };
        let commands = controller.activate();
        run(&mut controller, &mut element, commands);
        assert!(!controller.is_playing());
        assert!(controller.is_active());
        assert!(controller.awaiting_tap());

        // A tap recovers playback.
        element.reject_play = false;
        let commands = controller.tap();
        run(&mut controller, &mut element, commands);
        assert!(controller.is_playing());
        assert!(!controller.awaiting_tap());
    }

    #[test]
    fn deactivation_pauses_rewinds_and_clears_boost() {
        let mut controller = Controller::new(false);
        controller.activate();
        controller.hold_start(95.0, 100.0);
        let commands = controller.deactivate();
        assert_eq!(
            commands,
            vec![
                Command::Pause,
                Command::SeekToStart,
                Command::SetRate(Rate::Normal),
            ]
        );
        assert!(!controller.is_active());
        assert_eq!(controller.rate(), Rate::Normal);
    }

    #[test]
    fn tap_toggles_between_playing_and_paused() {
        let mut controller = Controller::new(false);
        controller.activate();
        assert_eq!(controller.tap(), vec![Command::Pause]);
        assert!(!controller.is_playing());
        assert_eq!(controller.tap(), vec![Command::Play]);
        assert!(controller.is_playing());
    }

    #[test]
    fn tap_on_inactive_item_does_nothing() {
        let mut controller = Controller::new(false);
        assert!(controller.tap().is_empty());
    }

    #[test]
    fn double_tap_requests_like_without_touching_playback() {
        let mut controller = Controller::new(false);
        controller.activate();
        let (commands, effect) =
            controller.handle_gesture(&Gesture::DoubleTap { x: 10.0, y: 10.0 }, 100.0);
        assert!(commands.is_empty());
        assert_eq!(effect, Some(Effect::EnsureLiked));
        assert!(controller.is_playing());
    }

    #[test]
    fn hold_in_right_band_boosts_while_held() {
        let mut controller = Controller::new(false);
        controller.activate();
        assert_eq!(
            controller.hold_start(75.0, 100.0),
            vec![Command::SetRate(Rate::Double)]
        );
        assert_eq!(controller.rate(), Rate::Double);
        assert_eq!(
            controller.hold_end(),
            vec![Command::SetRate(Rate::Normal)]
        );
        assert_eq!(controller.rate(), Rate::Normal);
    }

    #[test]
    fn hold_in_left_seventy_percent_never_boosts() {
        let mut controller = Controller::new(false);
        controller.activate();
        assert!(controller.hold_start(40.0, 100.0).is_empty());
        assert_eq!(controller.rate(), Rate::Normal);
        // No boost to undo either.
        assert!(controller.hold_end().is_empty());
    }

    #[test]
    fn hold_while_paused_does_not_boost() {
        let mut controller = Controller::new(false);
        controller.activate();
        controller.tap();
        assert!(controller.hold_start(95.0, 100.0).is_empty());
    }

    #[test]
    fn window_keeps_at_most_one_active() {
        let mut window = Window::new(false);
        let ids = ["a", "b", "c"];
        for id in ids {
            window.controller(id);
        }
        for target in ["a", "c", "b", "b", "a", "c", "a"] {
            window.set_active(Some(target));
            assert_eq!(window.active_count(), 1);
            assert_eq!(window.active_id(), Some(target));
        }
        window.set_active(None);
        assert_eq!(window.active_count(), 0);
    }

    #[test]
    fn window_transition_deactivates_previous_before_activating() {
        let mut window = Window::new(false);
        window.controller("a");
        window.controller("b");
        window.set_active(Some("a"));
        let batches = window.set_active(Some("b"));
        let ids: Vec<&str> = batches.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            batches[0].1,
            vec![
                Command::Pause,
                Command::SeekToStart,
                Command::SetRate(Rate::Normal),
            ]
        );
        assert!(batches[1].1.contains(&Command::Play));
    }

    #[test]
    fn scrolling_two_screens_deactivates_earlier_items() {
        // Feed of three; offset lands on index 2.
        let mut window = Window::new(false);
        for id in ["v0", "v1", "v2"] {
            window.controller(id);
        }
        window.set_active(Some("v0"));
        window.set_active(Some("v1"));
        window.set_active(Some("v2"));
        assert!(!window.get("v0").unwrap().is_active());
        assert!(!window.get("v1").unwrap().is_active());
        assert!(window.get("v2").unwrap().is_active());
    }

    #[test]
    fn window_mute_covers_mounted_and_future_controllers() {
        let mut window = Window::new(false);
        window.controller("a");
        window.set_muted(true);
        assert!(window.controller("a").is_muted());
        assert!(window.controller("b").is_muted());
        let batch = window.set_active(Some("b"));
        assert!(batch[0].1.contains(&Command::SetMuted(true)));
    }

    #[test]
    fn retain_drops_unmounted_controllers() {
        let mut window = Window::new(false);
        window.controller("a");
        window.controller("b");
        window.retain(|id| id == "a");
        assert!(window.get("b").is_none());
        assert!(window.get("a").is_some());
    }
}
