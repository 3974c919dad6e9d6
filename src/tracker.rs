/// Converts a continuous scroll offset over a snapping list (one
/// viewport-height item per row) into the single discrete index that is
/// allowed to play. Owned by the feed view; nothing else writes it.
#[derive(Debug)]
pub struct Tracker {
    active: Option<usize>,
    len: usize,
    item_height: f64,
    deep_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<usize>,
    pub to: usize,
}

/// One-shot programmatic jump produced by a consumed deep link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    pub index: usize,
    pub offset: f64,
}

impl Tracker {
    pub fn new(item_height: f64) -> Self {
        Self {
            active: None,
            len: 0,
            item_height: item_height.max(1.0),
            deep_link: None,
        }
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn set_item_height(&mut self, item_height: f64) {
        self.item_height = item_height.max(1.0);
    }

    pub fn item_height(&self) -> f64 {
        self.item_height
    }

    /// Records the externally supplied navigation target. Consumed at most
    /// once by [`Tracker::take_deep_link`], then cleared for good.
    pub fn arm_deep_link(&mut self, video_id: impl Into<String>) {
        self.deep_link = Some(video_id.into());
    }

    /// Resolves the armed target against the loaded feed. Returns the
    /// non-animated jump exactly once; an unknown id simply clears the
    /// target.
    pub fn take_deep_link(&mut self, index_of: impl Fn(&str) -> Option<usize>) -> Option<Jump> {
        let target = self.deep_link.take()?;
        let index = index_of(&target)?;
        if index >= self.len {
            return None;
        }
        self.active = Some(index);
        Some(Jump {
            index,
            offset: index as f64 * self.item_height,
        })
    }

    /// Clamps the active index when the sequence shrinks or empties.
    /// Returns a transition when the clamp moved it.
    pub fn set_len(&mut self, len: usize) -> Option<Transition> {
        self.len = len;
        if len == 0 {
            self.active = None;
            return None;
        }
        match self.active {
            None => {
                self.active = Some(0);
                Some(Transition { from: None, to: 0 })
            }
            Some(current) if current >= len => {
                self.active = Some(len - 1);
                Some(Transition {
                    from: Some(current),
                    to: len - 1,
                })
            }
            Some(_) => None,
        }
    }

    /// One scroll sample. `round(offset / item_height)` clamped to bounds;
    /// rounding alone absorbs sub-pixel jitter. A fast multi-item fling
    /// passes through every intermediate index as its own transition.
    pub fn on_scroll(&mut self, offset: f64) -> Option<Transition> {
        if self.len == 0 {
            return None;
        }
        let candidate = (offset / self.item_height).round();
        let candidate = candidate.clamp(0.0, (self.len - 1) as f64) as usize;
        if Some(candidate) == self.active {
            return None;
        }
        let from = self.active;
        self.active = Some(candidate);
        Some(Transition {
            from,
            to: candidate,
        })
    }

    pub fn max_offset(&self) -> f64 {
        self.len.saturating_sub(1) as f64 * self.item_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(len: usize, height: f64) -> Tracker {
        let mut tracker = Tracker::new(height);
        tracker.set_len(len);
        tracker
    }

    #[test]
    fn rounds_offset_to_nearest_item() {
        let mut tracker = tracker(5, 40.0);
        assert_eq!(tracker.on_scroll(0.0), None); // already at 0
        assert_eq!(
            tracker.on_scroll(59.0),
            Some(Transition {
                from: Some(0),
                to: 1
            })
        );
        assert_eq!(tracker.on_scroll(61.0), None); // still rounds to 1
        assert_eq!(
            tracker.on_scroll(80.0),
            Some(Transition {
                from: Some(1),
                to: 2
            })
        );
    }

    #[test]
    fn active_matches_round_clamped_for_any_offset() {
        let heights = [24.0, 40.0, 53.0];
        for height in heights {
            let mut tracker = tracker(7, height);
            for step in -20..200 {
                let offset = step as f64 * height / 3.0;
                tracker.on_scroll(offset);
                let expected = (offset / height).round().clamp(0.0, 6.0) as usize;
                assert_eq!(tracker.active(), Some(expected), "offset {offset}");
            }
        }
    }

    #[test]
    fn two_screens_down_activates_index_two() {
        let mut tracker = tracker(3, 40.0);
        let transition = tracker.on_scroll(80.0).unwrap();
        assert_eq!(transition.to, 2);
        assert_eq!(tracker.active(), Some(2));
    }

    #[test]
    fn negative_and_overshoot_offsets_clamp() {
        let mut tracker = tracker(3, 40.0);
        assert_eq!(tracker.on_scroll(-35.0), None);
        assert_eq!(tracker.active(), Some(0));
        tracker.on_scroll(4000.0);
        assert_eq!(tracker.active(), Some(2));
    }

    #[test]
    fn empty_sequence_has_no_active_index() {
        let mut tracker = Tracker::new(40.0);
        assert_eq!(tracker.active(), None);
        assert_eq!(tracker.on_scroll(120.0), None);
        tracker.set_len(2);
        assert_eq!(tracker.active(), Some(0));
    }

    #[test]
    fn shrinking_feed_clamps_active() {
        let mut tracker = tracker(5, 40.0);
        tracker.on_scroll(160.0);
        assert_eq!(tracker.active(), Some(4));
        let transition = tracker.set_len(2).unwrap();
        assert_eq!(transition.to, 1);
        tracker.set_len(0);
        assert_eq!(tracker.active(), None);
    }

    #[test]
    fn deep_link_fires_exactly_once() {
        let mut tracker = tracker(4, 40.0);
        tracker.arm_deep_link("v2");
        let ids = ["v0", "v1", "v2", "v3"];
        let lookup = |id: &str| ids.iter().position(|candidate| *candidate == id);
        let jump = tracker.take_deep_link(lookup).unwrap();
        assert_eq!(jump.index, 2);
        assert_eq!(jump.offset, 80.0);
        assert_eq!(tracker.active(), Some(2));
        assert_eq!(tracker.take_deep_link(lookup), None);
    }

    #[test]
    fn unknown_deep_link_clears_without_jumping() {
        let mut tracker = tracker(2, 40.0);
        tracker.arm_deep_link("missing");
        assert_eq!(tracker.take_deep_link(|_| None), None);
        assert_eq!(tracker.take_deep_link(|_| Some(1)), None);
    }

    #[test]
    fn fling_passes_through_intermediate_indices() {
        let mut tracker = tracker(4, 40.0);
        let mut visited = vec![0];
        for offset in [40.0, 80.0, 120.0] {
            if let Some(transition) = tracker.on_scroll(offset) {
                visited.push(transition.to);
            }
        }
        assert_eq!(visited, vec![0, 1, 2, 3]);
    }
}
