use serde::{Deserialize, Serialize};

use crate::thumbnail::ThumbnailConfig;

pub const PERCENT_SCALE: f32 = 100.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("a selection can only be set while editing an artifact")]
    NotEditing,

    #[error("invalid selection rectangle: {reason}")]
    Invalid { reason: String },
}

/// Region of interest in percent of the displayed image (0-100 on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SelectionRect {
    /// Checked constructor for rectangles arriving from outside the tracker.
    ///
    /// Components must be finite and the size non-negative. Values past 100 are accepted
    /// unchanged; selections are never clamped.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self, SelectionError> {
        let components = [("x", x), ("y", y), ("width", width), ("height", height)];
        if let Some((name, _)) = components.iter().find(|(_, value)| !value.is_finite()) {
            return Err(SelectionError::Invalid {
                reason: format!("{name} must be a finite number"),
            });
        }
        if width < 0.0 || height < 0.0 {
            return Err(SelectionError::Invalid {
                reason: "width and height cannot be negative".to_owned(),
            });
        }

        Ok(Self::new_unchecked(x, y, width, height))
    }

    pub const fn new_unchecked(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by two corners in any drag direction.
    pub fn from_corners(a: NormalizedPoint, b: NormalizedPoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn zero_at(point: NormalizedPoint) -> Self {
        Self::new_unchecked(point.x, point.y, 0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

/// Raw pointer coordinates in the same space as [`ImageBounds`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    pub x: f32,
    pub y: f32,
}

impl PointerPosition {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// On-screen box of the rendered image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBounds {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl ImageBounds {
    /// `None` when the box has no area, which the tracker treats as "no image rendered".
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Option<Self> {
        let usable = [left, top, width, height].iter().all(|value| value.is_finite())
            && width > 0.0
            && height > 0.0;
        usable.then_some(Self {
            left,
            top,
            width,
            height,
        })
    }

    pub fn normalize(&self, pointer: PointerPosition) -> NormalizedPoint {
        NormalizedPoint {
            x: (pointer.x - self.left) / self.width * PERCENT_SCALE,
            y: (pointer.y - self.top) / self.height * PERCENT_SCALE,
        }
    }
}

/// Turns pointer down/move/up into a normalized [`SelectionRect`] on the config.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SelectionTracker {
    anchor: Option<NormalizedPoint>,
}

impl SelectionTracker {
    pub fn is_drawing(&self) -> bool {
        self.anchor.is_some()
    }

    /// Starts a drag and publishes a zero-size rectangle at the anchor. Ignored outside edit
    /// mode or when no image is rendered.
    pub fn pointer_down(
        &mut self,
        pointer: PointerPosition,
        bounds: Option<ImageBounds>,
        config: &mut ThumbnailConfig,
    ) -> bool {
        let (Some(bounds), Some(edit)) = (bounds, config.edit.as_mut()) else {
            return false;
        };

        let anchor = bounds.normalize(pointer);
        self.anchor = Some(anchor);
        edit.selection = Some(SelectionRect::zero_at(anchor));
        true
    }

    pub fn pointer_move(
        &mut self,
        pointer: PointerPosition,
        bounds: Option<ImageBounds>,
        config: &mut ThumbnailConfig,
    ) -> bool {
        let (Some(anchor), Some(bounds), Some(edit)) = (self.anchor, bounds, config.edit.as_mut())
        else {
            return false;
        };

        let current = bounds.normalize(pointer);
        edit.selection = Some(SelectionRect::from_corners(anchor, current));
        true
    }

    /// Ends the drag; the last published rectangle stays as the selection.
    pub fn pointer_up(&mut self) -> bool {
        self.anchor.take().is_some()
    }

    pub fn reset(&mut self) {
        self.anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editing_config() -> ThumbnailConfig {
        let mut config = ThumbnailConfig::default();
        config.enter_edit_mode();
        config
    }

    fn bounds() -> Option<ImageBounds> {
        ImageBounds::new(100.0, 50.0, 200.0, 100.0)
    }

    #[test]
    fn pointer_down_publishes_zero_rect_at_anchor() {
        let mut tracker = SelectionTracker::default();
        let mut config = editing_config();

        assert!(tracker.pointer_down(PointerPosition::new(150.0, 75.0), bounds(), &mut config));
        assert!(tracker.is_drawing());
        assert_eq!(
            config.selection(),
            Some(SelectionRect::new_unchecked(25.0, 25.0, 0.0, 0.0))
        );
    }

    #[test]
    fn pointer_down_is_ignored_outside_edit_mode_or_without_image() {
        let mut tracker = SelectionTracker::default();
        let mut config = ThumbnailConfig::default();
        assert!(!tracker.pointer_down(PointerPosition::new(150.0, 75.0), bounds(), &mut config));
        assert!(!tracker.is_drawing());
        assert_eq!(config.selection(), None);

        let mut config = editing_config();
        assert!(!tracker.pointer_down(PointerPosition::new(150.0, 75.0), None, &mut config));
        assert_eq!(config.selection(), None);
        assert_eq!(ImageBounds::new(0.0, 0.0, 0.0, 10.0), None);
    }

    #[test]
    fn drag_in_every_direction_keeps_origin_at_component_minimum() {
        let anchor = PointerPosition::new(200.0, 100.0);
        let targets = [
            (PointerPosition::new(260.0, 130.0), (50.0, 50.0, 30.0, 30.0)),
            (PointerPosition::new(140.0, 130.0), (20.0, 50.0, 30.0, 30.0)),
            (PointerPosition::new(260.0, 70.0), (50.0, 20.0, 30.0, 30.0)),
            (PointerPosition::new(140.0, 70.0), (20.0, 20.0, 30.0, 30.0)),
        ];

        for (target, (x, y, width, height)) in targets {
            let mut tracker = SelectionTracker::default();
            let mut config = editing_config();
            tracker.pointer_down(anchor, bounds(), &mut config);
            tracker.pointer_move(target, bounds(), &mut config);

            let rect = config.selection().expect("selection should be published");
            assert!((rect.x - x).abs() < 1e-4, "x for {target:?}");
            assert!((rect.y - y).abs() < 1e-4, "y for {target:?}");
            assert!((rect.width - width).abs() < 1e-4, "width for {target:?}");
            assert!((rect.height - height).abs() < 1e-4, "height for {target:?}");
        }
    }

    #[test]
    fn arbitrary_move_sequences_never_yield_negative_size() {
        let mut tracker = SelectionTracker::default();
        let mut config = editing_config();
        tracker.pointer_down(PointerPosition::new(180.0, 90.0), bounds(), &mut config);
        let anchor = bounds()
            .expect("bounds")
            .normalize(PointerPosition::new(180.0, 90.0));

        let mut seed: u32 = 7;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let px = (seed % 500) as f32 - 50.0;
            let py = ((seed / 500) % 300) as f32 - 50.0;
            let pointer = PointerPosition::new(px, py);
            tracker.pointer_move(pointer, bounds(), &mut config);

            let rect = config.selection().expect("selection should exist");
            let current = bounds().expect("bounds").normalize(pointer);
            assert!(rect.width >= 0.0 && rect.height >= 0.0);
            assert_eq!(rect.x, anchor.x.min(current.x));
            assert_eq!(rect.y, anchor.y.min(current.y));
        }
    }

    #[test]
    fn pointer_up_keeps_last_rect_and_stops_tracking() {
        let mut tracker = SelectionTracker::default();
        let mut config = editing_config();
        tracker.pointer_down(PointerPosition::new(120.0, 60.0), bounds(), &mut config);
        tracker.pointer_move(PointerPosition::new(180.0, 80.0), bounds(), &mut config);
        let published = config.selection();

        assert!(tracker.pointer_up());
        assert!(!tracker.pointer_move(PointerPosition::new(290.0, 140.0), bounds(), &mut config));
        assert_eq!(config.selection(), published);
        assert!(!tracker.pointer_up());
    }

    #[test]
    fn out_of_bounds_drag_is_not_clamped() {
        let mut tracker = SelectionTracker::default();
        let mut config = editing_config();
        tracker.pointer_down(PointerPosition::new(200.0, 100.0), bounds(), &mut config);
        tracker.pointer_move(PointerPosition::new(400.0, 200.0), bounds(), &mut config);

        let rect = config.selection().expect("selection should exist");
        assert_eq!(rect, SelectionRect::new_unchecked(50.0, 50.0, 100.0, 100.0));
        assert!(rect.x + rect.width > 100.0);

        tracker.pointer_move(PointerPosition::new(50.0, 0.0), bounds(), &mut config);
        let rect = config.selection().expect("selection should exist");
        assert_eq!(rect.x, -25.0);
        assert_eq!(rect.y, -50.0);
    }

    #[test]
    fn checked_constructor_rejects_negative_and_non_finite_components() {
        assert!(SelectionRect::new(10.0, 10.0, 30.0, 20.0).is_ok());
        assert!(SelectionRect::new(95.0, 95.0, 30.0, 20.0).is_ok());
        assert!(matches!(
            SelectionRect::new(0.0, 0.0, -1.0, 5.0),
            Err(SelectionError::Invalid { .. })
        ));
        assert!(matches!(
            SelectionRect::new(f32::NAN, 0.0, 1.0, 5.0),
            Err(SelectionError::Invalid { .. })
        ));
    }
}
