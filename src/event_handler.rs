use std::time::Duration;

use crate::app_state::{AnnotationView, Notice, inflate, render_base};
use crate::canvas::{DisplayMetrics, Viewport};
use crate::config::GestureConfig;
use crate::drawing::Redraw;
use crate::math::{centroid, clamp, distance};
use crate::state::{PointerAction, PointerFrame, TrackingState};

/// Semantic gesture produced from raw pointer frames. Positions are in image
/// space; pan deltas are in screen space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    Start([f32; 2]),
    Draw {
        pos: [f32; 2],
        dx: f32,
        dy: f32,
        possibly_accidental: bool,
    },
    UnintendedDraw,
    Finish {
        pos: [f32; 2],
        max_fingers: usize,
    },
    LongPress([f32; 2]),
    Pan {
        dx: f32,
        dy: f32,
    },
    Zoom(f32),
}

#[derive(Debug, Clone)]
pub struct GestureRecognizer {
    config: GestureConfig,
    state: TrackingState,
    previous: [Option<[f32; 2]>; PointerFrame::MAX_POINTERS],
    down_point: [f32; 2],
    long_press_point: [f32; 2],
    long_press_deadline: Option<Duration>,
    move_count: u32,
    max_fingers: usize,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            state: TrackingState::Idle,
            previous: [None; PointerFrame::MAX_POINTERS],
            down_point: [0.0, 0.0],
            long_press_point: [0.0, 0.0],
            long_press_deadline: None,
            move_count: 0,
            max_fingers: 0,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn long_press_pending(&self) -> bool {
        self.long_press_deadline.is_some()
    }

    pub fn process(
        &mut self,
        frame: &PointerFrame,
        viewport: &Viewport,
        metrics: &DisplayMetrics,
    ) -> Vec<GestureEvent> {
        let current = self.clamp_pointers(frame, viewport);
        let count = current.len();
        let mut events = Vec::new();

        match frame.action {
            PointerAction::Down => {
                let Some(&first) = current.first() else {
                    return events;
                };
                self.move_count = 0;
                self.max_fingers = count.max(1);
                self.state = TrackingState::from_count(count);
                self.set_previous(&current);
                self.down_point = first;
                self.long_press_point = viewport.screen_to_image(first);
                self.long_press_deadline =
                    Some(frame.time + Duration::from_millis(self.config.long_press_ms));
                events.push(GestureEvent::Start(self.long_press_point));
            }
            PointerAction::PointerDown | PointerAction::PointerUp => {
                self.max_fingers = self.max_fingers.max(count);
                self.state = TrackingState::from_count(count);
                // Re-baseline so the next move does not see a jump.
                self.set_previous(&current);
            }
            PointerAction::Move => {
                self.move_count += 1;
                self.max_fingers = self.max_fingers.max(count);
                self.state = TrackingState::from_count(count);

                if count == 2 && self.previous[1].is_some() {
                    self.long_press_deadline = None;
                    if self.move_count < self.config.max_accidental_moves {
                        events.push(GestureEvent::UnintendedDraw);
                    }

                    let previous = self.previous_points();
                    let spread_change = distance(current[0], current[1])
                        - distance(previous[0], previous[1]);
                    if spread_change.abs() > metrics.dp_to_px(self.config.min_zoom_dp) {
                        events.push(GestureEvent::Zoom(spread_change));
                    }

                    let old_center = centroid(&previous);
                    let new_center = centroid(&current);
                    events.push(GestureEvent::Pan {
                        dx: old_center[0] - new_center[0],
                        dy: old_center[1] - new_center[1],
                    });
                } else if self.max_fingers == 1 && count == 1 {
                    let point = current[0];
                    let last = self.previous[0].unwrap_or(point);
                    if distance(point, last) > metrics.dp_to_px(self.config.min_draw_dp) {
                        let pos = viewport.screen_to_image(point);
                        let last_pos = viewport.screen_to_image(last);
                        events.push(GestureEvent::Draw {
                            pos,
                            dx: pos[0] - last_pos[0],
                            dy: pos[1] - last_pos[1],
                            possibly_accidental: self.move_count
                                < self.config.max_accidental_moves,
                        });
                    }
                    if distance(self.down_point, point)
                        > metrics.dp_to_px(self.config.long_press_cancel_dp)
                    {
                        self.long_press_deadline = None;
                    }
                }

                self.set_previous(&current);
            }
            PointerAction::Up => {
                self.long_press_deadline = None;
                let last = current
                    .first()
                    .copied()
                    .or(self.previous[0])
                    .unwrap_or(self.down_point);
                events.push(GestureEvent::Finish {
                    pos: viewport.screen_to_image(last),
                    max_fingers: self.max_fingers,
                });
                self.previous = [None; PointerFrame::MAX_POINTERS];
                self.state = TrackingState::Idle;
            }
        }

        if !events.is_empty() {
            log::trace!("{:?} -> {:?}", frame.action, events);
        }
        events
    }

    /// Fires the long-press timer if its deadline has passed.
    pub fn poll(&mut self, now: Duration) -> Option<GestureEvent> {
        match self.long_press_deadline {
            Some(deadline) if now >= deadline => {
                self.long_press_deadline = None;
                log::debug!("Long press at {:?}", self.long_press_point);
                Some(GestureEvent::LongPress(self.long_press_point))
            }
            _ => None,
        }
    }

    pub fn cancel_long_press(&mut self) {
        self.long_press_deadline = None;
    }

    fn clamp_pointers(&self, frame: &PointerFrame, viewport: &Viewport) -> Vec<[f32; 2]> {
        let [max_x, max_y] = viewport.display_size();
        frame
            .pointers
            .iter()
            .take(PointerFrame::MAX_POINTERS)
            .map(|p| {
                if viewport.has_display() {
                    [clamp(p[0], 0.0, max_x), clamp(p[1], 0.0, max_y)]
                } else {
                    *p
                }
            })
            .collect()
    }

    fn set_previous(&mut self, current: &[[f32; 2]]) {
        for (slot, previous) in self.previous.iter_mut().enumerate() {
            *previous = current.get(slot).copied();
        }
    }

    fn previous_points(&self) -> Vec<[f32; 2]> {
        self.previous.iter().flatten().copied().collect()
    }
}

impl AnnotationView {
    /// Entry point for every input frame. The topmost active layer gets it.
    pub fn handle_pointer_frame(&mut self, frame: &PointerFrame) -> Redraw {
        let Some(id) = self.input_layer() else {
            log::trace!("No active layer for {:?}", frame.action);
            return Redraw::None;
        };
        self.with_layer(id, |layer, ctx| layer.process_frame(frame, ctx))
            .unwrap_or_default()
    }

    /// Must be called whenever the visible area changes size.
    pub fn on_display_size_changed(&mut self, width: f32, height: f32) {
        let before = self.viewport.rect();
        self.viewport.set_display_size(width, height);
        log::info!("Display size {}x{}, view {:?}", width, height, self.viewport.rect());

        let base = render_base(&self.viewport, self.metrics, self.font.as_ref());
        inflate(&mut self.surfaces, &base);
        if self.viewport.rect() != before {
            self.notices.push(Notice::ViewportChanged);
        }
        self.notices.push(Notice::RedrawRequested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewportConfig;

    fn setup() -> (GestureRecognizer, Viewport, DisplayMetrics) {
        let mut viewport = Viewport::new(1000, 1000, ViewportConfig::default());
        viewport.set_display_size(1000.0, 1000.0);
        (
            GestureRecognizer::new(GestureConfig::default()),
            viewport,
            DisplayMetrics::new(1.0),
        )
    }

    fn frame(action: PointerAction, pointers: &[[f32; 2]], ms: u64) -> PointerFrame {
        PointerFrame::new(action, pointers, Duration::from_millis(ms))
    }

    #[test]
    fn test_draw_then_finish_without_long_press() {
        let (mut recognizer, viewport, metrics) = setup();
        let mut events = Vec::new();

        events.extend(recognizer.process(&frame(PointerAction::Down, &[[100.0, 100.0]], 0), &viewport, &metrics));
        events.extend(recognizer.process(&frame(PointerAction::Move, &[[100.0, 120.0]], 16), &viewport, &metrics));
        events.extend(recognizer.poll(Duration::from_millis(600)));
        events.extend(recognizer.process(&frame(PointerAction::Up, &[[100.0, 120.0]], 700), &viewport, &metrics));

        let draws: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, GestureEvent::Draw { .. }))
            .collect();
        assert_eq!(draws.len(), 1);
        if let GestureEvent::Draw { dx, dy, .. } = draws[0] {
            assert_eq!((*dx, *dy), (0.0, 20.0));
        }
        assert!(matches!(
            events.last(),
            Some(GestureEvent::Finish { max_fingers: 1, .. })
        ));
        assert!(!events.iter().any(|e| matches!(e, GestureEvent::LongPress(_))));
    }

    #[test]
    fn test_stationary_pointer_long_presses_once() {
        let (mut recognizer, viewport, metrics) = setup();
        let start = recognizer.process(&frame(PointerAction::Down, &[[250.0, 300.0]], 1000), &viewport, &metrics);
        assert_eq!(start, vec![GestureEvent::Start([250.0, 300.0])]);

        assert_eq!(recognizer.poll(Duration::from_millis(1499)), None);
        assert_eq!(
            recognizer.poll(Duration::from_millis(1500)),
            Some(GestureEvent::LongPress([250.0, 300.0]))
        );
        assert_eq!(recognizer.poll(Duration::from_millis(2000)), None);

        // Jitter below the draw threshold produces nothing.
        let jitter = recognizer.process(&frame(PointerAction::Move, &[[250.5, 300.5]], 2100), &viewport, &metrics);
        assert!(jitter.is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let (mut recognizer, viewport, metrics) = setup();
        recognizer.process(&frame(PointerAction::Down, &[[10.0, 10.0]], 0), &viewport, &metrics);
        let exactly = recognizer.process(&frame(PointerAction::Move, &[[11.0, 10.0]], 10), &viewport, &metrics);
        assert!(exactly.is_empty());
    }

    #[test]
    fn test_two_finger_pan_and_zoom() {
        let (mut recognizer, viewport, metrics) = setup();
        let mut events = Vec::new();
        events.extend(recognizer.process(&frame(PointerAction::Down, &[[100.0, 100.0]], 0), &viewport, &metrics));
        events.extend(recognizer.process(
            &frame(PointerAction::PointerDown, &[[100.0, 100.0], [200.0, 100.0]], 20),
            &viewport,
            &metrics,
        ));
        events.extend(recognizer.process(
            &frame(PointerAction::Move, &[[90.0, 100.0], [210.0, 100.0]], 40),
            &viewport,
            &metrics,
        ));
        events.extend(recognizer.process(
            &frame(PointerAction::Move, &[[80.0, 110.0], [220.0, 110.0]], 60),
            &viewport,
            &metrics,
        ));
        events.extend(recognizer.poll(Duration::from_millis(1000)));
        events.extend(recognizer.process(&frame(PointerAction::Up, &[[80.0, 110.0]], 1000), &viewport, &metrics));

        assert!(events.iter().any(|e| matches!(e, GestureEvent::Zoom(d) if *d > 0.0)));
        assert!(events.contains(&GestureEvent::Pan { dx: 0.0, dy: -10.0 }));
        assert!(events.contains(&GestureEvent::UnintendedDraw));
        assert!(!events.iter().any(|e| matches!(e, GestureEvent::Draw { .. } | GestureEvent::LongPress(_))));
        assert!(matches!(
            events.last(),
            Some(GestureEvent::Finish { max_fingers: 2, .. })
        ));
    }

    #[test]
    fn test_out_of_bounds_pointer_is_clamped() {
        let (mut recognizer, viewport, metrics) = setup();
        let events = recognizer.process(&frame(PointerAction::Down, &[[-40.0, 5000.0]], 0), &viewport, &metrics);
        assert_eq!(events, vec![GestureEvent::Start([0.0, 1000.0])]);
    }

    #[test]
    fn test_draw_positions_are_in_image_space() {
        let mut viewport = Viewport::new(2000, 2000, ViewportConfig::default());
        viewport.set_display_size(1000.0, 1000.0);
        let metrics = DisplayMetrics::new(1.0);
        let mut recognizer = GestureRecognizer::new(GestureConfig::default());

        recognizer.process(&frame(PointerAction::Down, &[[100.0, 100.0]], 0), &viewport, &metrics);
        let events = recognizer.process(&frame(PointerAction::Move, &[[110.0, 100.0]], 10), &viewport, &metrics);
        assert_eq!(
            events,
            vec![GestureEvent::Draw {
                pos: [220.0, 200.0],
                dx: 20.0,
                dy: 0.0,
                possibly_accidental: true,
            }]
        );
    }
}
