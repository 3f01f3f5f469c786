//! Pointer and keyboard state machine for editing boxes on one image.
//!
//! The editor works in image pixels. It holds a copy of the current image's
//! boxes (refreshed with [`Editor::set_boxes`] after every change) and turns
//! raw input into [`EditEvent`]s. It never mutates annotation data itself;
//! the session applies the events and hands the new boxes back.
//!
//! Each input call performs at most one mode transition.

mod region;

pub use region::{Region, EDGE_WIDTH};

use crate::schema::{BBox, Coord, Pixel};

/// Smallest width or height, in pixels, of a box the editor will emit.
pub const MIN_BOX_SIZE: f64 = 3.0;

/// Zoom factor applied per wheel step toward the viewer.
pub const ZOOM_IN: f64 = 1.1;

/// Zoom factor applied per wheel step away from the viewer.
pub const ZOOM_OUT: f64 = 0.9;

/// Clicks needed to create a box in four-click mode.
const FOUR_CLICK_POINTS: usize = 4;

/// What the current pointer gesture is doing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    Idle,
    Move,
    Resize(Region),
    Create,
    Delete,
    Pan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
    };

    pub const SHIFT: Modifiers = Modifiers {
        shift: true,
        ctrl: false,
    };

    pub const CTRL: Modifiers = Modifiers {
        shift: false,
        ctrl: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    C,
}

/// A change requested by the editor, in image pixels.
#[derive(Clone, Debug, PartialEq)]
pub enum EditEvent {
    Created(BBox<Pixel>),
    Moved { row: usize, bbox: BBox<Pixel> },
    Resized { row: usize, bbox: BBox<Pixel> },
    Deleted(usize),
    Duplicated { row: usize, center: Coord<Pixel> },
    Selected(Option<usize>),
    Zoom(f64),
    Pan { dx: f64, dy: f64 },
}

#[derive(Debug)]
pub struct Editor {
    width: f64,
    height: f64,
    boxes: Vec<BBox<Pixel>>,
    mode: Mode,
    selected: Option<usize>,
    sticky: bool,
    visible: bool,
    zoom: f64,
    four_click: bool,
    clicks: Vec<Coord<Pixel>>,
    press: Coord<Pixel>,
    last: Coord<Pixel>,
    cursor: Coord<Pixel>,
    draft: Option<BBox<Pixel>>,
    dragged: bool,
    doomed: Option<usize>,
}

impl Editor {
    /// Creates an editor for an image of `width` x `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as f64,
            height: height as f64,
            boxes: Vec::new(),
            mode: Mode::Idle,
            selected: None,
            sticky: false,
            visible: true,
            zoom: 1.0,
            four_click: false,
            clicks: Vec::new(),
            press: Coord::default(),
            last: Coord::default(),
            cursor: Coord::default(),
            draft: None,
            dragged: false,
            doomed: None,
        }
    }

    /// Replaces the boxes shown, e.g. after the session applied an event.
    ///
    /// `selected` is kept as is when in range; pass the session's current
    /// row after a create so the new box is selected.
    pub fn set_boxes(&mut self, boxes: Vec<BBox<Pixel>>, selected: Option<usize>) {
        self.boxes = boxes;
        self.selected = selected.filter(|row| *row < self.boxes.len());
        if self.selected.is_none() {
            self.sticky = false;
        }
    }

    /// Switches to a new image; all gesture state is dropped.
    pub fn set_image(&mut self, width: u32, height: u32, boxes: Vec<BBox<Pixel>>) {
        *self = Self {
            zoom: self.zoom,
            visible: self.visible,
            four_click: self.four_click,
            ..Self::new(width, height)
        };
        self.boxes = boxes;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Hides or shows every overlay; annotation data is untouched.
    pub fn toggle_visibility(&mut self) {
        self.visible = !self.visible;
    }

    /// Enables the legacy mode where four clicks span a new box.
    pub fn set_four_click(&mut self, enabled: bool) {
        self.four_click = enabled;
        self.clicks.clear();
    }

    /// Boxes to draw, with the in-progress gesture applied. Empty while
    /// overlays are hidden.
    pub fn overlays(&self) -> Vec<BBox<Pixel>> {
        if !self.visible {
            return Vec::new();
        }
        let mut overlays = self.boxes.clone();
        match (self.mode, self.draft) {
            (Mode::Move | Mode::Resize(_), Some(draft)) => {
                if let Some(row) = self.selected {
                    overlays[row] = draft;
                }
            }
            (Mode::Create, Some(draft)) => overlays.push(draft),
            _ => {}
        }
        overlays
    }

    /// Index of the box under `point`; the nearest center wins among
    /// overlapping boxes, earlier rows on ties.
    pub fn box_at(&self, point: &Coord<Pixel>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (row, bbox) in self.boxes.iter().enumerate() {
            if !bbox.contains(point) {
                continue;
            }
            let distance = bbox.center().distance_to(point);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((row, distance));
            }
        }
        best.map(|(row, _)| row)
    }

    pub fn pointer_press(
        &mut self,
        point: Coord<Pixel>,
        button: Button,
        modifiers: Modifiers,
    ) -> Option<EditEvent> {
        self.cursor = point;
        if self.mode != Mode::Idle {
            return None;
        }
        self.press = point;
        self.last = point;
        self.dragged = false;

        match button {
            Button::Right => {
                self.mode = Mode::Pan;
                None
            }
            Button::Left if modifiers.shift => {
                self.mode = Mode::Pan;
                None
            }
            Button::Middle => {
                self.doomed = self.box_at(&point);
                self.mode = Mode::Delete;
                None
            }
            Button::Left => self.left_press(point),
        }
    }

    fn left_press(&mut self, point: Coord<Pixel>) -> Option<EditEvent> {
        if let Some(row) = self.selected {
            let bbox = self.boxes[row];
            if bbox.contains(&point) {
                let region = Region::at(&bbox, &point);
                self.mode = match region {
                    Region::Center => Mode::Move,
                    region => Mode::Resize(region),
                };
                self.draft = Some(bbox);
                return None;
            }
            // Pressing outside a sticky selection releases it.
            self.sticky = false;
            self.selected = None;
            return Some(EditEvent::Selected(None));
        }

        if self.four_click {
            return None;
        }
        self.mode = Mode::Create;
        self.draft = Some(BBox::from_corners(point, point));
        None
    }

    pub fn pointer_move(&mut self, point: Coord<Pixel>) -> Option<EditEvent> {
        self.cursor = point;
        let (dx, dy) = (point.x - self.last.x, point.y - self.last.y);
        self.last = point;
        if dx != 0.0 || dy != 0.0 {
            self.dragged = true;
        }

        match self.mode {
            Mode::Idle => self.hover(&point),
            Mode::Move | Mode::Resize(_) => {
                let region = match self.mode {
                    Mode::Resize(region) => region,
                    _ => Region::Center,
                };
                self.draft = self.draft.map(|draft| region.drag(&draft, dx, dy));
                None
            }
            Mode::Create => {
                self.draft = Some(BBox::from_corners(self.press, point));
                None
            }
            Mode::Pan => Some(EditEvent::Pan { dx, dy }),
            Mode::Delete => None,
        }
    }

    fn hover(&mut self, point: &Coord<Pixel>) -> Option<EditEvent> {
        if self.sticky {
            return None;
        }
        let hovered = self.box_at(point);
        if hovered == self.selected {
            return None;
        }
        self.selected = hovered;
        Some(EditEvent::Selected(hovered))
    }

    pub fn pointer_release(&mut self, point: Coord<Pixel>, button: Button) -> Option<EditEvent> {
        self.cursor = point;
        let mode = std::mem::replace(&mut self.mode, Mode::Idle);
        let draft = self.draft.take();

        match mode {
            Mode::Idle if button == Button::Left && self.four_click => self.four_click_release(point),
            Mode::Idle | Mode::Pan => None,
            Mode::Delete => {
                let doomed = self.doomed.take()?;
                if self.selected == Some(doomed) {
                    self.selected = None;
                    self.sticky = false;
                }
                Some(EditEvent::Deleted(doomed))
            }
            Mode::Move | Mode::Resize(_) => {
                let row = self.selected?;
                if !self.dragged {
                    self.sticky = !self.sticky;
                    return None;
                }
                let draft = draft?;
                let bbox = BBox::from_corners(draft.min, draft.max).clip(self.width, self.height);
                Some(match mode {
                    Mode::Move => EditEvent::Moved { row, bbox },
                    _ => EditEvent::Resized { row, bbox },
                })
            }
            Mode::Create => {
                let bbox = BBox::from_corners(self.press, point);
                if bbox.width() < MIN_BOX_SIZE || bbox.height() < MIN_BOX_SIZE {
                    self.sticky = false;
                    return None;
                }
                Some(EditEvent::Created(bbox.clip(self.width, self.height)))
            }
        }
    }

    fn four_click_release(&mut self, point: Coord<Pixel>) -> Option<EditEvent> {
        self.clicks.push(point);
        if self.clicks.len() < FOUR_CLICK_POINTS {
            return None;
        }
        let points = std::mem::take(&mut self.clicks);
        let bbox = BBox::enclosing(&points)?.clip(self.width, self.height);
        if bbox.width() < MIN_BOX_SIZE || bbox.height() < MIN_BOX_SIZE {
            return None;
        }
        Some(EditEvent::Created(bbox))
    }

    /// Arrow keys nudge the selected box by one pixel; with Shift they grow
    /// (right, down) or shrink (left, up) its far edge. Ctrl+C duplicates
    /// the selected box at the cursor.
    pub fn key_press(&mut self, key: Key, modifiers: Modifiers) -> Option<EditEvent> {
        if self.mode != Mode::Idle {
            return None;
        }
        let row = self.selected?;

        if key == Key::C {
            return modifiers.ctrl.then_some(EditEvent::Duplicated {
                row,
                center: self.cursor,
            });
        }

        let bbox = self.boxes[row];
        let (dx, dy) = match key {
            Key::Left => (-1.0, 0.0),
            Key::Right => (1.0, 0.0),
            Key::Up => (0.0, -1.0),
            Key::Down => (0.0, 1.0),
            Key::C => return None,
        };

        if modifiers.shift {
            let resized = Region::BottomRight.drag(&bbox, dx, dy).clip(self.width, self.height);
            if resized == bbox || resized.width() < MIN_BOX_SIZE || resized.height() < MIN_BOX_SIZE {
                return None;
            }
            self.boxes[row] = resized;
            return Some(EditEvent::Resized { row, bbox: resized });
        }

        // Keep the box inside the image without changing its size.
        let dx = dx.min(self.width - bbox.xmax()).max(-bbox.xmin());
        let dy = dy.min(self.height - bbox.ymax()).max(-bbox.ymin());
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let moved = bbox.translate(dx, dy);
        self.boxes[row] = moved;
        Some(EditEvent::Moved { row, bbox: moved })
    }

    /// Positive `delta` zooms in by [`ZOOM_IN`], negative out by [`ZOOM_OUT`].
    pub fn wheel(&mut self, delta: f64) -> Option<EditEvent> {
        let factor = if delta > 0.0 {
            ZOOM_IN
        } else if delta < 0.0 {
            ZOOM_OUT
        } else {
            return None;
        };
        self.zoom *= factor;
        Some(EditEvent::Zoom(factor))
    }
}
