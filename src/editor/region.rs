//! Hit regions of a selected box.

use crate::schema::{BBox, Coord, Pixel};

/// Distance in pixels from an edge within which a press grabs that edge.
pub const EDGE_WIDTH: f64 = 15.0;

/// Part of a box grabbed by a pointer press.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Low,
    High,
    Neither,
}

fn nearest_side(value: f64, low: f64, high: f64) -> Side {
    let to_low = (value - low).abs();
    let to_high = (high - value).abs();
    match (to_low <= EDGE_WIDTH, to_high <= EDGE_WIDTH) {
        (true, true) if to_high < to_low => Side::High,
        (true, _) => Side::Low,
        (false, true) => Side::High,
        (false, false) => Side::Neither,
    }
}

impl Region {
    /// Classifies `point` (assumed inside `bbox`) by edge proximity.
    pub fn at(bbox: &BBox<Pixel>, point: &Coord<Pixel>) -> Self {
        let horizontal = nearest_side(point.x, bbox.xmin(), bbox.xmax());
        let vertical = nearest_side(point.y, bbox.ymin(), bbox.ymax());
        match (vertical, horizontal) {
            (Side::Low, Side::Low) => Region::TopLeft,
            (Side::Low, Side::High) => Region::TopRight,
            (Side::High, Side::Low) => Region::BottomLeft,
            (Side::High, Side::High) => Region::BottomRight,
            (Side::Low, Side::Neither) => Region::Top,
            (Side::High, Side::Neither) => Region::Bottom,
            (Side::Neither, Side::Low) => Region::Left,
            (Side::Neither, Side::High) => Region::Right,
            (Side::Neither, Side::Neither) => Region::Center,
        }
    }

    /// Moves the edges this region controls by `(dx, dy)`.
    ///
    /// The result may be inverted if an edge is dragged past its opposite;
    /// callers re-order it with [`BBox::from_corners`].
    pub fn drag(self, bbox: &BBox<Pixel>, dx: f64, dy: f64) -> BBox<Pixel> {
        let (mut xmin, mut ymin, mut xmax, mut ymax) =
            (bbox.xmin(), bbox.ymin(), bbox.xmax(), bbox.ymax());
        match self {
            Region::Center => return bbox.translate(dx, dy),
            Region::Top => ymin += dy,
            Region::Bottom => ymax += dy,
            Region::Left => xmin += dx,
            Region::Right => xmax += dx,
            Region::TopLeft => {
                xmin += dx;
                ymin += dy;
            }
            Region::TopRight => {
                xmax += dx;
                ymin += dy;
            }
            Region::BottomLeft => {
                xmin += dx;
                ymax += dy;
            }
            Region::BottomRight => {
                xmax += dx;
                ymax += dy;
            }
        }
        BBox::from_xyxy(xmin, ymin, xmax, ymax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BBox<Pixel> {
        BBox::from_xyxy(100.0, 100.0, 300.0, 200.0)
    }

    #[test]
    fn classifies_edges_and_corners() {
        let b = bbox();
        assert_eq!(Region::at(&b, &Coord::new(200.0, 150.0)), Region::Center);
        assert_eq!(Region::at(&b, &Coord::new(105.0, 150.0)), Region::Left);
        assert_eq!(Region::at(&b, &Coord::new(295.0, 150.0)), Region::Right);
        assert_eq!(Region::at(&b, &Coord::new(200.0, 110.0)), Region::Top);
        assert_eq!(Region::at(&b, &Coord::new(200.0, 199.0)), Region::Bottom);
        assert_eq!(Region::at(&b, &Coord::new(101.0, 101.0)), Region::TopLeft);
        assert_eq!(Region::at(&b, &Coord::new(299.0, 101.0)), Region::TopRight);
        assert_eq!(Region::at(&b, &Coord::new(101.0, 199.0)), Region::BottomLeft);
        assert_eq!(Region::at(&b, &Coord::new(299.0, 199.0)), Region::BottomRight);
    }

    #[test]
    fn thin_box_prefers_nearer_edge() {
        let b = BBox::from_xyxy(0.0, 0.0, 20.0, 100.0);
        assert_eq!(Region::at(&b, &Coord::new(4.0, 50.0)), Region::Left);
        assert_eq!(Region::at(&b, &Coord::new(16.0, 50.0)), Region::Right);
    }

    #[test]
    fn drag_moves_only_controlled_edges() {
        let b = bbox();
        assert_eq!(
            Region::BottomRight.drag(&b, 10.0, 5.0),
            BBox::from_xyxy(100.0, 100.0, 310.0, 205.0)
        );
        assert_eq!(
            Region::Top.drag(&b, 10.0, -5.0),
            BBox::from_xyxy(100.0, 95.0, 300.0, 200.0)
        );
        assert_eq!(
            Region::Center.drag(&b, 10.0, -5.0),
            BBox::from_xyxy(110.0, 95.0, 310.0, 195.0)
        );
    }
}
