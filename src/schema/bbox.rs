//! Axis-aligned bounding boxes in XYXY form.

use serde::{Deserialize, Serialize};

use super::coord::Coord;
use super::{Normalized, Pixel};

/// An axis-aligned bounding box stored as its min and max corners.
///
/// The `TSpace` parameter is either [`Pixel`] or [`Normalized`]. The
/// constructor does NOT enforce `min < max`; callers that need a valid box
/// check [`BBox::is_ordered`] or build it through [`BBox::from_corners`].
#[derive(Clone, Copy, PartialEq)]
pub struct BBox<TSpace> {
    pub min: Coord<TSpace>,
    pub max: Coord<TSpace>,
}

impl<TSpace> BBox<TSpace> {
    /// Creates a new bounding box from min and max coordinates.
    #[inline]
    pub fn new(min: Coord<TSpace>, max: Coord<TSpace>) -> Self {
        Self { min, max }
    }

    /// Creates a new bounding box from explicit coordinates.
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            min: Coord::new(xmin, ymin),
            max: Coord::new(xmax, ymax),
        }
    }

    /// Builds the ordered box spanned by two arbitrary corner points.
    pub fn from_corners(a: Coord<TSpace>, b: Coord<TSpace>) -> Self {
        Self::from_xyxy(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    /// Builds the smallest box enclosing every point. Returns `None` for an
    /// empty input.
    pub fn enclosing(points: &[Coord<TSpace>]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::from_xyxy(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    /// Converts from XYWH format where (x, y) is the top-left corner.
    #[inline]
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::from_xyxy(x, y, x + width, y + height)
    }

    /// Converts from center/size format (the YOLO layout).
    #[inline]
    pub fn from_cxcywh(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Self::from_xyxy(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    #[inline]
    pub fn xmin(&self) -> f64 {
        self.min.x
    }

    #[inline]
    pub fn ymin(&self) -> f64 {
        self.min.y
    }

    #[inline]
    pub fn xmax(&self) -> f64 {
        self.max.x
    }

    #[inline]
    pub fn ymax(&self) -> f64 {
        self.max.y
    }

    /// May be negative if the box is malformed (xmax < xmin).
    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// May be negative if the box is malformed (ymax < ymin).
    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[inline]
    pub fn center(&self) -> Coord<TSpace> {
        Coord::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Converts to XYWH format (x, y, width, height).
    #[inline]
    pub fn to_xywh(&self) -> (f64, f64, f64, f64) {
        (self.xmin(), self.ymin(), self.width(), self.height())
    }

    /// Converts to center/size format (cx, cy, width, height).
    #[inline]
    pub fn to_cxcywh(&self) -> (f64, f64, f64, f64) {
        let center = self.center();
        (center.x, center.y, self.width(), self.height())
    }

    /// Returns true if all coordinates are finite (not NaN or infinite).
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Returns true if the box is properly ordered (min <= max for both axes).
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Inclusive point-in-box test.
    #[inline]
    pub fn contains(&self, point: &Coord<TSpace>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Returns the box shifted by `(dx, dy)`.
    #[inline]
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.min.offset(dx, dy), self.max.offset(dx, dy))
    }

    /// Intersects the box with `[0, width] x [0, height]`.
    pub fn clip(&self, width: f64, height: f64) -> Self {
        Self::from_xyxy(
            self.min.x.clamp(0.0, width),
            self.min.y.clamp(0.0, height),
            self.max.x.clamp(0.0, width),
            self.max.y.clamp(0.0, height),
        )
    }

    /// Area of the overlap with `other`; zero for disjoint boxes.
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = (self.max.x.min(other.max.x) - self.min.x.max(other.min.x)).max(0.0);
        let h = (self.max.y.min(other.max.y) - self.min.y.max(other.min.y)).max(0.0);
        w * h
    }

    /// Intersection over union in `[0, 1]`.
    ///
    /// Symmetric in its arguments; disjoint or degenerate boxes give 0.
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area().max(0.0) + other.area().max(0.0) - inter;
        if union <= 0.0 {
            0.0
        } else {
            (inter / union).clamp(0.0, 1.0)
        }
    }
}

impl<TSpace> std::fmt::Debug for BBox<TSpace> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBox")
            .field("xmin", &self.min.x)
            .field("xmax", &self.max.x)
            .field("ymin", &self.min.y)
            .field("ymax", &self.max.y)
            .finish()
    }
}

impl<TSpace> Default for BBox<TSpace> {
    fn default() -> Self {
        Self::from_xyxy(0.0, 0.0, 0.0, 0.0)
    }
}

// Custom serde implementation to avoid TSpace: Serialize/Deserialize bounds.
// Field order matches the on-disk document: xmin, xmax, ymin, ymax.
impl<TSpace> Serialize for BBox<TSpace> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BBox", 4)?;
        state.serialize_field("xmin", &self.min.x)?;
        state.serialize_field("xmax", &self.max.x)?;
        state.serialize_field("ymin", &self.min.y)?;
        state.serialize_field("ymax", &self.max.y)?;
        state.end()
    }
}

impl<'de, TSpace> Deserialize<'de> for BBox<TSpace> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct BBoxData {
            xmin: f64,
            xmax: f64,
            ymin: f64,
            ymax: f64,
        }
        let data = BBoxData::deserialize(deserializer)?;
        Ok(BBox::from_xyxy(data.xmin, data.ymin, data.xmax, data.ymax))
    }
}

impl BBox<Pixel> {
    /// Converts pixel coordinates to normalized coordinates.
    pub fn to_normalized(&self, image_width: f64, image_height: f64) -> BBox<Normalized> {
        BBox::from_xyxy(
            self.min.x / image_width,
            self.min.y / image_height,
            self.max.x / image_width,
            self.max.y / image_height,
        )
    }
}

impl BBox<Normalized> {
    /// Converts normalized coordinates to pixel coordinates.
    pub fn to_pixel(&self, image_width: f64, image_height: f64) -> BBox<Pixel> {
        BBox::from_xyxy(
            self.min.x * image_width,
            self.min.y * image_height,
            self.max.x * image_width,
            self.max.y * image_height,
        )
    }

    /// True when `0 <= xmin < xmax <= 1` and `0 <= ymin < ymax <= 1`.
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && 0.0 <= self.min.x
            && self.min.x < self.max.x
            && self.max.x <= 1.0
            && 0.0 <= self.min.y
            && self.min.y < self.max.y
            && self.max.y <= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_corners_orders_points() {
        let bbox: BBox<Pixel> = BBox::from_corners(Coord::new(50.0, 40.0), Coord::new(10.0, 10.0));
        assert_eq!(bbox.xmin(), 10.0);
        assert_eq!(bbox.ymin(), 10.0);
        assert_eq!(bbox.xmax(), 50.0);
        assert_eq!(bbox.ymax(), 40.0);
    }

    #[test]
    fn test_bbox_enclosing() {
        let points = [
            Coord::new(5.0, 9.0),
            Coord::new(1.0, 3.0),
            Coord::new(7.0, 2.0),
            Coord::new(4.0, 8.0),
        ];
        let bbox: BBox<Pixel> = BBox::enclosing(&points).expect("non-empty input");
        assert_eq!(bbox, BBox::from_xyxy(1.0, 2.0, 7.0, 9.0));
        assert!(BBox::<Pixel>::enclosing(&[]).is_none());
    }

    #[test]
    fn test_bbox_cxcywh_roundtrip() {
        let bbox: BBox<Normalized> = BBox::from_xyxy(0.1, 0.2, 0.5, 0.4);
        let (cx, cy, w, h) = bbox.to_cxcywh();
        let restored = BBox::<Normalized>::from_cxcywh(cx, cy, w, h);
        assert!((restored.xmin() - 0.1).abs() < 1e-12);
        assert!((restored.ymax() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_clip() {
        let bbox: BBox<Pixel> = BBox::from_xyxy(-5.0, 10.0, 120.0, 90.0);
        assert_eq!(bbox.clip(100.0, 80.0), BBox::from_xyxy(0.0, 10.0, 100.0, 80.0));
    }

    #[test]
    fn test_iou_identity_symmetry_and_disjoint() {
        let a: BBox<Normalized> = BBox::from_xyxy(0.0, 0.0, 0.5, 0.5);
        let b: BBox<Normalized> = BBox::from_xyxy(0.25, 0.25, 0.75, 0.75);
        let c: BBox<Normalized> = BBox::from_xyxy(0.6, 0.6, 1.0, 1.0);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), b.iou(&a));
        assert!((a.iou(&b) - 0.0625 / 0.4375).abs() < 1e-12);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_serialized_field_order() {
        let bbox: BBox<Normalized> = BBox::from_xyxy(0.1, 0.2, 0.3, 0.4);
        let json = serde_json::to_string(&bbox).expect("serialize");
        assert_eq!(json, r#"{"xmin":0.1,"xmax":0.3,"ymin":0.2,"ymax":0.4}"#);
    }

    #[test]
    fn test_is_valid_normalized() {
        assert!(BBox::<Normalized>::from_xyxy(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!BBox::<Normalized>::from_xyxy(0.5, 0.0, 0.5, 1.0).is_valid());
        assert!(!BBox::<Normalized>::from_xyxy(0.0, 0.0, 1.2, 1.0).is_valid());
    }
}
