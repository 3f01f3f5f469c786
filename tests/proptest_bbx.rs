use bboxee::schema::io_bbx::{from_bbx_str, read_bbx, to_bbx_string, write_bbx};
use bboxee::schema::{BBox, Pixel};
use proptest::prelude::*;

mod common;
mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn bbx_roundtrip_preserves_document(
        document in proptest_helpers::arb_document(4, 4)
    ) {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("cam.bbx");

        write_bbx(&path, &document).expect("write bbx");
        let restored = read_bbx(&path).expect("read bbx");

        let res = proptest_helpers::assert_documents_equivalent(
            &document,
            &restored,
            proptest_helpers::EPS_JSON,
        );
        prop_assert!(res.is_ok(), "{}", res.unwrap_err());
    }

    #[test]
    fn bbx_serialization_is_idempotent(
        document in proptest_helpers::arb_document(3, 3)
    ) {
        let first = to_bbx_string(&document).expect("serialize");
        let parsed = from_bbx_str(&first).expect("parse");
        let second = to_bbx_string(&parsed).expect("serialize again");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn pixel_conversion_inverts(
        bbox in proptest_helpers::arb_normalized_bbox(),
        width in 1u32..4000,
        height in 1u32..4000,
    ) {
        let (w, h) = (width as f64, height as f64);
        let pixels: BBox<Pixel> = bbox.to_pixel(w, h);
        let back = pixels.to_normalized(w, h);
        prop_assert!(common::approx(back.xmin(), bbox.xmin()));
        prop_assert!(common::approx(back.ymax(), bbox.ymax()));
        prop_assert!(back.is_valid());
    }

    #[test]
    fn iou_is_symmetric_and_bounded(
        a in proptest_helpers::arb_normalized_bbox(),
        b in proptest_helpers::arb_normalized_bbox(),
    ) {
        let ab = a.iou(&b);
        prop_assert!((ab - b.iou(&a)).abs() < 1e-12);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&ab));
        prop_assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn yolo_center_form_stays_in_unit_square(
        bbox in proptest_helpers::arb_normalized_bbox()
    ) {
        let (cx, cy, w, h) = bbox.to_cxcywh();
        prop_assert!(w > 0.0 && h > 0.0);
        prop_assert!(cx - w / 2.0 >= -1e-12 && cx + w / 2.0 <= 1.0 + 1e-12);
        prop_assert!(cy - h / 2.0 >= -1e-12 && cy + h / 2.0 <= 1.0 + 1e-12);
        let restored = BBox::<bboxee::schema::Normalized>::from_cxcywh(cx, cy, w, h);
        prop_assert!(restored.iou(&bbox) > 1.0 - 1e-9);
    }
}
