//! Property-based tests for the extent union.
//!
//! Project extents are generated as axis-aligned rectangles on an integer
//! grid, which keeps the boolean operations away from precision edge cases.

#[cfg(test)]
mod proptest_tests {
    use crate::phases::extent::{strip_interiors, union_all};
    use geo::{Area, BoundingRect, MultiPolygon, Rect};
    use proptest::prelude::*;

    const TOLERANCE: f64 = 1e-6;

    fn rectangle() -> impl Strategy<Value = MultiPolygon<f64>> {
        (0i32..20, 0i32..20, 1i32..6, 1i32..6).prop_map(|(x, y, w, h)| {
            let rect = Rect::new((x as f64, y as f64), ((x + w) as f64, (y + h) as f64));
            MultiPolygon::new(vec![rect.to_polygon()])
        })
    }

    fn extents_and_shuffle() -> impl Strategy<Value = (Vec<MultiPolygon<f64>>, Vec<MultiPolygon<f64>>)> {
        prop::collection::vec(rectangle(), 1..6)
            .prop_flat_map(|extents| (Just(extents.clone()), Just(extents).prop_shuffle()))
    }

    proptest! {
        /// Property: the union covers the same area whatever the input order
        #[test]
        fn union_area_is_order_independent((extents, shuffled) in extents_and_shuffle()) {
            let a = union_all(extents).unsigned_area();
            let b = union_all(shuffled).unsigned_area();
            prop_assert!((a - b).abs() < TOLERANCE, "{} != {}", a, b);
        }

        /// Property: the bounding rectangle does not depend on input order
        #[test]
        fn union_bounds_are_order_independent((extents, shuffled) in extents_and_shuffle()) {
            let a = union_all(extents).bounding_rect().unwrap();
            let b = union_all(shuffled).bounding_rect().unwrap();
            prop_assert!((a.min().x - b.min().x).abs() < TOLERANCE);
            prop_assert!((a.min().y - b.min().y).abs() < TOLERANCE);
            prop_assert!((a.max().x - b.max().x).abs() < TOLERANCE);
            prop_assert!((a.max().y - b.max().y).abs() < TOLERANCE);
        }

        /// Property: the union never covers less than its largest input or
        /// more than all inputs together
        #[test]
        fn union_area_is_bounded(extents in prop::collection::vec(rectangle(), 1..6)) {
            let largest = extents.iter().map(|e| e.unsigned_area()).fold(0.0, f64::max);
            let total: f64 = extents.iter().map(|e| e.unsigned_area()).sum();
            let union = union_all(extents).unsigned_area();
            prop_assert!(union + TOLERANCE >= largest);
            prop_assert!(union <= total + TOLERANCE);
        }

        /// Property: dropping holes never shrinks the covered area
        #[test]
        fn stripping_interiors_never_shrinks(extents in prop::collection::vec(rectangle(), 1..6)) {
            let union = union_all(extents);
            let before = union.unsigned_area();
            let stripped = strip_interiors(union);
            prop_assert!(stripped.unsigned_area() + TOLERANCE >= before);
            prop_assert!(stripped.0.iter().all(|p| p.interiors().is_empty()));
        }
    }

    #[test]
    fn single_input_is_unchanged() {
        let rect = Rect::new((1.0, 2.0), (4.0, 3.0));
        let union = union_all(vec![MultiPolygon::new(vec![rect.to_polygon()])]);
        assert_eq!(union.bounding_rect(), Some(rect));
        assert!((union.unsigned_area() - 3.0).abs() < TOLERANCE);
    }
}
