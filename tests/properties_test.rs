use vigil_rs::counting::classify_crossing;
use vigil_rs::geometry::{point_in_polygon, segment_intersect};
use vigil_rs::reinfer::Submission;
use vigil_rs::{
    CorrelationKey, Crossing, LineCount, LineDirection, Observation, Point, RatioWindow, Rect,
    ReinferCorrelator, Segment,
};

fn p(x: f32, y: f32) -> Point {
    Point::new(x, y)
}

#[test]
fn test_ratio_window_evicts_oldest() {
    let mut window = RatioWindow::new(5, 0.6);
    let mut last = false;
    for (i, hit) in [true, true, true, false, false].into_iter().enumerate() {
        last = window.insert(Observation::new(i as f64, hit));
    }
    assert!(last);
    assert!(!window.insert(Observation::new(5.0, false)));
    assert!((window.ratio() - 0.4).abs() < 1e-6);
}

#[test]
fn test_ratio_window_without_length_passes_through() {
    let mut window = RatioWindow::new(0, 0.6);
    assert!(window.insert(Observation::new(0.0, true)));
    assert!(!window.insert(Observation::new(1.0, false)));
}

#[test]
fn test_point_in_square() {
    let square = [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)];
    assert!(point_in_polygon(p(5.0, 5.0), &square));
    assert!(!point_in_polygon(p(15.0, 5.0), &square));
    assert!(point_in_polygon(p(0.0, 5.0), &square));
}

#[test]
fn test_segments() {
    let a = Segment::new(p(0.0, 0.0), p(10.0, 10.0));
    let b = Segment::new(p(0.0, 10.0), p(10.0, 0.0));
    assert!(segment_intersect(&a, &b));

    let c = Segment::new(p(0.0, 0.0), p(10.0, 0.0));
    let d = Segment::new(p(0.0, 5.0), p(10.0, 5.0));
    assert!(!segment_intersect(&c, &d));
}

#[test]
fn test_rectangle_iou() {
    let a = Rect::new(0.0, 0.0, 10.0, 10.0);
    let b = Rect::new(5.0, 5.0, 15.0, 15.0);
    assert!((a.overlap_area(&b) - 25.0).abs() < 1e-6);
    assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-4);
}

#[test]
fn test_correlator_sweeps_only_stale_groups() {
    let timeout = 10.0;
    let mut correlator: ReinferCorrelator<(), u8> = ReinferCorrelator::new(timeout);
    let old = CorrelationKey::from_seconds(50.0);
    let current = CorrelationKey::from_seconds(100.0);
    correlator.open(old, 1, ()).unwrap();
    correlator.open(current, 3, ()).unwrap();

    assert!(matches!(correlator.submit_part(current, 1), Submission::Pending { .. }));
    assert!(matches!(correlator.submit_part(current, 2), Submission::Pending { .. }));
    assert_eq!(correlator.submit_part(current, 3), Submission::Complete);
    assert!(correlator.is_complete(current));

    let evicted = correlator.sweep(50.0 + timeout + 1.0);
    assert_eq!(evicted, vec![old]);
    assert!(correlator.contains(current));
    assert_eq!(correlator.submit_part(old, 1), Submission::Unknown);
}

#[test]
fn test_left_right_counts_merge() {
    let line = Segment::new(p(5.0, 0.0), p(5.0, 10.0));
    let direction: LineDirection = "l-r+".parse().unwrap();
    let forward = classify_crossing(p(2.0, 5.0), p(8.0, 5.0), &line, direction);
    let back = classify_crossing(p(8.0, 5.0), p(2.0, 5.0), &line, direction);
    assert_eq!(forward, Some(Crossing::Increase));
    assert_eq!(back, Some(Crossing::Decrease));

    let first = LineCount::from(Crossing::Increase);
    let second = LineCount::from(Crossing::Decrease);
    let mut ab = first;
    ab.merge(&second);
    let mut ba = second;
    ba.merge(&first);
    assert_eq!(ab, ba);
    assert_eq!((ab.increase, ab.decrease, ab.delta), (1, 1, 0));
}
