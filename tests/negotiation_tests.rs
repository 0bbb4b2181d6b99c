// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for capture format negotiation

use webcam_filters::PipelineError;
use webcam_filters::media::formats::{CapabilityDescriptor, FractionValue, IntValue};
use webcam_filters::media::negotiation::{distance, fixate};
use webcam_filters::media::{DesiredFormat, Framerate, select_best_format};

fn desired(width: u32, height: u32, fps: u32) -> DesiredFormat {
    DesiredFormat {
        width,
        height,
        framerate: Framerate::from_int(fps),
        media_type: None,
    }
}

fn jpeg(width: u32, height: u32, fps: u32) -> CapabilityDescriptor {
    CapabilityDescriptor::fixed("image/jpeg", width, height, Framerate::from_int(fps))
}

#[test]
fn test_exact_match_is_selected() {
    let caps = vec![jpeg(640, 480, 30), jpeg(1280, 720, 30), jpeg(1280, 720, 15)];
    let target = desired(1280, 720, 30);

    let best = select_best_format(&caps, &target).unwrap();
    assert_eq!((best.width, best.height), (1280, 720));
    assert_eq!(best.framerate, Framerate::from_int(30));

    let d = distance(&best, &target);
    assert_eq!((d.width, d.height), (0, 0));
    assert_eq!(d.framerate.as_f64(), 0.0);
}

#[test]
fn test_closer_width_beats_exact_framerate() {
    // 640x480@30: (640, 240, 0)   800x600@25: (480, 120, 5)
    let caps = vec![jpeg(640, 480, 30), jpeg(800, 600, 25)];
    let target = desired(1280, 720, 30);

    let d640 = distance(&fixate(&caps[0], &target).unwrap(), &target);
    let d800 = distance(&fixate(&caps[1], &target).unwrap(), &target);
    assert_eq!((d640.width, d640.height), (640, 240));
    assert_eq!((d800.width, d800.height), (480, 120));
    assert!(d800 < d640);

    let best = select_best_format(&caps, &target).unwrap();
    assert_eq!((best.width, best.height), (800, 600));
    assert_eq!(best.framerate, Framerate::from_int(25));
}

#[test]
fn test_selection_is_deterministic_and_minimal() {
    let caps = vec![
        jpeg(1920, 1080, 30),
        jpeg(1280, 720, 60),
        jpeg(1280, 720, 24),
        jpeg(640, 360, 30),
    ];
    let target = desired(1280, 720, 30);

    let first = select_best_format(&caps, &target).unwrap();
    for _ in 0..5 {
        assert_eq!(select_best_format(&caps, &target).unwrap(), first);
    }

    let chosen = distance(&first, &target);
    for cap in &caps {
        let other = distance(&fixate(cap, &target).unwrap(), &target);
        assert!(chosen <= other);
    }
    // |24 - 30| = 6 beats |60 - 30| = 30
    assert_eq!(first.framerate, Framerate::from_int(24));
}

#[test]
fn test_ties_keep_enumeration_order() {
    let caps = vec![
        jpeg(1280, 720, 30),
        CapabilityDescriptor::fixed("video/x-raw", 1280, 720, Framerate::from_int(30))
            .with_format("YUY2"),
    ];
    let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
    assert_eq!(best.media_type, "image/jpeg");
}

#[test]
fn test_media_type_filter_is_strict() {
    let caps = vec![
        jpeg(1280, 720, 30),
        CapabilityDescriptor::fixed("video/x-raw", 640, 480, Framerate::from_int(30))
            .with_format("YUY2"),
    ];
    let mut target = desired(1280, 720, 30);
    target.media_type = Some("video/x-raw".to_string());

    let best = select_best_format(&caps, &target).unwrap();
    assert_eq!(best.media_type, "video/x-raw");
    assert_eq!(best.format.as_deref(), Some("YUY2"));
    assert_eq!((best.width, best.height), (640, 480));
}

#[test]
fn test_no_matching_media_type() {
    let caps = vec![jpeg(1280, 720, 30)];
    let mut target = desired(1280, 720, 30);
    target.media_type = Some("video/x-h264".to_string());

    assert!(matches!(
        select_best_format(&caps, &target),
        Err(PipelineError::NoMatchingFormat(_))
    ));
}

#[test]
fn test_empty_capabilities() {
    assert!(matches!(
        select_best_format(&[], &DesiredFormat::default()),
        Err(PipelineError::NoMatchingFormat(_))
    ));
}

#[test]
fn test_framerate_list_is_fixated_to_nearest_member() {
    let caps = vec![CapabilityDescriptor {
        media_type: "image/jpeg".to_string(),
        format: None,
        width: IntValue::Fixed(1280),
        height: IntValue::Fixed(720),
        framerate: FractionValue::List(vec![
            Framerate::from_int(60),
            Framerate::from_int(25),
            Framerate::from_int(15),
        ]),
    }];
    let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
    assert_eq!(best.framerate, Framerate::from_int(25));
}

#[test]
fn test_fractional_framerates_compare_exactly() {
    // 30000/1001 is closer to 30/1 than 29/1
    let caps = vec![
        CapabilityDescriptor::fixed("image/jpeg", 1280, 720, Framerate::from_int(29)),
        CapabilityDescriptor::fixed("image/jpeg", 1280, 720, Framerate::new(30000, 1001)),
    ];
    let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
    assert_eq!(best.framerate, Framerate::new(30000, 1001));
}
