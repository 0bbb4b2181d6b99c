// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the VA-API feature flag mini-language

use webcam_filters::PipelineError;
use webcam_filters::media::{VaapiFeatures, parse_feature_flags};

#[test]
fn test_all_enables_every_feature() {
    assert_eq!(parse_feature_flags("+all").unwrap(), VaapiFeatures::all());
}

#[test]
fn test_group_removal() {
    let features = parse_feature_flags("+all,-decode").unwrap();
    assert_eq!(features, VaapiFeatures::all() - VaapiFeatures::DECODE);
    assert_eq!(features, VaapiFeatures::CONVERT);
}

#[test]
fn test_tokens_apply_left_to_right() {
    assert_eq!(
        parse_feature_flags("-decode-jpeg,+decode-jpeg").unwrap(),
        VaapiFeatures::DECODE_JPEG
    );
    assert_eq!(
        parse_feature_flags("+decode-jpeg,-decode").unwrap(),
        VaapiFeatures::empty()
    );
}

#[test]
fn test_unknown_name_reports_position_and_name() {
    assert_eq!(
        parse_feature_flags("+foo"),
        Err(PipelineError::UnknownFeatureName {
            position: 1,
            name: "foo".to_string()
        })
    );
    assert_eq!(
        parse_feature_flags("+all,-bar"),
        Err(PipelineError::UnknownFeatureName {
            position: 2,
            name: "bar".to_string()
        })
    );
}

#[test]
fn test_missing_sign_is_malformed() {
    assert_eq!(
        parse_feature_flags("foo"),
        Err(PipelineError::MalformedFeatureFlag {
            position: 1,
            token: "foo".to_string()
        })
    );
}

#[test]
fn test_empty_input_is_rejected() {
    assert!(parse_feature_flags("").is_err());
}

#[test]
fn test_from_str_matches_parser() {
    let parsed: VaapiFeatures = "+decode,-decode-vp8".parse().unwrap();
    assert_eq!(parsed, VaapiFeatures::DECODE - VaapiFeatures::DECODE_VP8);
}

#[test]
fn test_media_type_selects_decode_bit() {
    assert_eq!(
        VaapiFeatures::decode_feature_for("image/jpeg"),
        Some(VaapiFeatures::DECODE_JPEG)
    );
    assert_eq!(
        VaapiFeatures::decode_feature_for("video/x-h264"),
        Some(VaapiFeatures::DECODE_H264)
    );
    assert_eq!(VaapiFeatures::decode_feature_for("video/x-raw"), None);
}
