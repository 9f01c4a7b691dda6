mod common;

use changemap::core::response::{ErrorKind, Outcome};
use changemap::io::export::ExportPayload;
use changemap::{ChangeDetector, FormFields, ServiceConfig, SessionDefaults};
use common::{init_logging, millis, s1_image, sentinel2_image, FakeComputeService};

fn region_fields() -> Vec<(String, String)> {
    [
        ("minLon", "8.444"),
        ("minLat", "49.985"),
        ("maxLon", "8.682"),
        ("maxLat", "50.078"),
        ("startdate", "2017-05-01"),
        ("enddate", "2017-11-01"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn s1_form() -> FormFields {
    let mut fields = region_fields();
    fields.push(("pass".to_string(), "ASCENDING".to_string()));
    fields.push(("polarization".to_string(), "VV,VH".to_string()));
    fields.into_iter().collect()
}

fn s1_service() -> FakeComputeService {
    FakeComputeService::new().with_images(
        "COPERNICUS/S1_GRD",
        vec![
            s1_image("S1A_20170601", millis(2017, 6, 1), 15),
            s1_image("S1A_20170613", millis(2017, 6, 13), 15),
            s1_image("S1A_20170625", millis(2017, 6, 25), 15),
        ],
    )
}

#[test]
fn test_sentinel1_series_stack_is_newest_first() {
    init_logging();

    let detector = ChangeDetector::new(s1_service(), ServiceConfig::default());
    let outcome = detector.handle_sentinel1(&s1_form(), &SessionDefaults::default());
    let report = match outcome {
        Outcome::Success { payload, .. } => payload,
        Outcome::Failure { message, .. } => panic!("Sentinel-1 failed: {}", message),
    };

    assert_eq!(report.title, "Sentinel-1 Intensity Image");
    assert_eq!(report.count, 3);
    assert_eq!(report.system_id, "S1A_20170601");
    assert_eq!(report.system_ids.len(), 3);
    assert_eq!(report.timestamp, "Thu Jun  1 00:00:00 2017");
    assert_eq!(report.projection.as_deref(), Some("EPSG:32632"));
    assert!(report.export.is_none());

    let downloads = detector.service().downloads.lock().expect("download log").clone();
    let (stack, scale, crs) = downloads.last().expect("download requested");
    assert_eq!(*scale, 10.0);
    assert_eq!(*crs, None);
    assert_eq!(
        stack.bands(),
        &[
            "VV_T20170625_3".to_string(),
            "VH_T20170625_3".to_string(),
            "VV_T20170613_2".to_string(),
            "VH_T20170613_2".to_string(),
            "VV_T20170601_1".to_string(),
            "VH_T20170601_1".to_string(),
        ]
    );
}

#[test]
fn test_sentinel1_maximum_intensity_with_export() {
    init_logging();

    let detector = ChangeDetector::new(s1_service(), ServiceConfig::default());
    let mut form = s1_form();
    form.insert("slanes", "slanes");
    form.insert("export", "export");
    form.insert("exportname", "lanes/frankfurt");
    form.insert("gdexportscale", "20");

    let outcome = detector.handle_sentinel1(&form, &SessionDefaults::default());
    let report = outcome.payload().expect("Sentinel-1 should succeed");

    assert_eq!(report.title, "Sentinel-1 Maximum Intensity Image");
    assert_eq!(report.export.as_ref().map(|j| j.id.as_str()), Some("TASK0001"));

    let exports = detector.service().submitted();
    assert_eq!(exports.len(), 1);
    match &exports[0].payload {
        ExportPayload::Image { bands, scale, expression } => {
            assert_eq!(bands, &vec!["VV".to_string(), "VH".to_string()]);
            assert_eq!(*scale, 20.0);
            let text = serde_json::to_string(expression).expect("expression serializes");
            assert!(text.contains("\"op\":\"max\""));
        }
        other => panic!("expected image payload, got {:?}", other),
    }
}

#[test]
fn test_sentinel1_without_matches_fails() {
    init_logging();

    let detector = ChangeDetector::new(FakeComputeService::new(), ServiceConfig::default());
    match detector.handle_sentinel1(&s1_form(), &SessionDefaults::default()) {
        Outcome::Failure { kind, message } => {
            assert_eq!(kind, ErrorKind::EmptySeries);
            assert_eq!(message, "Error in Sentinel1: No images found");
        }
        Outcome::Success { .. } => panic!("expected failure"),
    }
}

#[test]
fn test_sentinel2_picks_least_cloudy_scene() {
    init_logging();

    let service = FakeComputeService::new().with_images(
        "COPERNICUS/S2",
        vec![
            sentinel2_image("S2A_20170605", millis(2017, 6, 5), 23.0, 108),
            sentinel2_image("S2A_20170725", millis(2017, 7, 25), 0.7, 108),
            sentinel2_image("S2B_20170810", millis(2017, 8, 10), 5.2, 8),
        ],
    );
    let detector = ChangeDetector::new(service, ServiceConfig::default());
    let form: FormFields = region_fields().into_iter().collect();

    let outcome = detector.handle_sentinel2(&form, &SessionDefaults::default());
    let report = outcome.payload().expect("Sentinel-2 should succeed");

    assert_eq!(report.system_id, "S2A_20170725");
    assert_eq!(report.cloud_cover, Some(0.7));
    assert_eq!(report.count, 3);
    assert_eq!(report.sensing_orbits, vec![Some(108), Some(8), Some(108)]);

    let downloads = detector.service().downloads.lock().expect("download log").clone();
    assert_eq!(downloads.len(), 2);
    assert_eq!(downloads[0].1, 30.0);
    assert_eq!(
        downloads[1].0.bands(),
        &["B2".to_string(), "B3".to_string(), "B4".to_string(), "B8".to_string()]
    );
    // both downloads keep the scene's projection
    assert!(downloads.iter().all(|(_, _, crs)| crs.as_deref() == Some("EPSG:32632")));
}
