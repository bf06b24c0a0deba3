mod common;

use common::{blank_frame, inverted_qr_frame, png_bytes, qr_frame, session, two_cameras};
use orderscan::{AcquisitionEvent, AcquisitionState, Error, StillImageOutcome};

#[tokio::test]
async fn uploaded_photo_is_delivered_like_a_scan() {
    let (session, _sim, mut events) = session(two_cameras());
    let bytes = png_bytes(&qr_frame("https://ops.example.com/card/ABC-9#top"));

    let outcome = session.submit_image(bytes).await.unwrap();
    assert_eq!(
        outcome,
        StillImageOutcome::Decoded("https://ops.example.com/card/ABC-9#top".to_string())
    );

    match events.recv().await.unwrap() {
        AcquisitionEvent::Decoded(result) => assert_eq!(result.identifier, "ABC-9"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn photo_without_code_is_not_an_error() {
    let (session, _sim, mut events) = session(two_cameras());

    let outcome = session.submit_image(png_bytes(&blank_frame())).await.unwrap();
    assert_eq!(outcome, StillImageOutcome::NotFound);
    assert!(events.try_recv().is_err());
    assert_eq!(session.state(), AcquisitionState::Idle);
}

#[tokio::test]
async fn inverted_print_still_decodes() {
    let (session, _sim, _events) = session(two_cameras());

    let outcome = session
        .submit_image(png_bytes(&inverted_qr_frame("WO-5150")))
        .await
        .unwrap();
    assert_eq!(outcome.payload(), Some("WO-5150"));
}

#[tokio::test]
async fn unreadable_upload_is_an_image_error() {
    let (session, _sim, events) = session(two_cameras());

    let err = session
        .submit_image(b"definitely not a picture".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Image(_)));
    assert!(events.is_empty());
}

#[tokio::test]
async fn photo_from_disk_ends_camera_session() {
    let (session, sim, mut events) = session(two_cameras());
    session.start().await;
    assert_eq!(sim.live_streams(), 1);

    let path = std::env::temp_dir().join(format!("orderscan-still-{}.png", std::process::id()));
    std::fs::write(&path, png_bytes(&qr_frame("WO-31"))).unwrap();

    let outcome = session.submit_image_file(&path).await;
    let _ = std::fs::remove_file(&path);

    assert_eq!(outcome.unwrap().payload(), Some("WO-31"));
    assert_eq!(session.state(), AcquisitionState::Idle);
    assert_eq!(sim.live_streams(), 0);
    assert!(matches!(
        events.recv().await,
        Some(AcquisitionEvent::Decoded(ref r)) if r.identifier == "WO-31"
    ));
}

#[tokio::test]
async fn missing_file_is_reported() {
    let (session, _sim, _events) = session(two_cameras());
    let result = session
        .submit_image_file("/nonexistent/orderscan/photo.png")
        .await;
    assert!(result.is_err());
}
