use std::io::Cursor;
use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgba};
use image_resizer::transcode::{
    DirectorySink, ImageKind, LoadOutcome, LoadReport, Rejection, RenderOutcome, ResizeFilter,
    ResizerService, SourceFile, TranscodeConfig, TranscodeError,
};

fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, 128, 255])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode png");
    cursor.into_inner()
}

fn service(debounce_ms: u64) -> ResizerService {
    let _ = env_logger::builder().is_test(true).try_init();
    ResizerService::with_config(TranscodeConfig {
        debounce_ms,
        ..TranscodeConfig::default()
    })
    .expect("service init failed")
}

fn loaded(outcome: LoadOutcome) -> LoadReport {
    match outcome {
        LoadOutcome::Loaded(report) => report,
        LoadOutcome::Superseded { generation } => panic!("load {generation} was superseded"),
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("image-resizer-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test]
async fn png_round_trip_and_export() {
    let service = service(0);
    let session = service.open_session().expect("session");

    let report = loaded(
        session
            .load_file(SourceFile::new("holiday.png", "image/png", create_png_bytes(120, 80)))
            .await
            .expect("load should succeed"),
    );
    assert_eq!((report.natural.width, report.natural.height), (120, 80));

    let outcome = session.render_now().await.expect("render should succeed");
    let RenderOutcome::Installed { url, .. } = outcome else {
        panic!("render was not installed: {outcome:?}");
    };

    let (bytes, mime) = service
        .object_urls()
        .resolve(url.as_str())
        .expect("preview url should resolve");
    assert_eq!(mime, "image/png");
    let decoded = image::load_from_memory(&bytes).expect("preview decodes");
    assert_eq!(decoded.dimensions(), (120, 80));

    let dir = temp_dir("export");
    let receipt = session
        .export(&DirectorySink::new(&dir))
        .expect("export should succeed");
    assert_eq!(receipt.file_name, "holiday.png");
    assert_eq!(
        std::fs::read(dir.join("holiday.png")).expect("exported file"),
        bytes.to_vec()
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn export_without_preview_is_a_precondition_failure() {
    let service = service(0);
    let session = service.open_session().expect("session");
    let dir = temp_dir("nothing");

    let before = session.export(&DirectorySink::new(&dir));
    assert!(matches!(before, Err(TranscodeError::NothingToExport)));

    session
        .load_file(SourceFile::new("a.png", "image/png", create_png_bytes(10, 10)))
        .await
        .expect("load should succeed");
    let after_load = session.export(&DirectorySink::new(&dir));
    assert!(matches!(after_load, Err(TranscodeError::NothingToExport)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn format_switch_changes_export_extension() {
    let service = service(0);
    let session = service.open_session().expect("session");
    session
        .load_file(SourceFile::new("shot.png", "image/png", create_png_bytes(64, 64)))
        .await
        .expect("load should succeed");

    session.set_quality(60).expect("edit");
    let ticket = session.set_format(ImageKind::WebP).expect("edit");
    assert!(ticket.wait().await.expect("render").is_installed());

    let preview = session.preview().expect("preview installed");
    assert_eq!(preview.format(), ImageKind::WebP);
    assert_eq!(image::guess_format(preview.bytes()).expect("format"), ImageFormat::WebP);

    let dir = temp_dir("webp");
    let receipt = session.export(&DirectorySink::new(&dir)).expect("export");
    assert_eq!(receipt.file_name, "shot.webp");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn rapid_edits_install_only_the_last_request() {
    let service = service(30);
    let session = service.open_session().expect("session");
    session
        .load_file(SourceFile::new("p.png", "image/png", create_png_bytes(200, 100)))
        .await
        .expect("load should succeed");

    let mut tickets = Vec::new();
    for width in [10, 20, 40, 80, 160] {
        tickets.push(session.set_width(width).expect("edit"));
    }

    let mut installed = 0;
    for ticket in tickets {
        if ticket.wait().await.expect("cycle finishes").is_installed() {
            installed += 1;
        }
    }

    assert_eq!(installed, 1);
    let preview = session.preview().expect("preview installed");
    assert_eq!((preview.dimensions().width, preview.dimensions().height), (160, 80));
    assert_eq!(service.object_urls().live_count(), 1);
}

#[tokio::test]
async fn later_load_supersedes_earlier_one() {
    let service = service(0);
    let session = service.open_session().expect("session");

    let first = SourceFile::new("first.png", "image/png", create_png_bytes(300, 300));
    let second = SourceFile::new("second.png", "image/png", create_png_bytes(20, 10));

    let (a, b) = tokio::join!(session.load_file(first), session.load_file(second));

    assert!(matches!(a.expect("first load"), LoadOutcome::Superseded { .. }));
    let report = loaded(b.expect("second load"));
    assert_eq!(report.file_name, "second.png");
    assert_eq!(
        session.source().map(|s| s.natural()),
        Some(report.natural)
    );
}

#[tokio::test]
async fn teardown_revokes_every_preview_url() {
    let service = service(0);
    let first = service.open_session().expect("session");
    let second = service.open_session().expect("session");

    for session in [&first, &second] {
        session
            .load_file(SourceFile::new("a.png", "image/png", create_png_bytes(16, 16)))
            .await
            .expect("load should succeed");
        session.render_now().await.expect("render should succeed");
    }
    assert_eq!(service.object_urls().live_count(), 2);

    first.teardown();
    assert_eq!(service.object_urls().live_count(), 1);

    drop(second);
    assert_eq!(service.object_urls().live_count(), 0);
}

#[tokio::test]
async fn data_url_input_with_mismatched_declared_type() {
    let service = service(0);
    let session = service.open_session().expect("session");

    let data_url = format!(
        "data:image/jpeg;base64,{}",
        general_purpose::STANDARD.encode(create_png_bytes(12, 6))
    );
    let file = SourceFile::from_data_url("pasted.jpg", &data_url, 1024 * 1024).expect("data url");

    let report = loaded(session.load_file(file).await.expect("load should succeed"));

    assert_eq!(report.kind, ImageKind::Png);
    assert!(report.warnings.iter().any(|n| n.code == "W_DECLARED_TYPE_MISMATCH"));
}

#[tokio::test]
async fn oversized_file_is_rejected_before_decode() {
    let service = ResizerService::with_config(TranscodeConfig {
        max_file_size: 64,
        ..TranscodeConfig::default()
    })
    .expect("service init failed");
    let session = service.open_session().expect("session");

    let result = session
        .load_file(SourceFile::new("big.png", "image/png", create_png_bytes(64, 64)))
        .await;

    let err = result.expect_err("oversized file must be rejected");
    assert_eq!(err.rejection(), Some(Rejection::Oversized));
    assert!(session.source().is_none());
}

#[tokio::test]
async fn clamped_oversize_width_renders_at_the_planner_maximum() {
    // 1448x1448 RGBA 刚好不超过 8 MiB 预算
    let service = ResizerService::with_config(TranscodeConfig {
        debounce_ms: 0,
        ui_max_dimension: 1448,
        max_decoded_bytes: 8 * 1024 * 1024,
        resize_filter: ResizeFilter::Nearest,
        ..TranscodeConfig::default()
    })
    .expect("budget covers the largest planned surface");
    let session = service.open_session().expect("session");
    session
        .load_file(SourceFile::new("square.png", "image/png", create_png_bytes(100, 100)))
        .await
        .expect("load");

    let outcome = session
        .set_width(999_999)
        .expect("edit")
        .wait()
        .await
        .expect("planner maximum must render");

    let RenderOutcome::Installed { dimensions, .. } = outcome else {
        panic!("expected installed preview, got {outcome:?}");
    };
    assert_eq!((dimensions.width, dimensions.height), (1448, 1448));
}

#[test]
fn default_config_plans_within_the_render_budget() {
    let config = TranscodeConfig::default();
    let max = config.effective_max_dimension() as u64;

    assert!(max * max * 4 <= config.max_decoded_bytes);
}
