use b2_image_uploader::{
    cdn::CdnUrlResolver,
    image::{ImageOptimizer, MockImageOptimizer},
    models::{B2Credentials, ImagePayload, UploadMethod},
    transport::{B2ApiUpload, MockUploadStrategy, UploadStrategy},
    PipelineServices, UploadPipeline,
};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use image::codecs::jpeg::JpegEncoder;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CDN_BASE_URL: &str = "https://media.example-cdn.net";

fn credentials() -> B2Credentials {
    B2Credentials {
        key_id: "key-id".to_string(),
        application_key: "app-key".to_string(),
    }
}

fn direct_api(server: &MockServer) -> B2ApiUpload {
    B2ApiUpload::new(
        credentials(),
        "bucket-123".to_string(),
        CdnUrlResolver::new(CDN_BASE_URL),
    )
    .with_api_url(server.uri())
}

async fn mount_handshake(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/b2api/v2/b2_authorize_account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "apiUrl": server.uri(),
            "authorizationToken": "account-token"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/b2api/v2/b2_get_upload_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": format!("{}/upload/bucket-123", server.uri()),
            "authorizationToken": "upload-token"
        })))
        .mount(server)
        .await;
}

async fn mount_b2_api(server: &MockServer, upload_status: u16) {
    mount_handshake(server).await;
    Mock::given(method("POST"))
        .and(path("/upload/bucket-123"))
        .respond_with(ResponseTemplate::new(upload_status))
        .mount(server)
        .await;
}

/// Gradient with sensor-like grain, so the JPEG lands above the 2 MiB mark.
fn jpeg_photo(width: u32, height: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(3);
    let mut grain = |base: u32| (base as i32 + rng.gen_range(-48..=48)).clamp(0, 255) as u8;
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            grain(x * 255 / width),
            grain(y * 255 / height),
            grain((x + y) % 256),
        ])
    }));
    let mut bytes = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_large_jpeg_end_to_end_via_direct_api() {
    let server = MockServer::start().await;
    mount_b2_api(&server, 200).await;

    let rclone = MockUploadStrategy::new(UploadMethod::Rclone);
    let sdk = MockUploadStrategy::new(UploadMethod::B2Sdk);
    let pipeline = UploadPipeline::with_services(
        PipelineServices {
            optimizer: Box::new(ImageOptimizer::new()),
            strategies: vec![
                Box::new(direct_api(&server)),
                Box::new(rclone.clone()),
                Box::new(sdk.clone()),
            ],
        },
        Duration::from_secs(120),
    );

    let original = jpeg_photo(4000, 3000);
    assert!(original.len() > 2 * 1024 * 1024);
    let outcome = pipeline
        .run(ImagePayload::new(
            original,
            "holiday.jpg".to_string(),
            "image/jpeg".to_string(),
        ))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.method, Some(UploadMethod::DirectB2Api));
    assert_eq!(outcome.filename.as_deref(), Some("holiday.webp"));
    assert_eq!(
        outcome.url.as_deref(),
        Some("https://media.example-cdn.net/holiday.webp")
    );
    assert_eq!(rclone.get_upload_count(), 0);
    assert_eq!(sdk.get_upload_count(), 0);

    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/upload/bucket-123")
        .unwrap();
    assert_eq!(upload.headers.get("content-type").unwrap(), "image/webp");
    let stored = image::load_from_memory(&upload.body).unwrap();
    assert_eq!(stored.dimensions(), (1920, 1440));
}

#[tokio::test]
async fn test_direct_api_outage_falls_back_in_order() {
    let server = MockServer::start().await;
    mount_b2_api(&server, 500).await;

    let rclone = MockUploadStrategy::new(UploadMethod::Rclone).with_failure("rclone not found");
    let sdk = MockUploadStrategy::new(UploadMethod::B2Sdk)
        .with_base_url(CDN_BASE_URL.to_string());
    let pipeline = UploadPipeline::with_services(
        PipelineServices {
            optimizer: Box::new(MockImageOptimizer::new()),
            strategies: vec![
                Box::new(direct_api(&server)),
                Box::new(rclone.clone()),
                Box::new(sdk.clone()),
            ],
        },
        Duration::from_secs(10),
    );

    let (outcome, attempts) = pipeline
        .run_with_attempts(ImagePayload::new(
            vec![1, 2, 3],
            "scan.png".to_string(),
            "image/png".to_string(),
        ))
        .await;

    assert_eq!(outcome.method, Some(UploadMethod::B2Sdk));
    assert_eq!(
        attempts.iter().map(|a| a.method).collect::<Vec<_>>(),
        vec![UploadMethod::DirectB2Api, UploadMethod::Rclone, UploadMethod::B2Sdk]
    );
    assert!(attempts[0].error.as_deref().unwrap().contains("500"));
    assert_eq!(rclone.get_upload_count(), 1);
    assert_eq!(sdk.get_upload_count(), 1);
}

#[tokio::test]
async fn test_exhaustion_outcome_serializes_as_failure() {
    let strategies: Vec<Box<dyn UploadStrategy>> = vec![
        Box::new(MockUploadStrategy::new(UploadMethod::DirectB2Api).with_failure("dns error")),
        Box::new(MockUploadStrategy::new(UploadMethod::Rclone).with_failure("exit 1")),
        Box::new(MockUploadStrategy::new(UploadMethod::B2Sdk).with_failure("AccessDenied")),
    ];
    let pipeline = UploadPipeline::with_services(
        PipelineServices {
            optimizer: Box::new(MockImageOptimizer::new()),
            strategies,
        },
        Duration::from_secs(5),
    );

    let outcome = pipeline
        .run(ImagePayload::new(
            vec![1],
            "a.jpg".to_string(),
            "image/jpeg".to_string(),
        ))
        .await;

    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        serde_json::json!({ "success": false, "error": "Generic error: AccessDenied" })
    );
}

#[tokio::test]
async fn test_direct_api_receives_optimized_content_type() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    Mock::given(method("POST"))
        .and(path("/upload/bucket-123"))
        .and(header("X-Bz-File-Name", "avatar.webp"))
        .and(header("Content-Type", "image/webp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .named("optimized upload")
        .mount(&server)
        .await;

    let pipeline = UploadPipeline::with_services(
        PipelineServices {
            optimizer: Box::new(MockImageOptimizer::new().with_transform(
                "webp",
                "image/webp",
                vec![0x52, 0x49, 0x46, 0x46],
            )),
            strategies: vec![Box::new(direct_api(&server))],
        },
        Duration::from_secs(10),
    );

    let outcome = pipeline
        .run(ImagePayload::new(
            vec![0x89, 0x50, 0x4E, 0x47],
            "avatar.png".to_string(),
            "image/png".to_string(),
        ))
        .await;

    assert_eq!(
        outcome.url.as_deref(),
        Some("https://media.example-cdn.net/avatar.webp")
    );
}

#[cfg(unix)]
mod rclone_fallback {
    use super::*;
    use pretty_assertions::assert_eq;
    use b2_image_uploader::transport::RcloneUpload;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn install_fake_rclone(dir: &Path) -> PathBuf {
        let store = dir.join("store");
        std::fs::create_dir_all(&store).unwrap();
        let binary = dir.join("rclone");
        let script = format!(
            concat!(
                "#!/bin/sh\n",
                "if [ \"$1\" = \"version\" ]; then exit 0; fi\n",
                "printf '%s\\n' \"$2\" >> \"{}\"\n",
                "cp \"$2\" \"{}/$(basename \"$3\")\"\n",
            ),
            dir.join("sources.log").display(),
            store.display()
        );
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        binary
    }

    #[tokio::test]
    async fn test_concurrent_invocations_are_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b2api/v2/b2_authorize_account"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let binary = install_fake_rclone(dir.path());

        let sdk = MockUploadStrategy::new(UploadMethod::B2Sdk);
        let pipeline = UploadPipeline::with_services(
            PipelineServices {
                optimizer: Box::new(MockImageOptimizer::new()),
                strategies: vec![
                    Box::new(direct_api(&server)),
                    Box::new(
                        RcloneUpload::new(
                            binary,
                            "b2".to_string(),
                            "social-feed".to_string(),
                            CdnUrlResolver::new(CDN_BASE_URL),
                        )
                        .with_temp_dir(&staging),
                    ),
                    Box::new(sdk.clone()),
                ],
            },
            Duration::from_secs(30),
        );

        let first = ImagePayload::new(
            b"first image".to_vec(),
            "first.webp".to_string(),
            "image/webp".to_string(),
        );
        let second = ImagePayload::new(
            b"second image".to_vec(),
            "second.webp".to_string(),
            "image/webp".to_string(),
        );
        let (a, b) = tokio::join!(pipeline.run(first), pipeline.run(second));

        assert_eq!(a.method, Some(UploadMethod::Rclone));
        assert_eq!(b.method, Some(UploadMethod::Rclone));
        assert_eq!(a.url.as_deref(), Some("https://media.example-cdn.net/first.webp"));
        assert_eq!(b.url.as_deref(), Some("https://media.example-cdn.net/second.webp"));
        assert_eq!(sdk.get_upload_count(), 0);

        let store = dir.path().join("store");
        assert_eq!(std::fs::read(store.join("first.webp")).unwrap(), b"first image");
        assert_eq!(std::fs::read(store.join("second.webp")).unwrap(), b"second image");

        let sources = std::fs::read_to_string(dir.path().join("sources.log")).unwrap();
        let sources: Vec<&str> = sources.lines().collect();
        assert_eq!(sources.len(), 2);
        assert_ne!(sources[0], sources[1]);
        assert!(sources.iter().all(|s| !Path::new(s).exists()));
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }
}
