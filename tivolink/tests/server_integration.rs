//! Integration tests for the HTTP front end.
//!
//! These tests drive the axum router end to end:
//! - TiVoConnect command dispatch (server info, root, formats, flush)
//! - Photo listings and resized fetches
//! - Video passthrough, transcoding and range rejection
//!
//! Run with: `cargo test --test server_integration`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use image::{ImageBuffer, Rgb};
use tempfile::TempDir;
use tower::ServiceExt;

use tivolink::config::{ConfigFile, DeviceProfile, ShareConfig, ShareKind};
use tivolink::server::{router, AppState};
use tivolink::transcode::{Compatibility, TranscodeError, Transcoder, VideoInfo};

// ============================================================================
// Helper Functions
// ============================================================================

/// Transcoder double: `.mpg` files pass through, everything else is
/// "encoded" to a fixed payload. Nothing is resumable.
struct FakeTranscoder;

impl Transcoder for FakeTranscoder {
    fn supported_format(&self, _path: &Path) -> bool {
        true
    }

    fn video_info(&self, _path: &Path) -> Result<VideoInfo, TranscodeError> {
        Ok(VideoInfo {
            container: "mpeg".to_string(),
            video_codec: Some("mpeg2video".to_string()),
            width: 720,
            height: 480,
            duration_ms: Some(30_000),
            ..VideoInfo::default()
        })
    }

    fn compatibility(&self, path: &Path, _device: &DeviceProfile, _mime: &str) -> Compatibility {
        if path.extension().is_some_and(|e| e == "mpg") {
            Compatibility::yes("TRANSCODE=NO, fake")
        } else {
            Compatibility::no("TRANSCODE=YES, fake")
        }
    }

    fn transcode(
        &self,
        _path: &Path,
        out: &mut dyn Write,
        _device: &DeviceProfile,
        _mime: &str,
        header: &[u8],
    ) -> Result<(), TranscodeError> {
        out.write_all(header)?;
        out.write_all(b"ENCODED")?;
        Ok(())
    }
}

struct TestServer {
    _dir: TempDir,
    photos: PathBuf,
    movies: PathBuf,
    app: Router,
}

impl TestServer {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        let movies = dir.path().join("movies");
        fs::create_dir_all(&photos).unwrap();
        fs::create_dir_all(&movies).unwrap();

        let config = ConfigFile::default()
            .with_share(ShareConfig::new("Photos", ShareKind::Photo, &photos))
            .with_share(ShareConfig::new("Movies", ShareKind::Video, &movies));
        let state = AppState::new(config, Arc::new(FakeTranscoder));
        Self {
            _dir: dir,
            photos,
            movies,
            app: router(Arc::new(state)),
        }
    }

    fn add_photo(&self, name: &str, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 80, 160]));
        img.save(self.photos.join(name)).unwrap();
    }

    fn add_movie(&self, name: &str, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(self.movies.join(name), &data).unwrap();
        data
    }

    async fn get(&self, uri: &str) -> Response {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn request(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

fn header_value(response: &Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ============================================================================
// Command Dispatch
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_query_server() {
    let server = TestServer::new();
    let response = server.get("/TiVoConnect?Command=QueryServer").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, header::CONTENT_TYPE).as_deref(),
        Some("text/xml")
    );
    assert!(body_text(response).await.contains("<TiVoServer>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_root_container_lists_shares() {
    let server = TestServer::new();
    for uri in [
        "/TiVoConnect?Command=QueryContainer",
        "/TiVoConnect?Command=QueryContainer&Container=%2F",
    ] {
        let response = server.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("<Title>Photos</Title>"));
        assert!(xml.contains("<Title>Movies</Title>"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_command_and_share_are_404() {
    let server = TestServer::new();
    let response = server.get("/TiVoConnect?Command=Explode").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .get("/TiVoConnect?Command=QueryContainer&Container=Music")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_formats_depends_on_device() {
    let server = TestServer::new();
    let uri = "/TiVoConnect?Command=QueryFormats&SourceFormat=video%2Fx-tivo-mpeg";

    let sd = server.get(uri).await;
    assert_eq!(sd.status(), StatusCode::OK);
    assert!(!body_text(sd).await.contains("video/x-tivo-mpeg-ts"));

    let request = Request::builder()
        .uri(uri)
        .header("tsn", "7460001902A1")
        .body(Body::empty())
        .unwrap();
    let premiere = server.request(request).await;
    assert!(body_text(premiere).await.contains("video/x-tivo-mpeg-ts"));

    let photos = server
        .get("/TiVoConnect?Command=QueryFormats&SourceFormat=image%2Fjpeg")
        .await;
    assert_eq!(photos.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_server_returns_empty_ok() {
    let server = TestServer::new();
    let response = server.get("/TiVoConnect?Command=FlushServer").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

// ============================================================================
// Photos
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_photo_listing_and_paging() {
    let server = TestServer::new();
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
        server.add_photo(name, 4, 4);
    }

    let response = server
        .get("/TiVoConnect?Command=QueryContainer&Container=Photos&ItemCount=2&AnchorItem=%2FPhotos%2Fb.jpg")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_text(response).await;
    assert!(xml.contains("<TotalItems>4</TotalItems>"));
    assert!(xml.contains("<ItemStart>2</ItemStart>"));
    assert!(xml.contains("<Title>c.jpg</Title>"));
    assert!(xml.contains("<Title>d.jpg</Title>"));
    assert!(!xml.contains("<Title>a.jpg</Title>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_photo_listing_rejects_fetch_parameters() {
    let server = TestServer::new();
    let response = server
        .get("/TiVoConnect?Command=QueryContainer&Container=Photos&Width=100")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_photo_fetch_is_resized() {
    let server = TestServer::new();
    server.add_photo("wide.jpg", 1000, 500);

    let response = server.get("/Photos/wide.jpg?Width=200").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, header::CONTENT_TYPE).as_deref(),
        Some("image/jpeg")
    );
    let length: usize = header_value(&response, header::CONTENT_LENGTH)
        .unwrap()
        .parse()
        .unwrap();
    let body = body_bytes(response).await;
    assert_eq!(body.len(), length);

    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_photo_fetch_other_format_is_415() {
    let server = TestServer::new();
    server.add_photo("a.jpg", 10, 10);
    let response = server.get("/Photos/a.jpg?Format=image%2Fpng").await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_outside_share_is_404() {
    let server = TestServer::new();
    server.add_photo("a.jpg", 10, 10);
    for uri in ["/Photos/../movies/x.mpg", "/Photos/%2E%2E/a.jpg", "/Photos/missing.jpg", "/Nowhere/a.jpg"] {
        let response = server.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_item_after_listing() {
    let server = TestServer::new();
    server.add_photo("a.jpg", 10, 10);
    server
        .get("/TiVoConnect?Command=QueryContainer&Container=Photos")
        .await;

    let response = server
        .get("/TiVoConnect?Command=QueryItem&Url=%2FPhotos%2Fa.jpg")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<TiVoItem>"));
}

// ============================================================================
// Videos
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_compatible_video_length_includes_header() {
    let server = TestServer::new();
    let data = server.add_movie("clip.mpg", 20_000);

    let response = server.get("/Movies/clip.mpg").await;
    assert_eq!(response.status(), StatusCode::OK);
    let length: usize = header_value(&response, header::CONTENT_LENGTH)
        .unwrap()
        .parse()
        .unwrap();
    assert!(header_value(&response, header::CONTENT_RANGE).is_some());

    let body = body_bytes(response).await;
    assert_eq!(body.len(), length);
    assert!(length > data.len());
    assert_eq!((length - data.len()) % 1024, 0);
    assert_eq!(&body[..4], b"TiVo");
    assert_eq!(&body[length - data.len()..], &data[..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_incompatible_video_is_transcoded_chunked() {
    let server = TestServer::new();
    server.add_movie("clip.mkv", 100);

    let response = server.get("/Movies/clip.mkv").await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert!(header_value(&response, header::CONTENT_LENGTH).is_none());
    let body = body_bytes(response).await;
    assert_eq!(&body[..4], b"TiVo");
    assert!(body.ends_with(b"ENCODED"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unresumable_range_is_416() {
    let server = TestServer::new();
    server.add_movie("clip.mkv", 100);

    let request = Request::builder()
        .uri("/Movies/clip.mkv")
        .header(header::RANGE, "bytes=5000-")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_video_listing_and_details() {
    let server = TestServer::new();
    server.add_movie("Pilot.mkv", 10);

    let response = server
        .get("/TiVoConnect?Command=QueryContainer&Container=Movies")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_text(response).await;
    assert!(xml.contains("<Title>Pilot</Title>"));
    assert!(xml.contains("Command=TVBusQuery"));

    let response = server
        .get("/TiVoConnect?Command=TVBusQuery&Container=Movies&File=%2FPilot.mkv")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let details = body_text(response).await;
    assert!(details.contains("<title>Pilot</title>"));
    assert!(details.contains("TvBusEnvelope"));
}
