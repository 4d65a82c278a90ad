//! Video shares.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use super::{ContainerHandler, HandlerError, RequestContext};
use crate::config::{DeviceProfile, ServerSettings};
use crate::index::FileEntry;
use crate::query::{ListingRequest, Query, QueryResolver, TypeFilter};
use crate::render::{self, VideoContainer, VideoEntry, VideoFile, VideoFolder};
use crate::transcode::{
    has_video_extension, is_likely_transport_stream, is_tivo_file, Transcoder, MIME_TIVO_MPEG,
    MIME_TIVO_MPEG_TS,
};
use crate::transfer::TransferSink;
use crate::video::{StreamRequest, VideoDetails, VideoStreamNegotiator};

/// Listing order when the client does not ask for one.
const DEFAULT_SORT: &str = "!CaptureDate";

/// Bit in byte 7 of a `.tivo` header marking transport-stream content.
const TIVO_TS_FLAG: u8 = 0x20;

/// Lists video folders and streams recordings.
pub struct VideoHandler {
    resolver: QueryResolver,
    negotiator: VideoStreamNegotiator,
    settings: ServerSettings,
}

impl VideoHandler {
    pub fn new(transcoder: Arc<dyn Transcoder>, settings: ServerSettings) -> Self {
        Self {
            resolver: QueryResolver::default(),
            negotiator: VideoStreamNegotiator::new(transcoder, settings.clone()),
            settings,
        }
    }

    pub fn resolver(&self) -> &QueryResolver {
        &self.resolver
    }

    pub fn negotiator(&self) -> &VideoStreamNegotiator {
        &self.negotiator
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn folder_entry(&self, entry: &FileEntry, root: &Path) -> VideoFolder {
        // Unreadable sub-folders are still listed, just empty.
        let total_items = self
            .resolver
            .indexer()
            .load(&entry.path, false, &has_video_extension)
            .map(|list| list.lock().len())
            .unwrap_or(0);
        VideoFolder {
            name: entry.file_name(),
            part_path: part_path(&entry.path, root),
            modified: entry.modified_date,
            total_items,
        }
    }

    fn file_entry(
        &self,
        entry: &FileEntry,
        root: &Path,
        device: &DeviceProfile,
        full: bool,
    ) -> VideoFile {
        let transcoder = self.negotiator.transcoder();
        let full = full || transcoder.cached_video_info(&entry.path).is_some();
        let (details, valid) = if full {
            (
                self.negotiator.video_details(&entry.path, device),
                transcoder.supported_format(&entry.path),
            )
        } else {
            (VideoDetails::for_file(&entry.path, entry.modified_date), true)
        };

        VideoFile {
            part_path: part_path(&entry.path, root),
            mime: listing_mime(&entry.path, device),
            captured: entry.modified_date,
            valid,
            details: details.resolve(),
        }
    }
}

impl ContainerHandler for VideoHandler {
    fn list_container(&self, ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        let location = ctx.location();
        let container = ctx.container();
        let dir = location
            .container_dir(container)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| HandlerError::NotFound(container.to_string()))?;

        let query: Cow<'_, Query> = if ctx.query.contains("SortOrder") {
            Cow::Borrowed(ctx.query)
        } else {
            Cow::Owned(ctx.query.clone().with("SortOrder", DEFAULT_SORT))
        };
        let allow_recurse = ctx.share.recursion_allowed(ctx.device);
        let request = ListingRequest::from_query(&query, dir, &location, allow_recurse)
            .with_force_alpha(ctx.share.force_alpha)
            .with_filter(TypeFilter::for_media(ctx.query, "video"));
        let page = self.resolver.resolve(&request, &has_video_extension)?;

        // Probing every file of a large page is too slow; a lone file
        // gets full details.
        let single_file = page.entries.iter().filter(|e| !e.is_dir).count() == 1;
        let root = ctx.share.path.as_path();
        let entries = page
            .entries
            .iter()
            .map(|entry| {
                if entry.is_dir {
                    VideoEntry::Folder(self.folder_entry(entry, root))
                } else {
                    VideoEntry::File(self.file_entry(entry, root, ctx.device, single_file))
                }
            })
            .collect();

        tracing::debug!(
            container,
            client = ctx.client,
            total = page.total,
            start = page.start,
            "Listed video container"
        );
        Ok(render::video_container(&VideoContainer {
            share: &ctx.share.name,
            container,
            guid: ctx.guid,
            total: page.total,
            start: page.start,
            entries,
        }))
    }

    fn send_file(
        &self,
        ctx: &RequestContext<'_>,
        path: &Path,
        sink: &mut dyn TransferSink,
    ) -> Result<(), HandlerError> {
        let request = StreamRequest {
            path,
            device: ctx.device,
            mime: ctx.query.get("Format"),
            offset: ctx.range_offset,
            client: ctx.client,
        };
        self.negotiator.serve(&request, sink)?;
        Ok(())
    }

    fn tvbus_query(&self, ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        let file = ctx
            .query
            .get("File")
            .ok_or_else(|| HandlerError::NotFound("File parameter missing".to_string()))?;
        let url = format!("/{}/{}", ctx.share.name, file.trim_start_matches('/'));
        let path = ctx
            .location()
            .local_path_for(&url)
            .filter(|p| p.is_file())
            .ok_or_else(|| HandlerError::NotFound(file.to_string()))?;
        Ok(self.negotiator.details_xml(&path, ctx.device).to_string())
    }
}

/// Path below `root` with a leading slash, as used in protocol URLs.
fn part_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

/// Content type advertised for `path` in a listing.
///
/// Recordings carry their stream type in the header; other files go by
/// extension unless the device's `ts` setting forces a choice.
fn listing_mime(path: &Path, device: &DeviceProfile) -> &'static str {
    let ts = if is_tivo_file(path) {
        device.is_ts_capable() && tivo_header_is_ts(path)
    } else {
        device.prefers_transport_stream(is_likely_transport_stream(path))
    };
    if ts {
        MIME_TIVO_MPEG_TS
    } else {
        MIME_TIVO_MPEG
    }
}

fn tivo_header_is_ts(path: &Path) -> bool {
    let mut head = [0u8; 8];
    let read = File::open(path).and_then(|mut f| f.read_exact(&mut head));
    match read {
        Ok(()) => head[7] & TIVO_TS_FLAG != 0,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Could not read TiVo header");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShareConfig, ShareKind, Toggle};
    use crate::transcode::{Compatibility, TranscodeError, VideoInfo};
    use crate::transfer::RecordingSink;
    use std::fs;
    use std::io::Write;

    struct StubTranscoder;

    impl Transcoder for StubTranscoder {
        fn supported_format(&self, path: &Path) -> bool {
            !path.to_string_lossy().contains("broken")
        }

        fn video_info(&self, _path: &Path) -> Result<VideoInfo, TranscodeError> {
            Ok(VideoInfo {
                container: "matroska".to_string(),
                video_codec: Some("h264".to_string()),
                width: 1920,
                height: 1080,
                duration_ms: Some(90_000),
                ..VideoInfo::default()
            })
        }

        fn compatibility(&self, _: &Path, _: &DeviceProfile, _: &str) -> Compatibility {
            Compatibility::no("TRANSCODE=YES, stub")
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
            out.write_all(b"stub-stream")?;
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        share: ShareConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let share = ShareConfig::new("Movies", ShareKind::Video, dir.path());
            Self { dir, share }
        }

        fn touch(&self, relative: &str) {
            let path = self.dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"video").unwrap();
        }

        fn ctx<'a>(&'a self, query: &'a Query, device: &'a DeviceProfile) -> RequestContext<'a> {
            RequestContext {
                share: &self.share,
                device,
                query,
                guid: "123456",
                client: "test",
                range_offset: 0,
            }
        }
    }

    fn handler() -> VideoHandler {
        VideoHandler::new(Arc::new(StubTranscoder), ServerSettings::default())
    }

    #[test]
    fn test_part_path() {
        let root = Path::new("/srv/movies");
        assert_eq!(part_path(Path::new("/srv/movies/a/b.mkv"), root), "/a/b.mkv");
        assert_eq!(part_path(Path::new("/srv/movies/c.mpg"), root), "/c.mpg");
    }

    #[test]
    fn test_listing_counts_folder_items() {
        let fx = Fixture::new();
        fx.touch("one.mkv");
        fx.touch("two.mpg");
        fx.touch("readme.txt");
        fx.touch("Season 1/e1.mkv");
        fx.touch("Season 1/e2.mkv");
        fx.touch("Season 1/cover.jpg");

        let handler = handler();
        let device = DeviceProfile::for_tsn("2400000000");
        let query = Query::default().with("Container", "Movies").with("SortOrder", "Type");
        let xml = handler.list_container(&fx.ctx(&query, &device)).unwrap();

        assert!(xml.contains("<TotalItems>3</TotalItems>"));
        assert!(xml.contains("<Title>Season 1</Title>"));
        assert!(xml.contains("<TotalItems>2</TotalItems>"));
        assert!(xml.contains("<Title>one</Title>"));
        assert!(!xml.contains("readme"));
        assert!(xml.contains("<ContentType>video/x-tivo-mpeg</ContentType>"));
        assert!(xml.contains("Container=Movies/Season%201"));
    }

    #[test]
    fn test_listing_honours_filter() {
        let fx = Fixture::new();
        fx.touch("one.mkv");
        fx.touch("Season 1/e1.mkv");
        let handler = handler();
        let device = DeviceProfile::for_tsn("2400000000");
        let list = |filter: &str| {
            let query = Query::default()
                .with("Container", "Movies")
                .with("Filter", filter);
            handler.list_container(&fx.ctx(&query, &device)).unwrap()
        };

        let folders = list("x-tivo-container/folder");
        assert!(folders.contains("<Title>Season 1</Title>"));
        assert!(!folders.contains("<Title>one</Title>"));

        let videos = list("video/x-tivo-mpeg,video/*");
        assert!(!videos.contains("<Title>Season 1</Title>"));
        assert!(videos.contains("<Title>one</Title>"));

        let both = list("x-tivo-container/tivo-videos,x-tivo-container/folder,video/x-tivo-mpeg");
        assert!(both.contains("<Title>Season 1</Title>"));
        assert!(both.contains("<Title>one</Title>"));
    }

    #[test]
    fn test_single_file_gets_full_details() {
        let fx = Fixture::new();
        fx.touch("broken.mkv");
        let handler = handler();
        let device = DeviceProfile::for_tsn("7460001902A1");
        let query = Query::default().with("Container", "Movies");
        let xml = handler.list_container(&fx.ctx(&query, &device)).unwrap();

        assert!(xml.contains("<Duration>90000</Duration>"));
        assert!(xml.contains("<HighDefinition>Yes</HighDefinition>"));
        assert!(xml.contains("<CopyProtected>Yes</CopyProtected>"));
        assert!(xml.contains("<ContentType>video/x-tivo-mpeg-ts</ContentType>"));
    }

    #[test]
    fn test_many_files_get_basic_details() {
        let fx = Fixture::new();
        fx.touch("a.mkv");
        fx.touch("b.mkv");
        let handler = handler();
        let device = DeviceProfile::default();
        let query = Query::default().with("Container", "Movies");
        let xml = handler.list_container(&fx.ctx(&query, &device)).unwrap();

        assert!(!xml.contains("<Duration>"));
        assert!(!xml.contains("<CopyProtected>"));
    }

    #[test]
    fn test_recursion_depends_on_device() {
        let fx = Fixture::new();
        fx.touch("top.mkv");
        fx.touch("sub/deep.mkv");
        let handler = handler();
        let query = Query::default().with("Container", "Movies").with("Recurse", "Yes");

        let old = DeviceProfile::for_tsn("6520001");
        let xml = handler.list_container(&fx.ctx(&query, &old)).unwrap();
        assert!(xml.contains("<Title>deep</Title>"));

        let handler = self::handler();
        let new = DeviceProfile::for_tsn("7460001");
        let xml = handler.list_container(&fx.ctx(&query, &new)).unwrap();
        assert!(!xml.contains("<Title>deep</Title>"));
        assert!(xml.contains("<Title>sub</Title>"));
    }

    #[test]
    fn test_tivo_listing_mime_follows_header_flag() {
        let fx = Fixture::new();
        let mut header = b"TiVo\0\x04\0\0".to_vec();
        fs::write(fx.dir.path().join("ps.tivo"), &header).unwrap();
        header[7] = TIVO_TS_FLAG;
        fs::write(fx.dir.path().join("ts.tivo"), &header).unwrap();

        let device = DeviceProfile::for_tsn("7460001902A1");
        assert_eq!(listing_mime(&fx.dir.path().join("ps.tivo"), &device), MIME_TIVO_MPEG);
        assert_eq!(listing_mime(&fx.dir.path().join("ts.tivo"), &device), MIME_TIVO_MPEG_TS);

        let sd = DeviceProfile::for_tsn("2400000000");
        assert_eq!(listing_mime(&fx.dir.path().join("ts.tivo"), &sd), MIME_TIVO_MPEG);
    }

    #[test]
    fn test_listing_mime_follows_extension_on_auto() {
        let device = DeviceProfile::for_tsn("7460001");
        assert_eq!(listing_mime(Path::new("show.mkv"), &device), MIME_TIVO_MPEG_TS);
        assert_eq!(listing_mime(Path::new("show.MP4"), &device), MIME_TIVO_MPEG_TS);
        assert_eq!(listing_mime(Path::new("show.mpg"), &device), MIME_TIVO_MPEG);
        assert_eq!(listing_mime(Path::new("show.avi"), &device), MIME_TIVO_MPEG);

        let forced_on = device.clone().with_ts(Toggle::On);
        assert_eq!(listing_mime(Path::new("show.mpg"), &forced_on), MIME_TIVO_MPEG_TS);
        let forced_off = device.with_ts(Toggle::Off);
        assert_eq!(listing_mime(Path::new("show.mkv"), &forced_off), MIME_TIVO_MPEG);
    }

    #[test]
    fn test_send_file_transcodes() {
        let fx = Fixture::new();
        fx.touch("clip.mkv");
        let handler = handler();
        let device = DeviceProfile::default();
        let query = Query::default();
        let mut sink = RecordingSink::new();
        handler
            .send_file(&fx.ctx(&query, &device), &fx.dir.path().join("clip.mkv"), &mut sink)
            .unwrap();

        assert_eq!(sink.status(), Some(206));
        assert!(sink.body.starts_with(b"TiVo"));
        assert!(sink.body.ends_with(b"stub-stream"));
        assert!(sink.finished);
    }

    #[test]
    fn test_send_file_rejects_unresumable_range() {
        let fx = Fixture::new();
        fx.touch("clip.mkv");
        let handler = handler();
        let device = DeviceProfile::default();
        let query = Query::default();
        let mut ctx = fx.ctx(&query, &device);
        ctx.range_offset = 1000;
        let mut sink = RecordingSink::new();
        let err = handler
            .send_file(&ctx, &fx.dir.path().join("clip.mkv"), &mut sink)
            .unwrap_err();
        assert_eq!(err.status(), 416);
        assert!(sink.head.is_none());
    }

    #[test]
    fn test_tvbus_query() {
        let fx = Fixture::new();
        fx.touch("Shows/pilot.mkv");
        let handler = handler();
        let device = DeviceProfile::default();

        let query = Query::default()
            .with("Container", "Movies")
            .with("File", "/Shows/pilot.mkv");
        let xml = handler.tvbus_query(&fx.ctx(&query, &device)).unwrap();
        assert!(xml.contains("<title>pilot</title>"));
        assert!(xml.contains("<recordedDuration>P0DT0H1M30S</recordedDuration>"));

        let missing = Query::default().with("File", "/Shows/none.mkv");
        let err = handler.tvbus_query(&fx.ctx(&missing, &device)).unwrap_err();
        assert_eq!(err.status(), 404);

        let escape = Query::default().with("File", "/../etc/passwd");
        assert!(handler.tvbus_query(&fx.ctx(&escape, &device)).is_err());
    }
}
