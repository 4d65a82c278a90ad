//! Photo shares.

use std::path::Path;
use std::time::Duration;

use super::{ContainerHandler, HandlerError, RequestContext};
use crate::cache::{MediaAttributes, MediaStore};
use crate::imaging::{ImageAdapter, PixelShape, RenderRequest};
use crate::query::{ListingRequest, QueryResolver, TypeFilter};
use crate::render;
use crate::transfer::{StreamHead, TransferSink};

/// Extensions listed in photo containers.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "ico", "jpeg", "jpg", "pbm", "pgm", "png", "pnm", "ppm", "tga", "tif", "tiff",
    "webp",
];

/// Parameters that only make sense on a photo fetch. A listing request
/// carrying any of them is malformed.
const FETCH_ONLY_PARAMS: &[&str] = &["Rotation", "Width", "Height", "PixelShape"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Lists photo folders and serves resized JPEGs.
#[derive(Debug, Default)]
pub struct PhotoHandler {
    resolver: QueryResolver,
    store: MediaStore,
    adapter: ImageAdapter,
}

impl PhotoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler whose renders fall back to `ffmpeg` for undecodable files.
    pub fn with_ffmpeg(ffmpeg: &Path, wait: Duration) -> Self {
        Self {
            adapter: ImageAdapter::new().with_ffmpeg(ffmpeg, wait),
            ..Self::default()
        }
    }

    pub fn resolver(&self) -> &QueryResolver {
        &self.resolver
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Rotation to apply for this fetch, updating the stored rotation
    /// when the client asks for a new one.
    fn rotation_for(&self, ctx: &RequestContext<'_>, path: &Path) -> i32 {
        let attrs = self.store.get(path);
        let stored = attrs.as_ref().map_or(0, |a| a.lock().rotation());
        let Some(requested) = ctx.query.get_i64("Rotation") else {
            return stored;
        };

        let rotation = (i64::from(stored) - requested).rem_euclid(360) as i32;
        if let Some(attrs) = attrs {
            attrs.lock().set_rotation(rotation);
        }
        rotation
    }
}

impl ContainerHandler for PhotoHandler {
    fn list_container(&self, ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        if let Some(param) = FETCH_ONLY_PARAMS.iter().find(|p| ctx.query.contains(p)) {
            return Err(HandlerError::NotFound(format!(
                "{} is not valid on a container listing",
                param
            )));
        }

        let location = ctx.location();
        let container = ctx.container();
        let dir = location
            .container_dir(container)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| HandlerError::NotFound(container.to_string()))?;

        let allow_recurse = ctx.share.allow_recurse.resolve(true);
        let request = ListingRequest::from_query(ctx.query, dir, &location, allow_recurse)
            .with_force_alpha(ctx.share.force_alpha)
            .with_filter(TypeFilter::from_query(ctx.query));
        let page = self.resolver.resolve(&request, &is_image_file)?;

        let items: Vec<MediaAttributes> = page
            .entries
            .iter()
            .map(|entry| self.store.attributes_for(entry, &ctx.share.path).lock().clone())
            .collect();

        tracing::debug!(
            container,
            total = page.total,
            start = page.start,
            count = items.len(),
            "Listed photo container"
        );
        Ok(render::photo_container(
            &ctx.share.name,
            container,
            page.total,
            page.start,
            &items,
        ))
    }

    fn send_file(
        &self,
        ctx: &RequestContext<'_>,
        path: &Path,
        sink: &mut dyn TransferSink,
    ) -> Result<(), HandlerError> {
        if let Some(format) = ctx.query.get("Format") {
            if format != "image/jpeg" {
                return Err(HandlerError::Unsupported(format.to_string()));
            }
        }

        let rotation = self.rotation_for(ctx, path);
        let dimension = |key: &str| {
            ctx.query
                .get_i64(key)
                .map_or(0, |v| v.clamp(0, i64::from(u32::MAX)) as u32)
        };
        let pixel_shape = ctx
            .query
            .get("PixelShape")
            .and_then(|s| s.parse::<PixelShape>().ok())
            .unwrap_or_default();
        let request = RenderRequest::new(dimension("Width"), dimension("Height"))
            .with_rotation(rotation)
            .with_pixel_shape(pixel_shape);

        let attrs = self.store.get(path);
        let jpeg = self
            .adapter
            .render(path, &request, attrs.as_ref())
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Could not render photo");
                HandlerError::from(e)
            })?;

        let written = sink
            .start(StreamHead::fixed("image/jpeg", jpeg.len() as u64))
            .and_then(|()| sink.write_all(&jpeg))
            .and_then(|()| sink.finish());
        if let Err(e) = written {
            tracing::info!(path = %path.display(), error = %e, "Photo transfer ended early");
        }
        Ok(())
    }

    fn query_item(&self, ctx: &RequestContext<'_>) -> Result<String, HandlerError> {
        let url = ctx.query.get("Url").unwrap_or_default();
        let path = ctx
            .location()
            .local_path_for(url)
            .ok_or_else(|| HandlerError::NotFound(url.to_string()))?;
        let attrs = self
            .store
            .get(&path)
            .ok_or_else(|| HandlerError::NotFound(path.display().to_string()))?;
        let item = attrs.lock().clone();
        Ok(render::photo_item(&ctx.share.name, &item))
    }
}
