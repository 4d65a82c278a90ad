//! TiVoConnect XML documents.
//!
//! Each function renders one complete document. Text content is escaped
//! with `quick_xml`; URLs are percent-encoded with `/` left intact.

mod tvbus;

use std::time::{SystemTime, UNIX_EPOCH};

use quick_xml::escape::escape;
use sha2::{Digest, Sha256};

use crate::cache::MediaAttributes;
use crate::config::ShareConfig;
use crate::video::ResolvedDetails;

pub use tvbus::tvbus;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

/// Percent-encode a path for use in a URL, keeping `/` separators.
pub fn quote(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

/// Seconds since the epoch as `0x…` hex, the protocol's date format.
pub fn hex_time(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:#x}", secs)
}

/// Stable numeric id for `name` on the server identified by `guid`.
pub fn unique_id(guid: &str, name: &str) -> u32 {
    let digest = Sha256::new()
        .chain_update(guid.as_bytes())
        .chain_update(name.as_bytes())
        .finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// `QueryServer` response.
pub fn server_info() -> String {
    format!(
        "{XML_DECL}<TiVoServer>\n\
         <Version>1.6</Version>\n\
         <InternalName>TivoLink</InternalName>\n\
         <InternalVersion>{}</InternalVersion>\n\
         <Organization>TivoLink Contributors</Organization>\n\
         <Comment/>\n\
         </TiVoServer>",
        crate::VERSION
    )
}

/// `QueryFormats` response for video sources.
pub fn video_formats(transport_stream: bool) -> String {
    let mut out = format!("{XML_DECL}<TiVoFormats>\n");
    out.push_str("<Format><ContentType>video/x-tivo-mpeg</ContentType><Description/></Format>\n");
    if transport_stream {
        out.push_str(
            "<Format><ContentType>video/x-tivo-mpeg-ts</ContentType><Description/></Format>\n",
        );
    }
    out.push_str("</TiVoFormats>");
    out
}

/// Top-level container listing every share.
pub fn root_container(server_name: &str, shares: &[ShareConfig]) -> String {
    let mut out = format!(
        "{XML_DECL}<TiVoContainer>\n\
         <Details>\n\
         <Title>{}</Title>\n\
         <ContentType>x-container/tivo-server</ContentType>\n\
         <SourceFormat>x-container/folder</SourceFormat>\n\
         <TotalItems>{}</TotalItems>\n\
         </Details>\n",
        escape(server_name),
        shares.len()
    );
    for share in shares {
        let content_type = share.kind.content_type();
        out.push_str(&format!(
            "<Item>\n\
             <Details>\n\
             <Title>{title}</Title>\n\
             <ContentType>{content_type}</ContentType>\n\
             <SourceFormat>x-container/folder</SourceFormat>\n\
             </Details>\n\
             <Links>\n\
             <Content>\n\
             <Url>/TiVoConnect?Command=QueryContainer&amp;Container={url}</Url>\n\
             <ContentType>{content_type}</ContentType>\n\
             </Content>\n\
             </Links>\n\
             </Item>\n",
            title = escape(share.name.as_str()),
            url = quote(&share.name),
        ));
    }
    out.push_str(&format!(
        "<ItemStart>0</ItemStart>\n<ItemCount>{}</ItemCount>\n</TiVoContainer>",
        shares.len()
    ));
    out
}

/// One page of a photo container.
pub fn photo_container(
    share: &str,
    container: &str,
    total: usize,
    start: usize,
    items: &[MediaAttributes],
) -> String {
    let mut out = format!(
        "{XML_DECL}<TiVoContainer>\n\
         <Details>\n\
         <Title>{}</Title>\n\
         <ContentType>x-container/tivo-photos</ContentType>\n\
         <SourceFormat>x-container/folder</SourceFormat>\n\
         <TotalItems>{}</TotalItems>\n\
         </Details>\n",
        escape(container),
        total
    );
    for item in items {
        out.push_str(&photo_entry(share, item));
    }
    out.push_str(&format!(
        "<ItemStart>{}</ItemStart>\n<ItemCount>{}</ItemCount>\n</TiVoContainer>",
        start,
        items.len()
    ));
    out
}

/// `QueryItem` response for a single photo.
pub fn photo_item(share: &str, item: &MediaAttributes) -> String {
    format!("{XML_DECL}<TiVoItem>\n{}</TiVoItem>", photo_entry(share, item))
}

fn photo_entry(share: &str, item: &MediaAttributes) -> String {
    let title = escape(item.display_name.as_str());
    if item.is_dir {
        return format!(
            "<Item>\n\
             <Details>\n\
             <Title>{title}</Title>\n\
             <ContentType>x-container/folder</ContentType>\n\
             <SourceFormat>x-container/folder</SourceFormat>\n\
             <LastChangeDate>{mdate}</LastChangeDate>\n\
             </Details>\n\
             <Links>\n\
             <Content>\n\
             <Url>/TiVoConnect?Command=QueryContainer&amp;Container={url}</Url>\n\
             <ContentType>x-container/tivo-photos</ContentType>\n\
             </Content>\n\
             </Links>\n\
             </Item>\n",
            mdate = hex_time(item.modification_date),
            url = quote(&format!("{}{}", share, item.part_path)),
        );
    }
    format!(
        "<Item>\n\
         <Details>\n\
         <Title>{title}</Title>\n\
         <ContentType>image/jpeg</ContentType>\n\
         <SourceFormat>image/jpeg</SourceFormat>\n\
         <MediaKey>{key}</MediaKey>\n\
         <CaptureDate>{cdate}</CaptureDate>\n\
         <CreationDate>{created}</CreationDate>\n\
         <LastChangeDate>{mdate}</LastChangeDate>\n\
         </Details>\n\
         <Links>\n\
         <Content>\n\
         <Url>/{url}</Url>\n\
         <AcceptsParams>Yes</AcceptsParams>\n\
         </Content>\n\
         </Links>\n\
         </Item>\n",
        key = escape(item.part_path.as_str()),
        cdate = hex_time(item.capture_date()),
        created = hex_time(item.creation_date),
        mdate = hex_time(item.modification_date),
        url = quote(&format!("{}{}", share, item.part_path)),
    )
}

/// A folder shown in a video container.
#[derive(Debug, Clone)]
pub struct VideoFolder {
    pub name: String,
    /// Path below the share root with a leading slash.
    pub part_path: String,
    pub modified: SystemTime,
    pub total_items: usize,
}

/// A video file shown in a video container.
#[derive(Debug, Clone)]
pub struct VideoFile {
    pub part_path: String,
    pub mime: &'static str,
    /// Capture date shown to the client.
    pub captured: SystemTime,
    /// `false` marks the item copy-protected so the client skips it.
    pub valid: bool,
    pub details: ResolvedDetails,
}

#[derive(Debug, Clone)]
pub enum VideoEntry {
    Folder(VideoFolder),
    File(VideoFile),
}

/// One page of a video container.
#[derive(Debug, Clone)]
pub struct VideoContainer<'a> {
    pub share: &'a str,
    /// The `Container` parameter of the request.
    pub container: &'a str,
    pub guid: &'a str,
    pub total: usize,
    pub start: usize,
    pub entries: Vec<VideoEntry>,
}

/// Render a video container page.
pub fn video_container(view: &VideoContainer<'_>) -> String {
    let mut out = format!(
        "{XML_DECL}<TiVoContainer>\n\
         <ItemStart>{start}</ItemStart>\n\
         <ItemCount>{count}</ItemCount>\n\
         <Details>\n\
         <Title>{title}</Title>\n\
         <ContentType>x-tivo-container/tivo-videos</ContentType>\n\
         <SourceFormat>x-tivo-container/folder</SourceFormat>\n\
         <TotalItems>{total}</TotalItems>\n\
         <UniqueId>{id}</UniqueId>\n\
         </Details>\n",
        start = view.start,
        count = view.entries.len(),
        title = escape(view.container),
        total = view.total,
        id = unique_id(view.guid, view.container),
    );
    for entry in &view.entries {
        match entry {
            VideoEntry::Folder(folder) => out.push_str(&video_folder(view, folder)),
            VideoEntry::File(file) => out.push_str(&video_file(view, file)),
        }
    }
    out.push_str("</TiVoContainer>");
    out
}

fn video_folder(view: &VideoContainer<'_>, folder: &VideoFolder) -> String {
    let container = format!("{}{}", view.share, folder.part_path);
    format!(
        "<Item>\n\
         <Details>\n\
         <Title>{title}</Title>\n\
         <ContentType>x-tivo-container/folder</ContentType>\n\
         <SourceFormat>x-tivo-container/folder</SourceFormat>\n\
         <LastCaptureDate>{captured}</LastCaptureDate>\n\
         <TotalItems>{items}</TotalItems>\n\
         <UniqueId>{id}</UniqueId>\n\
         </Details>\n\
         <Links>\n\
         <Content>\n\
         <Url>/TiVoConnect?Command=QueryContainer&amp;Container={url}</Url>\n\
         <ContentType>x-tivo-container/tivo-videos</ContentType>\n\
         </Content>\n\
         </Links>\n\
         </Item>\n",
        title = escape(folder.name.as_str()),
        captured = hex_time(folder.modified),
        items = folder.total_items,
        id = unique_id(view.guid, &container),
        url = quote(&container),
    )
}

fn video_file(view: &VideoContainer<'_>, file: &VideoFile) -> String {
    let d = &file.details;
    let mut details = format!(
        "<Title>{}</Title>\n<ContentType>{}</ContentType>\n<SourceFormat>{}</SourceFormat>\n",
        escape(d.title.as_str()),
        file.mime,
        file.mime
    );
    if !file.valid {
        details.push_str("<CopyProtected>Yes</CopyProtected>\n");
    }
    for (tag, value) in [
        ("SourceSize", &d.size),
        ("Duration", &d.duration_ms),
        ("Description", &d.description),
        ("SourceChannel", &d.display_major_number),
        ("SourceStation", &d.call_sign),
        ("SeriesId", &d.series_id),
        ("EpisodeTitle", &d.episode_title),
    ] {
        if !value.is_empty() {
            details.push_str(&format!("<{tag}>{}</{tag}>\n", escape(value.as_str())));
        }
    }
    if d.showing_bits & 4096 != 0 {
        details.push_str("<HighDefinition>Yes</HighDefinition>\n");
    }
    details.push_str(&format!(
        "<CaptureDate>{}</CaptureDate>\n<UniqueId>{}</UniqueId>\n",
        hex_time(file.captured),
        unique_id(view.guid, &file.part_path)
    ));

    format!(
        "<Item>\n\
         <Details>\n{details}</Details>\n\
         <Links>\n\
         <Content>\n\
         <ContentType>{mime}</ContentType>\n\
         <Url>/{url}</Url>\n\
         </Content>\n\
         <CustomIcon>\n\
         <ContentType>image/*</ContentType>\n\
         <AcceptsParams>No</AcceptsParams>\n\
         <Url>urn:tivo:image:save-until-i-delete-recording</Url>\n\
         </CustomIcon>\n\
         <TiVoVideoDetails>\n\
         <ContentType>text/xml</ContentType>\n\
         <AcceptsParams>No</AcceptsParams>\n\
         <Url>/TiVoConnect?Command=TVBusQuery&amp;Container={share}&amp;File={file}</Url>\n\
         </TiVoVideoDetails>\n\
         </Links>\n\
         </Item>\n",
        mime = file.mime,
        url = quote(&format!("{}{}", view.share, file.part_path)),
        share = quote(view.share),
        file = quote(&file.part_path),
    )
}
