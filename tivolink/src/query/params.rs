//! TiVoConnect query-string parsing.
//!
//! Requests carry multi-valued, URL-encoded parameters (`Command`,
//! `Container`, `SortOrder`, `ItemCount`, ...). [`Query`] keeps every
//! value; most callers only need the first one.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Prefix of container URLs embedded in `AnchorItem` values.
const CONTAINER_URL_PREFIX: &str = "/TiVoConnect?Command=QueryContainer&Container=";

/// Parsed, multi-valued query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: HashMap<String, Vec<String>>,
}

impl Query {
    /// Parse a raw query string (without the leading `?`).
    ///
    /// `+` decodes to a space; malformed percent escapes are decoded
    /// lossily rather than rejected.
    pub fn parse(raw: &str) -> Self {
        let mut query = Self::default();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            query.push(decode_component(key), decode_component(value));
        }
        query
    }

    /// Add a value, keeping earlier values for the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.entry(key.into()).or_default().push(value.into());
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value for `key`, in request order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.params.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// First value for `key` parsed as an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced: Cow<str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    percent_decode(&spaced)
}

/// Percent-decode without treating `+` as a space (paths keep literal `+`).
fn percent_decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned(),
    }
}

/// Requested ordering of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOrder {
    /// Name ascending (`Normal` and anything unrecognised).
    Name,
    /// Folders first, then name.
    Type,
    /// Capture time ascending.
    CaptureDate,
    /// Modification time, newest first (`!CaptureDate`).
    NewestFirst,
    /// Modification time ascending.
    LastChangeDate,
    /// Shuffled, optionally seeded, optionally with a pinned first item.
    Random {
        seed: Option<String>,
        start: Option<String>,
    },
}

/// Ordering plus the memo key that identifies it on a cached list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub order: SortOrder,
    key: String,
}

impl SortSpec {
    pub fn new(order: SortOrder) -> Self {
        let key = match &order {
            SortOrder::Name => "Normal".to_string(),
            SortOrder::Type => "Type".to_string(),
            SortOrder::CaptureDate => "CaptureDate".to_string(),
            SortOrder::NewestFirst => "!CaptureDate".to_string(),
            SortOrder::LastChangeDate => "LastChangeDate".to_string(),
            SortOrder::Random { seed, start } => format!(
                "Random{}{}",
                seed.as_deref().unwrap_or(""),
                start.as_deref().unwrap_or("")
            ),
        };
        Self { order, key }
    }

    /// Read `SortOrder`, `RandomSeed` and `RandomStart`.
    pub fn from_query(query: &Query) -> Self {
        let sortby = query.get("SortOrder").unwrap_or("Normal");
        let order = if sortby.contains("Random") {
            SortOrder::Random {
                seed: query.get("RandomSeed").map(str::to_string),
                start: query.get("RandomStart").map(str::to_string),
            }
        } else if sortby.contains("Type") {
            SortOrder::Type
        } else if sortby.starts_with('!') && sortby.contains("CaptureDate") {
            SortOrder::NewestFirst
        } else if sortby.contains("CaptureDate") {
            SortOrder::CaptureDate
        } else if sortby.contains("LastChangeDate") {
            SortOrder::LastChangeDate
        } else {
            SortOrder::Name
        };
        Self::new(order)
    }

    /// Key stored on a list once this ordering has been applied.
    pub fn memo_key(&self) -> &str {
        &self.key
    }

    pub fn is_random(&self) -> bool {
        matches!(self.order, SortOrder::Random { .. })
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortOrder::Name)
    }
}

/// Folder/file restriction from the `Filter` parameter.
///
/// `Filter` is a comma-separated list of MIME types such as
/// `x-tivo-container/folder,image/*`. Files pass when the list names the
/// share's media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFilter {
    pub folders: bool,
    pub files: bool,
}

impl TypeFilter {
    /// Filter for photo shares.
    pub fn from_query(query: &Query) -> Option<Self> {
        Self::for_media(query, "image")
    }

    /// Filter whose files are those of the `media` MIME family.
    pub fn for_media(query: &Query, media: &str) -> Option<Self> {
        query.get("Filter").map(|filter| Self {
            folders: filter.contains("folder"),
            files: filter.contains(media),
        })
    }

    /// Whether an entry of the given kind passes the filter.
    pub fn allows(&self, is_dir: bool) -> bool {
        match (self.folders, self.files) {
            (false, _) => !is_dir,
            (true, false) => is_dir,
            (true, true) => true,
        }
    }
}

/// Page window from `ItemCount`, `AnchorItem` and `AnchorOffset`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSpec {
    /// Signed item count; absent or zero means the whole list.
    pub count: Option<i64>,
    /// Local path of the anchor entry.
    pub anchor: Option<PathBuf>,
    pub anchor_offset: i64,
}

impl PageSpec {
    pub fn from_query(query: &Query, share: &ShareLocation<'_>) -> Self {
        Self {
            count: query.get_i64("ItemCount"),
            anchor: query
                .get("AnchorItem")
                .and_then(|anchor| share.local_path_for(anchor)),
            anchor_offset: query.get_i64("AnchorOffset").unwrap_or(0),
        }
    }
}

/// A share's protocol name and its local root directory.
#[derive(Debug, Clone, Copy)]
pub struct ShareLocation<'a> {
    pub name: &'a str,
    pub root: &'a Path,
}

impl<'a> ShareLocation<'a> {
    pub fn new(name: &'a str, root: &'a Path) -> Self {
        Self { name, root }
    }

    /// Translate a protocol path (`/<share>/sub/file`, optionally wrapped
    /// in a container URL and percent-encoded) to a local path.
    ///
    /// Returns `None` when the path names another share or tries to climb
    /// out of the share with `..`.
    pub fn local_path_for(&self, url_path: &str) -> Option<PathBuf> {
        let unwrapped = match url_path.strip_prefix(CONTAINER_URL_PREFIX) {
            Some(rest) => format!("/{rest}"),
            None => url_path.to_string(),
        };
        let decoded = percent_decode(&unwrapped);

        let mut parts = decoded.split('/').filter(|p| !p.is_empty());
        if parts.next() != Some(self.name) {
            return None;
        }
        self.join_relative(parts)
    }

    /// Resolve the `Container` parameter of a listing request.
    ///
    /// The first component names the share; the remainder is the
    /// sub-directory below its root.
    pub fn container_dir(&self, container: &str) -> Option<PathBuf> {
        let mut parts = container.split('/').filter(|p| !p.is_empty());
        parts.next()?;
        self.join_relative(parts)
    }

    fn join_relative<'p>(&self, parts: impl Iterator<Item = &'p str>) -> Option<PathBuf> {
        let mut path = self.root.to_path_buf();
        for part in parts {
            let component = Path::new(part);
            let is_plain = component
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
            if !is_plain {
                return None;
            }
            path.push(component);
        }
        Some(path)
    }
}
