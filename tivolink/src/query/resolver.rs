//! Listing resolution: order, filter and page a cached directory listing.
//!
//! The whole sequence runs under the listing's own lock so concurrent
//! requests for the same directory never observe a half-sorted list,
//! while requests for other directories proceed independently.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use super::params::{PageSpec, Query, ShareLocation, SortOrder, SortSpec, TypeFilter};
use crate::index::{DirectoryIndexer, FileEntry, IndexError, SortedFileList};

/// Everything needed to produce one page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ListingRequest {
    /// Local directory being listed.
    pub dir: PathBuf,
    pub recursive: bool,
    pub sort: SortSpec,
    /// Replace any non-random ordering with folders-first, then name.
    pub force_alpha: bool,
    pub filter: Option<TypeFilter>,
    /// Entry moved to the front after a random shuffle.
    pub pinned_start: Option<PathBuf>,
    pub page: PageSpec,
}

impl ListingRequest {
    /// Build a request for `dir` from the protocol query.
    ///
    /// `Recurse=Yes` is honoured only when `allow_recurse` is set.
    pub fn from_query(
        query: &Query,
        dir: PathBuf,
        share: &ShareLocation<'_>,
        allow_recurse: bool,
    ) -> Self {
        let sort = SortSpec::from_query(query);
        let pinned_start = match &sort.order {
            SortOrder::Random {
                start: Some(start), ..
            } => share.local_path_for(start),
            _ => None,
        };

        Self {
            dir,
            recursive: allow_recurse && query.get("Recurse") == Some("Yes"),
            sort,
            force_alpha: false,
            filter: None,
            pinned_start,
            page: PageSpec::from_query(query, share),
        }
    }

    pub fn with_force_alpha(mut self, force_alpha: bool) -> Self {
        self.force_alpha = force_alpha;
        self
    }

    pub fn with_filter(mut self, filter: Option<TypeFilter>) -> Self {
        self.filter = filter;
        self
    }
}

/// One page of a resolved listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub entries: Vec<FileEntry>,
    /// Size of the filtered listing before paging.
    pub total: usize,
    /// Index of the first returned entry within the filtered listing.
    pub start: usize,
    /// The request named an anchor that is not in the listing.
    pub anchor_missing: bool,
}

/// Turns listing requests into pages, backed by a [`DirectoryIndexer`].
#[derive(Debug, Default)]
pub struct QueryResolver {
    indexer: DirectoryIndexer,
}

impl QueryResolver {
    pub fn new(indexer: DirectoryIndexer) -> Self {
        Self { indexer }
    }

    pub fn indexer(&self) -> &DirectoryIndexer {
        &self.indexer
    }

    /// Resolve `request` to a page of entries.
    ///
    /// # Arguments
    ///
    /// * `request` - Directory, ordering, filter and page window
    /// * `accept` - File predicate used if the directory must be walked
    ///
    /// # Errors
    ///
    /// Returns `IndexError` if the directory cannot be indexed.
    pub fn resolve(
        &self,
        request: &ListingRequest,
        accept: &dyn Fn(&Path) -> bool,
    ) -> Result<ListingPage, IndexError> {
        let shared = self.indexer.load(&request.dir, request.recursive, accept)?;
        let mut list = shared.lock();

        apply_order(
            &mut list,
            &request.sort,
            request.force_alpha,
            request.pinned_start.as_deref(),
        );

        let mut entries = list.entries().to_vec();
        if let Some(filter) = request.filter {
            entries.retain(|e| filter.allows(e.is_dir));
        }

        let page = paginate(entries, &request.page, list.last_start());
        list.set_last_start(page.start);
        Ok(page)
    }
}

/// Re-order `list` for `sort` unless it is already in that order.
pub fn apply_order(
    list: &mut SortedFileList,
    sort: &SortSpec,
    force_alpha: bool,
    pinned_start: Option<&Path>,
) {
    let key = if force_alpha && !sort.is_random() {
        "ForceAlpha"
    } else {
        sort.memo_key()
    };
    if !list.needs_sort(key) {
        return;
    }

    let entries = list.entries_mut();
    match &sort.order {
        SortOrder::Random { seed, .. } => {
            // Shuffle from a canonical order so a seed always yields the
            // same sequence for the same entries.
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            let mut rng = match seed {
                Some(seed) => seeded_rng(seed),
                None => StdRng::from_os_rng(),
            };
            entries.shuffle(&mut rng);

            if let Some(pinned) = pinned_start {
                match entries.iter().position(|e| e.path == pinned) {
                    Some(index) => {
                        let entry = entries.remove(index);
                        entries.insert(0, entry);
                    }
                    None => {
                        tracing::warn!(start = %pinned.display(), "Random start not found");
                    }
                }
            }
        }
        _ if force_alpha => sort_folders_first(entries),
        SortOrder::Type => sort_folders_first(entries),
        SortOrder::CaptureDate => entries.sort_by_key(|e| e.capture_date),
        SortOrder::NewestFirst => entries.sort_by(|a, b| b.modified_date.cmp(&a.modified_date)),
        SortOrder::LastChangeDate => entries.sort_by_key(|e| e.modified_date),
        SortOrder::Name => entries.sort_by(|a, b| a.path.cmp(&b.path)),
    }

    list.mark_sorted(key);
    list.set_pinned_start(pinned_start.map(Path::to_path_buf));
}

fn sort_folders_first(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    // Stable: names stay ascending within each group
    entries.sort_by_key(|e| !e.is_dir);
}

fn seeded_rng(seed: &str) -> StdRng {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    StdRng::from_seed(digest)
}

/// Slice `entries` to the requested page window.
///
/// `last_start` is the previous page start; the anchor is searched for
/// from there first, then from the beginning.
pub fn paginate(entries: Vec<FileEntry>, page: &PageSpec, last_start: usize) -> ListingPage {
    let total = entries.len();
    let count = match page.count {
        Some(count) if count != 0 && total > 0 => count,
        _ => {
            return ListingPage {
                entries,
                total,
                start: 0,
                anchor_missing: false,
            }
        }
    };

    let mut anchor_index = None;
    let mut anchor_missing = false;
    if let Some(anchor) = &page.anchor {
        let from = last_start.min(total);
        let found = entries[from..]
            .iter()
            .position(|e| &e.path == anchor)
            .map(|i| i + from)
            .or_else(|| entries[..from].iter().position(|e| &e.path == anchor));
        match found {
            Some(index) => {
                let base = index as i64 + if count > 0 { 1 } else { 0 };
                anchor_index = Some(base.saturating_add(page.anchor_offset));
            }
            None => {
                tracing::warn!(anchor = %anchor.display(), "Anchor not found");
                anchor_missing = true;
            }
        }
    }

    let total_i = total as i64;
    let (start, end) = if count > 0 {
        let start = anchor_index.unwrap_or(0).clamp(0, total_i);
        (start, start.saturating_add(count).clamp(start, total_i))
    } else {
        let end = anchor_index.unwrap_or(total_i).clamp(0, total_i);
        (end.saturating_add(count).clamp(0, end), end)
    };

    let (start, end) = (start as usize, end as usize);
    ListingPage {
        entries: entries[start..end].to_vec(),
        total,
        start,
        anchor_missing,
    }
}
