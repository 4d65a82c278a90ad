//! List command - print a share listing as a TiVo would see it.

use std::path::Path;

use clap::ValueEnum;
use tivolink::config::ShareKind;
use tivolink::handler::is_image_file;
use tivolink::query::{ListingRequest, Query, QueryResolver};
use tivolink::transcode::has_video_extension;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Listing order selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum SortArg {
    /// Name ascending
    Name,
    /// Folders first, then name
    Type,
    /// Capture time ascending
    Capture,
    /// Newest first
    Newest,
    /// Modification time ascending
    Changed,
    /// Shuffled (use --seed for a repeatable order)
    Random,
}

impl SortArg {
    /// Value of the protocol's `SortOrder` parameter.
    pub fn sort_order(self) -> &'static str {
        match self {
            SortArg::Name => "Normal",
            SortArg::Type => "Type",
            SortArg::Capture => "CaptureDate",
            SortArg::Newest => "!CaptureDate",
            SortArg::Changed => "LastChangeDate",
            SortArg::Random => "Random",
        }
    }
}

/// Arguments for the list command.
pub struct ListArgs {
    pub share: String,
    /// Sub-folder below the share root.
    pub folder: Option<String>,
    pub recurse: bool,
    pub sort: Option<SortArg>,
    pub seed: Option<String>,
    pub count: Option<i64>,
}

/// Protocol query equivalent to `args`.
pub fn build_query(args: &ListArgs) -> Query {
    let container = match args.folder.as_deref().map(|f| f.trim_matches('/')) {
        Some(folder) if !folder.is_empty() => format!("{}/{}", args.share, folder),
        _ => args.share.clone(),
    };
    let mut query = Query::default().with("Container", container);
    if args.recurse {
        query.push("Recurse", "Yes");
    }
    if let Some(sort) = args.sort {
        query.push("SortOrder", sort.sort_order());
    }
    if let Some(seed) = &args.seed {
        query.push("RandomSeed", seed.as_str());
    }
    if let Some(count) = args.count {
        query.push("ItemCount", count.to_string());
    }
    query
}

/// Run the list command.
pub fn run(runner: CliRunner, args: ListArgs) -> Result<(), CliError> {
    runner.log_startup("list");
    let config = runner.config();
    let share = config
        .share(&args.share)
        .ok_or_else(|| CliError::UnknownShare(args.share.clone()))?;

    let query = build_query(&args);
    let location = tivolink::query::ShareLocation::new(&share.name, &share.path);
    let container = query.get("Container").unwrap_or(&share.name);
    let dir = location
        .container_dir(container)
        .ok_or_else(|| CliError::Listing(format!("invalid folder '{}'", container)))?;

    let accept: fn(&Path) -> bool = match share.kind {
        ShareKind::Photo => is_image_file,
        ShareKind::Video => has_video_extension,
    };
    let request = ListingRequest::from_query(&query, dir, &location, true)
        .with_force_alpha(share.force_alpha);
    let page = QueryResolver::default()
        .resolve(&request, &accept)
        .map_err(|e| CliError::Listing(e.to_string()))?;

    println!(
        "{} ({}) - {} of {} entries from {}",
        container,
        share.kind,
        page.entries.len(),
        page.total,
        page.start
    );
    for entry in &page.entries {
        let relative = entry.path.strip_prefix(&share.path).unwrap_or(&entry.path);
        let marker = if entry.is_dir { "/" } else { "" };
        println!("  {}{}", relative.display(), marker);
    }
    Ok(())
}
