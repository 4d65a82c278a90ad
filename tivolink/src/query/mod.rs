//! Container query handling.
//!
//! [`Query`] parses the protocol's query string; [`QueryResolver`] turns a
//! [`ListingRequest`] into a sorted, filtered [`ListingPage`].

mod params;
mod resolver;

pub use params::{PageSpec, Query, ShareLocation, SortOrder, SortSpec, TypeFilter};
pub use resolver::{apply_order, paginate, ListingPage, ListingRequest, QueryResolver};
