//! TivoLink - personal media server for TiVo set-top boxes
//!
//! This library serves photo and video shares over the TiVoConnect (HMO)
//! protocol. The core is a request pipeline:
//!
//! ```text
//! HTTP request ──► QueryResolver ──► DirectoryIndexer ──► SortedFileList
//!                       │                 (flat / recursive caches)
//!                       ▼
//!              filtered, sorted page ──► render (XML)
//!
//! file fetch ──► ImageAdapter ──────────────► JPEG bytes
//!           └──► VideoStreamNegotiator ─┬──► byte-exact passthrough
//!                                       └──► Transcoder (chunked)
//! ```
//!
//! The caches are process-wide and shared between concurrent requests;
//! each one carries its own lock.

pub mod cache;
pub mod config;
pub mod handler;
pub mod imaging;
pub mod index;
pub mod logging;
pub mod query;
pub mod render;
pub mod server;
pub mod transcode;
pub mod transfer;
pub mod video;

/// Version of the TivoLink library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
