//! Video delivery: program details, the TiVo header and transfer
//! negotiation.

mod details;
mod header;
mod negotiator;
pub mod sidecar;

pub use details::{estimated_size, iso_duration, modified_time, ResolvedDetails, VideoDetails};
pub use header::{pad, tivo_header};
pub use negotiator::{
    StreamRequest, TransferReport, VideoCompatibilityDecision, VideoError, VideoStreamNegotiator,
};
