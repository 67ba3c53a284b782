//! Cross-turn session continuity: the continuity marker carried on assistant
//! turns, and the summary cache used to truncate continued requests.

pub mod codec;
pub mod continuation;
pub mod similarity;
pub mod summary;

pub use codec::{
    decode_marker, encode_marker, find_continuity_marker, ContinuityMarker, MarkerMatch,
    CONTINUITY_MIME,
};
pub use continuation::{ContinuationCache, ContinuationMatch, ContinuationScope};
pub use summary::{ResponseSummary, SummaryLine};
