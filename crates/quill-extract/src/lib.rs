//! Delta extraction
//!
//! Turns raw increment text into a [`quill_state::StateDelta`] via a
//! secondary oracle call with deterministic settings and strict output-format
//! instructions. Extraction is advisory: on malformed output it falls back to
//! regex heuristics, and on total failure it returns an empty delta rather
//! than raising. Losing one increment's state tracking is recoverable in
//! post-processing; losing generation throughput is not.

pub mod extractor;
pub mod fallback;

pub use extractor::{DeltaExtractor, ExtractionOutcome, ExtractionSource};
