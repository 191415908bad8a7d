//! Context shaping between pipeline stages
//!
//! Everything that decides *what the next LLM invocation gets to see*:
//! token-budgeted compression, stage handoffs, file summarization, and the
//! checksum pins that guard multi-file edits against mid-flight drift.

mod compress;
mod handoff;
mod pin;
mod summarize;

pub use compress::{CompressionLevel, Compressor, ContentBlock, estimate_tokens};
pub use handoff::{
    CompoundHandoff, ExecutionHandoff, Handoff, PipelineHandoff, RefactorHandoff, ReviewHandoff,
};
pub use pin::{ContextPinner, Pin, PinVerification};
pub use summarize::{FileContext, FileSummary, Language, summarize};
