//! Weighted verdict synthesis.
//!
//! After Synthesis completes, the synthesizer's answer yields the verdict
//! label and the analysts' recorded verdicts yield the weighted confidence:
//!
//! ```text
//! confidence = Σ(weight[r] · confidence[r]) / Σ(weight[r])   for r in reporting roles
//! ```
//!
//! A role reports when either analyst phase recorded a verdict for it; the
//! CrossReview verdict wins over the Independent one.

mod extract;
mod result;

pub use extract::{extract_confidence, extract_label, extract_verdict_label, extract_verdict_record};
pub use result::{
    FinalResult, SynthesisInput, WorkerVerdict, effective_records, synthesize, weighted_confidence,
};
