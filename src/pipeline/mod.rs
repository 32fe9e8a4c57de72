//! Pipeline stages for magnifier annotation extraction.
//!
//! Each submodule implements one step. The orchestrator composes them per
//! page; none of them knows about run state.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ detect ──▶ extract
//! (URL/path)  (pdfium)  (base64)   (yes/no)   (strict JSON)
//!                                     │           │
//!                                     └─ backend + retry
//! ```
//!
//! 1. [`input`]: resolve the user-supplied path or URL to a [`input::Document`]
//! 2. [`render`]: rasterise one page; pdfium runs in `spawn_blocking`,
//!    results are cached per (document, page, resolution)
//! 3. [`encode`]: base64-wrap the PNG for the multimodal request body
//! 4. [`detect`]: the cheap classifier call
//! 5. [`extract`]: the schema-constrained call on positive pages, with
//!    [`page_number`] interpreting the printed page number
//!
//! [`backend`] is the seam to the model providers, [`retry`] the shared
//! backoff loop and [`response`] the text clean-up both stages apply.

pub mod backend;
pub mod detect;
pub mod encode;
pub mod extract;
pub mod input;
pub mod page_number;
pub mod render;
pub mod response;
pub mod retry;
