//! Pipeline stages for voter-list extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and backends can be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! rasterize ──▶ encode ──▶ inference ──▶ parse ──▶ aggregate
//!  (pdfium)     (base64)     (VLM)       (JSON)    (page order)
//! ```
//!
//! 1. [`rasterize`] — render every page; runs in `spawn_blocking` because
//!    pdfium is not async-aware
//! 2. [`encode`]    — PNG-encode and base64-wrap a page for the request body
//! 3. [`inference`] — the page-image → raw-text capability and its VLM
//!    implementation; the only stage with network I/O
//! 4. [`parse`]     — turn a raw model reply into [`crate::record::VoterRecord`]s
//! 5. [`aggregate`] — concurrent dispatch, retry, and in-order merge

pub mod aggregate;
pub mod encode;
pub mod inference;
pub mod parse;
pub mod rasterize;
