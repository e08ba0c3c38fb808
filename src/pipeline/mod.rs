//! Pipeline stages for one convert work item.
//!
//! Each submodule implements exactly one step of the convert-and-publish
//! protocol driven by [`crate::worker`]. The sniffer and the converter sit
//! behind traits and can be swapped on the
//! [`WorkerContext`](crate::worker::WorkerContext).
//!
//! ## Data Flow
//!
//! ```text
//! sniff ──▶ convert ──▶ publish
//! (MIME)    (~x.tmp)    (dispose source, rename → x.pdf)
//! ```
//!
//! 1. [`sniff`]:   decide from the file's first bytes whether it is eligible
//! 2. [`convert`]: run the external tool into the temporary output name
//! 3. [`publish`]: copy/dispose of the source and atomically rename the
//!    temporary output to its final name

pub mod convert;
pub mod publish;
pub mod sniff;
