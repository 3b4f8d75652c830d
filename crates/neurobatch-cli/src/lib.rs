//! `neurobatch` CLI library.
//!
//! Each pipeline module turns a data layout into a set of independent
//! per-subject [`neurobatch_core::Job`]s; the binary wires them to the
//! dispatcher in `neurobatch-engine`.

pub mod pipelines;
