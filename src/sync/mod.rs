//! Reconciliation building blocks.
//!
//! ARCHITECTURE
//! ============
//! Each synchronizer owns one slice of the reconciled view and knows how to
//! fold a fresh read or an event into it. None of them spawn tasks or hold
//! timers; the engine actor drives them and owns every timer slot and
//! in-flight fetch, so teardown is a single drop.

pub mod adjustment;
pub mod decision;
pub mod metric;
pub mod sequence;
pub mod slide;
pub mod timer;
