//! An in-process debug and profiling runtime for managed-language native
//! backends.
//!
//! The compiler instruments generated code with frame guards and line
//! probes; this crate turns those callbacks into a debugger surface: thread
//! enumeration with full call stacks and locals, line and function
//! breakpoints, per-thread stepping, break-all, lifecycle events and a
//! call-stack-sampling profiler. The probe's common case, no breakpoints and
//! no stepping, is a single atomic load.

pub mod runtime;
