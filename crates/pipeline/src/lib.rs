//! The workflow orchestration core.
//!
//! A workflow request is planned into an ordered list of stages
//! ([`plan`]), executed strictly sequentially with durable progress after
//! every transition ([`executor`] driving [`runner`]), and finished with a
//! best-effort report composition step ([`finalize`]). [`service`] is the
//! submission front door the API layer talks to.

pub mod compute;
pub mod error;
pub mod executor;
pub mod finalize;
pub mod plan;
pub mod runner;
pub mod service;
