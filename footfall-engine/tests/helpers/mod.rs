//! Shared test utilities

#![allow(dead_code, unused_imports)]

pub mod fakes;
pub mod log_capture;

pub use fakes::{report_page, temp_cache, FakeRenderer, FailingRenderer};
pub use log_capture::{capture_logs, LogCapture};
