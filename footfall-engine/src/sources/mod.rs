//! Pollers for sensors published as web pages

pub mod tabular;

pub use tabular::TabularPoller;
