//! Behavioural test helpers for podwire configuration.

mod steps;

pub(crate) use steps::{ConfigState, config_state};
