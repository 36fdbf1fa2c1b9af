#[path = "../common/mod.rs"]
mod common;

mod pipeline_test;
