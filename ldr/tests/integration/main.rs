#[path = "../common/mod.rs"]
mod common;

mod apply_test;
mod checkpoint_test;
mod convergence_test;
mod pipeline_test;
mod purgatory_test;
