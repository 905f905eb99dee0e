//! Output pipeline tests: buffering, decoding and line classification.

mod buffer_test;
mod pipeline_test;
