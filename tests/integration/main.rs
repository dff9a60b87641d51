//! Integration test harness

mod pipeline_tests;
