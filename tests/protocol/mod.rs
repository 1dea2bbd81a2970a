//! Execution protocol tests against a live process.

mod executor_test;
