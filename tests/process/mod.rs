//! Process session tests.

mod session_test;
