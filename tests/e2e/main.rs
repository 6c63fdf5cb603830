//! End-to-end scenarios across runs, sessions and connections

mod full_system_tests;
