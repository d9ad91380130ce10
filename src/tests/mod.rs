// src/tests/mod.rs

mod fixtures;
mod property_tests;
mod test_captive;
mod test_checkpoint;
mod test_native_host;
mod test_parser;
mod test_watchdog;
