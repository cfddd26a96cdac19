//! Safeflight CLI - simulation tooling for the flight safety monitor.
//!
//! Binaries:
//! - run_scenario: fly a predefined scenario in-process and print a summary

pub mod sim;
