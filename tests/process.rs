/*!
 * Process-backed context tests entry point
 */

#[path = "support/mod.rs"]
mod support;

#[path = "process/cross_process_test.rs"]
mod cross_process_test;

#[path = "process/exit_status_test.rs"]
mod exit_status_test;
