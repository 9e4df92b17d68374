/*!
 * Monitoring
 * Tracing subscriber setup and transformation pass spans
 */

mod tracer;

pub use tracer::{init_tracing, span_pass, PassSpan};
