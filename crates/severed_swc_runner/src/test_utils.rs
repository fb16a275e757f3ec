use swc_core::ecma::visit::{Visit, VisitMut};

use crate::runner::{run_visit, run_visit_const, syntax_for_id};
pub use crate::runner::{RunContext, RunVisitResult};

/// Helper to test SWC visitors.
///
/// * Parse `code` with SWC
/// * Run a visitor over it
/// * Return the result
///
pub fn run_test_visit<V: VisitMut>(
  code: &str,
  make_visit: impl FnOnce(&RunContext) -> V,
) -> RunVisitResult<V> {
  run_visit(code, syntax_for_id("test.js"), make_visit).unwrap()
}

/// Same as `run_test_visit` but for `Visit` instead of `VisitMut`
pub fn run_test_visit_const<V: Visit>(
  code: &str,
  make_visit: impl FnOnce(&RunContext) -> V,
) -> RunVisitResult<V> {
  run_visit_const(code, syntax_for_id("test.js"), make_visit).unwrap()
}
