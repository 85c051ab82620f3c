//! Stack growth for deeply nested programs
//!
//! Evaluation recurses once per AST level and once per user-function call.
//! [`ensure_sufficient_stack`] grows the native stack on demand so that deep
//! (but bounded) recursion ends in a `RecursionLimit` error rather than a
//! crash.

/// Minimum stack space to keep available (100KB red zone)
const RED_ZONE: usize = 100 * 1024;

/// Stack space to allocate when growing (1MB)
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first growing the stack if less than the red zone remains
#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        ensure_sufficient_stack(|| if n == 0 { 0 } else { 1 + depth(n - 1) })
    }

    #[test]
    fn test_deep_recursion_completes() {
        assert_eq!(depth(100_000), 100_000);
    }
}
