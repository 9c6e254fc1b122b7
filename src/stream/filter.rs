//! Leading-boilerplate suppression.
//!
//! Some upstreams open a stream with a role echo or similar prefix that ends
//! in a newline. [`PrefixFilter`] drops newline-bearing fragments among the
//! first few a stream produces. It is a heuristic: it does not look at what
//! the text says, and a genuine answer whose first fragments contain a
//! newline loses them too.

use super::delta::DeltaFragment;

/// How many leading fragments are eligible for suppression.
pub const DEFAULT_PREFIX_SKIP: u32 = 2;

/// Per-stream counter for [`PrefixFilter`].
///
/// Owned by exactly one pipeline. Deliberately not `Clone`.
#[derive(Debug, Default)]
pub struct FilterState {
    count: u32,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments seen so far, dropped ones included.
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrefixFilter {
    threshold: u32,
}

impl Default for PrefixFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_SKIP)
    }
}

impl PrefixFilter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Advance `state` by one fragment, returning it if it should be sent on.
    pub fn step(&self, state: &mut FilterState, fragment: DeltaFragment) -> Option<DeltaFragment> {
        let suppress = state.count < self.threshold && fragment.text.contains('\n');
        state.count = state.count.saturating_add(1);

        if suppress {
            tracing::debug!(position = state.count, "Skipping prefix fragment");
            None
        } else {
            Some(fragment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: PrefixFilter, input: &[&str]) -> (Vec<String>, u32) {
        let mut state = FilterState::new();
        let out = input
            .iter()
            .filter_map(|t| filter.step(&mut state, DeltaFragment::new(*t)))
            .map(|f| f.text)
            .collect();
        (out, state.count())
    }

    #[test]
    fn test_single_prefix_line_dropped() {
        let (out, _) = run(PrefixFilter::default(), &["Role:\n", "Hello", " world"]);
        assert_eq!(out, vec!["Hello", " world"]);
    }

    #[test]
    fn test_counter_after_first_drop() {
        let mut state = FilterState::new();
        let filter = PrefixFilter::default();
        assert!(filter.step(&mut state, DeltaFragment::new("Role:\n")).is_none());
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn test_two_prefix_lines_dropped() {
        let (out, count) = run(PrefixFilter::default(), &["Role:\n", "Name:\n", "Hi"]);
        assert_eq!(out, vec!["Hi"]);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_newline_after_threshold_passes() {
        let (out, _) = run(PrefixFilter::default(), &["a\n", "b\n", "c\n"]);
        assert_eq!(out, vec!["c\n"]);
    }

    #[test]
    fn test_plain_fragments_consume_the_window() {
        let (out, _) = run(PrefixFilter::default(), &["Hi", "!", "\n\nBye"]);
        assert_eq!(out, vec!["Hi", "!", "\n\nBye"]);
    }

    #[test]
    fn test_empty_fragments_pass_and_count() {
        let (out, count) = run(PrefixFilter::default(), &["", "x\n", "y\n"]);
        assert_eq!(out, vec!["", "y\n"]);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_zero_threshold_disables_filter() {
        let (out, _) = run(PrefixFilter::new(0), &["Role:\n", "Hi"]);
        assert_eq!(out, vec!["Role:\n", "Hi"]);
    }
}
