// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::cmp::Ordering;

/// A potential transition out of a state: if the state's outcome name
/// matches `pattern`, the flow continues at `next`.
///
/// Patterns support `*` (any run of characters, including none) and `?`
/// (exactly one character).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub state_name: String,
    pub pattern: String,
    pub next: String,
}

impl StateTransition {
    pub fn new(
        state_name: impl Into<String>,
        pattern: impl Into<String>,
        next: impl Into<String>,
    ) -> Self {
        let pattern = pattern.into();
        Self {
            state_name: state_name.into(),
            pattern: if pattern.is_empty() { "*".to_string() } else { pattern },
            next: next.into(),
        }
    }

    pub fn matches(&self, outcome: &str) -> bool {
        pattern_matches(&self.pattern, outcome)
    }

    fn wildcard_counts(&self) -> (usize, usize) {
        let stars = self.pattern.matches('*').count();
        let questions = self.pattern.matches('?').count();
        (stars, questions)
    }
}

impl PartialOrd for StateTransition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts by increasing generality: exact patterns first, then `?` patterns,
/// then `*` patterns (`foo` before `fo?` before `foo*` before `*`), so a
/// resolution scan over a sorted list prefers the most specific match.
impl Ord for StateTransition {
    fn cmp(&self, other: &Self) -> Ordering {
        let (self_stars, self_questions) = self.wildcard_counts();
        let (other_stars, other_questions) = other.wildcard_counts();
        self_stars
            .cmp(&other_stars)
            .then(self_questions.cmp(&other_questions))
            .then_with(|| self.pattern.cmp(&other.pattern))
    }
}

/// Glob-style match with `*` and `?`, iterative with backtracking over the
/// most recent `*`.
fn pattern_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
