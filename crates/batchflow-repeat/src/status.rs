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

/// Whether a repeat loop has more work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// There is (or may be) more work to process.
    Continuable,
    /// No more work to process.
    Finished,
}

impl RepeatStatus {
    pub fn continue_if(condition: bool) -> Self {
        if condition {
            RepeatStatus::Continuable
        } else {
            RepeatStatus::Finished
        }
    }

    pub fn is_continuable(self) -> bool {
        self == RepeatStatus::Continuable
    }

    /// Logical AND: the combined loop is continuable only if both sides are.
    #[must_use]
    pub fn and(self, other: RepeatStatus) -> RepeatStatus {
        Self::continue_if(self.is_continuable() && other.is_continuable())
    }
}

impl From<bool> for RepeatStatus {
    fn from(continuable: bool) -> Self {
        Self::continue_if(continuable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_finished_dominates() {
        assert_eq!(
            RepeatStatus::Continuable.and(RepeatStatus::Finished),
            RepeatStatus::Finished
        );
        assert_eq!(
            RepeatStatus::Finished.and(RepeatStatus::Continuable),
            RepeatStatus::Finished
        );
        assert_eq!(
            RepeatStatus::Continuable.and(RepeatStatus::Continuable),
            RepeatStatus::Continuable
        );
    }
}
