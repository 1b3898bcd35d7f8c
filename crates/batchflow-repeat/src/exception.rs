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

use batchflow_core::{BatchError, Result};
use error_stack::Report;

use crate::context::RepeatContext;

/// Decides what to do with an error raised by a repeat callback after the
/// loop has finished collecting results: absorb it (`Ok`) or hand it back
/// for re-raising (`Err`).
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, context: &RepeatContext, error: Report<BatchError>) -> Result<()>;
}

/// Rethrows everything. The default.
#[derive(Debug, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle(&self, _context: &RepeatContext, error: Report<BatchError>) -> Result<()> {
        Err(error)
    }
}

const ABSORBED_COUNT_KEY: &str = "exception_handler.absorbed";

/// Absorbs errors matching a predicate up to a limit, counted per batch on
/// the repeat context; everything else (and everything past the limit) is
/// rethrown.
pub struct SimpleLimitExceptionHandler {
    limit: usize,
    matcher: Box<dyn Fn(&BatchError) -> bool + Send + Sync>,
}

impl SimpleLimitExceptionHandler {
    pub fn new(
        limit: usize,
        matcher: impl Fn(&BatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            limit,
            matcher: Box::new(matcher),
        }
    }
}

impl ExceptionHandler for SimpleLimitExceptionHandler {
    fn handle(&self, context: &RepeatContext, error: Report<BatchError>) -> Result<()> {
        if !(self.matcher)(error.current_context()) {
            return Err(error);
        }
        let absorbed = context
            .attribute(ABSORBED_COUNT_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        if absorbed > self.limit as u64 {
            return Err(error);
        }
        context.set_attribute(ABSORBED_COUNT_KEY, absorbed);
        log::debug!("absorbed callback error {absorbed}/{}: {error}", self.limit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::report;

    #[test]
    fn test_default_handler_rethrows() {
        let handler = DefaultExceptionHandler;
        let ctx = RepeatContext::new(None);
        let result = handler.handle(&ctx, report!(BatchError::Tasklet("boom".into())));
        assert!(result.is_err());
    }

    #[test]
    fn test_limit_handler_absorbs_up_to_limit() {
        let handler = SimpleLimitExceptionHandler::new(2, |e| matches!(e, BatchError::Item(_)));
        let ctx = RepeatContext::new(None);
        assert!(handler.handle(&ctx, report!(BatchError::Item("a".into()))).is_ok());
        assert!(handler.handle(&ctx, report!(BatchError::Item("b".into()))).is_ok());
        assert!(handler.handle(&ctx, report!(BatchError::Item("c".into()))).is_err());
    }

    #[test]
    fn test_limit_handler_rethrows_unmatched() {
        let handler = SimpleLimitExceptionHandler::new(2, |e| matches!(e, BatchError::Item(_)));
        let ctx = RepeatContext::new(None);
        assert!(handler
            .handle(&ctx, report!(BatchError::Tasklet("fatal".into())))
            .is_err());
    }
}
