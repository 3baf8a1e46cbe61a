//! Concurrent trace recording.
//!
//! The instrumentation collaborator calls into a [`TraceRecorder`] from the
//! threads of the original test run. Each thread owns one call stack, kept
//! in a shared map keyed by thread id; pushes and pops on one stack are
//! sequential, so the only shared state is the map itself and the trace
//! arena. Lock order is always stack, then trace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info, trace as trace_event};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionId, ExecutionTrace, FieldAccess, MethodId, MethodKind, ObservedValue,
};
use crate::domain::ports::TypeCatalog;

#[derive(Debug, Clone, Copy)]
struct Frame {
    execution: ExecutionId,
    children: usize,
}

#[derive(Debug, Default)]
struct ThreadStack {
    frames: Vec<Frame>,
    test_name: Option<String>,
}

/// Summary returned when recording is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealSummary {
    /// Surviving executions after duplicate collapse.
    pub executions: usize,
    /// Interned values.
    pub values: usize,
    /// Executions whose end was never recorded.
    pub incomplete: usize,
    /// Malformed records dropped while loading.
    pub skipped: usize,
}

/// Records executions and values while the original tests run.
pub struct TraceRecorder {
    catalog: Arc<dyn TypeCatalog>,
    trace: Mutex<ExecutionTrace>,
    stacks: RwLock<HashMap<u64, Arc<Mutex<ThreadStack>>>>,
}

impl TraceRecorder {
    /// Recorder resolving method descriptors through `catalog`.
    pub fn new(catalog: Arc<dyn TypeCatalog>) -> Self {
        Self {
            catalog,
            trace: Mutex::new(ExecutionTrace::new()),
            stacks: RwLock::new(HashMap::new()),
        }
    }

    fn lock_trace(&self) -> DomainResult<MutexGuard<'_, ExecutionTrace>> {
        self.trace
            .lock()
            .map_err(|_| DomainError::TraceCorrupted("trace lock poisoned".to_string()))
    }

    fn stack_for(&self, thread: u64) -> DomainResult<Arc<Mutex<ThreadStack>>> {
        {
            let stacks = self
                .stacks
                .read()
                .map_err(|_| DomainError::TraceCorrupted("stack map poisoned".to_string()))?;
            if let Some(stack) = stacks.get(&thread) {
                return Ok(Arc::clone(stack));
            }
        }
        let mut stacks = self
            .stacks
            .write()
            .map_err(|_| DomainError::TraceCorrupted("stack map poisoned".to_string()))?;
        Ok(Arc::clone(stacks.entry(thread).or_default()))
    }

    fn lock_stack(stack: &Mutex<ThreadStack>) -> DomainResult<MutexGuard<'_, ThreadStack>> {
        stack
            .lock()
            .map_err(|_| DomainError::TraceCorrupted("call stack poisoned".to_string()))
    }

    /// Mark the start of an original test on `thread`. Executions recorded
    /// until [`TraceRecorder::end_test`] are owned by this test.
    pub fn begin_test(&self, name: impl Into<String>, thread: u64) -> DomainResult<()> {
        let stack = self.stack_for(thread)?;
        let mut stack = Self::lock_stack(&stack)?;
        stack.test_name = Some(name.into());
        Ok(())
    }

    /// Mark the end of the current test on `thread`. Calls still open are
    /// abandoned and stay incomplete.
    pub fn end_test(&self, thread: u64) -> DomainResult<()> {
        let stack = self.stack_for(thread)?;
        let mut stack = Self::lock_stack(&stack)?;
        if !stack.frames.is_empty() {
            debug!(
                thread,
                open_calls = stack.frames.len(),
                "test ended with open calls"
            );
        }
        stack.frames.clear();
        stack.test_name = None;
        Ok(())
    }

    /// A call begins. Returns the new execution id.
    pub fn record_call_start(
        &self,
        method: MethodId,
        receiver: Option<&ObservedValue>,
        params: &[ObservedValue],
        thread: u64,
    ) -> DomainResult<ExecutionId> {
        let descriptor = self.catalog.require_method(method)?;
        let stack = self.stack_for(thread)?;
        let mut stack = Self::lock_stack(&stack)?;
        let mut trace = self.lock_trace()?;

        // A constructor's receiver is the uninitialised object; its state is
        // only meaningful once the constructor returns.
        let receiver = match descriptor.kind {
            MethodKind::Constructor | MethodKind::StaticInitializer => None,
            _ => receiver,
        };
        let receiver_id = receiver.map(|r| trace.intern(r)).transpose()?;
        let mut param_ids = Vec::with_capacity(params.len());
        for param in params {
            param_ids.push(trace.intern(param)?);
        }

        let id = trace.record_execution(
            descriptor,
            receiver_id,
            param_ids,
            stack.test_name.clone(),
        )?;
        if let Some(parent) = stack.frames.last_mut() {
            let ordinal = parent.children;
            parent.children += 1;
            trace.add_child_edge(parent.execution, id, ordinal)?;
        }
        stack.frames.push(Frame {
            execution: id,
            children: 0,
        });
        trace_event!(thread, execution = %id, method = %method, "call start");
        Ok(id)
    }

    fn pop_frame(stack: &mut ThreadStack, thread: u64, expected: ExecutionId) -> DomainResult<()> {
        match stack.frames.last() {
            Some(frame) if frame.execution == expected => {
                stack.frames.pop();
                Ok(())
            }
            other => Err(DomainError::CallStackMismatch {
                thread,
                expected,
                found: other.map(|f| f.execution),
            }),
        }
    }

    /// A call returns normally. Returns the surviving execution id, which
    /// differs from `execution` when the call duplicated an earlier one.
    pub fn record_call_end(
        &self,
        execution: ExecutionId,
        receiver: Option<&ObservedValue>,
        return_value: Option<&ObservedValue>,
        thread: u64,
    ) -> DomainResult<ExecutionId> {
        let stack = self.stack_for(thread)?;
        let mut stack = Self::lock_stack(&stack)?;
        Self::pop_frame(&mut stack, thread, execution)?;
        let mut trace = self.lock_trace()?;

        let recorded = trace.execution(execution)?;
        let descriptor = self.catalog.require_method(recorded.method)?;
        let pre_state = recorded.receiver;

        let return_id = match return_value {
            Some(value) if !descriptor.is_void() => Some(trace.intern(value)?),
            _ => None,
        };
        let result_this = match (descriptor.kind, receiver) {
            (MethodKind::Constructor, Some(state)) => Some(trace.intern(state)?),
            (MethodKind::Member, Some(state)) => {
                let id = trace.intern(state)?;
                // Unchanged receivers are not redefined by the call.
                (Some(id) != pre_state).then_some(id)
            }
            _ => None,
        };
        trace.complete_execution(execution, return_id, result_this)?;
        Self::collapse_if_duplicate(&mut trace, execution)
    }

    /// The innermost open call on `thread` exits by throwing `exception`.
    pub fn record_exception(
        &self,
        exception: &ObservedValue,
        thread: u64,
    ) -> DomainResult<ExecutionId> {
        let stack = self.stack_for(thread)?;
        let mut stack = Self::lock_stack(&stack)?;
        let frame = stack
            .frames
            .pop()
            .ok_or(DomainError::EmptyCallStack(thread))?;
        let mut trace = self.lock_trace()?;
        trace.fail_execution(frame.execution, exception.ty())?;
        Self::collapse_if_duplicate(&mut trace, frame.execution)
    }

    /// The innermost open call on `thread` reads `field` of `owner` directly.
    pub fn record_field_read(
        &self,
        owner: &ObservedValue,
        field: impl Into<String>,
        thread: u64,
    ) -> DomainResult<()> {
        let stack = self.stack_for(thread)?;
        let stack = Self::lock_stack(&stack)?;
        let Some(frame) = stack.frames.last().copied() else {
            return Err(DomainError::EmptyCallStack(thread));
        };
        let mut trace = self.lock_trace()?;
        let owner = trace.intern(owner)?;
        trace
            .execution_mut(frame.execution)?
            .fields_read
            .insert(FieldAccess {
                owner,
                field: field.into(),
            });
        Ok(())
    }

    fn collapse_if_duplicate(
        trace: &mut ExecutionTrace,
        execution: ExecutionId,
    ) -> DomainResult<ExecutionId> {
        match trace.find_equivalent(execution)? {
            Some(canonical) => {
                trace.collapse_duplicate(execution, canonical)?;
                trace_event!(duplicate = %execution, canonical = %canonical, "collapsed duplicate execution");
                Ok(canonical)
            }
            None => Ok(execution),
        }
    }

    /// Depth of the open call stack on `thread`.
    pub fn open_calls(&self, thread: u64) -> DomainResult<usize> {
        let stack = self.stack_for(thread)?;
        let stack = Self::lock_stack(&stack)?;
        Ok(stack.frames.len())
    }

    /// Finish recording and hand the trace to analysis. Executions whose end
    /// was never observed become untestable.
    pub fn seal(self) -> DomainResult<(ExecutionTrace, SealSummary)> {
        let mut trace = self
            .trace
            .into_inner()
            .map_err(|_| DomainError::TraceCorrupted("trace lock poisoned".to_string()))?;
        let incomplete = trace.mark_incomplete_untestable();
        trace.verify_integrity()?;
        let summary = SealSummary {
            executions: trace.execution_count(),
            values: trace.value_count(),
            incomplete,
            skipped: 0,
        };
        info!(
            executions = summary.executions,
            values = summary.values,
            incomplete = summary.incomplete,
            "trace sealed"
        );
        Ok((trace, summary))
    }
}
