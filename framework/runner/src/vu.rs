use std::sync::Arc;

use surge_core::prelude::{InvokeError, InvokeResult, Invoker, VuStopListener};
use surge_instruments::{Aggregator, OperationOutcome, OperationRecord};

use crate::workflow::{Vars, Workflow, WorkflowStep};

/// What a virtual user did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VuSummary {
    pub id: String,
    pub iterations: u64,
}

/// Runs the workflow in a loop until told to stop.
pub struct VirtualUser {
    id: String,
    workflow: Arc<Workflow>,
    invoker: Arc<dyn Invoker>,
    aggregator: Aggregator,
    stop: VuStopListener,
    base_vars: Vars,
}

impl VirtualUser {
    pub fn new(
        id: impl Into<String>,
        workflow: Arc<Workflow>,
        invoker: Arc<dyn Invoker>,
        aggregator: Aggregator,
        stop: VuStopListener,
    ) -> Self {
        Self {
            id: id.into(),
            workflow,
            invoker,
            aggregator,
            stop,
            base_vars: Vars::new(),
        }
    }

    /// Variables every iteration starts from, on top of the built in `vu`, `iteration` and `nonce`.
    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.base_vars = vars;
        self
    }

    /// Run iterations until the stop signal is raised.
    ///
    /// The signal is only checked between iterations, so an iteration that has started always
    /// completes and reports all of its outcomes.
    pub async fn run(mut self) -> VuSummary {
        log::debug!("Starting virtual user {}", self.id);

        let mut iterations = 0;
        loop {
            if self.stop.should_stop() {
                break;
            }

            self.run_iteration(iterations).await;
            iterations += 1;

            if let Some(pause) = self.workflow.iteration_pause() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.stop.stopped() => {}
                }
            }
        }

        log::debug!(
            "Stopping virtual user {} after {} iterations",
            self.id,
            iterations
        );

        VuSummary {
            id: self.id,
            iterations,
        }
    }

    async fn run_iteration(&self, iteration: u64) {
        let mut vars = self.base_vars.clone();
        vars.insert("vu".to_string(), self.id.clone());
        vars.insert("iteration".to_string(), iteration.to_string());
        vars.insert("nonce".to_string(), nanoid::nanoid!());

        let mut halted = false;
        for step in self.workflow.steps() {
            if halted {
                let outcomes = step
                    .checks
                    .iter()
                    .map(|check| OperationOutcome::skipped(&step.label, check.name()))
                    .collect::<Vec<_>>();
                self.aggregator.record_step(None, &outcomes);
                continue;
            }

            let passed = self.run_step(step, &mut vars).await;
            if !passed && !step.continue_on_failure {
                log::trace!(
                    "Step {} failed for {}, skipping the rest of the iteration",
                    step.label,
                    self.id
                );
                halted = true;
                continue;
            }

            if let Some(delay) = step.post_delay {
                tokio::time::sleep(delay).await;
            }
        }

        self.aggregator.record_iteration();
    }

    /// Invoke one step and record its outcomes. Returns whether every check passed.
    async fn run_step(&self, step: &WorkflowStep, vars: &mut Vars) -> bool {
        let (result, record) = match step.request.render(vars) {
            Ok(operation) => {
                let mut record = OperationRecord::new(&step.label);
                let result = self.invoke(operation, step).await;
                record.complete(&result);
                (result, Some(record))
            }
            // Nothing was sent, so there is no operation to count or time.
            Err(e) => (Err(e), None),
        };
        let duration = record
            .as_ref()
            .and_then(|record| record.duration())
            .unwrap_or_default();

        let outcomes = step
            .checks
            .iter()
            .map(|check| {
                OperationOutcome::new(&step.label, check.name(), check.evaluate(&result), duration)
            })
            .collect::<Vec<_>>();
        self.aggregator.record_step(record.as_ref(), &outcomes);

        match &result {
            Ok(response) => {
                for capture in &step.captures {
                    capture.apply(response, vars);
                }
            }
            Err(e) => {
                log::trace!("Step {} failed for {}: {}", step.label, self.id, e);
                for capture in &step.captures {
                    vars.remove(&capture.var);
                }
            }
        }

        outcomes.iter().all(|outcome| outcome.passed)
    }

    async fn invoke(
        &self,
        operation: surge_core::prelude::Operation,
        step: &WorkflowStep,
    ) -> InvokeResult {
        match step.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.invoker.invoke(operation))
                .await
                .unwrap_or(Err(InvokeError::Timeout(timeout))),
            None => self.invoker.invoke(operation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Check, WorkflowStep};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;
    use surge_core::prelude::{vu_stop_signal, Operation, Response};

    type Calls = Arc<Mutex<Vec<String>>>;

    /// Answers with a fixed status per path and records what it was sent.
    struct StubInvoker {
        calls: Calls,
    }

    impl Invoker for StubInvoker {
        fn invoke(&self, operation: Operation) -> BoxFuture<'_, InvokeResult> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", operation.method, operation.path));
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                match (operation.method.as_str(), operation.path.as_str()) {
                    ("POST", "/users") => Ok(Response::new(
                        201,
                        r#"{"id": 9}"#,
                        Duration::from_millis(5),
                    )),
                    ("GET", "/slow") => {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(Response::new(200, "", Duration::from_secs(10)))
                    }
                    ("GET", "/broken") => Ok(Response::new(500, "", Duration::from_millis(5))),
                    _ => Ok(Response::new(200, "", Duration::from_millis(5))),
                }
            }
            .boxed()
        }
    }

    fn stub() -> (Arc<dyn Invoker>, Calls) {
        let calls = Calls::default();
        (
            Arc::new(StubInvoker {
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn captured_id_flows_into_later_steps() {
        let (invoker, calls) = stub();
        let workflow = Workflow::builder()
            .step(
                WorkflowStep::post("create", "/users")
                    .expect_status(201)
                    .capture("id", "/id"),
            )
            .step(WorkflowStep::get("get", "/users/{id}").expect_status(200))
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        let vu = VirtualUser::new(
            "vu-0",
            Arc::new(workflow),
            invoker,
            aggregator.clone(),
            listener,
        );
        vu.run_iteration(0).await;

        assert_eq!(vec!["POST /users", "GET /users/9"], calls.lock().unwrap().clone());
        let stats = aggregator.snapshot();
        assert_eq!(1, stats.iterations);
        assert_eq!(0, stats.failed_checks());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_does_not_stop_iteration_by_default() {
        let (invoker, calls) = stub();
        let workflow = Workflow::builder()
            .step(WorkflowStep::get("broken", "/broken").expect_status(200))
            .step(WorkflowStep::get("list", "/users").expect_status(200))
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
            .run_iteration(0)
            .await;

        assert_eq!(2, calls.lock().unwrap().len());
        let stats = aggregator.snapshot();
        assert_eq!(2, stats.total_checks());
        assert_eq!(1, stats.failed_checks());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_failure_skips_remaining_steps() {
        let (invoker, calls) = stub();
        let workflow = Workflow::builder()
            .step(
                WorkflowStep::get("broken", "/broken")
                    .expect_status(200)
                    .stop_on_failure(),
            )
            .step(
                WorkflowStep::get("list", "/users")
                    .expect_status(200)
                    .check(Check::success("list ok")),
            )
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
            .run_iteration(0)
            .await;

        assert_eq!(vec!["GET /broken"], calls.lock().unwrap().clone());
        let stats = aggregator.snapshot();
        assert_eq!(3, stats.total_checks());
        assert_eq!(3, stats.failed_checks());
        let list = stats.label("list").unwrap();
        assert_eq!(2, list.skipped_checks);
        assert_eq!(0, list.operations);
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_is_a_failed_outcome() {
        let (invoker, _) = stub();
        let workflow = Workflow::builder()
            .step(
                WorkflowStep::get("slow", "/slow")
                    .timeout(Duration::from_millis(100))
                    .check(Check::new("timed out", |result| {
                        matches!(result, Err(InvokeError::Timeout(_)))
                    })),
            )
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
            .run_iteration(0)
            .await;

        let slow = aggregator.snapshot().label("slow").cloned().unwrap();
        assert_eq!(0, slow.failed_checks);
        assert_eq!(1, slow.failed_operations);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_variable_is_a_failed_outcome() {
        let (invoker, calls) = stub();
        let workflow = Workflow::builder()
            .step(WorkflowStep::get("get", "/users/{id}").expect_status(200))
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
            .run_iteration(0)
            .await;

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(1, aggregator.snapshot().failed_checks());
    }

    #[tokio::test(start_paused = true)]
    async fn unrendered_steps_are_not_operations() {
        let (invoker, calls) = stub();
        // The create step answers 200 with no body, so no `id` is captured.
        let workflow = Workflow::builder()
            .step(
                WorkflowStep::post("create", "/accounts")
                    .expect_status(201)
                    .capture("id", "/id"),
            )
            .step(WorkflowStep::get("get", "/users/{id}").expect_status(200))
            .step(WorkflowStep::put("update", "/users/{id}").expect_status(200))
            .step(WorkflowStep::delete("delete", "/users/{id}").expect_status(204))
            .build();
        let aggregator = Aggregator::new();
        let (_handle, listener) = vu_stop_signal();

        VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
            .run_iteration(0)
            .await;

        assert_eq!(vec!["POST /accounts"], calls.lock().unwrap().clone());
        let stats = aggregator.snapshot();
        assert_eq!(4, stats.total_checks());
        assert_eq!(4, stats.failed_checks());
        assert_eq!(1, stats.overall.operations);
        assert_eq!(0, stats.overall.failed_operations);
        assert_eq!(1, stats.overall.latency.count());
        assert_eq!(Some(Duration::from_millis(5)), stats.overall.latency.min());

        let get = stats.label("get").unwrap();
        assert_eq!(1, get.failed_checks);
        assert_eq!(0, get.operations);
        assert!(get.latency.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_between_iterations() {
        let (invoker, _) = stub();
        let workflow = Workflow::builder()
            .step(WorkflowStep::get("list", "/users").expect_status(200))
            .step(WorkflowStep::get("list again", "/users").expect_status(200))
            .iteration_pause(Duration::from_millis(200))
            .build();
        let aggregator = Aggregator::new();
        let (handle, listener) = vu_stop_signal();

        let task = tokio::spawn(
            VirtualUser::new("vu-0", Arc::new(workflow), invoker, aggregator.clone(), listener)
                .run(),
        );

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        handle.stop();
        let summary = task.await.unwrap();

        let stats = aggregator.snapshot();
        assert!(summary.iterations > 0);
        assert_eq!(summary.iterations, stats.iterations);
        assert_eq!(stats.iterations * 2, stats.total_checks());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_before_start_runs_nothing() {
        let (invoker, calls) = stub();
        let workflow = Workflow::builder()
            .step(WorkflowStep::get("list", "/users").expect_status(200))
            .build();
        let (handle, listener) = vu_stop_signal();
        handle.stop();

        let summary = VirtualUser::new(
            "vu-0",
            Arc::new(workflow),
            invoker,
            Aggregator::new(),
            listener,
        )
        .run()
        .await;

        assert_eq!(0, summary.iterations);
        assert!(calls.lock().unwrap().is_empty());
    }
}
