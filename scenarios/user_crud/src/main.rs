use std::time::Duration;

use serde_json::json;
use surge_http_client::HttpInvoker;
use surge_runner::prelude::*;

/// Used when neither `--target` nor `SURGE_TARGET` is set.
const DEFAULT_BASE_URL: &str = "http://localhost:3000";

fn workflow() -> Workflow {
    Workflow::builder()
        .step(
            WorkflowStep::post("create", "/users")
                .with_body(json!({
                    "username": "loadtest",
                    "email": "load_{nonce}@example.com",
                    "active": true,
                }))
                .check(Check::status("create 201", 201))
                .capture("id", "/id"),
        )
        .step(WorkflowStep::get("get", "/users/{id}").check(Check::status("get 200", 200)))
        .step(
            WorkflowStep::get("list", "/users?limit=20&offset=0")
                .check(Check::status("list 200", 200)),
        )
        .step(
            WorkflowStep::put("update", "/users/{id}")
                .with_body(json!({ "active": false }))
                .check(Check::status("update 200", 200)),
        )
        .step(
            WorkflowStep::delete("delete", "/users/{id}")
                .check(Check::status("delete 204", 204)),
        )
        .iteration_pause(Duration::from_millis(200))
        .build()
}

fn invoker(target: &TargetConfig) -> anyhow::Result<HttpInvoker> {
    let mut target = target.clone();
    if target.base_url.is_none() {
        // Also accept the variable the service's own tooling uses.
        target.base_url =
            Some(std::env::var("BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()));
    }

    log::info!(
        "Sending load to {}",
        target.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    );

    HttpInvoker::from_target(&target)
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_stages(vec![
            // warm-up
            Stage::new(5, Duration::from_secs(20)),
            Stage::new(20, Duration::from_secs(40)),
            // peak
            Stage::new(50, Duration::from_secs(60)),
            Stage::new(0, Duration::from_secs(20)),
        ])
        .with_default_threshold("http_req_failed", "rate<0.01")
        .with_default_threshold("http_req_duration", "p(95)<500")
        .with_default_request_timeout(Duration::from_secs(30))
        .use_workflow(workflow())
        .use_invoker(invoker);

    let report = run(builder)?;

    if !report.verdict.passed {
        anyhow::bail!(
            "{} of {} thresholds failed",
            report.verdict.violations.len(),
            report.summary.thresholds.len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_covers_the_user_lifecycle() {
        let workflow = workflow();

        workflow.validate().unwrap();
        assert_eq!(
            vec!["create", "get", "list", "update", "delete"],
            workflow
                .steps()
                .iter()
                .map(|step| step.label())
                .collect::<Vec<_>>()
        );
        assert_eq!(5, workflow.checks_per_iteration());
    }

    #[test]
    fn each_iteration_creates_a_unique_email() {
        let workflow = workflow();
        let create = workflow.steps()[0].request();
        let vars = Vars::from([("nonce".to_string(), "abc123".to_string())]);

        let operation = create.render(&vars).unwrap();
        assert_eq!(
            Some(json!({
                "username": "loadtest",
                "email": "load_abc123@example.com",
                "active": true,
            })),
            operation.body
        );
    }
}
