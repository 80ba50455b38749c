use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use surge_core::prelude::{ConfigError, InvokeError, InvokeResult, Operation, Response};

/// Variables available to request templates, rebuilt at the start of every iteration.
pub type Vars = BTreeMap<String, String>;

type Predicate = Arc<dyn Fn(&InvokeResult) -> bool + Send + Sync>;

/// A named assertion about the result of one step.
///
/// Every check of a step is evaluated for every invocation, whether or not earlier checks passed.
#[derive(Clone)]
pub struct Check {
    name: String,
    predicate: Predicate,
}

impl Check {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&InvokeResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Passes when the target responded with exactly `code`.
    pub fn status(name: impl Into<String>, code: u16) -> Self {
        Self::new(name, move |result| {
            matches!(result, Ok(response) if response.status == code)
        })
    }

    /// Passes when the target responded with any status in `200..400`.
    pub fn success(name: impl Into<String>) -> Self {
        Self::new(name, |result| {
            matches!(result, Ok(response) if response.is_success())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, result: &InvokeResult) -> bool {
        (self.predicate)(result)
    }
}

impl Debug for Check {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Copy a value out of a JSON response body into the iteration's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub var: String,
    /// A JSON pointer, such as `/id` or `/data/0/name`.
    pub pointer: String,
}

impl Capture {
    /// Apply the capture to a response. If the body is not JSON or the pointer does not resolve,
    /// the variable is removed so that later steps fail to render instead of reusing a stale value.
    pub(crate) fn apply(&self, response: &Response, vars: &mut Vars) {
        let value = response
            .json()
            .and_then(|body| body.pointer(&self.pointer).cloned());

        match value {
            Some(Value::Null) | None => {
                vars.remove(&self.var);
            }
            Some(Value::String(s)) => {
                vars.insert(self.var.clone(), s);
            }
            Some(other) => {
                vars.insert(self.var.clone(), other.to_string());
            }
        }
    }
}

/// The request a step sends, with `{name}` placeholders filled from the iteration's variables.
///
/// Placeholders are substituted in the path, header values and every JSON string in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl RequestTemplate {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn render(&self, vars: &Vars) -> Result<Operation, InvokeError> {
        let mut operation = Operation::new(self.method.clone(), substitute(&self.path, vars)?);

        for (name, value) in &self.headers {
            operation = operation.with_header(name.clone(), substitute(value, vars)?);
        }

        if let Some(body) = &self.body {
            operation = operation.with_body(render_value(body, vars)?);
        }

        Ok(operation)
    }
}

fn render_value(value: &Value, vars: &Vars) -> Result<Value, InvokeError> {
    Ok(match value {
        Value::String(s) => Value::String(substitute(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, vars))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, vars)?)))
                .collect::<Result<_, InvokeError>>()?,
        ),
        other => other.clone(),
    })
}

/// Replace `{name}` with the value of `name`. Braces around anything that isn't a variable name
/// are left alone.
fn substitute(template: &str, vars: &Vars) -> Result<String, InvokeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) if is_var_name(&after[..close]) => {
                let name = &after[..close];
                let value = vars
                    .get(name)
                    .ok_or_else(|| InvokeError::Render(format!("Missing variable `{name}`")))?;
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_var_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One labeled operation in a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub(crate) label: String,
    pub(crate) request: RequestTemplate,
    pub(crate) checks: Vec<Check>,
    pub(crate) captures: Vec<Capture>,
    pub(crate) post_delay: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) continue_on_failure: bool,
}

impl WorkflowStep {
    pub fn new(
        label: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            request: RequestTemplate::new(method, path),
            checks: Vec::new(),
            captures: Vec::new(),
            post_delay: None,
            timeout: None,
            continue_on_failure: true,
        }
    }

    pub fn get(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(label, "GET", path)
    }

    pub fn post(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(label, "POST", path)
    }

    pub fn put(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(label, "PUT", path)
    }

    pub fn delete(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(label, "DELETE", path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.request.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Shorthand for a [Check::status] check named `<label> status is <code>`.
    pub fn expect_status(self, code: u16) -> Self {
        let name = format!("{} status is {code}", self.label);
        self.check(Check::status(name, code))
    }

    /// After a response, store the value at JSON `pointer` in the variable `var`.
    pub fn capture(mut self, var: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.captures.push(Capture {
            var: var.into(),
            pointer: pointer.into(),
        });
        self
    }

    /// Pause for this long after the step before moving on.
    pub fn post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = Some(delay);
        self
    }

    /// Give up on the invocation after this long. The step's checks then see
    /// [InvokeError::Timeout].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip the rest of the iteration if any check of this step fails.
    ///
    /// The checks of the skipped steps are still recorded, as failures.
    pub fn stop_on_failure(mut self) -> Self {
        self.continue_on_failure = false;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn request(&self) -> &RequestTemplate {
        &self.request
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }
}

/// The ordered steps each virtual user repeats for as long as it runs.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    steps: Vec<WorkflowStep>,
    iteration_pause: Option<Duration>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn iteration_pause(&self) -> Option<Duration> {
        self.iteration_pause
    }

    /// The number of check outcomes every iteration produces, skipped steps included.
    pub fn checks_per_iteration(&self) -> usize {
        self.steps.iter().map(|step| step.checks.len()).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyWorkflow);
        }

        if let Some(index) = self
            .steps
            .iter()
            .position(|step| step.label.trim().is_empty())
        {
            return Err(ConfigError::EmptyStepLabel { index });
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    steps: Vec<WorkflowStep>,
    iteration_pause: Option<Duration>,
}

impl WorkflowBuilder {
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Pause between iterations. The pause is cut short when the virtual user is asked to stop.
    pub fn iteration_pause(mut self, pause: Duration) -> Self {
        self.iteration_pause = Some(pause);
        self
    }

    pub fn build(self) -> Workflow {
        Workflow {
            steps: self.steps,
            iteration_pause: self.iteration_pause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn response(status: u16, body: &'static str) -> Response {
        Response::new(status, body, Duration::from_millis(1))
    }

    #[test]
    fn render_substitutes_path_headers_and_body() {
        let template = WorkflowStep::put("update", "/users/{id}")
            .with_header("X-Request", "iteration-{iteration}")
            .with_body(json!({
                "name": "Updated User {vu}",
                "tags": ["{vu}", 3],
                "age": 31,
            }));

        let operation = template
            .request()
            .render(&vars(&[("id", "42"), ("iteration", "7"), ("vu", "vu-1")]))
            .unwrap();

        assert_eq!(
            Operation::new("PUT", "/users/42")
                .with_header("X-Request", "iteration-7")
                .with_body(json!({
                    "name": "Updated User vu-1",
                    "tags": ["vu-1", 3],
                    "age": 31,
                })),
            operation
        );
    }

    #[test]
    fn render_fails_on_missing_variable() {
        let template = RequestTemplate::new("GET", "/users/{id}");

        let err = template.render(&Vars::new()).unwrap_err();
        assert_eq!(InvokeError::Render("Missing variable `id`".to_string()), err);
    }

    #[test]
    fn braces_that_are_not_variables_are_kept() {
        let out = substitute("/search?q={ not a var }&x={}", &Vars::new()).unwrap();
        assert_eq!("/search?q={ not a var }&x={}", out);
    }

    #[test]
    fn query_strings_render_unchanged() {
        let template = RequestTemplate::new("GET", "/users?limit=20&offset=0");

        let operation = template.render(&Vars::new()).unwrap();
        assert_eq!("/users?limit=20&offset=0", operation.path);
    }

    #[test]
    fn status_check_against_results() {
        let check = Check::status("create status is 201", 201);

        assert!(check.evaluate(&Ok(response(201, ""))));
        assert!(!check.evaluate(&Ok(response(200, ""))));
        assert!(!check.evaluate(&Err(InvokeError::Transport("refused".to_string()))));
    }

    #[test]
    fn success_check_accepts_2xx_and_3xx() {
        let check = Check::success("ok");

        assert!(check.evaluate(&Ok(response(204, ""))));
        assert!(check.evaluate(&Ok(response(302, ""))));
        assert!(!check.evaluate(&Ok(response(500, ""))));
    }

    #[test]
    fn capture_string_and_number() {
        let mut vars = Vars::new();

        Capture {
            var: "id".to_string(),
            pointer: "/id".to_string(),
        }
        .apply(&response(201, r#"{"id": 17, "name": "x"}"#), &mut vars);
        Capture {
            var: "name".to_string(),
            pointer: "/name".to_string(),
        }
        .apply(&response(201, r#"{"id": 17, "name": "x"}"#), &mut vars);

        assert_eq!(vars, self::vars(&[("id", "17"), ("name", "x")]));
    }

    #[test]
    fn failed_capture_removes_stale_value() {
        let mut vars = vars(&[("id", "17")]);

        Capture {
            var: "id".to_string(),
            pointer: "/id".to_string(),
        }
        .apply(&response(500, "Internal Server Error"), &mut vars);

        assert!(!vars.contains_key("id"));
    }

    #[test]
    fn validate_workflow() {
        assert!(matches!(
            Workflow::builder().build().validate(),
            Err(ConfigError::EmptyWorkflow)
        ));

        let workflow = Workflow::builder()
            .step(WorkflowStep::get("list", "/users"))
            .step(WorkflowStep::get("  ", "/users"))
            .build();
        assert!(matches!(
            workflow.validate(),
            Err(ConfigError::EmptyStepLabel { index: 1 })
        ));
    }

    #[test]
    fn checks_per_iteration_counts_all_steps() {
        let workflow = Workflow::builder()
            .step(
                WorkflowStep::post("create", "/users")
                    .expect_status(201)
                    .check(Check::success("create ok")),
            )
            .step(WorkflowStep::get("get", "/users/{id}").expect_status(200))
            .step(WorkflowStep::get("ping", "/ping"))
            .build();

        assert_eq!(3, workflow.checks_per_iteration());
        assert_eq!("create status is 201", workflow.steps()[0].checks()[0].name());
    }
}
