use tabled::Tabled;

#[derive(Tabled)]
pub struct OperationRow {
    pub label: String,
    pub operations: u64,
    #[tabled(display = "percent")]
    pub failed: f64,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    #[tabled(display = "float2")]
    pub min_time_ms: f64,
    #[tabled(display = "float2")]
    pub med_time_ms: f64,
    #[tabled(display = "float2")]
    pub p90_time_ms: f64,
    #[tabled(display = "float2")]
    pub p95_time_ms: f64,
    #[tabled(display = "float2")]
    pub max_time_ms: f64,
}

#[derive(Tabled)]
pub struct CheckRow {
    pub check: String,
    pub passes: u64,
    pub fails: u64,
    #[tabled(display = "percent")]
    pub pass_rate: f64,
}

#[derive(Tabled)]
pub struct ThresholdRow {
    pub threshold: String,
    pub observed: String,
    pub result: &'static str,
}

#[derive(Tabled)]
pub struct LiveViolationRow {
    pub threshold: String,
    #[tabled(display = "float2")]
    pub first_violated_s: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

fn percent(n: &f64) -> String {
    format!("{:.2}%", n * 100.0)
}
