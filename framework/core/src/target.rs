use std::time::Duration;

/// Where the target service lives and how to authenticate with it.
///
/// Opaque to the engine, it is handed unchanged to whatever builds the [crate::prelude::Invoker].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetConfig {
    /// Base address of the service, for example `http://localhost:3000`.
    pub base_url: Option<String>,
    /// Headers sent with every request, typically credentials.
    pub headers: Vec<(String, String)>,
    /// Upper bound on a single invocation.
    pub timeout: Option<Duration>,
}
