use crate::type_name;
use async_trait::async_trait;
use flowcore::{interpolate, ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpConfig {
    fn parse(config: &Value) -> Result<Self, NodeError> {
        let config = if config.is_null() {
            Value::Object(Map::new())
        } else {
            config.clone()
        };
        serde_json::from_value(config)
            .map_err(|e| NodeError::Configuration(format!("Invalid http.request config: {}", e)))
    }
}

/// HTTP request node
///
/// The URL comes from the `url` config or the `url` input. `critical: true`
/// aborts the whole run when the request fails.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config = HttpConfig::parse(&interpolate(&ctx.config, &ctx.input))?;

        let url = match (&config.url, ctx.input.get("url")) {
            (Some(url), _) => url.clone(),
            (None, Some(Value::String(url))) => url.clone(),
            (None, Some(other)) => {
                return Err(NodeError::InvalidInputType {
                    field: "url".to_string(),
                    expected: "string".to_string(),
                    actual: type_name(other).to_string(),
                })
            }
            (None, None) => return Err(NodeError::MissingInput("url".to_string())),
        };
        let method = config.method.to_uppercase();
        let body = config.body.clone().or_else(|| ctx.input.get("body").cloned());

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            request = match body {
                Some(Value::String(text)) => request.body(text),
                Some(json) => request.json(&json),
                None => request,
            };
        }

        for (key, value) in &config.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        if (200..300).contains(&status) {
            ctx.events.info(format!("Response status: {}", status));
        } else {
            ctx.events.warn(format!("Response status: {}", status));
        }

        let mut output = Map::new();
        output.insert("status".to_string(), Value::from(status));
        output.insert("body".to_string(), body);
        output.insert("headers".to_string(), Value::Object(headers));
        Ok(NodeOutput::new(Value::Object(output)))
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn is_critical(&self, config: &Value) -> bool {
        config.get("critical").and_then(Value::as_bool).unwrap_or(false)
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        let config = HttpConfig::parse(config)?;
        match config.method.to_uppercase().as_str() {
            "GET" | "POST" | "PUT" | "PATCH" | "DELETE" => Ok(()),
            other => Err(NodeError::Configuration(format!("Unsupported method: {}", other))),
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
