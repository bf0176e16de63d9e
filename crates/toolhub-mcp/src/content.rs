//! Conversion of workflow proxy results into MCP content.
//!
//! Workflow APIs answer with one tagged object, or a list of them, whose
//! `type` is `text`, `markdown`, `table`, `image` or `resource`. The shape
//! is resolved once into [`WorkflowOutput`]; anything else is a
//! classification error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{McpError, TransportError};
use crate::protocol::{ResourceContents, ToolContent};

/// One row of a table result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableRow {
    pub content: String,
}

/// A single result item from a workflow proxy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkflowOutput {
    Text { content: String },
    Markdown { content: String },
    /// Each row becomes its own text item.
    Table { data: Vec<TableRow> },
    /// Fetched and embedded as base64.
    Image {
        url: String,
        #[serde(default, rename = "mimeType", alias = "mime_type")]
        mime_type: Option<String>,
    },
    Resource {
        uri: String,
        #[serde(default, rename = "mimeType", alias = "mime_type")]
        mime_type: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
}

/// Resolve a proxy result into typed outputs.
pub fn classify(result: Value) -> Result<Vec<WorkflowOutput>, McpError> {
    match result {
        Value::Object(_) => Ok(vec![classify_item(result)?]),
        Value::Array(items) => items.into_iter().map(classify_item).collect(),
        other => Err(McpError::classification(format!(
            "expected an object or a list, got {}",
            other
        ))),
    }
}

fn classify_item(item: Value) -> Result<WorkflowOutput, McpError> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    serde_json::from_value(item).map_err(|e| McpError::classification(format!("type {}: {}", kind, e)))
}

/// Turns workflow results into MCP content items.
#[derive(Debug, Clone, Default)]
pub struct ContentAdapter {
    client: reqwest::Client,
}

impl ContentAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Classify a raw proxy result and convert it.
    pub async fn adapt(&self, result: Value) -> Result<Vec<ToolContent>, McpError> {
        self.into_content(classify(result)?).await
    }

    pub async fn into_content(&self, outputs: Vec<WorkflowOutput>) -> Result<Vec<ToolContent>, McpError> {
        let mut content = Vec::with_capacity(outputs.len());
        for output in outputs {
            match output {
                WorkflowOutput::Text { content: text } | WorkflowOutput::Markdown { content: text } => {
                    content.push(ToolContent::text(text));
                }
                WorkflowOutput::Table { data } => {
                    content.extend(data.into_iter().map(|row| ToolContent::text(row.content)));
                }
                WorkflowOutput::Image { url, mime_type } => {
                    let (data, fetched_type) = self.fetch_base64(&url).await?;
                    let mime_type = mime_type
                        .or(fetched_type)
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    content.push(ToolContent::image(data, mime_type));
                }
                WorkflowOutput::Resource {
                    uri,
                    mime_type,
                    content: text,
                } => content.push(ToolContent::Resource {
                    resource: ResourceContents {
                        uri,
                        mime_type,
                        text,
                        blob: None,
                    },
                }),
            }
        }
        Ok(content)
    }

    async fn fetch_base64(&self, url: &str) -> Result<(String, Option<String>), McpError> {
        debug!(url = url, "Fetching image");
        let response = self.client.get(url).send().await.map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body).into());
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = response.bytes().await.map_err(TransportError::from)?;

        Ok((STANDARD.encode(&bytes), mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_single_object() {
        let outputs = classify(json!({"type": "markdown", "content": "# Title"})).unwrap();
        assert_eq!(outputs, vec![WorkflowOutput::Markdown { content: "# Title".into() }]);
    }

    #[test]
    fn test_classify_list() {
        let outputs = classify(json!([
            {"type": "text", "content": "a"},
            {"type": "table", "data": [{"content": "r1"}, {"content": "r2"}]},
            {"type": "image", "url": "http://example.com/cat.png"}
        ]))
        .unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(matches!(outputs[1], WorkflowOutput::Table { ref data } if data.len() == 2));
    }

    #[test]
    fn test_unknown_type_is_classification_error() {
        let err = classify(json!({"type": "video", "url": "x"})).unwrap_err();
        assert!(matches!(err, McpError::Classification(ref msg) if msg.contains("video")));
    }

    #[test]
    fn test_scalar_is_classification_error() {
        assert!(matches!(classify(json!("just text")), Err(McpError::Classification(_))));
        assert!(matches!(classify(json!({"content": "no type"})), Err(McpError::Classification(_))));
    }

    #[tokio::test]
    async fn test_text_like_outputs_need_no_network() {
        let adapter = ContentAdapter::default();
        let content = adapter
            .adapt(json!([
                {"type": "text", "content": "plain"},
                {"type": "table", "data": [{"content": "r1"}, {"content": "r2"}]},
                {"type": "resource", "uri": "file:///report.csv", "mimeType": "text/csv", "content": "a,b"}
            ]))
            .await
            .unwrap();

        let texts: Vec<_> = content.iter().filter_map(ToolContent::as_text).collect();
        assert_eq!(texts, vec!["plain", "r1", "r2"]);
        assert!(matches!(
            &content[3],
            ToolContent::Resource { resource } if resource.mime_type.as_deref() == Some("text/csv")
        ));
    }
}
