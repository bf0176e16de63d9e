//! Call a tool on a server.

use anyhow::Context;
use serde_json::Value;
use toolhub_core::Settings;
use toolhub_mcp::{CallToolResult, ToolContent};

use super::with_manager;

/// Parse `--args`; it must be a JSON object when given.
fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }
    Ok(Some(value))
}

fn print_result(result: &CallToolResult) {
    match result.typed_content() {
        Ok(items) => {
            for item in items {
                match item {
                    ToolContent::Text { text } => println!("{}", text),
                    ToolContent::Image { data, mime_type } => {
                        println!("[image {} ({} bytes base64)]", mime_type, data.len())
                    }
                    ToolContent::Resource { resource } => {
                        println!("[resource {}]", resource.uri);
                        if let Some(text) = resource.text {
                            println!("{}", text);
                        }
                    }
                }
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Printing raw tool content");
            for item in &result.content {
                println!("{}", item);
            }
        }
    }
}

pub async fn run(
    settings: &Settings,
    server: &str,
    tool: &str,
    args: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let arguments = parse_arguments(args)?;

    with_manager(settings, |manager| async move {
        let result = manager
            .call_tool(server, tool, arguments)
            .await
            .map_err(toolhub_core::Error::from)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_result(&result);
        }

        if result.is_error {
            anyhow::bail!("tool {} reported an error", tool);
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments(None).unwrap().is_none());
        let value = parse_arguments(Some(r#"{"path": "README.md"}"#)).unwrap().unwrap();
        assert_eq!(value["path"], "README.md");
    }

    #[test]
    fn test_parse_arguments_rejects_non_objects() {
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{not json")).is_err());
    }
}
