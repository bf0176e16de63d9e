//! Connect to servers and list their tools.

use toolhub_core::Settings;
use toolhub_mcp::ServerSurvey;

use super::with_manager;

fn print_survey(entry: &ServerSurvey) {
    let marker = if entry.status.connected { "✓" } else { "✗" };
    println!("{} {}", marker, entry.status);
    for tool in &entry.tools {
        match &tool.description {
            Some(description) => println!("    {:<24} {}", tool.name, first_line(description)),
            None => println!("    {}", tool.name),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

pub async fn run(settings: &Settings, server: Option<&str>, json: bool) -> anyhow::Result<()> {
    with_manager(settings, |manager| async move {
        let survey = match server {
            Some(name) => {
                let connection = manager
                    .get_server(name)
                    .await
                    .map_err(toolhub_core::Error::from)?;
                vec![ServerSurvey {
                    status: connection.status(),
                    tools: connection.list_tools(),
                }]
            }
            None => manager.survey().await,
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&survey)?);
        } else if survey.is_empty() {
            println!("No servers configured in {}", settings.mcp.config_path.display());
        } else {
            for entry in &survey {
                print_survey(entry);
            }
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("Read a file.\n\nLong help."), "Read a file.");
        assert_eq!(first_line(""), "");
    }
}
