//! Settings commands.

use toolhub_core::Settings;

use crate::ConfigAction;

pub fn handle(action: ConfigAction, settings: &Settings, json: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            if json {
                println!("{}", serde_json::to_string_pretty(settings)?);
            } else {
                println!("# Config directory: {}", Settings::config_dir().display());
                print!("{}", settings.to_toml()?);
            }
        }
        ConfigAction::Validate => {
            let result = settings.validate();
            for issue in result.warnings() {
                println!("  ! {}: {}", issue.field, issue.message);
            }
            for issue in result.errors() {
                println!("  ✗ {}: {}", issue.field, issue.message);
            }
            if result.is_ok() {
                println!("✓ Configuration is valid");
            } else {
                anyhow::bail!("configuration has {} error(s)", result.errors().len());
            }
        }
    }
    Ok(())
}
