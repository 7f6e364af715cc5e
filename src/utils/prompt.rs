//! User prompt utilities for interactive confirmation

use anyhow::Result;
use dialoguer::Confirm;

/// Ask user for yes/no confirmation
pub fn confirm(prompt: &str) -> Result<bool> {
    let result = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(result)
}

/// Skip the prompt when `assume_yes` is set or confirmation is disabled
pub fn confirm_destructive(prompt: &str, assume_yes: bool, enabled: bool) -> Result<bool> {
    if assume_yes || !enabled {
        return Ok(true);
    }
    confirm(prompt)
}
