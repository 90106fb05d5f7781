//! `gantry validate` — check a pipeline definition without running it

use anyhow::{Context, Result};
use colored::*;
use gantry_config::parser::parse_pipeline;

pub fn handle_validate(pipeline: &str) -> Result<i32> {
    let source = std::fs::read_to_string(pipeline)
        .with_context(|| format!("reading pipeline definition '{pipeline}'"))?;

    match parse_pipeline(&source) {
        Ok(definition) => {
            println!(
                "{} {} ({} jobs, {} commands, {} workflows)",
                "valid:".green().bold(),
                pipeline,
                definition.jobs.len(),
                definition.commands.len(),
                definition.workflows.len()
            );
            Ok(0)
        }
        Err(err) => {
            println!("{} {}", "invalid:".red().bold(), err);
            Ok(1)
        }
    }
}
