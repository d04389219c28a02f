//! Configuration view and validation commands: `tribunal config`.

use anyhow::Result;
use std::path::Path;
use tribunal::tribunal_config::{TribunalConfig, TribunalToml};

use super::super::ConfigCommands;

fn print_toml(toml: &TribunalToml) {
    let analysts: Vec<&str> = toml.panel.analysts.iter().map(|r| r.as_str()).collect();
    println!("[panel]");
    println!("  analysts = {:?}", analysts);
    println!();

    println!("[weights]");
    for (role, weight) in toml.weights.iter() {
        println!("  {} = {}", role, weight);
    }
    println!();

    println!("[session]");
    println!("  deadline_secs = {}", toml.session.deadline_secs);
    println!("  max_statement_chars = {}", toml.session.max_statement_chars);
    println!();

    println!("[extractor]");
    println!(
        "  completion_markers = {:?}",
        toml.extractor.completion_markers
    );
    println!(
        "  max_observation_chars = {}",
        toml.extractor.max_observation_chars
    );
    println!();

    println!("[stream]");
    println!("  queue_capacity = {}", toml.stream.queue_capacity);
    println!("  delivery_timeout_ms = {}", toml.stream.delivery_timeout_ms);
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = TribunalConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Tribunal Configuration");
            println!("======================");
            println!();

            match &config.source {
                Some(source) => println!("Config file: {}", source.display()),
                None => println!("No tribunal.toml found, using defaults"),
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env overrides):");
            println!("  deadline = {}s", config.deadline().as_secs());
            println!("  queue_capacity = {}", config.queue_capacity());
            println!();

            if config.source.is_none() {
                println!("Run 'tribunal config init' to create a tribunal.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if config.source.is_none() {
                println!("No tribunal.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("tribunal.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(config.config_dir())?;
            TribunalToml::default().save(&config_path)?;

            println!("Created tribunal.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [panel] analysts");
            println!("  - [weights] per-analyst weights");
            println!("  - [session] deadline_secs, max_statement_chars");
            println!();
        }
    }

    Ok(())
}
