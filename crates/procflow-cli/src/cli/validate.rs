//! `pflow validate`: structural and engine-level checks on definitions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use procflow_core::definition::{discover_definitions, load_definition_file};
use procflow_core::engine::ProcessEngine;
use procflow_infra::memory::MemoryProcessRepository;
use procflow_types::config::EngineConfig;
use procflow_types::process::{NodeKind, ProcessDefinition};

/// Outcome of validating one definition file.
struct Checked {
    path: PathBuf,
    definition: Option<ProcessDefinition>,
    error: Option<String>,
}

pub async fn handle_validate(path: &Path, config: &EngineConfig, json: bool) -> Result<()> {
    let engine = ProcessEngine::builder(Arc::new(MemoryProcessRepository::new()))
        .config(config.clone())
        .build();

    let checked = if path.is_dir() {
        let found = discover_definitions(path)
            .with_context(|| format!("Failed to scan {}", path.display()))?;
        if found.is_empty() {
            bail!("No valid definition files found under {}", path.display());
        }
        found
            .into_iter()
            .map(|(path, def)| check(&engine, path, Ok(def)))
            .collect()
    } else {
        let loaded = load_definition_file(path).map_err(|e| e.to_string());
        vec![check(&engine, path.to_path_buf(), loaded)]
    };

    let failures = checked.iter().filter(|c| c.error.is_some()).count();

    if json {
        let out: Vec<_> = checked
            .iter()
            .map(|c| {
                serde_json::json!({
                    "path": c.path.display().to_string(),
                    "id": c.definition.as_ref().map(|d| d.id.clone()),
                    "version": c.definition.as_ref().map(|d| d.version),
                    "nodes": c.definition.as_ref().map(|d| d.nodes.len()),
                    "valid": c.error.is_none(),
                    "error": c.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for c in &checked {
            print_checked(c);
        }
    }

    if failures > 0 {
        bail!("{failures} definition(s) failed validation");
    }
    Ok(())
}

fn check(
    engine: &ProcessEngine<MemoryProcessRepository>,
    path: PathBuf,
    loaded: std::result::Result<ProcessDefinition, String>,
) -> Checked {
    match loaded {
        Ok(def) => {
            let error = engine.validate(&def).err().map(|e| e.to_string());
            Checked {
                path,
                definition: Some(def),
                error,
            }
        }
        Err(error) => Checked {
            path,
            definition: None,
            error: Some(error),
        },
    }
}

fn print_checked(checked: &Checked) {
    println!();
    match (&checked.definition, &checked.error) {
        (Some(def), None) => {
            println!(
                "  {} {} ({})",
                style("✓").green(),
                style(&def.id).cyan(),
                style(checked.path.display()).dim()
            );
            if let Some(name) = &def.name {
                println!("  Name: {name}");
            }
            println!("  Version: {}", def.version);
            println!();
            println!("{}", node_table(def));
        }
        (_, Some(error)) => {
            println!(
                "  {} {}",
                style("✗").red(),
                style(checked.path.display()).dim()
            );
            println!("  {error}");
        }
        (None, None) => {}
    }
}

fn node_table(def: &ProcessDefinition) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Assignees"),
            Cell::new("Transitions"),
        ]);

    for node in &def.nodes {
        let assignees = match &node.kind {
            NodeKind::Task { assignees, .. } => assignees.join(", "),
            _ => String::new(),
        };
        let transitions = node
            .transitions
            .iter()
            .map(|t| match &t.condition {
                Some(guard) => {
                    let groups: Vec<String> = guard.groups().iter().map(|g| g.join(" && ")).collect();
                    format!("{} [{}]", t.target, groups.join(" || "))
                }
                None => t.target.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            Cell::new(node.label()),
            Cell::new(node.kind.as_str()),
            Cell::new(assignees),
            Cell::new(transitions),
        ]);
    }
    table
}
