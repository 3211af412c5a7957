//! Output for the trackpanel subcommands
//!
//! Every printer takes the cache by reference and renders either a table or
//! JSON. Lookups go through the public cache API so the CLI shows exactly what
//! the panel would.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde_json::json;
use trackpanel_core::{LoadReport, SchemaCache};

// ============================================================================
// Show
// ============================================================================

pub fn print_show(cache: &SchemaCache, json: bool) -> Result<()> {
    let types = cache.entity_types();
    let codes = cache.status_codes();

    if json {
        let types: Vec<_> = types
            .iter()
            .map(|t| {
                json!({
                    "entity_type": t,
                    "display_name": cache.get_type_display_name(t),
                    "fields": cache.field_names(t).len(),
                })
            })
            .collect();
        let statuses: Vec<_> = codes
            .iter()
            .map(|c| {
                json!({
                    "code": c,
                    "name": cache.get_status_long_name(c),
                    "bg_color": cache.get_status_color(c),
                })
            })
            .collect();
        return print_json(&json!({
            "cache_dir": cache.config().cache_dir,
            "types": types,
            "statuses": statuses,
            "load_errors": report_messages(cache.load_report()),
        }));
    }

    println!("trackpanel cache: {}", cache.config().cache_dir.display());
    print_report(cache.load_report());
    println!();

    if types.is_empty() {
        println!("No schema cached");
    } else {
        let mut table = new_table(&["Entity Type", "Display Name", "Fields"]);
        for t in &types {
            table.add_row(vec![
                Cell::new(t),
                Cell::new(cache.get_type_display_name(t)),
                Cell::new(cache.field_names(t).len()),
            ]);
        }
        println!("{table}");
    }
    println!();

    if codes.is_empty() {
        println!("No statuses cached");
    } else {
        let mut table = new_table(&["Code", "Name", "Color"]);
        for code in &codes {
            table.add_row(vec![
                Cell::new(code),
                Cell::new(cache.get_status_long_name(code)),
                Cell::new(cache.get_status_color(code).unwrap_or_else(|| "-".to_string())),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

// ============================================================================
// Single lookups
// ============================================================================

pub fn print_type(cache: &SchemaCache, entity_type: &str, json: bool) -> Result<()> {
    let display = cache.get_type_display_name(entity_type);
    if json {
        return print_json(&json!({
            "entity_type": entity_type,
            "display_name": display,
            "cached": cache.entity_types().iter().any(|t| t == entity_type),
        }));
    }
    println!("{display}");
    Ok(())
}

pub fn print_field(cache: &SchemaCache, entity_type: &str, field_name: &str, json: bool) -> Result<()> {
    let display = cache.get_field_display_name(entity_type, field_name);
    let data_type = cache.get_field_data_type(entity_type, field_name);
    let empty = cache.get_empty_phrase(entity_type, field_name);

    if json {
        return print_json(&json!({
            "entity_type": entity_type,
            "field": field_name,
            "display_name": display,
            "data_type": data_type,
            "empty_phrase": empty,
        }));
    }

    println!("{display}");
    println!("  type:  {}", data_type.as_deref().unwrap_or("unknown"));
    println!("  empty: {empty}");
    Ok(())
}

pub fn print_status(cache: &SchemaCache, code: &str, name_only: bool, json: bool) -> Result<()> {
    let display = cache.get_status_display_name(code, name_only);
    if json {
        return print_json(&json!({
            "code": code,
            "display_name": display,
            "long_name": cache.get_status_long_name(code),
            "bg_color": cache.get_status_color(code),
            "icon": cache.get_status_icon_resource(code),
        }));
    }
    println!("{display}");
    Ok(())
}

// ============================================================================
// Refresh
// ============================================================================

pub fn print_refresh(cache: &SchemaCache, json: bool) -> Result<()> {
    let snap = cache.snapshot();

    if json {
        print_json(&json!({
            "schema_loaded": snap.schema_loaded,
            "status_loaded": snap.status_loaded,
            "types": snap.type_count,
            "fields": snap.field_count,
            "statuses": snap.status_count,
        }))?;
    } else {
        let mut table = new_table(&["Dataset", "Loaded", "Entries"]);
        table.add_row(vec![
            Cell::new("schema"),
            loaded_cell(snap.schema_loaded),
            Cell::new(format!("{} types, {} fields", snap.type_count, snap.field_count)),
        ]);
        table.add_row(vec![
            Cell::new("status"),
            loaded_cell(snap.status_loaded),
            Cell::new(format!("{} codes", snap.status_count)),
        ]);
        println!("{table}");
    }

    if !(snap.schema_loaded && snap.status_loaded) {
        anyhow::bail!("Refresh incomplete, see log output for the fetch error");
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

fn loaded_cell(loaded: bool) -> Cell {
    if loaded {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("no").fg(Color::Red)
    }
}

fn print_report(report: &LoadReport) {
    for error in &report.errors {
        eprintln!("  ! {}: {}", error.source, error.message);
    }
}

fn report_messages(report: &LoadReport) -> Vec<String> {
    report
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.source, e.message))
        .collect()
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}
