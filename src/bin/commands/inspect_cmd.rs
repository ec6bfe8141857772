use anyhow::{Context, Result};
use netwalk::IpVersion;
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{format_bytes, format_number, format_unix_timestamp, open_reader};

pub fn cmd_inspect(database: PathBuf, mmap: bool, json_output: bool) -> Result<()> {
    let reader = open_reader(&database, mmap)?;
    let file_size = std::fs::metadata(&database)
        .with_context(|| format!("Failed to stat {}", database.display()))?
        .len() as usize;

    let meta = reader.metadata();
    let ip_version = match meta.ip_version {
        IpVersion::V4 => 4,
        IpVersion::V6 => 6,
    };

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "file_size": file_size,
            "database_type": meta.database_type,
            "ip_version": ip_version,
            "record_size": meta.record_size as u32,
            "node_count": meta.node_count,
            "tree_size": meta.tree_size(),
            "data_section_size": meta.marker_offset.saturating_sub(meta.data_section_start()),
            "metadata": meta.raw.to_json(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:      {}", database.display());
    println!("Size:          {}", format_bytes(file_size));
    if !meta.database_type.is_empty() {
        println!("Type:          {}", meta.database_type);
    }
    println!("IP version:    IPv{}", ip_version);
    println!();
    println!("Search tree:");
    println!("  Nodes:       {}", format_number(meta.node_count as usize));
    println!("  Record size: {} bits", meta.record_size as u32);
    println!("  Tree size:   {}", format_bytes(meta.tree_size()));
    println!(
        "  Data size:   {}",
        format_bytes(meta.marker_offset.saturating_sub(meta.data_section_start()))
    );

    println!();
    println!("Metadata:");
    println!(
        "  Format:      {}.{}",
        meta.binary_format_major_version, meta.binary_format_minor_version
    );
    if meta.build_epoch > 0 {
        println!("  Built:       {}", format_unix_timestamp(meta.build_epoch));
    }
    if !meta.languages.is_empty() {
        println!("  Languages:   {}", meta.languages.join(", "));
    }

    let mut descriptions: Vec<_> = meta.description.iter().collect();
    descriptions.sort();
    for (lang, text) in descriptions {
        println!("  Description ({}): {}", lang, text);
    }

    Ok(())
}
