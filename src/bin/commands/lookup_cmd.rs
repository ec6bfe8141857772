use anyhow::{Context, Result};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::open_reader;

pub fn cmd_lookup(database: PathBuf, mmap: bool, ip: String, quiet: bool) -> Result<()> {
    let reader = open_reader(&database, mmap)?;

    let addr: IpAddr = ip
        .trim()
        .parse()
        .with_context(|| format!("Invalid IP address: {}", ip))?;

    let result = reader
        .lookup_value(addr)
        .with_context(|| format!("Lookup failed for: {}", ip))?;

    let found = result.is_some();
    if quiet {
        // Quiet mode: no output, just exit code
        std::process::exit(if found { 0 } else { 1 });
    }

    // Always an array so "not found" is still valid JSON
    match result {
        Some((network, data)) => {
            let entry = json!({
                "network": network.to_string(),
                "prefix_len": network.prefix_len(),
                "data": data.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&json!([entry]))?);
        }
        None => println!("[]"),
    }

    std::process::exit(if found { 0 } else { 1 });
}
