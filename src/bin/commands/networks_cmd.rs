use anyhow::{Context, Result};
use netwalk::{IpNetwork, Network, Networks, Reader, RecordSource};
use serde_json::json;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::debug;

use crate::cli_utils::open_reader;

pub fn cmd_networks(
    database: PathBuf,
    mmap: bool,
    within: Option<String>,
    json_output: bool,
    with_data: bool,
) -> Result<()> {
    let reader = open_reader(&database, mmap)?;

    let networks = match within {
        Some(cidr) => {
            let network: IpNetwork = cidr
                .parse()
                .with_context(|| format!("Invalid network: {}", cidr))?;
            reader
                .networks_within(network)
                .with_context(|| format!("Failed to locate {} in the search tree", network))?
        }
        None => reader.networks(),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let count = write_networks(&reader, networks, &mut out, json_output, with_data)?;
    out.flush()?;

    debug!(count, "enumeration finished");
    Ok(())
}

fn write_networks<W: Write>(
    reader: &Reader,
    networks: Networks<'_, Reader>,
    out: &mut W,
    json_output: bool,
    with_data: bool,
) -> Result<usize> {
    let mut count = 0;
    for network in networks {
        let network = network.context("Search tree enumeration failed")?;
        write_network(reader, &network, out, json_output, with_data)?;
        count += 1;
    }
    Ok(count)
}

fn write_network<W: Write>(
    reader: &Reader,
    network: &Network,
    out: &mut W,
    json_output: bool,
    with_data: bool,
) -> Result<()> {
    let data = if with_data {
        let value = reader
            .record_value(network.record())
            .with_context(|| format!("Failed to decode record for {}", network))?;
        Some(value.to_json())
    } else {
        None
    };

    if json_output {
        let mut line = json!({
            "network": network.to_string(),
            "prefix_len": network.ip_network().prefix_len(),
        });
        if let Some(value) = data {
            line["data"] = value;
        }
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    } else {
        match data {
            Some(value) => writeln!(out, "{}\t{}", network, serde_json::to_string(&value)?)?,
            None => writeln!(out, "{}", network)?,
        }
    }
    Ok(())
}
