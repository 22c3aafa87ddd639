//! Helpers shared by the `nfdebug` command line tool: argument parsing,
//! configuration loading and output formatting.

#![allow(clippy::cast_possible_truncation)]

use anyhow::{bail, Context, Result};
use nfdebug_core::EngineConfig;
use std::fmt::Write as _;
use std::path::Path;

/// Parse a hexadecimal address, with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<u32> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).with_context(|| format!("Invalid hex number '{s}'"))
}

/// Parse a hex byte string such as `DEADBEEF` or `0xde_ad`.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    hex::decode(digits).with_context(|| format!("Invalid hex data '{s}'"))
}

/// 16 bytes per line, offset, hex and printable ASCII.
pub fn hexdump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let at = address.wrapping_add((i * 16) as u32);
        let bytes: Vec<String> = line.iter().map(|b| format!("{b:02X}")).collect();
        let ascii: String =
            line.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '.' }).collect();
        let _ = writeln!(out, "{at:08X}: {:<47}  {ascii}", bytes.join(" "));
    }
    out
}

/// Engine configuration from an optional JSON file, with command line overrides applied.
pub fn load_config(path: Option<&Path>, request_timeout_ms: Option<u64>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = request_timeout_ms {
        config.request_timeout_ms = ms;
    }
    if config.memory_chunk_size == 0 || config.deploy_chunk_size == 0 {
        bail!("Chunk sizes must be greater than zero");
    }
    Ok(config)
}

/// Read a deployment image from disk.
pub fn read_image(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    if data.is_empty() {
        bail!("Image {} is empty", path.display());
    }
    Ok(data)
}
