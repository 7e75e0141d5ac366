use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    command::{Command, LineBuffer},
    ucf::{self, UcfOp, UcfSummary},
};

/// Compiles UCF text at `input` into the packed pair form.
pub fn pack_ucf_file(input: &Path, output: &Path) -> Result<UcfSummary> {
    let text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let ops = ucf::parse_text(&text).with_context(|| format!("parsing {}", input.display()))?;
    fs::write(output, ucf::pack(&ops)).with_context(|| format!("writing {}", output.display()))?;
    Ok(ucf::summarize(&ops))
}

#[derive(Debug, Serialize)]
pub struct UcfInspection {
    pub summary: UcfSummary,
    pub ops: Vec<UcfOp>,
}

/// Reads either UCF text or an already packed payload.
pub fn inspect_ucf_file(input: &Path) -> Result<UcfInspection> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let ops = match std::str::from_utf8(&bytes).ok().map(ucf::parse_text) {
        Some(Ok(ops)) if !ops.is_empty() => ops,
        _ => ucf::unpack(&bytes)
            .with_context(|| format!("{} is neither UCF text nor packed", input.display()))?,
    };
    Ok(UcfInspection {
        summary: ucf::summarize(&ops),
        ops,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub struct ScannedCommand {
    pub command: Command,
    /// Payload bytes that followed the line; short when the stream ended.
    pub payload_len: usize,
}

/// Splits a recorded front-end stream into commands and their payloads.
pub fn scan_commands(bytes: &[u8]) -> Vec<ScannedCommand> {
    let mut scanned = Vec::new();
    let mut buffer = LineBuffer::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let byte = bytes[pos];
        pos += 1;
        let Some(command) = buffer.feed(byte) else {
            continue;
        };

        let announced = match command {
            Command::Ucf { size } | Command::Input { size, .. } => size as usize,
            _ => 0,
        };
        let payload_len = announced.min(bytes.len() - pos);
        pos += payload_len;
        scanned.push(ScannedCommand {
            command,
            payload_len,
        });
    }
    scanned
}
