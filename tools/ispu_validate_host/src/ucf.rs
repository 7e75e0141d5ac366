//! Unico configuration files: register write scripts that load an image.
//!
//! The text form has one `Ac <reg> <value>` write (hex) or `WAIT <ms>`
//! delay per line; `--` starts a comment. The binary form the loader
//! uploads is a flat list of `(reg, value)` byte pairs where register
//! `0xFF` means "sleep `value` milliseconds".

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

pub const DELAY_REG: u8 = 0xFF;
/// Register selecting the embedded-function (ISPU) page.
pub const PAGE_REG: u8 = 0x01;
pub const PAGE_ISPU: u8 = 0x80;
/// Data port of the ISPU program/data memory.
pub const MEM_DATA_REG: u8 = 0x0B;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UcfOp {
    Write { reg: u8, value: u8 },
    Wait { ms: u8 },
}

impl UcfOp {
    pub fn pair(self) -> [u8; 2] {
        match self {
            Self::Write { reg, value } => [reg, value],
            Self::Wait { ms } => [DELAY_REG, ms],
        }
    }

    pub fn from_pair(reg: u8, value: u8) -> Self {
        if reg == DELAY_REG {
            Self::Wait { ms: value }
        } else {
            Self::Write { reg, value }
        }
    }
}

fn parse_hex(token: &str, line_no: usize) -> Result<u8> {
    u8::from_str_radix(token, 16)
        .with_context(|| format!("line {line_no}: `{token}` is not a hex byte"))
}

/// Parses UCF text. Waits longer than 255 ms are split across pairs.
pub fn parse_text(text: &str) -> Result<Vec<UcfOp>> {
    let mut ops = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.split("--").next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("Ac") => {
                let reg = tokens
                    .next()
                    .ok_or_else(|| anyhow!("line {line_no}: missing register"))?;
                let value = tokens
                    .next()
                    .ok_or_else(|| anyhow!("line {line_no}: missing value"))?;
                let reg = parse_hex(reg, line_no)?;
                if reg == DELAY_REG {
                    bail!("line {line_no}: register FF is reserved for delays");
                }
                ops.push(UcfOp::Write {
                    reg,
                    value: parse_hex(value, line_no)?,
                });
            }
            Some("WAIT") => {
                let ms: u32 = tokens
                    .next()
                    .ok_or_else(|| anyhow!("line {line_no}: missing delay"))?
                    .parse()
                    .with_context(|| format!("line {line_no}: delay must be decimal ms"))?;
                let mut remaining = ms;
                while remaining > 0 {
                    let chunk = remaining.min(u32::from(u8::MAX));
                    ops.push(UcfOp::Wait { ms: chunk as u8 });
                    remaining -= chunk;
                }
            }
            Some(other) => bail!("line {line_no}: unknown directive `{other}`"),
            None => {}
        }
    }
    Ok(ops)
}

pub fn pack(ops: &[UcfOp]) -> Vec<u8> {
    ops.iter().flat_map(|op| op.pair()).collect()
}

pub fn unpack(bytes: &[u8]) -> Result<Vec<UcfOp>> {
    if bytes.len() % 2 != 0 {
        bail!("UCF payload has odd length {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| UcfOp::from_pair(pair[0], pair[1]))
        .collect())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UcfSummary {
    pub writes: usize,
    pub waits: usize,
    pub wait_ms: u32,
    /// Bytes streamed into ISPU memory through the data port.
    pub ispu_mem_bytes: usize,
    pub packed_bytes: usize,
}

pub fn summarize(ops: &[UcfOp]) -> UcfSummary {
    let mut summary = UcfSummary {
        packed_bytes: ops.len() * 2,
        ..UcfSummary::default()
    };
    let mut ispu_page = false;
    for op in ops {
        match *op {
            UcfOp::Write { reg, value } => {
                summary.writes += 1;
                if reg == PAGE_REG {
                    ispu_page = value & PAGE_ISPU != 0;
                } else if ispu_page && reg == MEM_DATA_REG {
                    summary.ispu_mem_bytes += 1;
                }
            }
            UcfOp::Wait { ms } => {
                summary.waits += 1;
                summary.wait_ms += u32::from(ms);
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
-- image header
Ac 10 00
Ac 01 80
Ac 0B 12  -- first byte
Ac 0B 34
WAIT 300
Ac 01 00
";

    #[test]
    fn parses_writes_comments_and_long_waits() {
        let ops = parse_text(SAMPLE).unwrap();
        assert_eq!(
            ops,
            [
                UcfOp::Write { reg: 0x10, value: 0x00 },
                UcfOp::Write { reg: 0x01, value: 0x80 },
                UcfOp::Write { reg: 0x0B, value: 0x12 },
                UcfOp::Write { reg: 0x0B, value: 0x34 },
                UcfOp::Wait { ms: 255 },
                UcfOp::Wait { ms: 45 },
                UcfOp::Write { reg: 0x01, value: 0x00 },
            ]
        );
    }

    #[test]
    fn pack_emits_delay_pairs() {
        let ops = parse_text("Ac 12 01\nWAIT 5\n").unwrap();
        assert_eq!(pack(&ops), [0x12, 0x01, 0xFF, 0x05]);
        assert_eq!(unpack(&pack(&ops)).unwrap(), ops);
    }

    #[test]
    fn summary_counts_ispu_memory_bytes() {
        let summary = summarize(&parse_text(SAMPLE).unwrap());
        assert_eq!(
            summary,
            UcfSummary {
                writes: 5,
                waits: 2,
                wait_ms: 300,
                ispu_mem_bytes: 2,
                packed_bytes: 14,
            }
        );
    }

    #[test]
    fn errors_name_the_line() {
        let err = parse_text("Ac 10 00\nAc 1G 00\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));

        let err = parse_text("Ac FF 01\n").unwrap_err();
        assert!(err.to_string().contains("reserved"));

        let err = parse_text("POKE 10 00\n").unwrap_err();
        assert!(err.to_string().contains("unknown directive"));
    }

    #[test]
    fn odd_payload_is_rejected() {
        assert!(unpack(&[0x10]).is_err());
    }
}
