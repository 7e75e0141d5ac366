//! Line protocol spoken by the validation front end.

/// Longest command line; longer input restarts the line.
pub const LINE_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ver,
    Name,
    Clock,
    Macc,
    BlockSize,
    /// Empty line; answered like `blocksize`.
    Empty,
    TimeoutBoot(u32),
    TimeoutRun(u32),
    Canary,
    GetInInfo,
    GetOutInfo,
    ActivationSizes,
    WeightSizes,
    GetVersions,
    GetNodes,
    Run,
    /// A UCF upload of `size` bytes follows.
    Ucf { size: u32 },
    /// `size` bytes of input tensor `index` follow.
    Input { index: u32, size: u32 },
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line {
            "ver" => return Self::Ver,
            "name" => return Self::Name,
            "clock" => return Self::Clock,
            "macc" => return Self::Macc,
            "blocksize" => return Self::BlockSize,
            "" => return Self::Empty,
            "canary" => return Self::Canary,
            "get_in_info" => return Self::GetInInfo,
            "get_out_info" => return Self::GetOutInfo,
            "activation_sizes" => return Self::ActivationSizes,
            "weight_sizes" => return Self::WeightSizes,
            "get_versions" => return Self::GetVersions,
            "get_nodes" => return Self::GetNodes,
            "run" => return Self::Run,
            _ => {}
        }

        let parsed = if let Some(rest) = line.strip_prefix("timeout_boot") {
            leading_u32(rest).map(|(secs, _)| Self::TimeoutBoot(secs))
        } else if let Some(rest) = line.strip_prefix("timeout_run") {
            leading_u32(rest).map(|(secs, _)| Self::TimeoutRun(secs))
        } else if let Some(rest) = line.strip_prefix("ucf") {
            leading_u32(rest).map(|(size, _)| Self::Ucf { size })
        } else if let Some(rest) = line.strip_prefix("in") {
            leading_u32(rest).and_then(|(index, rest)| {
                leading_u32(rest).map(|(size, _)| Self::Input { index, size })
            })
        } else {
            None
        };

        parsed.unwrap_or_else(|| Self::Unknown(line.to_string()))
    }

    /// True when a binary payload follows the command line.
    pub fn expects_payload(&self) -> bool {
        matches!(self, Self::Ucf { .. } | Self::Input { .. })
    }
}

/// Parses an unsigned decimal after optional whitespace, returning the rest.
fn leading_u32(text: &str) -> Option<(u32, &str)> {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

/// Assembles command lines from a byte stream.
///
/// `\n` terminates a line, `\r` is ignored and `*` discards everything
/// received so far on the current line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, byte: u8) -> Option<Command> {
        match byte {
            b'\n' => {
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                return Some(Command::parse(&line));
            }
            b'*' => self.line.clear(),
            b'\r' => {}
            _ => {
                if self.line.len() >= LINE_CAPACITY {
                    self.line.clear();
                }
                self.line.push(byte);
            }
        }
        None
    }

    pub fn pending(&self) -> &[u8] {
        &self.line
    }
}
