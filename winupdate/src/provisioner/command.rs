//! Building the PowerShell invocation for a staged script.
//!
//! The invocation text is sent as `-EncodedCommand`: base64 over the
//! UTF-16LE code units of the text, without a byte-order mark. PowerShell
//! rejects anything else, so the layout here is bit-exact.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use super::config::UpdateSelection;
use crate::communicator::{Credentials, RemoteCommand};

/// Interpreter flags preceding the encoded command.
pub const POWERSHELL_PREFIX: &str =
    "PowerShell -ExecutionPolicy Bypass -NoProfile -OutputFormat Text -EncodedCommand";

/// Errors decoding an encoded command.
#[derive(Debug, Error)]
pub enum CommandDecodeError {
    /// The text is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes do not form whole UTF-16 code units.
    #[error("decoded length {0} is not a multiple of two")]
    OddLength(usize),

    /// The code units are not valid UTF-16.
    #[error("invalid UTF-16: {0}")]
    Utf16(#[from] std::string::FromUtf16Error),
}

/// Encodes text as little-endian UTF-16 code units, without a BOM.
#[must_use]
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Encodes text in the `-EncodedCommand` form.
#[must_use]
pub fn encode_command(text: &str) -> String {
    STANDARD.encode(encode_utf16le(text))
}

/// Decodes an `-EncodedCommand` argument back to its text.
pub fn decode_command(encoded: &str) -> Result<String, CommandDecodeError> {
    let bytes = STANDARD.decode(encoded)?;
    if bytes.len() % 2 != 0 {
        return Err(CommandDecodeError::OddLength(bytes.len()));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(String::from_utf16(&units)?)
}

/// Wraps invocation text into the full interpreter command line.
#[must_use]
pub fn powershell_command(text: &str) -> String {
    format!("{POWERSHELL_PREFIX} {}", encode_command(text))
}

/// Quotes a value as a PowerShell single-quoted string.
#[must_use]
pub fn quote_single(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote_single(v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the invocation text for a staged script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationBuilder {
    location: String,
    switches: Vec<String>,
}

impl InvocationBuilder {
    /// Invokes the script by its location alone.
    #[must_use]
    pub fn bare(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            switches: Vec::new(),
        }
    }

    /// Invokes the script with switches for an explicit update selection.
    ///
    /// An implicit selection yields the bare form.
    #[must_use]
    pub fn for_selection(location: impl Into<String>, selection: &UpdateSelection) -> Self {
        let mut builder = Self::bare(location);
        if !selection.explicit {
            return builder;
        }

        let flags = [
            (selection.install_all, "-InstallAll"),
            (selection.include_hidden, "-IncludeHidden"),
            (selection.install_optional, "-InstallOptional"),
            (selection.install_recommended, "-InstallRecommended"),
            (selection.install_important, "-InstallImportant"),
        ];
        builder
            .switches
            .extend(flags.iter().filter(|(on, _)| *on).map(|(_, flag)| (*flag).to_string()));

        if !selection.category_ids.is_empty() {
            builder
                .switches
                .push(format!("-CategoryIds {}", quote_list(&selection.category_ids)));
        }
        if !selection.cab_files.is_empty() {
            builder
                .switches
                .push(format!("-CabFiles {}", quote_list(&selection.cab_files)));
        }

        builder
    }

    /// Returns the invocation text before encoding.
    #[must_use]
    pub fn text(&self) -> String {
        if self.switches.is_empty() {
            return self.location.clone();
        }
        format!("& {} {}", quote_single(&self.location), self.switches.join(" "))
    }

    /// Builds the remote command.
    #[must_use]
    pub fn build(&self, credentials: Option<Credentials>) -> RemoteCommand {
        RemoteCommand::new(powershell_command(&self.text())).with_credentials(credentials)
    }
}
