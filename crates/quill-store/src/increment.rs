//! Increment file format
//!
//! One text file per increment: a small key/value metadata header, a
//! separator line, then the raw increment text. The header carries a blake3
//! checksum of the text so recovery can tell a fully-persisted file from a
//! torn one without consulting the manifest.

use chrono::{DateTime, Utc};

/// Line separating the metadata header from the increment text
pub const INCREMENT_HEADER_SEPARATOR: &str = "---";

/// Parsed increment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementFile {
    /// 1-indexed sequence number
    pub sequence: u64,
    /// Owning session
    pub session_id: String,
    /// Size in words
    pub size: u64,
    /// When the increment was persisted
    pub saved_at: DateTime<Utc>,
    /// blake3 hex digest of the text
    pub checksum: String,
    /// The increment text
    pub text: String,
}

impl IncrementFile {
    /// Build a file record for new text, computing checksum and timestamp
    #[must_use]
    pub fn new(session_id: impl Into<String>, sequence: u64, text: impl Into<String>, size: u64) -> Self {
        let text = text.into();
        let checksum = blake3::hash(text.as_bytes()).to_hex().to_string();
        Self {
            sequence,
            session_id: session_id.into(),
            size,
            saved_at: Utc::now(),
            checksum,
            text,
        }
    }

    /// Conventional filename for a sequence number
    #[must_use]
    pub fn filename(sequence: u64) -> String {
        format!("increment_{sequence:04}.txt")
    }

    /// Serialize to the on-disk representation
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "sequence: {}\nsession: {}\nsize: {}\nsaved_at: {}\nchecksum: {}\n{}\n{}",
            self.sequence,
            self.session_id,
            self.size,
            self.saved_at.to_rfc3339(),
            self.checksum,
            INCREMENT_HEADER_SEPARATOR,
            self.text
        )
    }

    /// Parse the on-disk representation, verifying the checksum
    ///
    /// # Errors
    /// Returns a reason string when the header is malformed or the checksum
    /// does not match; callers treat such a file as absent.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some((header, text)) = raw.split_once(&format!("\n{INCREMENT_HEADER_SEPARATOR}\n"))
        else {
            return Err("missing header separator".to_string());
        };

        let mut sequence = None;
        let mut session_id = None;
        let mut size = None;
        let mut saved_at = None;
        let mut checksum = None;

        for line in header.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                return Err(format!("malformed header line: {line}"));
            };
            match key {
                "sequence" => sequence = value.parse::<u64>().ok(),
                "session" => session_id = Some(value.to_string()),
                "size" => size = value.parse::<u64>().ok(),
                "saved_at" => {
                    saved_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc));
                }
                "checksum" => checksum = Some(value.to_string()),
                _ => {}
            }
        }

        let sequence = sequence.ok_or("missing or invalid sequence")?;
        let session_id = session_id.ok_or("missing session")?;
        let size = size.ok_or("missing or invalid size")?;
        let saved_at = saved_at.ok_or("missing or invalid saved_at")?;
        let checksum = checksum.ok_or("missing checksum")?;

        let actual = blake3::hash(text.as_bytes()).to_hex().to_string();
        if actual != checksum {
            return Err("checksum mismatch".to_string());
        }

        Ok(Self {
            sequence,
            session_id,
            size,
            saved_at,
            checksum,
            text: text.to_string(),
        })
    }
}
