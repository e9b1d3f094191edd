//! Microsoft Tape Format framing.
//!
//! SQL Server wraps backup payloads in MTF descriptor blocks identified by
//! four ASCII bytes read as a little-endian 32-bit word. The walker scans
//! 512-byte aligned offsets for signatures, takes each `[offset,
//! next_offset)` range as a block, pulls backup-set metadata out of the
//! SSET block, and reports where the 8 KiB page region begins.
//!
//! Database names are recovered heuristically: SQL Server writes the
//! backup description as `{DbName}-Full Database Backup` (or the
//! differential / log variant) as UTF-16LE inside the SSET block. Every
//! plausibility rule here — at least 2 and at most 128 characters, at
//! least 75 % ASCII-printable — is part of the contract, not an
//! implementation detail; this is a last-resort path and fragile by
//! nature.

mod name;

pub use name::{is_plausible_db_name, utf16le_to_string};

use tracing::{debug, info, warn};

use bakex_error::Result;
use bakex_stripe::BackupStream;
use bakex_types::bytes::u16_at;
use bakex_types::{BackupInfo, BackupSetInfo, BackupType};

/// Scan alignment for MTF signatures.
pub const SIGNATURE_ALIGN: u64 = 512;
/// The walker gives up after this much of the file.
pub const SCAN_LIMIT: u64 = 64 * 1024 * 1024;
/// Once ≥2 blocks are known, this much signature-free input means the
/// data region has begun.
const MAX_SIGNATURE_GAP: u64 = 256 * 1024;
/// Fallback byte range for the final block.
const DEFAULT_BLOCK_LEN: u64 = 65_536;

// Block-type identifiers: four ASCII bytes as a little-endian u32.
pub const SIG_TAPE: u32 = 0x4550_4154;
pub const SIG_SSET: u32 = 0x5445_5353;
pub const SIG_VOLB: u32 = 0x424C_4F56;
pub const SIG_DIRB: u32 = 0x4252_4944;
pub const SIG_FILE: u32 = 0x454C_4946;
pub const SIG_ESET: u32 = 0x5445_5345;
pub const SIG_EOTM: u32 = 0x4D54_4F45;
pub const SIG_SFMB: u32 = 0x424D_4653;
pub const SIG_CFIL: u32 = 0x4C49_4643;
pub const SIG_ESPB: u32 = 0x4250_5345;
/// SQL Server media component info.
pub const SIG_MSCI: u32 = 0x4943_534D;
/// SQL Server data area: page data follows.
pub const SIG_MSDA: u32 = 0x4144_534D;

/// Whether a little-endian dword is a known MTF block signature.
#[must_use]
pub const fn is_mtf_signature(dw: u32) -> bool {
    matches!(
        dw,
        SIG_TAPE
            | SIG_SSET
            | SIG_VOLB
            | SIG_DIRB
            | SIG_FILE
            | SIG_ESET
            | SIG_EOTM
            | SIG_SFMB
            | SIG_CFIL
            | SIG_ESPB
            | SIG_MSCI
            | SIG_MSDA
    )
}

/// One located descriptor block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtfBlock {
    pub offset: u64,
    pub signature: u32,
}

impl MtfBlock {
    /// The signature as printable ASCII.
    #[must_use]
    pub fn tag(&self) -> String {
        self.signature
            .to_le_bytes()
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() {
                    b as char
                } else {
                    '?'
                }
            })
            .collect()
    }
}

// SSET fixed-field offsets within the block. Only the fields the direct
// path needs are read; everything else stays heuristic.
const SSET_PASSWORD_ENCRYPTION_OFFSET: usize = 38;
const SSET_COMPRESSION_ALGORITHM_OFFSET: usize = 40;
const SSET_DATA_SET_NUMBER_OFFSET: usize = 52;
const SSET_FIXED_SIZE: usize = 72;

/// Suffixes SQL Server appends to the backup description, in
/// `{DbName}{suffix}` form.
const BACKUP_DESC_SUFFIXES: [(&str, BackupType); 3] = [
    ("-Full Database Backup", BackupType::Full),
    ("-Differential Database Backup", BackupType::Differential),
    ("-Transaction Log Backup", BackupType::Log),
];

/// Walks the MTF header region of the first stripe.
///
/// `parse` must run before any accessor. It never fails structurally: a
/// stream with no recognizable framing yields a best-effort
/// [`BackupInfo`] (possibly with an empty database name) and a
/// `data_start_offset` of 0 plus a warning. Callers detect the empty
/// backup-set case and abort.
pub struct HeaderParser {
    info: BackupInfo,
    blocks: Vec<MtfBlock>,
    data_start_offset: u64,
    parsed: bool,
}

impl HeaderParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: BackupInfo::default(),
            blocks: Vec::new(),
            data_start_offset: 0,
            parsed: false,
        }
    }

    /// Walk the header region of `stream`.
    pub fn parse(&mut self, stream: &mut BackupStream) -> Result<()> {
        info!("parsing backup header region");
        self.blocks = scan_blocks(stream)?;

        if self.blocks.is_empty() {
            warn!("no MTF block signatures found in the first 64 MiB");
        }

        let scan_end = stream.file_size().min(SCAN_LIMIT);
        for i in 0..self.blocks.len() {
            let blk = self.blocks[i];
            let end = self
                .blocks
                .get(i + 1)
                .map_or_else(|| (blk.offset + DEFAULT_BLOCK_LEN).min(scan_end), |n| n.offset);
            let len = (end - blk.offset) as usize;

            if blk.signature == SIG_SSET {
                stream.seek(blk.offset)?;
                let data = stream.read_bytes(len)?;
                self.parse_sset_block(&data, blk.offset);
            }
        }

        if self.info.backup_sets.is_empty() {
            warn!("could not parse a structured backup header; metadata will be incomplete");
            self.info.backup_sets.push(BackupSetInfo {
                position: 1,
                backup_type: BackupType::Full,
                ..BackupSetInfo::default()
            });
        }

        // The data region begins after the last header block we saw; the
        // caller rounds up to the next 8 KiB boundary.
        self.data_start_offset = self.blocks.last().map_or(0, |b| b.offset);
        self.parsed = true;

        info!(
            backup_sets = self.info.backup_sets.len(),
            data_start_offset = self.data_start_offset,
            "header parsing complete"
        );
        for set in &self.info.backup_sets {
            info!(
                position = set.position,
                database = %set.database_name,
                compressed = set.is_compressed,
                tde = set.is_tde,
                encrypted = set.is_encrypted,
                "backup set"
            );
        }
        Ok(())
    }

    fn parse_sset_block(&mut self, data: &[u8], offset: u64) {
        if data.len() < 64 {
            return;
        }

        let mut set = BackupSetInfo {
            position: u16_at(data, SSET_DATA_SET_NUMBER_OFFSET).map_or(1, i32::from),
            is_compressed: u16_at(data, SSET_COMPRESSION_ALGORITHM_OFFSET)
                .is_some_and(|alg| alg != 0),
            is_encrypted: u16_at(data, SSET_PASSWORD_ENCRYPTION_OFFSET)
                .is_some_and(|alg| alg != 0),
            backup_type: BackupType::Full,
            ..BackupSetInfo::default()
        };
        debug!(
            offset,
            position = set.position,
            compressed = set.is_compressed,
            encrypted = set.is_encrypted,
            "SSET block"
        );

        // Hunt the string storage for the backup description.
        let mut probe = SSET_FIXED_SIZE;
        while probe + 6 < data.len() {
            let Some(run) = name::utf16_run_at(data, probe) else {
                probe += 2;
                continue;
            };
            if !is_plausible_db_name(run) {
                probe += 2;
                continue;
            }
            let candidate = utf16le_to_string(run);

            let mut matched = false;
            for (suffix, backup_type) in BACKUP_DESC_SUFFIXES {
                if let Some(pos) = candidate.find(suffix) {
                    if pos > 0 {
                        set.database_name = candidate[..pos].to_owned();
                        set.backup_type = backup_type;
                        debug!(name = %set.database_name, probe, "database name from backup description");
                        matched = true;
                        break;
                    }
                }
            }
            if matched {
                break;
            }

            // No known suffix: the first plausible run wins as-is.
            if candidate.chars().count() <= 128 {
                debug!(name = %candidate, probe, "database name from first plausible string");
                set.database_name = candidate;
                break;
            }
            probe += 2;
        }

        match self.info.backup_sets.last_mut() {
            Some(last) if last.position == set.position => {
                if last.database_name.is_empty() && !set.database_name.is_empty() {
                    last.database_name = set.database_name;
                }
            }
            _ => self.info.backup_sets.push(set),
        }
    }

    /// Recovered metadata. Valid after `parse`.
    #[must_use]
    pub fn info(&self) -> &BackupInfo {
        assert!(self.parsed, "HeaderParser::parse must run first");
        &self.info
    }

    /// File offset where the page region begins (0 when unknown).
    #[must_use]
    pub fn data_start_offset(&self) -> u64 {
        assert!(self.parsed, "HeaderParser::parse must run first");
        self.data_start_offset
    }

    /// Every located descriptor block, in file order.
    #[must_use]
    pub fn blocks(&self) -> &[MtfBlock] {
        assert!(self.parsed, "HeaderParser::parse must run first");
        &self.blocks
    }

    /// Whether any backup set reports TDE.
    #[must_use]
    pub fn is_tde(&self) -> bool {
        self.info().is_tde()
    }

    /// Whether any backup set reports backup-level encryption.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.info().is_encrypted()
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Phase 1: locate every descriptor block at 512-byte alignment.
fn scan_blocks(stream: &mut BackupStream) -> Result<Vec<MtfBlock>> {
    let scan_end = stream.file_size().min(SCAN_LIMIT);
    let mut blocks = Vec::new();
    let mut gap: u64 = 0;

    let mut pos = 0u64;
    while pos < scan_end {
        stream.seek(pos)?;
        let mut sig_bytes = [0u8; 4];
        if !stream.peek(&mut sig_bytes)? {
            break;
        }
        let sig = u32::from_le_bytes(sig_bytes);
        if is_mtf_signature(sig) {
            let blk = MtfBlock {
                offset: pos,
                signature: sig,
            };
            debug!(tag = %blk.tag(), offset = pos, "MTF block");
            blocks.push(blk);
            gap = 0;
        } else {
            gap += SIGNATURE_ALIGN;
            if gap > MAX_SIGNATURE_GAP && blocks.len() >= 2 {
                break;
            }
        }
        pos += SIGNATURE_ALIGN;
    }

    Ok(blocks)
}
