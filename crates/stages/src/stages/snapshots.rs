//! The snapshots stage: bulk import of historical blocks from immutable
//! segment files.

use crate::{
    provider,
    stage::write_progress,
    Context, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput,
};
use alloy_rlp::{Decodable, Encodable};
use async_trait::async_trait;
use stele_kv::{
    keys,
    segment::{Decompressor, EliasFano, EliasFanoBuilder, SegmentBuilder, SegmentKind, SegmentRange},
    DbTx, DbTxMut, Store, Table,
};
use stele_primitives::{BlockBody, Header};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Imports headers and bodies below the segmented height straight into the
/// chain tables, then advances the downstream checkpoints past the imported
/// range. Senders are still recovered by their own stage.
#[derive(Debug)]
pub struct SnapshotStage {
    dir: PathBuf,
}

impl SnapshotStage {
    /// A snapshots stage reading segment files from `dir`.
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Discovers segment files of `kind` in ascending range order.
    fn discover(&self, kind: SegmentKind) -> Result<Vec<SegmentRange>, StageError> {
        let mut ranges = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(ranges),
        };
        for entry in entries {
            let entry = entry.map_err(stele_kv::KvError::Io)?;
            let name = entry.file_name();
            let Some(range) = name.to_str().and_then(SegmentRange::parse_file_name) else {
                continue;
            };
            if range.kind == kind {
                ranges.push(range);
            }
        }
        ranges.sort_by_key(|range| range.from);
        Ok(ranges)
    }

    /// Opens a segment and its companion index, cross-checking word offsets
    /// when the index is present.
    fn open_segment(
        &self,
        range: &SegmentRange,
    ) -> Result<(Decompressor, Option<EliasFano>), StageError> {
        let segment = Decompressor::open(self.dir.join(range.file_name()))?;
        let index_path = self.dir.join(range.index_file_name());
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => {
                let index = EliasFano::from_bytes(&bytes)?;
                if index.len() != segment.words_count() {
                    return Err(stele_kv::segment::SegmentError::MalformedIndex(
                        "word count mismatch",
                    )
                    .into());
                }
                Some(index)
            }
            Err(_) => None,
        };
        Ok((segment, index))
    }

    fn import_headers(
        &self,
        tx: &mut impl DbTxMut,
        range: &SegmentRange,
        progress: u64,
    ) -> Result<u64, StageError> {
        let (segment, index) = self.open_segment(range)?;
        let mut getter = segment.getter();
        let mut imported_to = progress;
        let mut word_index = 0u64;
        while getter.has_next() {
            if let Some(index) = &index {
                // The companion index must agree with the walk.
                if index.get(word_index) != getter.offset() {
                    return Err(stele_kv::segment::SegmentError::MalformedIndex(
                        "offset drift",
                    )
                    .into());
                }
            }
            let word = getter.next()?;
            let number = range.from + word_index;
            word_index += 1;
            if number <= progress {
                continue;
            }
            let header = Header::decode(&mut word.as_slice())
                .map_err(|_| StageError::CorruptData { block: number, what: "segment header" })?;
            let hash = header.hash_slow();
            provider::put_canonical_header(tx, &header, hash)?;
            tx.put(Table::HeaderNumbers, hash.as_slice(), &keys::block_key(number))?;
            imported_to = number;
        }
        Ok(imported_to)
    }

    fn import_bodies(
        &self,
        tx: &mut impl DbTxMut,
        range: &SegmentRange,
        progress: u64,
    ) -> Result<u64, StageError> {
        let (segment, _) = self.open_segment(range)?;
        let mut getter = segment.getter();
        let mut imported_to = progress;
        let mut word_index = 0u64;
        while getter.has_next() {
            let word = getter.next()?;
            let number = range.from + word_index;
            word_index += 1;
            if number <= progress {
                continue;
            }
            let body = BlockBody::decode(&mut word.as_slice())
                .map_err(|_| StageError::CorruptData { block: number, what: "segment body" })?;
            provider::put_body(tx, number, &body.transactions, body.ommers, body.withdrawals)?;
            imported_to = number;
        }
        Ok(imported_to)
    }
}

#[async_trait]
impl<S: Store> Stage<S> for SnapshotStage {
    fn id(&self) -> StageId {
        StageId::SNAPSHOTS
    }

    async fn execute(
        &mut self,
        ctx: &Context,
        tx: &mut S::TxMut,
        input: ExecInput,
    ) -> Result<ExecOutput, StageError> {
        let mut headers_to = input.from;
        for range in self.discover(SegmentKind::Headers)? {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            if range.to <= headers_to || range.from > headers_to + 1 {
                continue;
            }
            headers_to = self.import_headers(tx, &range, headers_to)?;
            debug!(target: "stages::snapshots", file = %range.file_name(), headers_to, "Headers segment imported");
        }

        let mut bodies_to = input.from;
        for range in self.discover(SegmentKind::Bodies)? {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            if range.to <= bodies_to || range.from > bodies_to + 1 || range.from > headers_to {
                continue;
            }
            bodies_to = self.import_bodies(tx, &range, bodies_to)?;
            debug!(target: "stages::snapshots", file = %range.file_name(), bodies_to, "Bodies segment imported");
        }

        // Bodies cannot outrun headers; the imported height is their
        // minimum when both kinds are present, the headers height when only
        // headers are segmented.
        let imported = if bodies_to > input.from { headers_to.min(bodies_to) } else { headers_to };
        if imported > input.from {
            // Downstream stages skip the imported range entirely.
            for id in [StageId::HEADERS, StageId::BLOCK_HASHES, StageId::BODIES] {
                let current = crate::stage::read_progress(tx, id)?;
                if current < imported {
                    write_progress(tx, id, imported)?;
                }
            }
            info!(target: "stages::snapshots", imported, "Segment import complete");
        } else if self.discover(SegmentKind::Headers)?.is_empty() {
            warn!(target: "stages::snapshots", dir = %self.dir.display(), "No segment files found");
        }
        Ok(ExecOutput::done(imported - input.from))
    }

    async fn unwind(
        &mut self,
        _ctx: &Context,
        _tx: &mut S::TxMut,
        _input: UnwindInput,
    ) -> Result<(), StageError> {
        // The chain tables filled by the import belong to the headers,
        // block-hashes and bodies stages, whose checkpoints were advanced
        // past the import; their unwinds remove the rows.
        Ok(())
    }
}

/// Exports blocks `from..=to` from the chain tables into `headers-` and
/// `bodies-` segment files with companion offset indexes. Segments are the
/// durable form of historical data; a fresh node re-imports them through
/// [SnapshotStage].
pub fn export_segments(
    tx: &impl DbTx,
    dir: &Path,
    from: u64,
    to: u64,
) -> Result<(), StageError> {
    std::fs::create_dir_all(dir).map_err(stele_kv::KvError::Io)?;
    let mut headers = SegmentBuilder::new();
    let mut bodies = SegmentBuilder::new();
    let mut buf = Vec::new();
    for number in from..=to {
        let header = provider::expect_canonical_header(tx, number)?;
        buf.clear();
        header.encode(&mut buf);
        headers.add_word(&buf);

        let stored = provider::body(tx, number)?
            .ok_or(StageError::MissingData { block: number, what: "body" })?;
        let body = BlockBody {
            transactions: provider::transactions(tx, number)?,
            ommers: stored.ommers,
            withdrawals: stored.withdrawals,
        };
        buf.clear();
        body.encode(&mut buf);
        bodies.add_word(&buf);
    }

    for (kind, builder) in
        [(SegmentKind::Headers, headers), (SegmentKind::Bodies, bodies)]
    {
        let range = SegmentRange { kind, from, to: to + 1 };
        let file = builder.build()?;
        let mut index = EliasFanoBuilder::new(file.word_offsets.last().copied().unwrap_or(0));
        for offset in &file.word_offsets {
            index.push(*offset)?;
        }
        std::fs::write(dir.join(range.index_file_name()), index.finish()?.to_bytes())
            .map_err(stele_kv::KvError::Io)?;
        file.write_to(dir.join(range.file_name()))?;
        info!(target: "stages::snapshots", file = %range.file_name(), "Segment exported");
    }
    Ok(())
}
