//! Binary persistence for trained indexes.
//!
//! The persisted layout is a versioned little-endian stream:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Magic bytes (4B): "VCNL"                    │
//! │ Format version (u32)                        │
//! │ Index kind tag (u8)                         │
//! │ Metric tag (u8)                             │
//! │ Dimension (u32)                             │
//! ├─────────────────────────────────────────────┤
//! │ Kind-specific section, every count explicit:│
//! │   Flat:   vector count + raw f32 vectors    │
//! │   IVF:    params, centroids, raw vectors,   │
//! │           per-vector assignments            │
//! │   IVF-PQ: params, centroids, codebooks,     │
//! │           codes, per-vector assignments     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Loading revalidates everything the layout promises: magic, version, tags,
//! counts, and dimension consistency. Any omission or disagreement is
//! rejected as [`IndexError::CorruptState`] rather than silently defaulted.
//! The round-trip contract is that `load(save(x))` answers identical queries
//! identically to `x`.

use std::io::{Read, Write};

use log::debug;

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::index::{Index, IndexKind, VectorIndex};
use crate::ivf::{IvfIndex, IvfParams};
use crate::ivf_pq::{IvfPqIndex, IvfPqParams};
use crate::pq::ProductQuantizer;
use crate::store::VectorStore;

/// Magic bytes at the head of every persisted index.
pub const MAGIC: &[u8; 4] = b"VCNL";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Cap on up-front allocation for length fields read from the stream. Counts
/// are untrusted until the corresponding bytes have actually been read, so a
/// corrupt count must fail as [`IndexError::CorruptState`] at end-of-stream
/// instead of attempting a huge allocation first.
const PREALLOC_LIMIT: usize = 1 << 16;

fn kind_tag(kind: IndexKind) -> u8 {
    match kind {
        IndexKind::Flat => 0,
        IndexKind::Ivf => 1,
        IndexKind::IvfPq => 2,
    }
}

fn kind_from_tag(tag: u8) -> Result<IndexKind> {
    match tag {
        0 => Ok(IndexKind::Flat),
        1 => Ok(IndexKind::Ivf),
        2 => Ok(IndexKind::IvfPq),
        other => Err(IndexError::CorruptState(format!(
            "unrecognized index kind tag {other}"
        ))),
    }
}

fn metric_tag(metric: DistanceMetric) -> u8 {
    match metric {
        DistanceMetric::L2 => 0,
        DistanceMetric::InnerProduct => 1,
    }
}

fn metric_from_tag(tag: u8) -> Result<DistanceMetric> {
    match tag {
        0 => Ok(DistanceMetric::L2),
        1 => Ok(DistanceMetric::InnerProduct),
        other => Err(IndexError::CorruptState(format!(
            "unrecognized metric tag {other}"
        ))),
    }
}

/// Serialize an index's full trained state to `writer`.
pub fn save<W: Write>(index: &Index, writer: &mut W) -> Result<()> {
    writer.write_all(MAGIC)?;
    write_u32(writer, FORMAT_VERSION)?;
    writer.write_all(&[kind_tag(index.kind()), metric_tag(index.metric())])?;
    write_u32(writer, index.dimension() as u32)?;

    match index {
        Index::Flat(flat) => save_flat(flat, writer)?,
        Index::Ivf(ivf) => save_ivf(ivf, writer)?,
        Index::IvfPq(ivf_pq) => save_ivf_pq(ivf_pq, writer)?,
    }

    debug!(
        "persisted {:?} index: dimension={}, vectors={}",
        index.kind(),
        index.dimension(),
        index.len()
    );
    Ok(())
}

/// Reconstruct an index from a stream produced by [`save`].
pub fn load<R: Read>(reader: &mut R) -> Result<Index> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(IndexError::CorruptState("bad magic bytes".to_string()));
    }
    let version = read_u32(reader)?;
    if version != FORMAT_VERSION {
        return Err(IndexError::CorruptState(format!(
            "unsupported format version {version}"
        )));
    }

    let kind = kind_from_tag(read_u8(reader)?)?;
    let metric = metric_from_tag(read_u8(reader)?)?;
    let dimension = read_u32(reader)? as usize;
    if dimension == 0 {
        return Err(IndexError::CorruptState("zero dimension".to_string()));
    }

    match kind {
        IndexKind::Flat => load_flat(reader, dimension, metric),
        IndexKind::Ivf => load_ivf(reader, dimension, metric),
        IndexKind::IvfPq => load_ivf_pq(reader, dimension, metric),
    }
}

fn save_flat<W: Write>(flat: &FlatIndex, writer: &mut W) -> Result<()> {
    write_u32(writer, flat.len() as u32)?;
    write_f32_slice(writer, flat.store().as_slice())
}

fn load_flat<R: Read>(reader: &mut R, dimension: usize, metric: DistanceMetric) -> Result<Index> {
    let count = read_u32(reader)? as usize;
    let data = read_f32_vec(reader, element_count(count, dimension)?)?;
    let mut store = VectorStore::new(dimension);
    for vector in data.chunks_exact(dimension) {
        store.append(vector)?;
    }
    Ok(Index::Flat(FlatIndex::from_parts(store, metric)))
}

fn save_ivf<W: Write>(ivf: &IvfIndex, writer: &mut W) -> Result<()> {
    let params = ivf.params();
    write_u32(writer, params.nlist as u32)?;
    write_u32(writer, params.nprobe as u32)?;

    match ivf.centroids() {
        Some(centroids) => {
            writer.write_all(&[1])?;
            for centroid in centroids {
                write_f32_slice(writer, centroid)?;
            }
            write_u32(writer, ivf.len() as u32)?;
            write_f32_slice(writer, ivf.store().as_slice())?;
            for &assignment in ivf.assignments() {
                write_u32(writer, assignment)?;
            }
        }
        None => writer.write_all(&[0])?,
    }
    Ok(())
}

fn load_ivf<R: Read>(reader: &mut R, dimension: usize, metric: DistanceMetric) -> Result<Index> {
    let nlist = read_u32(reader)? as usize;
    let nprobe = read_u32(reader)? as usize;
    if nlist == 0 || nprobe == 0 {
        return Err(IndexError::CorruptState(
            "nlist and nprobe must be greater than 0".to_string(),
        ));
    }
    let params = IvfParams { nlist, nprobe };

    let trained = read_u8(reader)? != 0;
    if !trained {
        return Ok(Index::Ivf(IvfIndex::from_parts(
            metric,
            params,
            None,
            VectorStore::new(dimension),
            Vec::new(),
        )?));
    }

    let centroids = read_vector_list(reader, nlist, dimension)?;
    let count = read_u32(reader)? as usize;
    let data = read_f32_vec(reader, element_count(count, dimension)?)?;
    let mut store = VectorStore::new(dimension);
    for vector in data.chunks_exact(dimension) {
        store.append(vector)?;
    }
    let assignments = read_u32_vec(reader, count)?;

    Ok(Index::Ivf(IvfIndex::from_parts(
        metric,
        params,
        Some(centroids),
        store,
        assignments,
    )?))
}

fn save_ivf_pq<W: Write>(ivf_pq: &IvfPqIndex, writer: &mut W) -> Result<()> {
    let params = ivf_pq.params();
    write_u32(writer, params.nlist as u32)?;
    write_u32(writer, params.nprobe as u32)?;
    write_u32(writer, params.num_segments as u32)?;
    write_u32(writer, params.code_bits)?;

    match (ivf_pq.centroids(), ivf_pq.quantizer()) {
        (Some(centroids), Some(pq)) => {
            writer.write_all(&[1])?;
            for centroid in centroids {
                write_f32_slice(writer, centroid)?;
            }
            write_u32(writer, pq.codebook_size() as u32)?;
            for codebook in pq.codebooks() {
                for codeword in codebook {
                    write_f32_slice(writer, codeword)?;
                }
            }
            write_u32(writer, ivf_pq.len() as u32)?;
            writer.write_all(ivf_pq.codes())?;
            for &assignment in ivf_pq.assignments() {
                write_u32(writer, assignment)?;
            }
        }
        _ => writer.write_all(&[0])?,
    }
    Ok(())
}

fn load_ivf_pq<R: Read>(
    reader: &mut R,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<Index> {
    let nlist = read_u32(reader)? as usize;
    let nprobe = read_u32(reader)? as usize;
    let num_segments = read_u32(reader)? as usize;
    let code_bits = read_u32(reader)?;
    if nlist == 0 || nprobe == 0 {
        return Err(IndexError::CorruptState(
            "nlist and nprobe must be greater than 0".to_string(),
        ));
    }
    if !(1..=8).contains(&code_bits) {
        return Err(IndexError::CorruptState(format!(
            "code_bits {code_bits} out of range"
        )));
    }
    if num_segments == 0 || dimension % num_segments != 0 {
        return Err(IndexError::CorruptState(format!(
            "dimension {dimension} is not divisible by {num_segments} segments"
        )));
    }
    let params = IvfPqParams {
        nlist,
        nprobe,
        num_segments,
        code_bits,
    };

    let trained = read_u8(reader)? != 0;
    if !trained {
        return Ok(Index::IvfPq(IvfPqIndex::from_parts(
            dimension, metric, params, None, None,
            Vec::new(),
            Vec::new(),
        )?));
    }

    let centroids = read_vector_list(reader, nlist, dimension)?;

    let codebook_size = read_u32(reader)? as usize;
    if codebook_size != 1usize << code_bits {
        return Err(IndexError::CorruptState(format!(
            "codebook size {codebook_size} disagrees with code_bits {code_bits}"
        )));
    }
    let segment_dim = dimension / num_segments;
    let mut codebooks = Vec::with_capacity(num_segments);
    for _ in 0..num_segments {
        codebooks.push(read_vector_list(reader, codebook_size, segment_dim)?);
    }
    let pq = ProductQuantizer::from_parts(dimension, num_segments, code_bits, metric, codebooks)?;

    let count = read_u32(reader)? as usize;
    let codes = read_byte_vec(reader, element_count(count, num_segments)?)?;
    let assignments = read_u32_vec(reader, count)?;

    Ok(Index::IvfPq(IvfPqIndex::from_parts(
        dimension,
        metric,
        params,
        Some(centroids),
        Some(pq),
        codes,
        assignments,
    )?))
}

// Low-level little-endian helpers. Truncation surfaces as CorruptState, not
// a bare I/O error, since a short stream is malformed data.

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            IndexError::CorruptState("unexpected end of stream".to_string())
        } else {
            IndexError::Io(e)
        }
    })
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn element_count(count: usize, per: usize) -> Result<usize> {
    count.checked_mul(per).ok_or_else(|| {
        IndexError::CorruptState("element count overflows addressable size".to_string())
    })
}

fn read_f32_vec<R: Read>(reader: &mut R, count: usize) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    let mut buf = [0u8; 4];
    for _ in 0..count {
        read_exact(reader, &mut buf)?;
        out.push(f32::from_le_bytes(buf));
    }
    Ok(out)
}

fn read_u32_vec<R: Read>(reader: &mut R, count: usize) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        out.push(read_u32(reader)?);
    }
    Ok(out)
}

fn read_byte_vec<R: Read>(reader: &mut R, count: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    let mut buf = [0u8; 4096];
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        read_exact(reader, &mut buf[..chunk])?;
        out.extend_from_slice(&buf[..chunk]);
        remaining -= chunk;
    }
    Ok(out)
}

fn read_vector_list<R: Read>(
    reader: &mut R,
    count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        out.push(read_f32_vec(reader, dimension)?);
    }
    Ok(out)
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_f32_slice<W: Write>(writer: &mut W, values: &[f32]) -> Result<()> {
    for &v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved_flat() -> Vec<u8> {
        let mut index = Index::flat(2, DistanceMetric::L2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        buf
    }

    #[test]
    fn flat_roundtrip_answers_identically() {
        let mut index = Index::flat(2, DistanceMetric::L2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[0.5, 0.5]).unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        let loaded = Index::load(&mut buf.as_slice()).unwrap();

        let query = [0.9, 0.1];
        assert_eq!(
            index.search(&query, 3).unwrap(),
            loaded.search(&query, 3).unwrap()
        );
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut buf = saved_flat();
        buf[0] = b'X';
        assert!(matches!(
            Index::load(&mut buf.as_slice()),
            Err(IndexError::CorruptState(_))
        ));
    }

    #[test]
    fn unknown_kind_tag_is_corrupt() {
        let mut buf = saved_flat();
        buf[8] = 99;
        assert!(matches!(
            Index::load(&mut buf.as_slice()),
            Err(IndexError::CorruptState(_))
        ));
    }

    #[test]
    fn unsupported_version_is_corrupt() {
        let mut buf = saved_flat();
        buf[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            Index::load(&mut buf.as_slice()),
            Err(IndexError::CorruptState(_))
        ));
    }

    #[test]
    fn absurd_header_counts_are_corrupt_not_a_crash() {
        // A header alone, declaring u32::MAX vectors of u32::MAX dimension.
        // Loading must fail cleanly at end-of-stream, not attempt the
        // allocation the counts imply.
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&[0, 0]); // Flat, L2
        buf.extend_from_slice(&u32::MAX.to_le_bytes()); // dimension
        buf.extend_from_slice(&u32::MAX.to_le_bytes()); // vector count
        assert!(matches!(
            Index::load(&mut buf.as_slice()),
            Err(IndexError::CorruptState(_))
        ));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let buf = saved_flat();
        let truncated = &buf[..buf.len() - 3];
        assert!(matches!(
            Index::load(&mut &truncated[..]),
            Err(IndexError::CorruptState(_))
        ));
    }

    #[test]
    fn untrained_ivf_roundtrips() {
        let index = Index::ivf(
            3,
            DistanceMetric::InnerProduct,
            IvfParams {
                nlist: 4,
                nprobe: 2,
            },
        )
        .unwrap();
        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        let loaded = Index::load(&mut buf.as_slice()).unwrap();
        assert!(!loaded.is_trained());
        assert_eq!(loaded.metric(), DistanceMetric::InnerProduct);
        assert_eq!(loaded.dimension(), 3);
    }
}
