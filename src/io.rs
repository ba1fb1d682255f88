//! Resume snapshots: a `SegmentStore` as an NPZ archive.
//!
//! Per walker set (`current`, `next`) the archive holds flat columns (parent
//! and family each as a kind/id pair) plus two CSR pairs,
//! `*_pcoord_data`/`*_pcoord_indptr` (row-major trajectories) and
//! `*_wtg_data`/`*_wtg_indptr` (weight-transfer parents).

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};
use smallvec::SmallVec;
use std::fs::File;

use crate::population::{Parent, Segment, SegmentId, SegmentStore};

const PARENT_NONE: i64 = -1;
const PARENT_SEGMENT: i64 = 0;
const PARENT_INITIAL: i64 = 1;

fn encode_parent(parent: Option<Parent>) -> (i64, u64) {
    match parent {
        None => (PARENT_NONE, 0),
        Some(Parent::Segment(id)) => (PARENT_SEGMENT, id.0),
        Some(Parent::InitialState(id)) => (PARENT_INITIAL, id),
    }
}

fn decode_parent(kind: i64, id: u64, set: &str) -> Result<Option<Parent>> {
    Ok(match kind {
        PARENT_NONE => None,
        PARENT_SEGMENT => Some(Parent::Segment(SegmentId(id))),
        PARENT_INITIAL => Some(Parent::InitialState(id)),
        other => bail!("{set}: unknown parent kind {other}"),
    })
}

fn read<T: ReadableElement, R: std::io::Read + std::io::Seek>(
    npz: &mut NpzReader<R>,
    name: &str,
) -> Result<Vec<T>> {
    let arr: Array1<T> = npz
        .by_name(name)
        .with_context(|| format!("missing {}", name))?;
    Ok(arr.into_raw_vec())
}

fn indptr_range(indptr: &[i64], i: usize, len: usize, what: &str) -> Result<std::ops::Range<usize>> {
    let (s, e) = (indptr[i], indptr[i + 1]);
    if s < 0 || e < s || e as usize > len {
        bail!("{what}: bad indptr [{s}, {e}) for {len} entries");
    }
    Ok(s as usize..e as usize)
}

fn load_set<R: std::io::Read + std::io::Seek>(npz: &mut NpzReader<R>, set: &str) -> Result<Vec<Segment>> {
    let ids: Vec<u64> = read(npz, &format!("{set}_ids.npy"))?;
    let weights: Vec<f64> = read(npz, &format!("{set}_weights.npy"))?;
    let ndims: Vec<u64> = read(npz, &format!("{set}_ndim.npy"))?;
    let parent_kind: Vec<i64> = read(npz, &format!("{set}_parent_kind.npy"))?;
    let parent_id: Vec<u64> = read(npz, &format!("{set}_parent_id.npy"))?;
    let family_kind: Vec<i64> = read(npz, &format!("{set}_family_kind.npy"))?;
    let family_id: Vec<u64> = read(npz, &format!("{set}_family_id.npy"))?;
    let pending: Vec<u8> = read(npz, &format!("{set}_pending.npy"))?;
    let pcoord_data: Vec<f64> = read(npz, &format!("{set}_pcoord_data.npy"))?;
    let pcoord_indptr: Vec<i64> = read(npz, &format!("{set}_pcoord_indptr.npy"))?;
    let wtg_data: Vec<u64> = read(npz, &format!("{set}_wtg_data.npy"))?;
    let wtg_indptr: Vec<i64> = read(npz, &format!("{set}_wtg_indptr.npy"))?;

    let n = ids.len();
    let columns = [
        weights.len(),
        ndims.len(),
        parent_kind.len(),
        parent_id.len(),
        family_kind.len(),
        family_id.len(),
        pending.len(),
        pcoord_indptr.len().saturating_sub(1),
        wtg_indptr.len().saturating_sub(1),
    ];
    if columns.iter().any(|&len| len != n) {
        bail!("{set}: column lengths {columns:?} disagree with {n} walkers");
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let range = indptr_range(&pcoord_indptr, i, pcoord_data.len(), set)?;
        let ndim = ndims[i] as usize;
        let flat = pcoord_data[range].to_vec();
        let rows = flat.len().checked_div(ndim).unwrap_or(0);
        let pcoord = Array2::from_shape_vec((rows, ndim), flat)
            .with_context(|| format!("{set}: walker {} trajectory shape", ids[i]))?;

        let parent = decode_parent(parent_kind[i], parent_id[i], set)?;
        let family = decode_parent(family_kind[i], family_id[i], set)?;
        let range = indptr_range(&wtg_indptr, i, wtg_data.len(), set)?;
        let wtg_parents: SmallVec<[SegmentId; 4]> = wtg_data[range].iter().map(|&p| SegmentId(p)).collect();

        out.push(Segment {
            id: SegmentId(ids[i]),
            weight: weights[i],
            pcoord,
            parent,
            family,
            wtg_parents,
            recycle_pending: pending[i] != 0,
        });
    }
    Ok(out)
}

pub fn load_store(path: &str) -> Result<SegmentStore> {
    let f = File::open(path).with_context(|| format!("open {}", path))?;
    let mut npz = NpzReader::new(f).context("read npz")?;

    let meta: Vec<u64> = read(&mut npz, "meta_store.npy")?;
    let &[iteration, next_id] = meta.as_slice() else {
        bail!("meta_store: expected [iteration, next_id], got {meta:?}");
    };
    let current = load_set(&mut npz, "current")?;
    let next = load_set(&mut npz, "next")?;
    Ok(SegmentStore {
        iteration,
        current,
        next,
        next_id,
    })
}

fn save_set<W: std::io::Write + std::io::Seek>(
    npz: &mut NpzWriter<W>,
    set: &str,
    segments: &[Segment],
) -> Result<()> {
    let mut pcoord_data: Vec<f64> = Vec::new();
    let mut pcoord_indptr: Vec<i64> = Vec::with_capacity(segments.len() + 1);
    let mut wtg_data: Vec<u64> = Vec::new();
    let mut wtg_indptr: Vec<i64> = Vec::with_capacity(segments.len() + 1);
    pcoord_indptr.push(0);
    wtg_indptr.push(0);
    for seg in segments {
        pcoord_data.extend(seg.pcoord.iter().copied());
        pcoord_indptr.push(pcoord_data.len() as i64);
        wtg_data.extend(seg.wtg_parents.iter().map(|p| p.0));
        wtg_indptr.push(wtg_data.len() as i64);
    }
    let (parent_kind, parent_id): (Vec<i64>, Vec<u64>) =
        segments.iter().map(|s| encode_parent(s.parent)).unzip();
    let (family_kind, family_id): (Vec<i64>, Vec<u64>) =
        segments.iter().map(|s| encode_parent(s.family)).unzip();

    let col = |f: fn(&Segment) -> u64| Array1::from_iter(segments.iter().map(f));
    npz.add_array(format!("{set}_ids.npy"), &col(|s| s.id.0))?;
    npz.add_array(format!("{set}_ndim.npy"), &col(|s| s.ndim() as u64))?;
    npz.add_array(
        format!("{set}_weights.npy"),
        &Array1::from_iter(segments.iter().map(|s| s.weight)),
    )?;
    npz.add_array(format!("{set}_parent_kind.npy"), &Array1::from_vec(parent_kind))?;
    npz.add_array(format!("{set}_parent_id.npy"), &Array1::from_vec(parent_id))?;
    npz.add_array(format!("{set}_family_kind.npy"), &Array1::from_vec(family_kind))?;
    npz.add_array(format!("{set}_family_id.npy"), &Array1::from_vec(family_id))?;
    npz.add_array(
        format!("{set}_pending.npy"),
        &Array1::from_iter(segments.iter().map(|s| u8::from(s.recycle_pending))),
    )?;
    npz.add_array(format!("{set}_pcoord_data.npy"), &Array1::from_vec(pcoord_data))?;
    npz.add_array(format!("{set}_pcoord_indptr.npy"), &Array1::from_vec(pcoord_indptr))?;
    npz.add_array(format!("{set}_wtg_data.npy"), &Array1::from_vec(wtg_data))?;
    npz.add_array(format!("{set}_wtg_indptr.npy"), &Array1::from_vec(wtg_indptr))?;
    Ok(())
}

pub fn save_store(path: &str, store: &SegmentStore) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path))?;
    let mut npz = NpzWriter::new(f);

    npz.add_array(
        "meta_store.npy",
        &Array1::from_vec(vec![store.iteration, store.next_id]),
    )?;
    save_set(&mut npz, "current", &store.current)?;
    save_set(&mut npz, "next", &store.next)?;

    npz.finish()?;
    Ok(())
}
