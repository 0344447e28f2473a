use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::VecError;
use crate::hnsw::{Hnsw, HnswConfig, HnswNode};
use crate::snapshot::IndexSnapshot;

const SNAPSHOT_MAGIC: [u8; 4] = [b'F', b'V', b'S', b'N'];
const SNAPSHOT_VERSION: u32 = 1;
const MAX_LEVEL: usize = 31;

/// Save serializes a snapshot to a writer in a compact binary format:
///
/// ```text
/// [4B magic "FVSN"] [4B version=1]
/// [8B generation]
/// [4B dim] [4B M] [4B efConstruction] [4B efSearch] [8B seed]
/// [4B count]
/// For each entry, in index_id order:
///   [4B idLen] [idLen bytes user_id]
///   [4B level]
///   [dim x 4B float32 vector]
///   For each layer 0..=level:
///     [4B numFriends] [numFriends x 4B friend index_ids]
/// ```
///
/// All multi-byte values are little-endian.
pub fn save(snapshot: &IndexSnapshot, w: &mut dyn Write) -> Result<(), VecError> {
    let mut bw = BufWriter::new(w);
    let graph = snapshot.graph();
    let cfg = graph.config();

    bw.write_all(&SNAPSHOT_MAGIC)?;
    bw.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
    bw.write_all(&snapshot.generation().to_le_bytes())?;

    bw.write_all(&(cfg.dim as u32).to_le_bytes())?;
    bw.write_all(&(cfg.m as u32).to_le_bytes())?;
    bw.write_all(&(cfg.ef_construction as u32).to_le_bytes())?;
    bw.write_all(&(cfg.ef_search as u32).to_le_bytes())?;
    bw.write_all(&cfg.seed.to_le_bytes())?;

    bw.write_all(&(snapshot.len() as u32).to_le_bytes())?;

    for (nd, user_id) in graph.nodes().iter().zip(snapshot.user_ids()) {
        let id_bytes = user_id.as_bytes();
        bw.write_all(&(id_bytes.len() as u32).to_le_bytes())?;
        bw.write_all(id_bytes)?;

        bw.write_all(&(nd.level as u32).to_le_bytes())?;

        for &v in &nd.vector {
            bw.write_all(&v.to_le_bytes())?;
        }

        for lev in 0..=nd.level {
            let friends = nd.friends.get(lev).map(Vec::as_slice).unwrap_or(&[]);
            bw.write_all(&(friends.len() as u32).to_le_bytes())?;
            for &f in friends {
                bw.write_all(&f.to_le_bytes())?;
            }
        }
    }

    bw.flush()?;
    Ok(())
}

struct Decoder<R: Read> {
    r: R,
}

impl<R: Read> Decoder<R> {
    fn u32(&mut self) -> Result<u32, VecError> {
        let mut buf = [0u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, VecError> {
        let mut buf = [0u8; 8];
        self.r.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn f32(&mut self) -> Result<f32, VecError> {
        let mut buf = [0u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn string(&mut self) -> Result<String, VecError> {
        let len = self.u32()? as usize;
        let mut bytes = vec![0u8; len];
        self.r.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| VecError::InvalidFormat(e.to_string()))
    }
}

/// Load deserializes a snapshot written by [`save`].
///
/// Neighbor IDs are bounds-checked and user_ids must be unique; the entry
/// point and top level are recomputed rather than read.
pub fn load(r: &mut dyn Read) -> Result<IndexSnapshot, VecError> {
    let mut d = Decoder {
        r: BufReader::new(r),
    };

    let mut magic = [0u8; 4];
    d.r.read_exact(&mut magic)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(VecError::InvalidFormat(format!("invalid magic {magic:?}")));
    }

    let version = d.u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(VecError::InvalidFormat(format!(
            "unsupported version {version} (want {SNAPSHOT_VERSION})"
        )));
    }

    let generation = d.u64()?;

    let dim = d.u32()? as usize;
    if dim == 0 {
        return Err(VecError::InvalidFormat("invalid dimension 0".into()));
    }
    let mut cfg = HnswConfig {
        dim,
        m: d.u32()? as usize,
        ef_construction: d.u32()? as usize,
        ef_search: d.u32()? as usize,
        seed: d.u64()?,
    };
    cfg.set_defaults();

    let count = d.u32()? as usize;
    let mut nodes = Vec::with_capacity(count.min(1 << 20));
    let mut user_ids = Vec::with_capacity(count.min(1 << 20));
    let mut seen = std::collections::HashSet::new();

    for _ in 0..count {
        let user_id = d.string()?;
        if !seen.insert(user_id.clone()) {
            return Err(VecError::InvalidFormat(format!(
                "duplicate user_id {user_id:?}"
            )));
        }

        let level = d.u32()? as usize;
        if level > MAX_LEVEL {
            return Err(VecError::InvalidFormat(format!(
                "node level {level} exceeds maximum {MAX_LEVEL}"
            )));
        }

        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            vector.push(d.f32()?);
        }

        let mut friends = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let nf = d.u32()? as usize;
            let mut layer_friends = Vec::with_capacity(nf.min(1024));
            for _ in 0..nf {
                let f_id = d.u32()?;
                if f_id as usize >= count {
                    return Err(VecError::InvalidFormat(format!(
                        "friend ID {f_id} out of bounds (count={count})"
                    )));
                }
                layer_friends.push(f_id);
            }
            friends.push(layer_friends);
        }

        user_ids.push(user_id);
        nodes.push(HnswNode {
            vector,
            level,
            friends,
        });
    }

    Ok(IndexSnapshot::from_parts(
        generation,
        Hnsw::from_nodes(cfg, nodes),
        user_ids,
    ))
}

/// Write a snapshot to `path`, replacing any previous file only once the
/// new one is fully written. Each call writes its own temp file in the
/// target directory, so concurrent saves never interleave bytes.
pub fn save_file(snapshot: &IndexSnapshot, path: &Path) -> Result<(), VecError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    save(snapshot, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read the snapshot at `path`. Returns `Ok(None)` if no file exists.
pub fn load_file(path: &Path) -> Result<Option<IndexSnapshot>, VecError> {
    let mut f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    load(&mut f).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(dim: usize) -> HnswConfig {
        HnswConfig {
            dim,
            m: 8,
            ef_construction: 64,
            ef_search: 32,
            seed: 11,
        }
    }

    fn sample() -> IndexSnapshot {
        IndexSnapshot::build(
            3,
            test_cfg(4),
            vec![
                ("a".into(), vec![1.0, 0.0, 0.0, 0.0]),
                ("b".into(), vec![0.0, 1.0, 0.0, 0.0]),
                ("c".into(), vec![0.0, 0.0, 1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_save_load() {
        let snap = sample();

        let mut buf = Vec::new();
        save(&snap, &mut buf).unwrap();
        let loaded = load(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.generation(), 3);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.config(), snap.config());
        assert_eq!(loaded.index_id_of("c"), Some(2));

        let query = [1.0f32, 0.0, 0.0, 0.0];
        let h1 = snap.search(&query, 2).unwrap();
        let h2 = loaded.search(&query, 2).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_save_load_empty() {
        let snap = IndexSnapshot::empty(test_cfg(4));
        let mut buf = Vec::new();
        save(&snap, &mut buf).unwrap();

        let loaded = load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded.generation(), 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_invalid_magic() {
        let bad = b"NOPE";
        assert!(load(&mut bad.as_slice()).is_err());
    }

    #[test]
    fn test_load_truncated() {
        let mut buf = Vec::new();
        save(&sample(), &mut buf).unwrap();
        buf.truncate(buf.len() - 5);
        assert!(load(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("snapshot.fvs");

        assert!(load_file(&path).unwrap().is_none());

        save_file(&sample(), &path).unwrap();
        let loaded = load_file(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
        let leftover: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftover.is_empty(), "temp files left behind: {leftover:?}");
    }

    fn grid(n: usize, generation: u64) -> IndexSnapshot {
        let entries = (0..n)
            .map(|i| {
                let mut v = vec![0.0f32; 4];
                v[i % 4] = 1.0;
                v[(i + 1) % 4] = (i as f32 + 1.0) / n as f32;
                (format!("u{i:05}"), v)
            })
            .collect();
        IndexSnapshot::build(generation, test_cfg(4), entries).unwrap()
    }

    #[test]
    fn test_concurrent_saves_leave_a_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.fvs");
        let small = grid(400, 1);
        let large = grid(450, 2);

        for _ in 0..10 {
            std::thread::scope(|s| {
                s.spawn(|| save_file(&small, &path).unwrap());
                s.spawn(|| save_file(&large, &path).unwrap());
            });
            let loaded = load_file(&path).unwrap().unwrap();
            match loaded.generation() {
                1 => assert_eq!(loaded.len(), 400),
                2 => assert_eq!(loaded.len(), 450),
                g => panic!("unexpected generation {g}"),
            }
        }
    }
}
