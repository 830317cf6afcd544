use std::{
    collections::BTreeMap,
    fs,
    io::{self, Cursor, Seek, SeekFrom, Write},
    path::Path,
};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    encode::{ScalarType, VolumeImage},
    error::{Error, Result},
};

const OPENVDB_MAGIC: i64 = 0x5644_4220;
const FILE_VERSION: u32 = 224;
const LIBRARY_VERSION: (u32, u32) = (10, 0);
const GRID_TYPE: &str = "Tree_float_5_4_3";
const COMPRESS_NONE: u32 = 0;
const NO_MASK_AND_ALL_VALS: u8 = 6;

// log2 of the node edge length (leaf, lower internal, upper internal)
const LEAF_LOG2: u32 = 3;
const LOWER_LOG2: u32 = 4;
const UPPER_LOG2: u32 = 5;
// log2 of the voxel edge length each node covers
const LEAF_TOTAL: u32 = LEAF_LOG2;
const LOWER_TOTAL: u32 = LOWER_LOG2 + LEAF_TOTAL;
const UPPER_TOTAL: u32 = UPPER_LOG2 + LOWER_TOTAL;

const LEAF_SIZE: usize = 1 << (3 * LEAF_LOG2);
const LOWER_SIZE: usize = 1 << (3 * LOWER_LOG2);
const UPPER_SIZE: usize = 1 << (3 * UPPER_LOG2);

type Coord = [i32; 3];

fn child_offset(xyz: Coord, total: u32, child_total: u32) -> usize {
    let mask = (1i32 << total) - 1;
    let log2 = total - child_total;
    let [x, y, z] = xyz.map(|c| ((c & mask) >> child_total) as usize);
    (x << (2 * log2)) | (y << log2) | z
}

struct Leaf {
    mask: [u64; LEAF_SIZE / 64],
    values: [f32; LEAF_SIZE],
}

#[derive(Default)]
struct LowerNode {
    children: BTreeMap<usize, Box<Leaf>>,
}

#[derive(Default)]
struct UpperNode {
    children: BTreeMap<usize, LowerNode>,
}

// keyed like OpenVDB's root table, lexicographic origins
#[derive(Default)]
struct Tree {
    roots: BTreeMap<Coord, UpperNode>,
    voxel_count: i64,
    bbox: Option<(Coord, Coord)>,
}

impl Tree {
    fn from_image(image: &VolumeImage) -> Self {
        let (nx, ny, _) = image.dimensions();
        let e = image.extent;
        let mut tree = Tree::default();
        for (idx, &v) in image.data.iter().enumerate() {
            if v == 0 {
                continue;
            }
            let i = (idx % nx) as i32;
            let j = ((idx / nx) % ny) as i32;
            let k = (idx / (nx * ny)) as i32;
            tree.set([e[0] + i, e[2] + j, e[4] + k], f32::from(v));
        }
        tree
    }

    fn set(&mut self, xyz: Coord, value: f32) {
        let origin = xyz.map(|c| c & !((1i32 << UPPER_TOTAL) - 1));
        let upper = self.roots.entry(origin).or_default();
        let lower = upper
            .children
            .entry(child_offset(xyz, UPPER_TOTAL, LOWER_TOTAL))
            .or_default();
        let leaf = lower
            .children
            .entry(child_offset(xyz, LOWER_TOTAL, LEAF_TOTAL))
            .or_insert_with(|| {
                Box::new(Leaf {
                    mask: [0; LEAF_SIZE / 64],
                    values: [0.0; LEAF_SIZE],
                })
            });
        let n = child_offset(xyz, LEAF_TOTAL, 0);
        leaf.values[n] = value;
        leaf.mask[n >> 6] |= 1 << (n & 63);

        self.voxel_count += 1;
        self.bbox = Some(match self.bbox {
            None => (xyz, xyz),
            Some((lo, hi)) => (
                [lo[0].min(xyz[0]), lo[1].min(xyz[1]), lo[2].min(xyz[2])],
                [hi[0].max(xyz[0]), hi[1].max(xyz[1]), hi[2].max(xyz[2])],
            ),
        });
    }

    fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.roots
            .values()
            .flat_map(|upper| upper.children.values())
            .flat_map(|lower| lower.children.values().map(|leaf| &**leaf))
    }
}

enum MetaValue {
    Str(String),
    Bool(bool),
    Vec3i(Coord),
    Int64(i64),
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn write_meta<W: Write>(w: &mut W, meta: &BTreeMap<&str, MetaValue>) -> io::Result<()> {
    w.write_u32::<LittleEndian>(meta.len() as u32)?;
    for (name, value) in meta {
        write_string(w, name)?;
        match value {
            MetaValue::Str(s) => {
                write_string(w, "string")?;
                write_string(w, s)?;
            }
            MetaValue::Bool(b) => {
                write_string(w, "bool")?;
                w.write_u32::<LittleEndian>(1)?;
                w.write_u8(u8::from(*b))?;
            }
            MetaValue::Vec3i(v) => {
                write_string(w, "vec3i")?;
                w.write_u32::<LittleEndian>(12)?;
                for c in v {
                    w.write_i32::<LittleEndian>(*c)?;
                }
            }
            MetaValue::Int64(v) => {
                write_string(w, "int64")?;
                w.write_u32::<LittleEndian>(8)?;
                w.write_i64::<LittleEndian>(*v)?;
            }
        }
    }
    Ok(())
}

fn write_mask<W: Write>(w: &mut W, words: &[u64]) -> io::Result<()> {
    for word in words {
        w.write_u64::<LittleEndian>(*word)?;
    }
    Ok(())
}

fn write_internal_topology<W: Write>(
    w: &mut W,
    child_offsets: impl Iterator<Item = usize>,
    size: usize,
) -> io::Result<()> {
    let mut child_mask = vec![0u64; size / 64];
    for n in child_offsets {
        child_mask[n >> 6] |= 1 << (n & 63);
    }
    write_mask(w, &child_mask)?;
    write_mask(w, &vec![0u64; size / 64])?;
    w.write_u8(NO_MASK_AND_ALL_VALS)?;
    w.write_all(&vec![0u8; size * 4])
}

fn write_topology<W: Write>(w: &mut W, tree: &Tree) -> io::Result<()> {
    // buffer count
    w.write_i32::<LittleEndian>(1)?;
    // background, tile count, child count
    w.write_f32::<LittleEndian>(0.0)?;
    w.write_u32::<LittleEndian>(0)?;
    w.write_u32::<LittleEndian>(tree.roots.len() as u32)?;
    for (origin, upper) in &tree.roots {
        for c in origin {
            w.write_i32::<LittleEndian>(*c)?;
        }
        write_internal_topology(w, upper.children.keys().copied(), UPPER_SIZE)?;
        for lower in upper.children.values() {
            write_internal_topology(w, lower.children.keys().copied(), LOWER_SIZE)?;
            for leaf in lower.children.values() {
                write_mask(w, &leaf.mask)?;
            }
        }
    }
    Ok(())
}

fn write_buffers<W: Write>(w: &mut W, tree: &Tree) -> io::Result<()> {
    for leaf in tree.leaves() {
        write_mask(w, &leaf.mask)?;
        w.write_u8(NO_MASK_AND_ALL_VALS)?;
        for v in &leaf.values {
            w.write_f32::<LittleEndian>(*v)?;
        }
    }
    Ok(())
}

/// `ScaleMap`: scale, voxel size, inverse scale, inverse squared, inverse doubled.
fn write_transform<W: Write>(w: &mut W, spacing: [f64; 3]) -> io::Result<()> {
    write_string(w, "ScaleMap")?;
    let rows = [
        spacing,
        spacing,
        spacing.map(|s| 1.0 / s),
        spacing.map(|s| 1.0 / (s * s)),
        spacing.map(|s| 0.5 / s),
    ];
    for v in rows.iter().flatten() {
        w.write_f64::<LittleEndian>(*v)?;
    }
    Ok(())
}

fn check_image(image: &VolumeImage) -> Result<()> {
    let e = image.extent;
    if e[1] < e[0] || e[3] < e[2] || e[5] < e[4] {
        return Err(Error::Encoding(format!("empty extent {e:?}")));
    }
    if image.scalar_type != ScalarType::UnsignedChar || image.components != 1 {
        return Err(Error::Encoding(
            "only single component 8-bit images can be written".to_string(),
        ));
    }
    let (nx, ny, nz) = image.dimensions();
    if image.data.len() != nx * ny * nz {
        return Err(Error::Encoding(format!(
            "buffer holds {} bytes, extent {e:?} needs {}",
            image.data.len(),
            nx * ny * nz
        )));
    }
    Ok(())
}

pub fn encode_vdb(image: &VolumeImage) -> Result<Vec<u8>> {
    check_image(image)?;
    let tree = Tree::from_image(image);
    debug!(
        "grid {:?}: {} active voxels in {} leaves",
        image.scalar_name,
        tree.voxel_count,
        tree.leaves().count()
    );

    let mut out = Cursor::new(Vec::new());
    out.write_i64::<LittleEndian>(OPENVDB_MAGIC)?;
    out.write_u32::<LittleEndian>(FILE_VERSION)?;
    out.write_u32::<LittleEndian>(LIBRARY_VERSION.0)?;
    out.write_u32::<LittleEndian>(LIBRARY_VERSION.1)?;
    // has grid offsets
    out.write_u8(1)?;
    out.write_all(Uuid::new_v4().hyphenated().to_string().as_bytes())?;

    let file_meta = BTreeMap::from([(
        "creator",
        MetaValue::Str(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
    )]);
    write_meta(&mut out, &file_meta)?;

    // grid descriptor: unique name, type, instance parent, stream offsets
    out.write_i32::<LittleEndian>(1)?;
    write_string(&mut out, &image.scalar_name)?;
    write_string(&mut out, GRID_TYPE)?;
    write_string(&mut out, "")?;
    let offsets_pos = out.position();
    for _ in 0..3 {
        out.write_i64::<LittleEndian>(0)?;
    }

    let grid_pos = out.position();
    out.write_u32::<LittleEndian>(COMPRESS_NONE)?;
    let mut grid_meta = BTreeMap::from([
        ("class", MetaValue::Str("fog volume".to_string())),
        ("is_saved_as_half_float", MetaValue::Bool(false)),
        ("name", MetaValue::Str(image.scalar_name.clone())),
        ("file_voxel_count", MetaValue::Int64(tree.voxel_count)),
    ]);
    if let Some((lo, hi)) = tree.bbox {
        grid_meta.insert("file_bbox_min", MetaValue::Vec3i(lo));
        grid_meta.insert("file_bbox_max", MetaValue::Vec3i(hi));
    }
    write_meta(&mut out, &grid_meta)?;
    write_transform(&mut out, image.spacing)?;
    write_topology(&mut out, &tree)?;

    let block_pos = out.position();
    write_buffers(&mut out, &tree)?;
    let end_pos = out.position();

    out.seek(SeekFrom::Start(offsets_pos))?;
    for pos in [grid_pos, block_pos, end_pos] {
        out.write_i64::<LittleEndian>(pos as i64)?;
    }
    Ok(out.into_inner())
}

/// Write `image` to `dest`, replacing any existing file.
pub fn write_volume(image: &VolumeImage, dest: &Path) -> Result<()> {
    let unwritable = |source: io::Error| Error::PathUnwritable {
        path: dest.to_owned(),
        source,
    };
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(unwritable(io::Error::new(
            io::ErrorKind::NotFound,
            "destination directory does not exist",
        )));
    }

    let bytes = encode_vdb(image)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(unwritable)?;
    tmp.write_all(&bytes).map_err(unwritable)?;
    tmp.as_file().sync_all().map_err(unwritable)?;

    if dest.exists() {
        fs::remove_file(dest).map_err(unwritable)?;
        debug!("removed existing {dest:?}");
    }
    tmp.persist(dest).map_err(|e| unwritable(e.error))?;
    debug!("wrote {dest:?} ({} bytes)", bytes.len());
    Ok(())
}
