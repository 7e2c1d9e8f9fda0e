//! Writers producing well-formed model files, used to build fixtures.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::common::types::{Vector3, fourcc};
use crate::phy::types::PHY_HEADER_SIZE;
use crate::studio::types::{FOURCC_STUDIO_HEADER, STUDIO_HEADER_SIZE};
use crate::vtx::types::{BODY_PART_HEADER_SIZE, MESH_INDEX_HEADER_SIZE, MESH_INDEX_VERSION, MODEL_HEADER_SIZE};
use crate::vvd::types::{
    BoneWeights, FIXUP_SIZE, FOURCC_VERTEX_FILE, MAX_NUM_LODS, STUDIO_VERTEX_SIZE, StudioVertex,
    VERTEX_FILE_HEADER_SIZE, VERTEX_FILE_VERSION, VertexFixup,
};

fn put_i32(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builder for `.mdl` headers.
#[derive(Debug, Clone)]
pub struct StudioBuilder {
    pub id: u32,
    pub version: i32,
    pub checksum: i32,
    pub name: String,
    pub flags: i32,
    pub num_body_parts: i32,
    pub num_flex_desc: i32,
    /// `(flags, num_frames)` per sequence.
    pub sequences: Vec<(i32, i32)>,
    /// `(data_start, data_end)` per block, block 0 included.
    pub anim_blocks: Vec<(i32, i32)>,
    pub anim_block_name: Option<String>,
    /// `(label, name)` per included model.
    pub includes: Vec<(String, String)>,
    pub root_lod: u8,
    pub num_allowed_root_lods: u8,
}

impl StudioBuilder {
    pub fn new(name: &str, checksum: i32) -> Self {
        Self {
            id: FOURCC_STUDIO_HEADER,
            version: 48,
            checksum,
            name: name.to_string(),
            flags: 0,
            num_body_parts: 1,
            num_flex_desc: 0,
            sequences: Vec::new(),
            anim_blocks: Vec::new(),
            anim_block_name: None,
            includes: Vec::new(),
            root_lod: 0,
            num_allowed_root_lods: 0,
        }
    }

    pub fn body_parts(mut self, count: i32) -> Self {
        self.num_body_parts = count;
        self
    }

    pub fn flexes(mut self, count: i32) -> Self {
        self.num_flex_desc = count;
        self
    }

    pub fn sequence(mut self, flags: i32, num_frames: i32) -> Self {
        self.sequences.push((flags, num_frames));
        self
    }

    pub fn anim_blocks(mut self, file: &str, ranges: Vec<(i32, i32)>) -> Self {
        self.anim_block_name = Some(file.to_string());
        self.anim_blocks = ranges;
        self
    }

    pub fn include(mut self, label: &str, name: &str) -> Self {
        self.includes.push((label.to_string(), name.to_string()));
        self
    }

    pub fn root_lod(mut self, root_lod: u8, allowed: u8) -> Self {
        self.root_lod = root_lod;
        self.num_allowed_root_lods = allowed;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let seq_off = STUDIO_HEADER_SIZE;
        let anim_off = seq_off + 8 * self.sequences.len();
        let include_off = anim_off + 8 * self.anim_blocks.len();
        let strings_off = include_off + 8 * self.includes.len();

        let mut strings: Vec<u8> = Vec::new();
        let mut intern = |text: &str| {
            let pos = strings_off + strings.len();
            strings.extend_from_slice(text.as_bytes());
            strings.push(0);
            pos as i32
        };

        let anim_name_index = self.anim_block_name.as_deref().map(&mut intern).unwrap_or(0);
        let include_indices: Vec<(i32, i32)> = self
            .includes
            .iter()
            .map(|(label, name)| (intern(label), intern(name)))
            .collect();

        let length = strings_off + strings.len();
        let mut out = Vec::with_capacity(length);

        let mut name = [0u8; 64];
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(63);
        name[..len].copy_from_slice(&bytes[..len]);

        out.write_u32::<LittleEndian>(self.id).unwrap();
        for value in [self.version, self.checksum] {
            out.write_i32::<LittleEndian>(value).unwrap();
        }
        out.extend_from_slice(&name);
        for value in [
            length as i32,
            self.flags,
            self.num_body_parts,
            self.num_flex_desc,
            self.sequences.len() as i32,
            seq_off as i32,
            self.anim_blocks.len() as i32,
            anim_off as i32,
            anim_name_index,
            self.includes.len() as i32,
            include_off as i32,
        ] {
            out.write_i32::<LittleEndian>(value).unwrap();
        }
        out.extend_from_slice(&[self.root_lod, self.num_allowed_root_lods, 0, 0]);

        for &(a, b) in self.sequences.iter().chain(self.anim_blocks.iter()).chain(include_indices.iter()) {
            out.write_i32::<LittleEndian>(a).unwrap();
            out.write_i32::<LittleEndian>(b).unwrap();
        }
        out.extend_from_slice(&strings);
        out
    }
}

/// A vertex fully bound to bone 0.
pub fn rigid_vertex(position: Vector3) -> StudioVertex {
    StudioVertex {
        bone_weights: BoneWeights {
            weight: [1.0, 0.0, 0.0],
            bone: [0, 0, 0],
            num_bones: 1,
        },
        position,
        normal: Vector3 { x: 0.0, y: 0.0, z: 1.0 },
        ..Default::default()
    }
}

/// Builder for `.vvd` vertex files.
#[derive(Debug, Clone)]
pub struct VertexFileBuilder {
    pub id: i32,
    pub version: i32,
    pub checksum: i32,
    pub num_lod_vertexes: Vec<i32>,
    pub fixups: Vec<VertexFixup>,
    pub vertices: Vec<StudioVertex>,
    pub tangents: bool,
}

impl VertexFileBuilder {
    /// One level of detail holding every vertex.
    pub fn new(checksum: i32, vertices: Vec<StudioVertex>) -> Self {
        Self {
            id: FOURCC_VERTEX_FILE,
            version: VERTEX_FILE_VERSION,
            checksum,
            num_lod_vertexes: vec![vertices.len() as i32],
            fixups: Vec::new(),
            vertices,
            tangents: false,
        }
    }

    pub fn lods(mut self, counts: Vec<i32>, fixups: Vec<VertexFixup>) -> Self {
        self.num_lod_vertexes = counts;
        self.fixups = fixups;
        self
    }

    pub fn with_tangents(mut self) -> Self {
        self.tangents = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let fixup_start = VERTEX_FILE_HEADER_SIZE;
        let vertex_start = fixup_start + self.fixups.len() * FIXUP_SIZE;
        let tangent_start = vertex_start + self.vertices.len() * STUDIO_VERTEX_SIZE;

        let mut lod_vertexes = [0i32; MAX_NUM_LODS];
        for (slot, count) in lod_vertexes.iter_mut().zip(self.num_lod_vertexes.iter()) {
            *slot = *count;
        }

        let mut out = Vec::new();
        for value in [self.id, self.version, self.checksum, self.num_lod_vertexes.len() as i32] {
            out.write_i32::<LittleEndian>(value).unwrap();
        }
        for value in lod_vertexes {
            out.write_i32::<LittleEndian>(value).unwrap();
        }
        for value in [
            self.fixups.len() as i32,
            if self.fixups.is_empty() { 0 } else { fixup_start as i32 },
            vertex_start as i32,
            if self.tangents { tangent_start as i32 } else { 0 },
        ] {
            out.write_i32::<LittleEndian>(value).unwrap();
        }

        for fixup in &self.fixups {
            for value in [fixup.lod, fixup.source_vertex_id, fixup.num_vertexes] {
                out.write_i32::<LittleEndian>(value).unwrap();
            }
        }

        for vertex in &self.vertices {
            let weights = &vertex.bone_weights;
            for value in weights.weight {
                out.write_f32::<LittleEndian>(value).unwrap();
            }
            out.extend_from_slice(&weights.bone);
            out.push(weights.num_bones);
            for value in [
                vertex.position.x,
                vertex.position.y,
                vertex.position.z,
                vertex.normal.x,
                vertex.normal.y,
                vertex.normal.z,
                vertex.tex_coord.x,
                vertex.tex_coord.y,
            ] {
                out.write_f32::<LittleEndian>(value).unwrap();
            }
        }

        if self.tangents {
            for _ in &self.vertices {
                for value in [1.0f32, 0.0, 0.0, 1.0] {
                    out.write_f32::<LittleEndian>(value).unwrap();
                }
            }
        }

        out
    }
}

/// Builder for `.vtx` mesh index files.
#[derive(Debug, Clone)]
pub struct MeshIndexBuilder {
    pub version: i32,
    pub checksum: i32,
    /// Meshes per level of detail, per model, per body part.
    pub body_parts: Vec<Vec<Vec<i32>>>,
}

impl MeshIndexBuilder {
    /// One body part holding one model with a single mesh at a single level of detail.
    pub fn new(checksum: i32) -> Self {
        Self {
            version: MESH_INDEX_VERSION,
            checksum,
            body_parts: vec![vec![vec![1]]],
        }
    }

    pub fn body_parts(mut self, body_parts: Vec<Vec<Vec<i32>>>) -> Self {
        self.body_parts = body_parts;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let num_lods = self
            .body_parts
            .iter()
            .flatten()
            .map(|lods| lods.len())
            .max()
            .unwrap_or(0);

        let mut out = vec![0u8; MESH_INDEX_HEADER_SIZE + BODY_PART_HEADER_SIZE * self.body_parts.len()];
        put_i32(&mut out, 0, self.version);
        put_i32(&mut out, 4, 24);
        out[8..10].copy_from_slice(&53u16.to_le_bytes());
        out[10..12].copy_from_slice(&9u16.to_le_bytes());
        put_i32(&mut out, 12, 3);
        put_i32(&mut out, 16, self.checksum);
        put_i32(&mut out, 20, num_lods as i32);
        put_i32(&mut out, 24, 0);
        put_i32(&mut out, 28, self.body_parts.len() as i32);
        put_i32(&mut out, 32, MESH_INDEX_HEADER_SIZE as i32);

        for (part_idx, models) in self.body_parts.iter().enumerate() {
            let part_pos = MESH_INDEX_HEADER_SIZE + part_idx * BODY_PART_HEADER_SIZE;
            let models_pos = out.len();
            out.resize(models_pos + MODEL_HEADER_SIZE * models.len(), 0);
            put_i32(&mut out, part_pos, models.len() as i32);
            put_i32(&mut out, part_pos + 4, (models_pos - part_pos) as i32);

            for (model_idx, lods) in models.iter().enumerate() {
                let model_pos = models_pos + model_idx * MODEL_HEADER_SIZE;
                let lods_pos = out.len();
                put_i32(&mut out, model_pos, lods.len() as i32);
                put_i32(&mut out, model_pos + 4, (lods_pos - model_pos) as i32);
                for (lod_idx, meshes) in lods.iter().enumerate() {
                    out.write_i32::<LittleEndian>(*meshes).unwrap();
                    out.write_i32::<LittleEndian>(0).unwrap();
                    out.write_f32::<LittleEndian>(lod_idx as f32 * 10.0).unwrap();
                }
            }
        }

        out
    }
}

/// Builder for `.phy` collision files.
#[derive(Debug, Clone)]
pub struct PhyBuilder {
    pub header_size: i32,
    pub checksum: i32,
    pub solids: Vec<Vec<u8>>,
    pub key_values: String,
}

impl PhyBuilder {
    pub fn new(checksum: i32) -> Self {
        Self {
            header_size: PHY_HEADER_SIZE,
            checksum,
            solids: Vec::new(),
            key_values: String::new(),
        }
    }

    pub fn solid(mut self, bytes: &[u8]) -> Self {
        self.solids.push(bytes.to_vec());
        self
    }

    pub fn key_values(mut self, text: &str) -> Self {
        self.key_values = text.to_string();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for value in [
            self.header_size,
            fourcc(b"VPHY") as i32,
            self.solids.len() as i32,
            self.checksum,
        ] {
            out.write_i32::<LittleEndian>(value).unwrap();
        }

        for solid in &self.solids {
            out.write_i32::<LittleEndian>(solid.len() as i32).unwrap();
            out.extend_from_slice(solid);
        }

        out.extend_from_slice(self.key_values.as_bytes());
        if !self.key_values.is_empty() {
            out.push(0);
        }
        out
    }
}

/// Lays animation blocks out back to back. Block 0 is reserved and gets an empty range.
pub fn anim_block_file(blocks: &[&[u8]]) -> (Vec<u8>, Vec<(i32, i32)>) {
    let mut data = Vec::new();
    let mut ranges = vec![(0, 0)];
    for block in blocks {
        let start = data.len() as i32;
        data.extend_from_slice(block);
        ranges.push((start, data.len() as i32));
    }
    (data, ranges)
}
