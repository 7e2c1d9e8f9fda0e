use crate::common::types::{Vector2, Vector3, Vector4, fourcc};
use mdlcache_files_derive_parseable::Parse;

pub const FOURCC_VERTEX_FILE: i32 = fourcc(b"IDSV") as i32;
/// Id carried by vertex data after it was reduced to the thin form.
pub const FOURCC_THIN_VERTEX_FILE: i32 = fourcc(b"IDCV") as i32;
pub const VERTEX_FILE_VERSION: i32 = 4;
pub const VERTEX_FILE_HEADER_SIZE: usize = 64;
pub const MAX_NUM_LODS: usize = 8;
pub const MAX_NUM_BONES_PER_VERT: usize = 3;
pub const STUDIO_VERTEX_SIZE: usize = 48;
pub const TANGENT_SIZE: usize = 16;
pub const FIXUP_SIZE: usize = 12;

#[derive(Debug, Copy, Clone, PartialEq, Parse)]
pub struct VertexFileHeader {
    pub id: i32,
    pub version: i32,
    pub checksum: i32,
    pub num_lods: i32,
    pub num_lod_vertexes: [i32; 8],
    pub num_fixups: i32,
    pub fixup_table_start: i32,
    pub vertex_data_start: i32,
    pub tangent_data_start: i32,
}

impl VertexFileHeader {
    /// The root level of detail actually usable with this file.
    pub fn clamp_lod(&self, lod: u8) -> usize {
        let levels = self.num_lods.clamp(1, MAX_NUM_LODS as i32) as usize;
        (lod as usize).min(levels - 1)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Parse)]
pub struct BoneWeights {
    pub weight: [f32; 3],
    pub bone: [u8; 3],
    pub num_bones: u8,
}

impl BoneWeights {
    /// Bones that really influence the vertex. A lone full binding to bone 0 is no influence.
    pub fn real_influences(&self) -> usize {
        if self.num_bones == 1 && self.bone[0] == 0 && self.weight[0] == 1.0 {
            0
        } else {
            (self.num_bones as usize).min(MAX_NUM_BONES_PER_VERT)
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Parse)]
pub struct StudioVertex {
    pub bone_weights: BoneWeights,
    pub position: Vector3,
    pub normal: Vector3,
    pub tex_coord: Vector2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Parse)]
pub struct VertexFixup {
    pub lod: i32,
    pub source_vertex_id: i32,
    pub num_vertexes: i32,
}

/// Full vertex data, either as read from disk or trimmed to a root level of detail.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexData {
    pub header: VertexFileHeader,
    pub fixups: Vec<VertexFixup>,
    pub vertices: Vec<StudioVertex>,
    pub tangents: Vec<Vector4>,
}

impl VertexData {
    pub fn memory_size(&self) -> usize {
        VERTEX_FILE_HEADER_SIZE
            + self.fixups.len() * FIXUP_SIZE
            + self.vertices.len() * STUDIO_VERTEX_SIZE
            + self.tangents.len() * TANGENT_SIZE
    }

    /// Copies out the vertices of `root_lod` and shifts the level table so it starts there.
    pub fn trimmed(&self, root_lod: u8) -> VertexData {
        let lod = self.header.clamp_lod(root_lod);

        let ranges: Vec<(usize, usize)> = if self.fixups.is_empty() {
            vec![(0, self.header.num_lod_vertexes[lod].max(0) as usize)]
        } else {
            self.fixups
                .iter()
                .filter(|fixup| fixup.lod >= lod as i32)
                .map(|fixup| (fixup.source_vertex_id.max(0) as usize, fixup.num_vertexes.max(0) as usize))
                .collect()
        };

        let mut vertices = Vec::new();
        let mut tangents = Vec::new();
        for (start, count) in ranges {
            let end = (start + count).min(self.vertices.len());
            let start = start.min(end);
            vertices.extend_from_slice(&self.vertices[start..end]);
            if !self.tangents.is_empty() {
                let end = end.min(self.tangents.len());
                tangents.extend_from_slice(&self.tangents[start.min(end)..end]);
            }
        }

        let mut header = self.header;
        header.num_lods -= lod as i32;
        header.num_lod_vertexes = [0; MAX_NUM_LODS];
        header.num_lod_vertexes[..MAX_NUM_LODS - lod].copy_from_slice(&self.header.num_lod_vertexes[lod..]);
        header.num_fixups = 0;
        header.fixup_table_start = 0;

        VertexData {
            header,
            fixups: Vec::new(),
            vertices,
            tangents,
        }
    }

    /// Most real bone influences on any vertex.
    pub fn max_bone_influences(&self) -> usize {
        self.vertices
            .iter()
            .map(|vertex| vertex.bone_weights.real_influences())
            .max()
            .unwrap_or(0)
    }

    /// Reduces to positions, normals and skinning, the fields decal projection needs.
    pub fn to_thin(&self) -> ThinVertexData {
        let bones_per_vertex = self.max_bone_influences();

        let mut thin = ThinVertexData {
            checksum: self.header.checksum,
            num_lods: self.header.num_lods,
            num_lod_vertexes: self.header.num_lod_vertexes,
            bones_per_vertex,
            positions: Vec::with_capacity(self.vertices.len()),
            normals: Vec::with_capacity(self.vertices.len()),
            weights: Vec::with_capacity(self.vertices.len() * bones_per_vertex.saturating_sub(1)),
            bones: Vec::with_capacity(self.vertices.len() * bones_per_vertex),
        };

        for vertex in &self.vertices {
            thin.positions.push(vertex.position);
            thin.normals.push(vertex.normal);
            if bones_per_vertex > 0 {
                let weights = &vertex.bone_weights;
                thin.weights.extend_from_slice(&weights.weight[..bones_per_vertex - 1]);
                thin.bones.extend_from_slice(&weights.bone[..bones_per_vertex]);
            }
        }

        thin
    }
}

/// Vertex data after reduction. The last weight of each vertex is implied.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinVertexData {
    pub checksum: i32,
    pub num_lods: i32,
    pub num_lod_vertexes: [i32; 8],
    pub bones_per_vertex: usize,
    pub positions: Vec<Vector3>,
    pub normals: Vec<Vector3>,
    pub weights: Vec<f32>,
    pub bones: Vec<u8>,
}

impl ThinVertexData {
    pub fn id(&self) -> i32 {
        FOURCC_THIN_VERTEX_FILE
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn memory_size(&self) -> usize {
        VERTEX_FILE_HEADER_SIZE
            + (self.positions.len() + self.normals.len()) * 12
            + self.weights.len() * 4
            + self.bones.len()
    }
}
