use mdlcache_files_derive_parseable::Parse;

pub const MESH_INDEX_VERSION: i32 = 7;
pub const MESH_INDEX_HEADER_SIZE: usize = 36;
pub const BODY_PART_HEADER_SIZE: usize = 8;
pub const MODEL_HEADER_SIZE: usize = 8;
pub const MODEL_LOD_HEADER_SIZE: usize = 12;

#[derive(Debug, Copy, Clone, PartialEq, Parse)]
pub struct MeshIndexHeader {
    pub version: i32,
    pub vert_cache_size: i32,
    pub max_bones_per_strip: u16,
    pub max_bones_per_tri: u16,
    pub max_bones_per_vert: i32,
    pub check_sum: i32,
    pub num_lods: i32,
    pub material_replacement_list_offset: i32,
    pub num_body_parts: i32,
    pub body_part_offset: i32,
}

#[derive(Debug, Copy, Clone, Parse)]
pub(crate) struct BodyPartHeader {
    pub num_models: i32,
    pub model_offset: i32,
}

#[derive(Debug, Copy, Clone, Parse)]
pub(crate) struct ModelHeader {
    pub num_lods: i32,
    pub lod_offset: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Parse)]
pub struct ModelLod {
    pub num_meshes: i32,
    pub mesh_offset: i32,
    pub switch_point: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MeshModel {
    pub lods: Vec<ModelLod>,
}

#[derive(Debug, Clone, Default)]
pub struct MeshBodyPart {
    pub models: Vec<MeshModel>,
}

#[derive(Debug, Clone)]
pub struct MeshIndex {
    pub header: MeshIndexHeader,
    pub body_parts: Vec<MeshBodyPart>,
}

impl MeshIndex {
    /// Meshes drawn at `lod`, summed over every model of every body part.
    pub fn mesh_count(&self, lod: usize) -> usize {
        self.body_parts
            .iter()
            .flat_map(|part| part.models.iter())
            .filter_map(|model| model.lods.get(lod))
            .map(|lod| lod.num_meshes.max(0) as usize)
            .sum()
    }
}
