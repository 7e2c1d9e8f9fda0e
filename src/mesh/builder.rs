use log::warn;
use mdlcache_files::studio::types::StudioHeader;
use mdlcache_files::vtx::reader::MeshIndexReader;
use mdlcache_files::vtx::types::MESH_INDEX_HEADER_SIZE;
use mdlcache_files::vvd::types::VertexData;

/// Renderable form of a model as far as the cache is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareMesh {
    pub root_lod: u8,
    pub num_lods: usize,
    pub num_body_parts: usize,
    /// Meshes drawn at the root level of detail.
    pub num_meshes: usize,
    pub lod_mesh_counts: Vec<usize>,
}

impl HardwareMesh {
    pub fn memory_size(&self) -> usize {
        MESH_INDEX_HEADER_SIZE + self.lod_mesh_counts.len() * size_of::<usize>()
    }
}

/// Turns raw mesh-index bytes into hardware data.
pub trait HardwareMeshBuilder: Send + Sync {
    /// `None` when the data cannot be used for this model.
    fn build(&self, header: &StudioHeader, mesh_index: &[u8]) -> Option<HardwareMesh>;

    fn unload(&self, _mesh: &HardwareMesh) {}

    /// Shapes freshly read vertex data before it is cached.
    fn build_vertex_data(&self, header: &StudioHeader, vertexes: &VertexData) -> VertexData {
        vertexes.trimmed(header.root_lod)
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct StudioMeshBuilder;

impl HardwareMeshBuilder for StudioMeshBuilder {
    fn build(&self, header: &StudioHeader, mesh_index: &[u8]) -> Option<HardwareMesh> {
        profiling::scope!("StudioMeshBuilder::build");
        let index = match MeshIndexReader::parse(mesh_index) {
            Ok(index) => index,
            Err(err) => {
                warn!("Mesh index of {} is unreadable: {}", header.name, err);
                return None;
            }
        };

        if index.body_parts.len() != header.num_body_parts.max(0) as usize {
            warn!(
                "Mesh index of {} has {} body parts, the model declares {}",
                header.name,
                index.body_parts.len(),
                header.num_body_parts
            );
            return None;
        }

        let num_lods = index.header.num_lods.max(1) as usize;
        let root_lod = (header.root_lod as usize).min(num_lods - 1);
        let lod_mesh_counts: Vec<usize> = (0..num_lods).map(|lod| index.mesh_count(lod)).collect();

        Some(HardwareMesh {
            root_lod: root_lod as u8,
            num_lods,
            num_body_parts: index.body_parts.len(),
            num_meshes: lod_mesh_counts[root_lod],
            lod_mesh_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdlcache_files::builders::{MeshIndexBuilder, StudioBuilder};
    use mdlcache_files::studio::reader::StudioReader;

    #[test]
    fn counts_meshes_at_the_root_lod() -> Result<(), anyhow::Error> {
        let mut header = StudioReader::parse_header(&StudioBuilder::new("crate", 7).body_parts(2).build())?;
        header.root_lod = 1;
        let vtx = MeshIndexBuilder::new(7)
            .body_parts(vec![vec![vec![3, 2]], vec![vec![1, 1], vec![4, 0]]])
            .build();

        let mesh = StudioMeshBuilder.build(&header, &vtx).expect("mesh builds");
        assert_eq!(mesh.root_lod, 1);
        assert_eq!(mesh.lod_mesh_counts, vec![8, 3]);
        assert_eq!(mesh.num_meshes, 3);
        Ok(())
    }

    #[test]
    fn body_part_mismatch_fails() -> Result<(), anyhow::Error> {
        let header = StudioReader::parse_header(&StudioBuilder::new("crate", 7).body_parts(3).build())?;
        assert!(StudioMeshBuilder.build(&header, &MeshIndexBuilder::new(7).build()).is_none());
        assert!(StudioMeshBuilder.build(&header, b"garbage").is_none());
        Ok(())
    }
}
