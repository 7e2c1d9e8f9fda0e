use crate::ParserError;
use crate::builders::MeshIndexBuilder;
use crate::vtx::reader::MeshIndexReader;

#[test]
fn parse_body_part_tree() -> Result<(), anyhow::Error> {
    let data = MeshIndexBuilder::new(9)
        .body_parts(vec![vec![vec![3, 2], vec![1]], vec![vec![4, 4, 1]]])
        .build();

    let index = MeshIndexReader::parse(&data)?;
    MeshIndexReader::check(&index.header, 9)?;

    assert_eq!(index.header.num_body_parts, 2);
    assert_eq!(index.header.num_lods, 3);
    assert_eq!(index.body_parts[0].models.len(), 2);
    assert_eq!(index.body_parts[1].models[0].lods.len(), 3);
    assert_eq!(index.body_parts[1].models[0].lods[1].switch_point, 10.0);
    assert_eq!(index.mesh_count(0), 8);
    assert_eq!(index.mesh_count(1), 6);
    assert_eq!(index.mesh_count(2), 1);
    Ok(())
}

#[test]
fn check_rejects_version_and_checksum() -> Result<(), anyhow::Error> {
    let header = MeshIndexReader::parse_header(&MeshIndexBuilder::new(9).build())?;
    assert!(matches!(
        MeshIndexReader::check(&header, 10),
        Err(ParserError::ChecksumMismatch { .. })
    ));

    let mut builder = MeshIndexBuilder::new(9);
    builder.version = 6;
    let header = MeshIndexReader::parse_header(&builder.build())?;
    assert!(matches!(
        MeshIndexReader::check(&header, 9),
        Err(ParserError::UnsupportedVersion { version: 6 })
    ));
    Ok(())
}

#[test]
fn dangling_offsets_are_rejected() {
    let mut data = MeshIndexBuilder::new(9).build();
    // point the body part table past the end
    data[32..36].copy_from_slice(&4096i32.to_le_bytes());
    assert!(matches!(
        MeshIndexReader::parse(&data),
        Err(ParserError::OutOfBounds { what: "body parts", .. })
    ));
}
