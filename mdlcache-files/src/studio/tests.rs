use crate::ParserError;
use crate::builders::StudioBuilder;
use crate::studio::reader::StudioReader;
use crate::studio::types::{AnimBlockRange, SequenceFlags, StudioFlags};

#[test]
fn parse_full_header() -> Result<(), anyhow::Error> {
    let data = StudioBuilder::new("props/crate01.mdl", 0x1234)
        .body_parts(2)
        .flexes(3)
        .sequence(0, 10)
        .sequence(SequenceFlags::AUTOPLAY.bits(), 20)
        .sequence((SequenceFlags::AUTOPLAY | SequenceFlags::LOOPING).bits(), 1)
        .anim_blocks("models/props/crate01_animations.ani", vec![(0, 0), (0, 64), (64, 96)])
        .include("gestures", "models/humans/gestures.mdl")
        .root_lod(1, 3)
        .build();

    let header = StudioReader::parse_header(&data)?;
    assert_eq!(header.name, "props/crate01.mdl");
    assert_eq!(header.checksum, 0x1234);
    assert_eq!(header.num_body_parts, 2);
    assert!(header.has_flexes());
    assert_eq!(header.sequences.len(), 3);
    assert_eq!(header.autoplay_sequences(), vec![1, 2]);
    assert_eq!(header.num_anim_blocks(), 3);
    assert_eq!(header.anim_blocks[2].len(), 32);
    assert!(header.anim_blocks[0].is_empty());
    assert_eq!(header.anim_block_name.as_deref(), Some("models/props/crate01_animations.ani"));
    assert_eq!(header.include_models.len(), 1);
    assert_eq!(header.include_models[0].label, "gestures");
    assert_eq!(header.include_models[0].name, "models/humans/gestures.mdl");
    assert_eq!(header.root_lod, 1);
    assert!(!header.studio_flags().contains(StudioFlags::STATIC_PROP));
    assert!(header.sequences[2].sequence_flags().contains(SequenceFlags::LOOPING));
    assert_eq!(header.memory_size(), data.len());
    Ok(())
}

#[test]
fn minimal_header_has_no_tables() -> Result<(), anyhow::Error> {
    let data = StudioBuilder::new("a.mdl", 1).build();
    assert_eq!(data.len(), 124);

    let header = StudioReader::parse_header(&data)?;
    assert!(header.sequences.is_empty());
    assert!(header.anim_block_name.is_none());
    assert!(header.include_models.is_empty());
    Ok(())
}

#[test]
fn wrong_magic_is_rejected() {
    let mut builder = StudioBuilder::new("a.mdl", 1);
    builder.id = u32::from_le_bytes(*b"IDSV");
    let result = StudioReader::parse_header(&builder.build());
    assert!(matches!(result, Err(ParserError::InvalidMagicValue { .. })));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut builder = StudioBuilder::new("a.mdl", 1);
    builder.version = 37;
    let result = StudioReader::parse_header(&builder.build());
    assert!(matches!(result, Err(ParserError::UnsupportedVersion { version: 37 })));
}

#[test]
fn truncated_data_is_rejected() {
    let data = StudioBuilder::new("a.mdl", 1).sequence(0, 1).build();
    assert!(StudioReader::parse_header(&data[..100]).is_err());
    // the declared length now exceeds the blob
    assert!(StudioReader::parse_header(&data[..data.len() - 4]).is_err());
    assert!(matches!(StudioReader::parse_header(&[]), Err(ParserError::EmptySource)));
}

#[test]
fn root_lod_is_bounded_by_allowed_lods() -> Result<(), anyhow::Error> {
    let data = StudioBuilder::new("a.mdl", 1).root_lod(0, 2).build();
    let mut header = StudioReader::parse_header(&data)?;
    header.set_root_lod(5);
    assert_eq!(header.root_lod, 1);

    header.num_allowed_root_lods = 0;
    header.set_root_lod(5);
    assert_eq!(header.root_lod, 5);
    Ok(())
}

#[test]
fn reversed_or_negative_anim_blocks_are_rejected() {
    for ranges in [vec![(0, 0), (64, 32)], vec![(0, 0), (-1, i32::MAX)]] {
        let data = StudioBuilder::new("a.mdl", 1).anim_blocks("a.ani", ranges).build();
        assert!(matches!(
            StudioReader::parse_header(&data),
            Err(ParserError::FormatError { .. })
        ));
    }
}

#[test]
fn anim_block_length_does_not_overflow() {
    let range = AnimBlockRange {
        data_start: -1,
        data_end: i32::MAX,
    };
    assert_eq!(range.len(), i32::MAX as usize + 1);
    assert!(!range.is_valid());

    let reversed = AnimBlockRange {
        data_start: i32::MAX,
        data_end: i32::MIN,
    };
    assert!(reversed.is_empty());
}
