use crate::ParserError;
use crate::builders::PhyBuilder;
use crate::phy::reader::PhyReader;

#[test]
fn parse_solids_and_key_values() -> Result<(), anyhow::Error> {
    let data = PhyBuilder::new(5)
        .solid(&[1, 2, 3, 4])
        .solid(&[9; 12])
        .key_values("solid {\n\"index\" \"0\"\n}\n")
        .build();

    let phy = PhyReader::parse(&data)?;
    assert!(phy.header.is_valid());
    assert_eq!(phy.header.check_sum, 5);
    assert_eq!(phy.solids, vec![vec![1, 2, 3, 4], vec![9; 12]]);
    assert!(phy.key_values.starts_with("solid {"));
    assert!(!phy.key_values.ends_with('\0'));
    Ok(())
}

#[test]
fn no_solids_is_not_valid() -> Result<(), anyhow::Error> {
    let phy = PhyReader::parse(&PhyBuilder::new(5).build())?;
    assert!(!phy.header.is_valid());
    assert!(phy.solids.is_empty());
    Ok(())
}

#[test]
fn wrong_header_size_is_a_format_error() {
    let mut builder = PhyBuilder::new(5).solid(&[1]);
    builder.header_size = 20;
    assert!(matches!(PhyReader::parse(&builder.build()), Err(ParserError::FormatError { .. })));
}

#[test]
fn truncated_solid_fails() {
    let data = PhyBuilder::new(5).solid(&[1, 2, 3, 4, 5, 6]).build();
    assert!(PhyReader::parse(&data[..22]).is_err());
}
