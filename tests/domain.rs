use std::str::FromStr;

use assert_matches::assert_matches;

use omero_importer::domain::{EntityId, EntityKind, EntityRef, TargetRef};
use omero_importer::error::ImporterError;

#[test]
fn entity_ref_parses_kind_and_id() {
    let entity = EntityRef::from_str("Dataset:51").unwrap();
    assert_eq!(entity.kind, EntityKind::Dataset);
    assert_eq!(entity.id, EntityId::new(51));
    assert_eq!(entity.to_string(), "Dataset:51");
}

#[test]
fn entity_ref_rejects_malformed_input() {
    for input in ["", "Image", "Image:", ":3", "Image:abc", "Plate:3"] {
        assert_matches!(
            EntityRef::from_str(input),
            Err(ImporterError::InvalidEntityRef(_))
        );
    }
}

#[test]
fn entity_id_trims_whitespace() {
    assert_eq!(EntityId::from_str(" 62102 ").unwrap().get(), 62102);
    assert!(EntityId::from_str("-5").is_err());
}

#[test]
fn target_paths_display_as_slash_joined_names() {
    assert_eq!(TargetRef::project("P1").to_string(), "P1");
    assert_eq!(TargetRef::dataset("P1", "D1").to_string(), "P1/D1");
    assert_eq!(TargetRef::image("P1", "D1", "I1").to_string(), "P1/D1/I1");
    assert_eq!(
        TargetRef::Id(EntityRef::new(EntityKind::Image, EntityId::new(7))).to_string(),
        "Image:7"
    );
}

#[test]
fn entity_ids_serialize_as_plain_numbers() {
    let entity = EntityRef::new(EntityKind::Project, EntityId::new(3));
    assert_eq!(
        serde_json::to_string(&entity).unwrap(),
        r#"{"kind":"project","id":3}"#
    );
}
