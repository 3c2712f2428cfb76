use std::io::Cursor;

use confreg::{
    BlockStatus, ConfregError, ItemDef, ItemFlags, Phase, ReaderSource, Registry, Status, Values,
};

#[test]
fn schema_errors_void_the_registry() {
    let mut registry = Registry::new();
    registry
        .register(
            vec![
                ItemDef::new("Good", "Integer", 1),
                ItemDef::new("Bad-Name", "Integer", 1),
                ItemDef::new("Typo", "Quaternion", 1),
            ],
            Some("Broken"),
        )
        .unwrap();
    match registry.finalize(None) {
        Err(ConfregError::Schema(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected schema error, got {:?}", other),
    }
    assert_eq!(registry.phase(), Phase::Failed);
    assert_eq!(registry.verify_section("Broken"), Some(BlockStatus::BadDefinition));
    let result = registry.apply_text("Good 1");
    assert!(matches!(result, Err(ConfregError::Unusable)));
    assert_eq!(result.unwrap_err().status(), Status::SchemaError);
}

#[test]
fn registration_rules() {
    let mut registry = Registry::new();
    assert!(registry.apply_text("ECHO too early").is_err());
    assert!(matches!(
        registry.register(vec![ItemDef::new("A", "Integer", 1)], Some("all")),
        Err(ConfregError::InvalidSection(_))
    ));
    registry.register(Vec::new(), Some("Empty")).expect("empty tables are accepted");
    registry.register(vec![ItemDef::new("A", "Integer", 1)], Some("One")).unwrap();
    registry.finalize(None).unwrap();
    assert!(!registry.has_section("Empty"));
    assert!(matches!(
        registry.register(vec![ItemDef::new("B", "Integer", 1)], Some("Two")),
        Err(ConfregError::RegistrationClosed)
    ));
    assert!(matches!(registry.finalize(None), Err(ConfregError::AlreadyFinalized)));
    assert_eq!(registry.level(), 1);
}

#[test]
fn required_data_is_reported() {
    let mut registry = Registry::new();
    registry
        .register(
            vec![
                ItemDef::new("Must", "Integer", 1).flags(ItemFlags::REQUIRE_DATA),
                ItemDef::new("Every", "Integer", 3).flags(ItemFlags::REQUIRE_ALL_DATA),
            ],
            Some("Needs"),
        )
        .unwrap();
    registry
        .register(vec![ItemDef::new("Fine", "Integer", 1)], Some("Other"))
        .unwrap();
    let mut source = ReaderSource::new(Cursor::new("Every 1, 2\n"));
    match registry.finalize(Some(&mut source)) {
        Err(ConfregError::Incomplete(problems)) => assert_eq!(problems.len(), 2, "{:?}", problems),
        other => panic!("expected incomplete data, got {:?}", other),
    }
    assert_eq!(registry.phase(), Phase::Ready);
    assert_eq!(registry.verify_section("Needs"), Some(BlockStatus::MissingData));
    assert_eq!(registry.verify_section("Other"), Some(BlockStatus::Ok));
    assert_eq!(registry.verify_section("Missing"), None);
    // the registry stays usable
    registry.apply_text("Must 1").unwrap();
}

#[test]
fn elements_written_piecewise_count_as_complete() {
    let mut registry = Registry::new();
    registry
        .register(
            vec![ItemDef::new("Every", "Integer", 3).flags(ItemFlags::REQUIRE_ALL_DATA)],
            None,
        )
        .unwrap();
    let mut source = ReaderSource::new(Cursor::new("Every 0: 1\nEvery 1-2: 5\n"));
    registry.finalize(Some(&mut source)).expect("all elements were written");
    assert!(registry.flags("Every").unwrap().contains(ItemFlags::ALL_INITIALIZED));
}

#[test]
fn bad_initial_values_flag_the_section() {
    let mut registry = Registry::new();
    registry
        .register(
            vec![ItemDef::new("Level", "Short", 1).initial("seven")],
            Some("Init"),
        )
        .unwrap();
    assert!(matches!(registry.finalize(None), Err(ConfregError::Incomplete(_))));
    assert_eq!(registry.verify_section("Init"), Some(BlockStatus::BadInitial));
    assert_eq!(registry.values("Level").unwrap(), Values::I16(vec![0]));
}

#[test]
fn reload_applies_later_sources() {
    let mut registry = Registry::new();
    registry
        .register(vec![ItemDef::new("Rate", "Double", 1).initial("1.5")], Some("Clock"))
        .unwrap();
    registry.finalize(None).unwrap();
    let mut source = ReaderSource::new(Cursor::new("[Clock]:\nRate 2.5\n"));
    registry.reload(&mut source).unwrap();
    assert_eq!(registry.values("Rate").unwrap(), Values::F64(vec![2.5]));

    let mut failing = ReaderSource::new(Cursor::new("Rate 3.5; Nope 1\n"));
    assert!(matches!(registry.reload(&mut failing), Err(ConfregError::Incomplete(_))));
    assert_eq!(registry.values("Rate").unwrap(), Values::F64(vec![3.5]));
}

#[test]
fn history_keeps_effective_initial_configuration() {
    let mut registry = Registry::new();
    registry
        .register(
            vec![ItemDef::new("Speed", "Integer", 1).initial("1"), ItemDef::new("Mode", "Text", 8)],
            Some("Engine"),
        )
        .unwrap();
    registry.enable_history().unwrap();
    let mut source = ReaderSource::new(Cursor::new("Speed 2\nMode fast\n"));
    registry.finalize(Some(&mut source)).unwrap();
    registry.apply_text("Speed 3").unwrap();
    registry.apply_text("Speed 4").unwrap();

    let history = registry.history().unwrap();
    let texts: Vec<(&str, u8)> = history.iter().map(|e| (e.text.as_str(), e.level)).collect();
    assert_eq!(
        texts,
        vec![("Speed 2", 0), ("Mode fast", 0), ("Speed 3", 1), ("Speed 4", 1)]
    );
}
