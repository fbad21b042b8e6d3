use servmatch_selection::{load_selection_script, Selection, SelectionContext, SelectionProvider};

#[test]
fn selection_script_loads_from_json_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("selections.json");
    std::fs::write(&path, r#"{"4": "W1 W3", "9": "not available"}"#).expect("write script");

    let mut script = load_selection_script(&path).expect("load script");
    assert_eq!(script.len(), 2);

    let ctx = |request_id| SelectionContext {
        request_id,
        customer_id: "C1".into(),
        requested_works: vec!["Sweeping".into()],
    };
    assert_eq!(
        script.prompt(&ctx(4), &[]).expect("prompt"),
        Selection::Workers(vec!["W1".into(), "W3".into()])
    );
    assert_eq!(script.prompt(&ctx(9), &[]).expect("prompt"), Selection::Unavailable);
}

#[test]
fn malformed_script_reports_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "[1, 2").expect("write script");

    let err = load_selection_script(&path).expect_err("malformed");
    assert!(format!("{err:#}").contains("broken.json"));
}
