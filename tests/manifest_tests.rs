//! Generated Cargo.toml must parse and describe the emitted crate

use depyler::{generate_manifest, transpile, CrateRole, Dependency};
use std::collections::BTreeSet;
use toml::Value;

fn parse(text: &str) -> Value {
    text.parse::<Value>()
        .unwrap_or_else(|e| panic!("invalid TOML ({e}):\n{text}"))
}

fn deps(list: &[Dependency]) -> BTreeSet<Dependency> {
    list.iter().copied().collect()
}

#[test]
fn test_binary_manifest_parses() {
    let text = generate_manifest("hello", "src/main.rs", &BTreeSet::new(), CrateRole::Binary);
    let doc = parse(&text);
    assert_eq!(doc["package"]["name"].as_str(), Some("hello"));
    assert_eq!(doc["package"]["edition"].as_str(), Some("2021"));
    let bins = doc["bin"].as_array().unwrap();
    assert_eq!(bins.len(), 1);
    assert_eq!(bins[0]["path"].as_str(), Some("src/main.rs"));
    assert!(doc.get("lib").is_none());
}

#[test]
fn test_exactly_one_package_section() {
    let all = deps(&[
        Dependency::Regex,
        Dependency::SerdeJson,
        Dependency::Clap,
        Dependency::Tokio,
        Dependency::OnceCell,
        Dependency::HashMap,
    ]);
    let text = generate_manifest("tool", "src/main.rs", &all, CrateRole::Binary);
    assert_eq!(text.matches("[package]").count(), 1);
    let doc = parse(&text);
    assert!(doc["package"].is_table());
}

#[test]
fn test_std_flags_have_no_entries() {
    let text = generate_manifest(
        "counts",
        "src/main.rs",
        &deps(&[Dependency::HashMap, Dependency::HashSet]),
        CrateRole::Binary,
    );
    let doc = parse(&text);
    let table = doc["dependencies"].as_table().unwrap();
    assert!(table.is_empty());
}

#[test]
fn test_feature_lists_and_implied_serde() {
    let text = generate_manifest(
        "cfg",
        "src/main.rs",
        &deps(&[Dependency::SerdeJson, Dependency::Tokio]),
        CrateRole::Binary,
    );
    let doc = parse(&text);
    let d = &doc["dependencies"];
    assert_eq!(d["serde_json"].as_str(), Some("1.0"));
    assert!(d["serde"]["features"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f.as_str() == Some("derive")));
    assert!(d["tokio"]["features"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f.as_str() == Some("full")));
}

#[test]
fn test_library_role_from_request_or_name() {
    let text = generate_manifest("mylib", "src/lib.rs", &BTreeSet::new(), CrateRole::Library);
    let doc = parse(&text);
    assert_eq!(doc["lib"]["path"].as_str(), Some("src/lib.rs"));
    assert!(doc.get("bin").is_none());

    // test_ で始まる名前はライブラリ
    let text = generate_manifest("test_utils", "src/lib.rs", &BTreeSet::new(), CrateRole::Binary);
    assert!(parse(&text).get("lib").is_some());
}

#[test]
fn test_package_name_is_sanitized() {
    let text = generate_manifest("My Tool-2", "src/main.rs", &BTreeSet::new(), CrateRole::Binary);
    let doc = parse(&text);
    let name = doc["package"]["name"].as_str().unwrap();
    assert!(name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
}

#[test]
fn test_manifest_from_transpile_output() {
    let out = transpile("import re\ndef f(s: str) -> bool:\n    return re.search(r\"x\", s) is not None\n").unwrap();
    let doc = parse(&out.manifest("finder", CrateRole::Binary));
    assert!(doc["dependencies"].get("regex").is_some());
}
