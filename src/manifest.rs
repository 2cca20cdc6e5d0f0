//! Cargo.toml synthesizer
//!
//! コード生成で集まった依存フラグから、生成クレートのマニフェストを組み立てる。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use tracing::debug;

/// Dependency flag raised by code generation
///
/// 一度立てたフラグは同じコンパイル単位の中では下ろさない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dependency {
    // std の機能 (マニフェストには出ない)
    HashMap,
    HashSet,
    // 外部クレート
    Regex,
    SerdeJson,
    Serde,
    Clap,
    Chrono,
    Rand,
    Base64,
    Sha2,
    Md5,
    Hex,
    Tokio,
    OnceCell,
    Itertools,
}

/// One `[dependencies]` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrateSpec {
    pub name: &'static str,
    pub version: &'static str,
    pub features: &'static [&'static str],
}

const fn spec(
    name: &'static str,
    version: &'static str,
    features: &'static [&'static str],
) -> Option<CrateSpec> {
    Some(CrateSpec {
        name,
        version,
        features,
    })
}

impl Dependency {
    /// External crate behind the flag; `None` for std-only features
    pub fn crate_spec(&self) -> Option<CrateSpec> {
        match self {
            Dependency::HashMap | Dependency::HashSet => None,
            Dependency::Regex => spec("regex", "1.10", &[]),
            Dependency::SerdeJson => spec("serde_json", "1.0", &[]),
            Dependency::Serde => spec("serde", "1.0", &["derive"]),
            Dependency::Clap => spec("clap", "4.5", &["derive"]),
            Dependency::Chrono => spec("chrono", "0.4", &[]),
            Dependency::Rand => spec("rand", "0.8", &[]),
            Dependency::Base64 => spec("base64", "0.21", &[]),
            Dependency::Sha2 => spec("sha2", "0.10", &[]),
            Dependency::Md5 => spec("md-5", "0.10", &[]),
            Dependency::Hex => spec("hex", "0.4", &[]),
            Dependency::Tokio => spec("tokio", "1", &["full"]),
            Dependency::OnceCell => spec("once_cell", "1.19", &[]),
            Dependency::Itertools => spec("itertools", "0.12", &[]),
        }
    }

    /// Flags implied by this one
    pub fn implied(&self) -> &'static [Dependency] {
        match self {
            Dependency::SerdeJson => &[Dependency::Serde],
            _ => &[],
        }
    }
}

/// Add implied flags (JSON implies serde with derive)
pub fn close_dependencies(deps: &BTreeSet<Dependency>) -> BTreeSet<Dependency> {
    let mut out = deps.clone();
    for dep in deps {
        out.extend(dep.implied().iter().copied());
    }
    out
}

/// 生成クレートの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrateRole {
    #[default]
    Binary,
    Library,
}

impl CrateRole {
    /// Library when the package name starts with `test_` or the caller asks for one
    pub fn resolve(package_name: &str, requested: CrateRole) -> CrateRole {
        if requested == CrateRole::Library || package_name.starts_with("test_") {
            CrateRole::Library
        } else {
            CrateRole::Binary
        }
    }

    pub fn default_source_path(&self) -> &'static str {
        match self {
            CrateRole::Binary => "src/main.rs",
            CrateRole::Library => "src/lib.rs",
        }
    }
}

/// Turn an arbitrary file stem into a valid crate name
pub fn sanitize_package_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("depyler_output");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "py_");
    }
    name
}

fn toml_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Emit the manifest text
///
/// セクション順: `[package]` → `[[bin]]`/`[lib]` → `[dependencies]` → (`[dev-dependencies]`)
pub fn generate_manifest(
    package_name: &str,
    source_path: &str,
    deps: &BTreeSet<Dependency>,
    role: CrateRole,
) -> String {
    let name = sanitize_package_name(package_name);
    let role = CrateRole::resolve(&name, role);
    let mut out = String::new();

    let _ = writeln!(out, "[package]");
    let _ = writeln!(out, "name = {}", toml_string(&name));
    let _ = writeln!(out, "version = \"0.1.0\"");
    let _ = writeln!(out, "edition = \"2021\"");
    out.push('\n');

    match role {
        CrateRole::Binary => {
            let _ = writeln!(out, "[[bin]]");
        }
        CrateRole::Library => {
            let _ = writeln!(out, "[lib]");
        }
    }
    let _ = writeln!(out, "name = {}", toml_string(&name));
    let _ = writeln!(out, "path = {}", toml_string(source_path));
    out.push('\n');

    let _ = writeln!(out, "[dependencies]");
    let mut seen = BTreeSet::new();
    for dep in close_dependencies(deps) {
        let Some(spec) = dep.crate_spec() else {
            continue;
        };
        if !seen.insert(spec.name) {
            continue;
        }
        if spec.features.is_empty() {
            let _ = writeln!(out, "{} = {}", spec.name, toml_string(spec.version));
        } else {
            let features = spec
                .features
                .iter()
                .map(|f| toml_string(f))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "{} = {{ version = {}, features = [{}] }}",
                spec.name,
                toml_string(spec.version),
                features
            );
        }
    }

    if role == CrateRole::Library {
        out.push('\n');
        let _ = writeln!(out, "[dev-dependencies]");
        let _ = writeln!(out, "quickcheck = \"1.0\"");
    }

    debug!(package = %name, crates = seen.len(), ?role, "manifest generated");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_manifest_sections() {
        let deps: BTreeSet<_> = [Dependency::Regex, Dependency::HashMap].into_iter().collect();
        let text = generate_manifest("find_ints", "src/main.rs", &deps, CrateRole::Binary);
        let package = text.find("[package]").unwrap();
        let bin = text.find("[[bin]]").unwrap();
        let dependencies = text.find("[dependencies]").unwrap();
        assert!(package < bin && bin < dependencies);
        assert!(text.contains("regex = \"1.10\""));
        assert!(!text.contains("HashMap"));
    }

    #[test]
    fn test_json_implies_serde_derive() {
        let deps: BTreeSet<_> = [Dependency::SerdeJson].into_iter().collect();
        let text = generate_manifest("app", "src/main.rs", &deps, CrateRole::Binary);
        assert!(text.contains("serde_json = \"1.0\""));
        assert!(text.contains("serde = { version = \"1.0\", features = [\"derive\"] }"));
    }

    #[test]
    fn test_library_role_from_name() {
        let text = generate_manifest("test_utils", "src/lib.rs", &BTreeSet::new(), CrateRole::Binary);
        assert!(text.contains("[lib]"));
        assert!(!text.contains("[[bin]]"));
        assert!(text.contains("[dev-dependencies]"));
    }

    #[test]
    fn test_sanitize_package_name() {
        assert_eq!(sanitize_package_name("My-Script"), "my_script");
        assert_eq!(sanitize_package_name("2fast"), "py_2fast");
        assert_eq!(sanitize_package_name(""), "depyler_output");
    }

    #[test]
    fn test_std_flags_produce_no_entries() {
        let deps: BTreeSet<_> = [Dependency::HashSet, Dependency::HashMap].into_iter().collect();
        let text = generate_manifest("app", "src/main.rs", &deps, CrateRole::Binary);
        let deps_section = &text[text.find("[dependencies]").unwrap()..];
        assert_eq!(deps_section.trim(), "[dependencies]");
    }
}
