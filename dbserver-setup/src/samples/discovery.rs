// Sample schema discovery
//
// Layout: <root>/<schema>/<anything>-schema.sql and optionally <root>/<schema>/<anything>-data.sql

use encoding_rs::Encoding;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{validate_schema_name, ExampleDatabaseInfo};

pub const SCHEMA_SUFFIX: &str = "-schema.sql";
pub const DATA_SUFFIX: &str = "-data.sql";

/// List the installable sample schemas under `root`, sorted by schema name.
///
/// A missing or unreadable root yields an empty list. Subdirectories without a schema script
/// are skipped.
pub async fn discover(root: &Path, encoding: &'static Encoding) -> Vec<ExampleDatabaseInfo> {
    info!(
        "[PHASE: samples] [STEP: discover] Scanning samples root {:?}",
        root
    );

    let mut entries = match fs::read_dir(root).await {
        Ok(e) => e,
        Err(e) => {
            debug!(
                "[PHASE: samples] [STEP: discover] Samples root {:?} not readable: {}",
                root, e
            );
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(
                    "[PHASE: samples] [STEP: discover] Stopped reading {:?}: {}",
                    root, e
                );
                break;
            }
        };

        let path = entry.path();
        if !is_dir(&path).await {
            continue;
        }

        if let Some(info) = inspect_sample_dir(&path, encoding).await {
            found.push(info);
        }
    }

    found.sort_by(|a, b| a.schema_name.cmp(&b.schema_name));

    info!(
        "[PHASE: samples] [STEP: discover] Found {} sample schema(s)",
        found.len()
    );
    found
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn inspect_sample_dir(
    dir: &Path,
    encoding: &'static Encoding,
) -> Option<ExampleDatabaseInfo> {
    let schema_name = dir.file_name()?.to_string_lossy().to_lowercase();
    if let Err(e) = validate_schema_name(&schema_name) {
        warn!(
            "[PHASE: samples] [STEP: discover] Skipping {:?}: {}",
            dir, e
        );
        return None;
    }

    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!(
                "[PHASE: samples] [STEP: discover] Skipping {:?}: {}",
                dir, e
            );
            return None;
        }
    };

    let mut schema_files: Vec<PathBuf> = Vec::new();
    let mut data_files: Vec<PathBuf> = Vec::new();

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_file = fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_lowercase();
        if file_name.ends_with(SCHEMA_SUFFIX) {
            schema_files.push(path);
        } else if file_name.ends_with(DATA_SUFFIX) {
            data_files.push(path);
        }
    }

    let schema_path = pick_one(&schema_name, "schema", schema_files)?;
    let data_path = pick_one(&schema_name, "data", data_files);

    Some(ExampleDatabaseInfo::new(
        schema_name,
        schema_path,
        data_path,
        encoding,
    ))
}

fn pick_one(schema_name: &str, kind: &str, mut files: Vec<PathBuf>) -> Option<PathBuf> {
    files.sort();
    if files.len() > 1 {
        warn!(
            "[PHASE: samples] [STEP: discover] Sample '{}' has {} {} scripts; using {:?}",
            schema_name,
            files.len(),
            kind,
            files[0]
        );
    }
    files.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    fn touch(path: &Path) {
        stdfs::write(path, "SELECT 1;\n").unwrap();
    }

    #[tokio::test]
    async fn only_directories_with_schema_scripts_are_listed() {
        let root = tempfile::tempdir().unwrap();

        let sakila = root.path().join("sakila");
        stdfs::create_dir(&sakila).unwrap();
        touch(&sakila.join("sakila-schema.sql"));
        touch(&sakila.join("sakila-data.sql"));

        let world = root.path().join("world");
        stdfs::create_dir(&world).unwrap();
        touch(&world.join("world-schema.sql"));

        let data_only = root.path().join("menagerie");
        stdfs::create_dir(&data_only).unwrap();
        touch(&data_only.join("menagerie-data.sql"));

        stdfs::create_dir(root.path().join("empty")).unwrap();
        touch(&root.path().join("stray-schema.sql"));

        let found = discover(root.path(), encoding_rs::UTF_8).await;
        let names: Vec<&str> = found.iter().map(|s| s.schema_name.as_str()).collect();
        assert_eq!(names, vec!["sakila", "world"]);

        assert_eq!(found[0].schema_path, sakila.join("sakila-schema.sql"));
        assert_eq!(found[0].data_path, Some(sakila.join("sakila-data.sql")));
        assert_eq!(found[1].data_path, None);
    }

    #[tokio::test]
    async fn names_and_suffixes_are_case_insensitive() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("SaKiLa");
        stdfs::create_dir(&dir).unwrap();
        touch(&dir.join("Sakila-SCHEMA.SQL"));
        touch(&dir.join("SAKILA-Data.Sql"));

        let found = discover(root.path(), encoding_rs::UTF_8).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].schema_name, "sakila");
        assert!(found[0].data_path.is_some());
    }

    #[tokio::test]
    async fn first_match_wins_when_several_scripts_share_a_suffix() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("employees");
        stdfs::create_dir(&dir).unwrap();
        touch(&dir.join("b-schema.sql"));
        touch(&dir.join("a-schema.sql"));

        let found = discover(root.path(), encoding_rs::UTF_8).await;
        assert_eq!(found[0].schema_path, dir.join("a-schema.sql"));
    }

    #[tokio::test]
    async fn directories_with_invalid_schema_names_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        for name in ["sakila.v2".to_string(), "x".repeat(65), "world".to_string()] {
            let dir = root.path().join(&name);
            stdfs::create_dir(&dir).unwrap();
            touch(&dir.join("a-schema.sql"));
        }

        let found = discover(root.path(), encoding_rs::UTF_8).await;
        let names: Vec<&str> = found.iter().map(|s| s.schema_name.as_str()).collect();
        assert_eq!(names, vec!["world"]);
    }

    #[tokio::test]
    async fn missing_root_yields_empty_list() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        assert!(discover(&missing, encoding_rs::UTF_8).await.is_empty());
    }

    #[tokio::test]
    async fn discovered_samples_carry_the_encoding() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("world");
        stdfs::create_dir(&dir).unwrap();
        touch(&dir.join("world-schema.sql"));

        let found = discover(root.path(), encoding_rs::WINDOWS_1252).await;
        assert_eq!(found[0].encoding, encoding_rs::WINDOWS_1252);
    }
}
