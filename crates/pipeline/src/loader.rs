//! Discover and load `pipeline.yml` definitions from disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::meta::PipelineMeta;

/// File name that marks a pipeline definition.
pub const PIPELINE_FILE: &str = "pipeline.yml";

/// Placeholder replaced with the directory containing the pipeline file.
pub const PIPELINE_DIR: &str = "PIPELINE_DIR";

/// Legacy alias of [`PIPELINE_DIR`] kept for existing definitions.
pub const CRAWLER_ROOT: &str = "CRAWLER_ROOT";

/// `$NAME` → value substitutions applied to every stage command.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    vars: Vec<(String, String)>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the value for `$name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((name, value)),
        }
    }

    /// Replace every `$NAME` occurrence in `template`.
    ///
    /// Longer names are substituted first so `$A_B` is never clobbered by `$A`.
    pub fn apply(&self, template: &str) -> String {
        let mut vars: Vec<&(String, String)> = self.vars.iter().collect();
        vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = template.to_string();
        for (name, value) in vars {
            out = out.replace(&format!("${name}"), value);
        }
        out
    }
}

/// A pipeline definition together with where it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub meta: PipelineMeta,
    /// Absolute path of the definition file.
    pub path: PathBuf,
    /// Directory stage commands run in.
    pub dir: PathBuf,
}

/// Find every [`PIPELINE_FILE`] under `root`, sorted by path.
pub fn discover(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, PipelineError> {
    let root = root.as_ref();
    let mut found = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| PipelineError::Walk {
            root: root.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() && entry.file_name() == PIPELINE_FILE {
            found.push(entry.into_path());
        }
    }

    found.sort();
    debug!(root = %root.display(), count = found.len(), "discovered pipelines");
    Ok(found)
}

/// Parse a definition from YAML text and resolve placeholders in its commands.
pub fn parse(
    yaml: &str,
    path: &Path,
    placeholders: &Placeholders,
) -> Result<PipelineMeta, PipelineError> {
    let mut meta = PipelineMeta::from_yaml(yaml).map_err(|e| PipelineError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    for stage in &mut meta.stages {
        stage.process = placeholders.apply(&stage.process);
    }

    meta.validate()?;
    Ok(meta)
}

/// Load one pipeline file.
///
/// `$PIPELINE_DIR` (and `$CRAWLER_ROOT`) resolve to the file's directory in
/// addition to any caller-supplied placeholders.
pub fn load(path: impl AsRef<Path>, placeholders: &Placeholders) -> Result<LoadedPipeline, PipelineError> {
    let io_err = |path: &Path, source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };

    let path = std::fs::canonicalize(path.as_ref()).map_err(|e| io_err(path.as_ref(), e))?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| PipelineError::Invalid(format!("{} has no parent directory", path.display())))?;
    let yaml = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;

    let dir_str = dir.to_string_lossy().into_owned();
    let placeholders = placeholders
        .clone()
        .with(PIPELINE_DIR, dir_str.clone())
        .with(CRAWLER_ROOT, dir_str);

    let meta = parse(&yaml, &path, &placeholders)?;
    info!(
        path = %path.display(),
        pipeline = %meta.id,
        stages = meta.stages.len(),
        "loaded pipeline"
    );

    Ok(LoadedPipeline { meta, path, dir })
}

/// Discover and load every pipeline under `root`.
///
/// `$PIPELINE_ROOT` resolves to `root` in every loaded definition.
pub fn load_all(root: impl AsRef<Path>, placeholders: &Placeholders) -> Result<Vec<LoadedPipeline>, PipelineError> {
    let root = root.as_ref();
    let placeholders = placeholders
        .clone()
        .with("PIPELINE_ROOT", root.to_string_lossy().into_owned());

    discover(root)?
        .into_iter()
        .map(|path| load(path, &placeholders))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PIPE: &str = "---
id: test/pipeline/pipe

stages:
- process: $PIPELINE_DIR/bin/run.sh --root $CRAWLER_ROOT
  subscribe: index
  publish: item
";

    #[test]
    fn placeholders_replace_every_occurrence() {
        let p = Placeholders::new().with("DIR", "/srv");
        assert_eq!(p.apply("$DIR/a && $DIR/b"), "/srv/a && /srv/b");
    }

    #[test]
    fn placeholders_prefer_longest_name() {
        let p = Placeholders::new()
            .with("ROOT", "/short")
            .with("ROOT_DIR", "/long");
        assert_eq!(p.apply("$ROOT_DIR $ROOT"), "/long /short");
    }

    #[test]
    fn placeholders_set_overrides() {
        let mut p = Placeholders::new().with("A", "1");
        p.set("A", "2");
        assert_eq!(p.apply("$A"), "2");
    }

    #[test]
    fn load_resolves_directory_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(PIPELINE_FILE);
        fs::write(&file, PIPE).unwrap();

        let loaded = load(&file, &Placeholders::new()).unwrap();
        let dir = fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(loaded.dir, dir);
        assert_eq!(
            loaded.meta.stages[0].process,
            format!("{0}/bin/run.sh --root {0}", dir.display())
        );
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load("/no/such/pipeline.yml", &Placeholders::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn load_malformed_yaml_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(PIPELINE_FILE);
        fs::write(&file, "id: [unterminated").unwrap();

        let err = load(&file, &Placeholders::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn load_rejects_stage_reading_in_flight_list() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(PIPELINE_FILE);
        fs::write(
            &file,
            "id: p\nstages:\n- process: exit 1\n  subscribe: index\n  publish: item\n- process: cat\n  subscribe: index/proc\n  publish: stolen\n",
        )
        .unwrap();

        let err = load(&file, &Placeholders::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
    }

    #[test]
    fn discover_finds_nested_definitions_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for sub in ["b", "a/nested"] {
            let dir = tmp.path().join(sub);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(PIPELINE_FILE), PIPE).unwrap();
        }
        fs::write(tmp.path().join("other.yml"), PIPE).unwrap();

        let found = discover(tmp.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a/nested/pipeline.yml"));
        assert!(found[1].ends_with("b/pipeline.yml"));
    }

    #[test]
    fn load_all_applies_root_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("crawler");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(PIPELINE_FILE),
            "id: p\nstages:\n- process: ls $PIPELINE_ROOT\n  subscribe: a\n  publish: b\n",
        )
        .unwrap();

        let loaded = load_all(tmp.path(), &Placeholders::new()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].meta.stages[0].process,
            format!("ls {}", tmp.path().display())
        );
    }
}
