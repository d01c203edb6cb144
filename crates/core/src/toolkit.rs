//! Rendering of toolkit component configuration.
//!
//! Each toolkit component ships a YAML config whose `dirs.output-dir`
//! decides where it writes. Every workspace gets its own rendered copy
//! pointing at the workspace's private output directory, so concurrent
//! jobs never share an output path.

use std::path::Path;

use serde_yaml::{Mapping, Value};

/// Mapping that holds directory settings in a component config.
pub const DIRS_SECTION: &str = "dirs";

/// Key of the output directory inside [`DIRS_SECTION`].
pub const OUTPUT_DIR_KEY: &str = "output-dir";

/// Relative location of a component's config file.
pub const COMPONENT_CONFIG_PATH: &str = "conf/config.yml";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config root must be a mapping")]
    NotAMapping,

    #[error("output path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Render a component config from its template, targeting `output_dir`.
///
/// Pure function of its inputs. All keys other than `dirs.output-dir` are
/// preserved; `dirs` is created when absent. An empty template renders to
/// a config containing only the output directory.
pub fn render_config(template: &str, output_dir: &Path) -> Result<String, RenderError> {
    let output = output_dir
        .to_str()
        .ok_or_else(|| RenderError::NonUtf8Path(output_dir.to_string_lossy().into_owned()))?;

    let mut doc: Value = serde_yaml::from_str(template)?;
    if doc.is_null() {
        doc = Value::Mapping(Mapping::new());
    }
    let root = doc.as_mapping_mut().ok_or(RenderError::NotAMapping)?;

    let section = Value::String(DIRS_SECTION.to_string());
    if !matches!(root.get(&section), Some(Value::Mapping(_))) {
        root.insert(section.clone(), Value::Mapping(Mapping::new()));
    }
    if let Some(Value::Mapping(dirs)) = root.get_mut(&section) {
        dirs.insert(
            Value::String(OUTPUT_DIR_KEY.to_string()),
            Value::String(output.to_string()),
        );
    }

    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn output_dir_of(rendered: &str) -> Option<String> {
        let doc: Value = serde_yaml::from_str(rendered).ok()?;
        doc.get(DIRS_SECTION)?
            .get(OUTPUT_DIR_KEY)?
            .as_str()
            .map(str::to_string)
    }

    #[test]
    fn rewrites_output_dir_and_keeps_other_keys() {
        let template = "\
dirs:
  output-dir: ../out
  temp-dir: ./tmp
credentials: conf/credential.json
";
        let out = PathBuf::from("/app/work_1/out");
        let rendered = render_config(template, &out).expect("render");

        assert_eq!(output_dir_of(&rendered).as_deref(), Some("/app/work_1/out"));
        let doc: Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(doc["dirs"]["temp-dir"].as_str(), Some("./tmp"));
        assert_eq!(doc["credentials"].as_str(), Some("conf/credential.json"));
    }

    #[test]
    fn creates_dirs_section_when_missing() {
        let rendered = render_config("files:\n  pdf: true\n", Path::new("/w/out")).unwrap();
        assert_eq!(output_dir_of(&rendered).as_deref(), Some("/w/out"));
    }

    #[test]
    fn empty_template_renders_only_output_dir() {
        let rendered = render_config("", Path::new("/w/out")).unwrap();
        assert_eq!(output_dir_of(&rendered).as_deref(), Some("/w/out"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = "dirs:\n  output-dir: x\n";
        let a = render_config(template, Path::new("/a")).unwrap();
        let b = render_config(template, Path::new("/a")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_mapping_root() {
        let err = render_config("- just\n- a list\n", Path::new("/w/out")).unwrap_err();
        assert!(matches!(err, RenderError::NotAMapping));
    }

    #[test]
    fn rejects_invalid_yaml() {
        let err = render_config("dirs: [unclosed", Path::new("/w/out")).unwrap_err();
        assert!(matches!(err, RenderError::Yaml(_)));
    }
}
