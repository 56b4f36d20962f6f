//! Temporary checker config derived from the project's tsconfig.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::CheckerError;
use crate::discovery::expand_braces;

pub const TEMP_CONFIG_SUFFIX: &str = "typetest-temp.json";
const DEFAULT_TSCONFIG: &str = "tsconfig.json";

/// A written temp config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempConfig {
    pub path: PathBuf,
    /// `allowJs` from the project config or the tsconfig's `compilerOptions`.
    pub allow_js: bool,
}

/// Find the tsconfig to derive from.
///
/// A configured path is resolved against `root` and must exist; otherwise `tsconfig.json` is searched upward from
/// `root`.
pub fn locate(root: &Path, configured: Option<&Path>) -> Result<PathBuf, CheckerError> {
    if let Some(configured) = configured {
        let path = root.join(configured);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(CheckerError::ConfigNotFound { path })
        };
    }
    root.ancestors()
        .map(|dir| dir.join(DEFAULT_TSCONFIG))
        .find(|path| path.is_file())
        .ok_or_else(|| CheckerError::ConfigNotFound {
            path: root.join(DEFAULT_TSCONFIG),
        })
}

/// Write `<dir>/<stem>.typetest-temp.json` next to `tsconfig`.
///
/// ## Notes
/// - `emitDeclarationOnly` is forced off and `incremental` on, with the build-info file kept in the OS temp dir so
///   repeated runs stay fast without touching the project.
/// - `include`/`exclude` replace the tsconfig's own lists only when non-empty. Brace alternatives are expanded since
///   the checker does not understand them.
pub fn write_temp_config(
    tsconfig: &Path,
    include: &[String],
    exclude: &[String],
    allow_js: bool,
) -> Result<TempConfig, CheckerError> {
    let text = fs::read_to_string(tsconfig).map_err(|source| CheckerError::ConfigRead {
        path: tsconfig.to_path_buf(),
        source,
    })?;
    let mut value: Value = serde_json::from_str(&strip_json_comments(&text)).map_err(|source| {
        CheckerError::ConfigParse {
            path: tsconfig.to_path_buf(),
            source,
        }
    })?;
    let Value::Object(config) = &mut value else {
        return Err(CheckerError::ConfigShape {
            path: tsconfig.to_path_buf(),
        });
    };

    let stem = tsconfig
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tsconfig");
    let build_info = std::env::temp_dir()
        .join("typetest")
        .join(format!("{stem}.tmp.tsbuildinfo"));

    let options = config
        .entry("compilerOptions")
        .or_insert_with(|| Value::Object(Map::new()));
    if !options.is_object() {
        *options = Value::Object(Map::new());
    }
    let allow_js = allow_js || options.get("allowJs").and_then(Value::as_bool).unwrap_or(false);
    if let Value::Object(options) = options {
        options.insert("emitDeclarationOnly".into(), Value::Bool(false));
        options.insert("incremental".into(), Value::Bool(true));
        options.insert(
            "tsBuildInfoFile".into(),
            Value::String(build_info.to_string_lossy().into_owned()),
        );
    }
    if !include.is_empty() {
        config.insert("include".into(), globs_value(include));
    }
    if !exclude.is_empty() {
        config.insert("exclude".into(), globs_value(exclude));
    }

    let dir = tsconfig.parent().unwrap_or_else(|| Path::new("."));
    let path = dir.join(format!("{stem}.{TEMP_CONFIG_SUFFIX}"));
    let rendered = serde_json::to_string_pretty(&value).map_err(|source| CheckerError::ConfigParse {
        path: tsconfig.to_path_buf(),
        source,
    })?;
    fs::write(&path, rendered).map_err(|source| CheckerError::ConfigWrite {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), allow_js, "wrote temporary checker config");
    Ok(TempConfig { path, allow_js })
}

fn globs_value(globs: &[String]) -> Value {
    Value::Array(
        globs
            .iter()
            .flat_map(|g| expand_braces(g))
            .map(Value::String)
            .collect(),
    )
}

/// Remove `//` and `/* */` comments and trailing commas, leaving string contents alone.
pub fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for n in chars.by_ref() {
                    if previous == '*' && n == '/' {
                        break;
                    }
                    previous = n;
                }
            }
            _ => out.push(c),
        }
    }
    strip_trailing_commas(&out)
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments_and_trailing_commas() {
        let text = r#"{
  // line comment
  "compilerOptions": { "strict": true, /* block */ "paths": { "@/*": ["src/*"] }, },
  "include": ["a//b", "c,]"],
}"#;
        let value: Value = serde_json::from_str(&strip_json_comments(text)).unwrap();
        assert_eq!(value["compilerOptions"]["paths"]["@/*"][0], "src/*");
        assert_eq!(value["include"][0], "a//b");
        assert_eq!(value["include"][1], "c,]");
    }

    #[test]
    fn test_locate_searches_upward() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("packages/app");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
        assert_eq!(locate(&nested, None).unwrap(), dir.path().join("tsconfig.json"));
        assert!(matches!(
            locate(&nested, Some(Path::new("missing.json"))),
            Err(CheckerError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_write_temp_config() {
        let dir = tempfile::tempdir().unwrap();
        let tsconfig = dir.path().join("tsconfig.json");
        fs::write(
            &tsconfig,
            r#"{ "compilerOptions": { "allowJs": true, "emitDeclarationOnly": true }, "include": ["src"] }"#,
        )
        .unwrap();

        let temp = write_temp_config(&tsconfig, &["**/*.{test,spec}-d.ts".to_string()], &[], false).unwrap();
        assert_eq!(temp.path, dir.path().join("tsconfig.typetest-temp.json"));
        assert!(temp.allow_js);

        let written: Value = serde_json::from_str(&fs::read_to_string(&temp.path).unwrap()).unwrap();
        assert_eq!(written["compilerOptions"]["emitDeclarationOnly"], false);
        assert_eq!(written["compilerOptions"]["incremental"], true);
        assert!(
            written["compilerOptions"]["tsBuildInfoFile"]
                .as_str()
                .unwrap()
                .ends_with("tsconfig.tmp.tsbuildinfo")
        );
        assert_eq!(written["include"], serde_json::json!(["**/*.test-d.ts", "**/*.spec-d.ts"]));
        assert!(written.get("exclude").is_none());
    }

    #[test]
    fn test_non_object_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tsconfig = dir.path().join("tsconfig.json");
        fs::write(&tsconfig, "[]").unwrap();
        assert!(matches!(
            write_temp_config(&tsconfig, &[], &[], false),
            Err(CheckerError::ConfigShape { .. })
        ));
    }
}
