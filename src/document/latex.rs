//! LaTeX source flattening.
//!
//! Produces the full text of a project from its root doc: comments stripped,
//! blank lines dropped, and `\input`/`\include`/`\subfile` directives replaced
//! by the (recursively expanded) content of the referenced file.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::errors::DocumentError;
use super::types::Project;

/// Nesting depth past which transclusions are left unexpanded.
const MAX_EXPANSION_DEPTH: usize = 10;

static TRANSCLUSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:input|include|subfile)\{([^}]+)\}").expect("Invalid transclusion regex")
});

/// Drop everything from an unescaped `%` to the end of the line.
fn strip_line_comment(line: &str) -> &str {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            '%' if !escaped => return &line[..i],
            _ => escaped = false,
        }
    }
    line
}

/// Trim every line, strip comments, and drop lines left empty.
pub fn remove_comments(text: &str) -> String {
    text.lines()
        .map(|line| strip_line_comment(line.trim()).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Path of a transcluded file relative to the root doc's directory.
fn resolve_path(root_dir: &str, name: &str) -> String {
    let name = name.trim();
    let file = if name.ends_with(".tex") {
        name.to_string()
    } else {
        format!("{name}.tex")
    };
    let file = file.strip_prefix("./").unwrap_or(&file);
    if root_dir.is_empty() || root_dir == "." {
        file.to_string()
    } else {
        format!("{}/{}", root_dir.trim_end_matches('/'), file)
    }
}

fn expand(content: &str, docs: &HashMap<String, String>, root_dir: &str, depth: usize) -> String {
    if depth >= MAX_EXPANSION_DEPTH {
        return content.to_string();
    }
    TRANSCLUSION_PATTERN
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let path = resolve_path(root_dir, &caps[1]);
            match docs.get(&path) {
                Some(included) => expand(&remove_comments(included), docs, root_dir, depth + 1),
                None => {
                    tracing::debug!(path = %path, "transcluded file not in project, left as is");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Flatten the project rooted at `root_path`. `docs` maps file paths to
/// their content.
pub fn latexpand(docs: &HashMap<String, String>, root_path: &str) -> Result<String, DocumentError> {
    let content = docs.get(root_path).ok_or_else(|| DocumentError::RootDocNotFound {
        root_doc_id: root_path.to_string(),
    })?;
    let root_dir = root_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    Ok(expand(&remove_comments(content), docs, root_dir, 0))
}

impl Project {
    /// Full flattened LaTeX source of the project.
    pub fn full_content(&self) -> Result<String, DocumentError> {
        let root = self.root_doc().ok_or_else(|| DocumentError::RootDocNotFound {
            root_doc_id: self.root_doc_id.clone(),
        })?;
        let docs: HashMap<String, String> = self
            .docs
            .iter()
            .map(|d| (d.filepath.clone(), d.content()))
            .collect();
        latexpand(&docs, &root.filepath)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::types::ProjectDoc;
    use chrono::Utc;

    fn docs(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_remove_comments() {
        let input = "
            % This is a comment
            \\documentclass{article} % trailing comment
            \\begin{document}
            Accuracy rose by 5\\% overall.
            \\end{document}
        ";
        assert_eq!(
            remove_comments(input),
            "\\documentclass{article}\n\\begin{document}\nAccuracy rose by 5\\% overall.\n\\end{document}"
        );
    }

    #[test]
    fn test_latexpand_inlines_input() {
        let d = docs(&[
            (
                "main.tex",
                "\\documentclass{article}\n\\begin{document}\n\\input{include.tex}\n\\end{document}",
            ),
            ("include.tex", "\n  Hello World! % hidden"),
        ]);
        assert_eq!(
            latexpand(&d, "main.tex").unwrap(),
            "\\documentclass{article}\n\\begin{document}\nHello World!\n\\end{document}"
        );
    }

    #[test]
    fn test_latexpand_resolves_relative_to_root_dir_and_recurses() {
        let d = docs(&[
            ("paper/main.tex", "\\include{sections/intro}"),
            ("paper/sections/intro.tex", "Intro.\n\\subfile{sections/detail}"),
            ("paper/sections/detail.tex", "Detail."),
        ]);
        assert_eq!(latexpand(&d, "paper/main.tex").unwrap(), "Intro.\nDetail.");
    }

    #[test]
    fn test_unknown_transclusion_is_left_in_place() {
        let d = docs(&[("main.tex", "A\n\\input{missing}")]);
        assert_eq!(latexpand(&d, "main.tex").unwrap(), "A\n\\input{missing}");
    }

    #[test]
    fn test_self_inclusion_stops_at_depth_limit() {
        let d = docs(&[("main.tex", "x \\input{main}")]);
        let out = latexpand(&d, "main.tex").unwrap();
        assert_eq!(out.matches('x').count(), MAX_EXPANSION_DEPTH + 1);
        assert!(out.ends_with("\\input{main}"));
    }

    #[test]
    fn test_missing_root_doc() {
        assert!(matches!(
            latexpand(&HashMap::new(), "main.tex"),
            Err(DocumentError::RootDocNotFound { .. })
        ));
    }

    #[test]
    fn test_project_full_content() {
        let project = Project {
            id: "p".into(),
            name: "paper".into(),
            root_doc_id: "r".into(),
            docs: vec![
                ProjectDoc {
                    id: "r".into(),
                    version: 1,
                    filepath: "main.tex".into(),
                    lines: vec!["\\input{body}".into()],
                },
                ProjectDoc {
                    id: "b".into(),
                    version: 1,
                    filepath: "body.tex".into(),
                    lines: vec!["Body".into(), "% note".into()],
                },
            ],
            category: None,
            instructions: String::new(),
            updated_at: Utc::now(),
        };
        assert_eq!(project.full_content().unwrap(), "Body");
    }
}
