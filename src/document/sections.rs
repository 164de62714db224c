//! Section resolution: which file of a project holds a named section.
//!
//! Recognises `\section{…}`, `\subsection{…}`, `\subsubsection{…}` (and their
//! starred forms) and the transclusion directives `\input{…}`,
//! `\include{…}`, `\subfile{…}` at line start. Comment lines are skipped.

use super::errors::DocumentError;
use super::types::{Project, ProjectDoc};

const SECTION_COMMANDS: [&str; 3] = ["\\section", "\\subsection", "\\subsubsection"];

const TRANSCLUSION_COMMANDS: [&str; 3] = ["\\input{", "\\include{", "\\subfile{"];

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('%')
}

/// Title of a section header on this line, if the line carries one.
pub fn section_title(line: &str) -> Option<&str> {
    if is_comment(line) {
        return None;
    }
    SECTION_COMMANDS.iter().find_map(|cmd| {
        let mut search_from = 0;
        while let Some(found) = line[search_from..].find(cmd) {
            let after = search_from + found + cmd.len();
            let rest = &line[after..];
            let rest = rest.strip_prefix('*').unwrap_or(rest);
            if let Some(body) = rest.strip_prefix('{') {
                return Some(body.split('}').next().unwrap_or(body));
            }
            search_from = after;
        }
        None
    })
}

/// Whether `line` is a section header whose title contains `target`,
/// ignoring case.
pub fn is_matching_header(line: &str, target: &str) -> bool {
    section_title(line)
        .map(|title| title.to_lowercase().contains(&target.to_lowercase()))
        .unwrap_or(false)
}

/// File name of a transclusion directive at the start of this line.
pub fn transclusion_target(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    TRANSCLUSION_COMMANDS.iter().find_map(|cmd| {
        let rest = trimmed.strip_prefix(cmd)?;
        let name = rest.split('}').next()?.trim();
        (!name.is_empty()).then_some(name)
    })
}

/// Project doc a transclusion name refers to: the doc whose path is `name`
/// or `name.tex`, possibly under a directory.
pub fn resolve_transclusion<'a>(project: &'a Project, name: &str) -> Option<&'a ProjectDoc> {
    let with_ext = format!("{name}.tex");
    let path_matches = |path: &str, candidate: &str| {
        path == candidate || path.ends_with(&format!("/{candidate}"))
    };
    project
        .docs
        .iter()
        .find(|d| path_matches(&d.filepath, &with_ext))
        .or_else(|| project.docs.iter().find(|d| path_matches(&d.filepath, name)))
}

/// Locate the file that holds `section`.
///
/// A matching header directly followed by a transclusion resolves to the
/// transcluded file. Without any direct header match, every transcluded
/// file is searched for one.
pub fn find_target_doc<'a>(
    project: &'a Project,
    section: &str,
) -> Result<&'a ProjectDoc, DocumentError> {
    let target = section.trim();
    let not_found = || DocumentError::SectionNotFound {
        section: section.to_string(),
    };
    if target.is_empty() {
        return Err(not_found());
    }

    for doc in &project.docs {
        for (i, line) in doc.lines.iter().enumerate() {
            if !is_matching_header(line, target) {
                continue;
            }
            let included = doc
                .lines
                .get(i + 1)
                .and_then(|next| transclusion_target(next))
                .and_then(|name| resolve_transclusion(project, name));
            return Ok(included.unwrap_or(doc));
        }
    }

    for doc in &project.docs {
        for line in &doc.lines {
            let Some(included) =
                transclusion_target(line).and_then(|name| resolve_transclusion(project, name))
            else {
                continue;
            };
            if included.lines.iter().any(|l| is_matching_header(l, target)) {
                return Ok(included);
            }
        }
    }

    Err(not_found())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
