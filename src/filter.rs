use regex::Regex;
use std::path::Path;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Decides which directory entries the filesystem tree sees.
pub trait FileFilter {
    /// `current_dir` is relative to `root_dir` (`""` at the root).
    fn accepted(&self, root_dir: &Path, current_dir: &str, name: &str) -> bool;
}

/// Lets every entry through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FileFilter for AcceptAll {
    fn accepted(&self, _root_dir: &Path, _current_dir: &str, _name: &str) -> bool {
        true
    }
}

/// Glob based include/exclude filter.
///
/// Include patterns restrict files by name; directories are never subject to
/// them. Exclude patterns come in three forms:
/// - `name`: excludes files whose name matches
/// - `/a/b` or `/a/b/`: excludes the directory at that path below the root
/// - `b/`: excludes directories with a matching name anywhere
///
/// `*` and `?` do not match `/`, `**` matches anything.
#[derive(Debug, Default)]
pub struct PatternFilter {
    includes: Option<Regex>,
    exclude_files: Option<Regex>,
    exclude_absolute_dirs: Option<Regex>,
    exclude_relative_dirs: Option<Regex>,
}

impl PatternFilter {
    pub fn new<I, E>(includes: I, excludes: E) -> Result<Self, FilterError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let includes: Vec<String> = includes
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();

        let mut exclude_files = Vec::new();
        let mut exclude_absolute_dirs = Vec::new();
        let mut exclude_relative_dirs = Vec::new();
        for pattern in excludes {
            let pattern = pattern.as_ref();
            if let Some(absolute) = pattern.strip_prefix('/') {
                let trimmed = absolute.trim_end_matches('/');
                exclude_absolute_dirs.push(trimmed.to_string());
            } else if let Some(relative) = pattern.strip_suffix('/') {
                exclude_relative_dirs.push(relative.to_string());
            } else {
                exclude_files.push(pattern.to_string());
            }
        }

        Ok(PatternFilter {
            includes: compile_any(&includes)?,
            exclude_files: compile_any(&exclude_files)?,
            exclude_absolute_dirs: compile_any(&exclude_absolute_dirs)?,
            exclude_relative_dirs: compile_any(&exclude_relative_dirs)?,
        })
    }
}

impl FileFilter for PatternFilter {
    fn accepted(&self, root_dir: &Path, current_dir: &str, name: &str) -> bool {
        let is_dir = root_dir.join(current_dir).join(name).is_dir();
        let accepted = if is_dir {
            let relative_path = if current_dir.is_empty() {
                name.to_string()
            } else {
                format!("{current_dir}/{name}")
            };
            !matches(&self.exclude_absolute_dirs, &relative_path)
                && !matches(&self.exclude_relative_dirs, name)
        } else {
            self.includes.as_ref().is_none_or(|re| re.is_match(name))
                && !matches(&self.exclude_files, name)
        };
        if !accepted {
            debug!("Filtered out {:?} in {:?}", name, current_dir);
        }
        accepted
    }
}

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Compiles a set of globs into a single alternation, `None` if empty.
fn compile_any(patterns: &[String]) -> Result<Option<Regex>, FilterError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = patterns.iter().map(|p| glob_to_regex(p)).collect();
    let combined = format!("^(?:{})$", alternatives.join("|"));
    Regex::new(&combined)
        .map(Some)
        .map_err(|source| FilterError::InvalidPattern {
            pattern: patterns.join(", "),
            source,
        })
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                regex_str.push_str(".*");
                i += 2;
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str
}
