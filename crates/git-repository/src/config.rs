//! The subset of git's config format the engine reads and writes:
//! `[section]` / `[section "subsection"]` headers and `key = value`
//! entries. Lines are kept verbatim, so edits preserve comments and
//! entries the engine does not understand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::RepoError;

#[derive(Debug, Clone)]
enum Line {
    Section {
        name: String,
        subsection: Option<String>,
        raw: String,
    },
    Entry {
        key: String,
        value: String,
        raw: String,
    },
    Other(String),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    lines: Vec<Line>,
    path: Option<PathBuf>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, RepoError> {
        let mut lines = Vec::new();
        for (number, raw) in text.lines().enumerate() {
            let bad = |message: &str| RepoError::Config {
                line: number + 1,
                message: message.to_string(),
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                lines.push(Line::Other(raw.to_string()));
            } else if let Some(rest) = trimmed.strip_prefix('[') {
                let header = rest.split_once(']').ok_or_else(|| bad("unterminated section header"))?.0;
                let (name, subsection) = match header.split_once(char::is_whitespace) {
                    Some((name, sub)) => {
                        let sub = sub.trim();
                        let sub = sub
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .ok_or_else(|| bad("subsection must be quoted"))?;
                        (name, Some(sub.replace("\\\"", "\"").replace("\\\\", "\\")))
                    }
                    None => (header, None),
                };
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') {
                    return Err(bad("invalid section name"));
                }
                lines.push(Line::Section {
                    name: name.to_ascii_lowercase(),
                    subsection,
                    raw: raw.to_string(),
                });
            } else {
                let (key, value) = match trimmed.split_once('=') {
                    Some((key, value)) => (key.trim(), parse_value(value.trim()).map_err(|m| bad(m))?),
                    // A bare key is boolean true.
                    None => (trimmed, "true".to_string()),
                };
                if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err(bad("invalid key"));
                }
                lines.push(Line::Entry {
                    key: key.to_ascii_lowercase(),
                    value,
                    raw: raw.to_string(),
                });
            }
        }
        Ok(Self { lines, path: None })
    }

    /// Read `path`; a missing file is an empty config bound to that path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Write back to the file this config was loaded from.
    pub fn save(&self) -> Result<(), RepoError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        io::Write::write_all(&mut tmp, self.to_string().as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Last value of `key` in `[section "subsection"]`.
    pub fn get(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<&str> {
        self.get_all(section, subsection, key).pop()
    }

    pub fn get_all(&self, section: &str, subsection: Option<&str>, key: &str) -> Vec<&str> {
        let key = key.to_ascii_lowercase();
        let mut inside = false;
        let mut values = Vec::new();
        for line in &self.lines {
            match line {
                Line::Section { name, subsection: sub, .. } => {
                    inside = name.eq_ignore_ascii_case(section) && sub.as_deref() == subsection;
                }
                Line::Entry { key: k, value, .. } if inside && *k == key => values.push(value.as_str()),
                _ => {}
            }
        }
        values
    }

    pub fn get_bool(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<bool> {
        match self.get(section, subsection, key)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        }
    }

    /// Subsection names of every `[section "..."]` header.
    pub fn subsections(&self, section: &str) -> Vec<&str> {
        let mut names = Vec::new();
        for line in &self.lines {
            if let Line::Section { name, subsection: Some(sub), .. } = line {
                if name.eq_ignore_ascii_case(section) && !names.contains(&sub.as_str()) {
                    names.push(sub.as_str());
                }
            }
        }
        names
    }

    /// Replace every value of `key` with a single `value`, creating the
    /// section if needed.
    pub fn set(&mut self, section: &str, subsection: Option<&str>, key: &str, value: &str) {
        self.remove(section, subsection, key);
        self.add(section, subsection, key, value);
    }

    /// Append another value for `key` (multi-valued keys such as `fetch`).
    pub fn add(&mut self, section: &str, subsection: Option<&str>, key: &str, value: &str) {
        let entry = Line::Entry {
            key: key.to_ascii_lowercase(),
            value: value.to_string(),
            raw: format!("\t{key} = {}", quote_value(value)),
        };
        match self.section_end(section, subsection) {
            Some(at) => self.lines.insert(at, entry),
            None => {
                let raw = match subsection {
                    Some(sub) => format!("[{section} \"{}\"]", sub.replace('\\', "\\\\").replace('"', "\\\"")),
                    None => format!("[{section}]"),
                };
                self.lines.push(Line::Section {
                    name: section.to_ascii_lowercase(),
                    subsection: subsection.map(str::to_string),
                    raw,
                });
                self.lines.push(entry);
            }
        }
    }

    pub fn remove(&mut self, section: &str, subsection: Option<&str>, key: &str) {
        let key = key.to_ascii_lowercase();
        let mut inside = false;
        self.lines.retain(|line| match line {
            Line::Section { name, subsection: sub, .. } => {
                inside = name.eq_ignore_ascii_case(section) && sub.as_deref() == subsection;
                true
            }
            Line::Entry { key: k, .. } => !(inside && *k == key),
            Line::Other(_) => true,
        });
    }

    /// Index just past the last entry of the last matching section.
    fn section_end(&self, section: &str, subsection: Option<&str>) -> Option<usize> {
        let mut end = None;
        let mut inside = false;
        for (i, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section { name, subsection: sub, .. } => {
                    inside = name.eq_ignore_ascii_case(section) && sub.as_deref() == subsection;
                    if inside {
                        end = Some(i + 1);
                    }
                }
                Line::Entry { .. } if inside => end = Some(i + 1),
                _ => {}
            }
        }
        end
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            let raw = match line {
                Line::Section { raw, .. } | Line::Entry { raw, .. } | Line::Other(raw) => raw,
            };
            writeln!(f, "{raw}")?;
        }
        Ok(())
    }
}

/// Unquote a value and drop a trailing comment.
fn parse_value(raw: &str) -> Result<String, &'static str> {
    let mut out = String::with_capacity(raw.len());
    let mut quoted = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('b') => {
                    out.pop();
                }
                Some(c @ ('"' | '\\')) => out.push(c),
                _ => return Err("invalid escape in value"),
            },
            '#' | ';' if !quoted => break,
            c => out.push(c),
        }
    }
    if quoted {
        return Err("unterminated quote in value");
    }
    Ok(out.trim_end().to_string())
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value.contains(['#', ';']);
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t");
    if needs_quotes {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# top comment
[core]
\tbare = false
\tlogallrefupdates
[remote \"origin\"]
\turl = https://example.com/repo.git ; trailing comment
\tfetch = +refs/heads/*:refs/remotes/origin/*
[branch \"main\"]
\tremote = origin
\tmerge = refs/heads/main
";

    #[test]
    fn reads_sections_and_subsections() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.get_bool("core", None, "bare"), Some(false));
        assert_eq!(config.get_bool("core", None, "logAllRefUpdates"), Some(true));
        assert_eq!(config.get("remote", Some("origin"), "url"), Some("https://example.com/repo.git"));
        assert_eq!(
            config.get_all("remote", Some("origin"), "fetch"),
            ["+refs/heads/*:refs/remotes/origin/*"]
        );
        assert_eq!(config.get("remote", Some("upstream"), "url"), None);
        assert_eq!(config.subsections("branch"), ["main"]);
    }

    #[test]
    fn edits_preserve_other_lines() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.set("remote", Some("origin"), "url", "git://example.com/repo");
        config.add("remote", Some("upstream"), "url", "/srv/upstream");
        let text = config.to_string();
        assert!(text.starts_with("# top comment\n"));
        assert!(text.contains("\turl = git://example.com/repo\n"));
        assert!(text.contains("[remote \"upstream\"]\n\turl = /srv/upstream\n"));

        let reparsed = Config::parse(&text).unwrap();
        assert_eq!(reparsed.get("remote", Some("origin"), "url"), Some("git://example.com/repo"));
        assert_eq!(reparsed.subsections("remote"), ["origin", "upstream"]);
    }

    #[test]
    fn quoting_round_trips() {
        let mut config = Config::default();
        config.set("user", None, "name", " padded # not a comment");
        let reparsed = Config::parse(&config.to_string()).unwrap();
        assert_eq!(reparsed.get("user", None, "name"), Some(" padded # not a comment"));
    }

    #[test]
    fn malformed_lines_report_their_number() {
        let err = Config::parse("[core]\n\tbare = \"open\n").unwrap_err();
        assert!(matches!(err, RepoError::Config { line: 2, .. }));
        assert!(Config::parse("[core\n").is_err());
    }
}
