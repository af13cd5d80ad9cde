//! Single-file ini parsing.

use std::path::Path;

use crate::ConfigError;

/// Parse one config file into flat `(normalized_key, value)` pairs in file
/// order. The caller folds them into its map (last wins).
pub fn parse_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    let mut section: Option<String> = None;

    let mut lines = content.lines().enumerate();
    while let Some((line_no, raw)) = lines.next() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            section = Some(parse_section_header(path, line_no + 1, line)?);
            continue;
        }

        let Some(section) = section.as_deref() else {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: "key before any section header".into(),
            });
        };

        // key = value, or a bare key meaning "true".
        let (key, mut value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim().to_string()),
            None => (line, String::new()),
        };

        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: format!("invalid key name: {key}"),
            });
        }

        // Backslash continuation joins following lines.
        while value.ends_with('\\') {
            value.pop();
            match lines.next() {
                Some((_, next)) => value.push_str(strip_comment(next).trim()),
                None => break,
            }
        }

        // Surrounding double quotes are stripped, not nested.
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = value[1..value.len() - 1].to_string();
        }

        out.push((format!("{}.{}", section, key.to_ascii_lowercase()), value));
    }

    Ok(out)
}

/// `[core]` → `core`; `[branch "x"]` → `branch.x`; `[a.b]` → `a.b`.
fn parse_section_header(path: &Path, line_no: usize, line: &str) -> Result<String, ConfigError> {
    let bad = |reason: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        line: line_no,
        reason: reason.to_string(),
    };

    let inner = line
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| bad("unterminated section header"))?
        .trim();

    if let Some((name, rest)) = inner.split_once(char::is_whitespace) {
        let sub = rest
            .trim()
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| bad("subsection must be quoted"))?;
        if sub.contains('\n') {
            return Err(bad("newline in subsection"));
        }
        return Ok(format!("{}.{}", name.to_ascii_lowercase(), sub));
    }

    if inner.is_empty() {
        return Err(bad("empty section header"));
    }
    Ok(inner.to_ascii_lowercase())
}

/// Cut an unquoted `#` or `;` comment off a line.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(content: &str) -> Vec<(String, String)> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        parse_file(&path).unwrap()
    }

    #[test]
    fn sections_and_values() {
        let pairs = parse("[core]\n\tbare = true\n[user]\nname = X\n");
        assert_eq!(
            pairs,
            vec![
                ("core.bare".to_string(), "true".to_string()),
                ("user.name".to_string(), "X".to_string()),
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines() {
        let pairs = parse("# leading comment\n[core]\n; semi comment\nbare = true # trailing\n\n");
        assert_eq!(pairs, vec![("core.bare".to_string(), "true".to_string())]);
    }

    #[test]
    fn quoted_values_keep_hashes() {
        let pairs = parse("[alias]\nst = \"status # not a comment\"\n");
        assert_eq!(pairs[0].1, "status # not a comment");
    }

    #[test]
    fn subsection_header() {
        let pairs = parse("[remote \"origin\"]\nurl = https://example.com/repo.git\n");
        assert_eq!(pairs[0].0, "remote.origin.url");
    }

    #[test]
    fn continuation_lines() {
        let pairs = parse("[a]\nkey = one \\\ntwo\n");
        assert_eq!(pairs[0].1, "one two");
    }

    #[test]
    fn bare_key_is_empty_value() {
        let pairs = parse("[core]\nbare\n");
        assert_eq!(pairs, vec![("core.bare".to_string(), String::new())]);
    }

    #[test]
    fn key_before_section_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "key = value\n").unwrap();
        assert!(parse_file(&path).is_err());
    }

    #[test]
    fn bad_key_characters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "[a]\nbad_key = 1\n").unwrap();
        assert!(parse_file(&path).is_err());
    }
}
