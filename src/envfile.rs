//! `.env` loading. Values already present in the process environment win
//! over the file.

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Load `explicit` if given (it must exist), otherwise `./.env` when present.
pub fn load(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        apply_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let path = cwd.join(".env");
    if !path.is_file() {
        return Ok(None);
    }
    apply_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit: false }))
}

fn apply_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (key, value) in parse(&contents).map_err(|e| format!("{}:{}", path.display(), e))? {
        if std::env::var_os(&key).is_none() {
            // Mutating the environment is only sound before other threads start.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Every assignment in file order. Errors carry the 1-based line number.
pub fn parse(contents: &str) -> Result<Vec<(String, String)>, String> {
    let mut vars = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(pair) = parse_line(line).map_err(|e| format!("{}: {}", index + 1, e))? {
            vars.push(pair);
        }
    }
    Ok(vars)
}

fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_value(raw.trim())?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    let mut chars = raw.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) => q,
        // Unquoted: an inline comment ends the value.
        _ => return Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string()),
    };

    let mut value = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => {
                let escaped = chars.next().ok_or("unterminated escape sequence in double-quoted value")?;
                value.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let rest = chars.as_str().trim();
                if rest.is_empty() || rest.starts_with('#') {
                    return Ok(value);
                }
                return Err(format!("unexpected characters after closing {} quote", quote));
            }
            c => value.push(c),
        }
    }
    Err(format!("unterminated {}-quoted value", if quote == '"' { "double" } else { "single" }))
}
