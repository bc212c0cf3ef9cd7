//! Minimal INI reader for formstream settings
//! Handles `[section]` headers, `key = value` pairs, and `#`/`;` comments.
//! Section and key names are case-insensitive.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct IniFile {
    /// Keys outside any section live under ""
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let mut ini = Self::new();
        let mut section = String::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| format!("Invalid section header at line {}: {line}", idx + 1))?;
                section = name.to_ascii_lowercase();
                ini.sections.entry(section.clone()).or_default();
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("Expected key = value at line {}: {line}", idx + 1))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Empty key at line {}", idx + 1));
            }

            ini.sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_ascii_lowercase(), unquote(value.trim()).to_string());
        }

        Ok(ini)
    }

    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.sections
            .get(&section.to_ascii_lowercase())?
            .get(&key.to_ascii_lowercase())
            .cloned()
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Option<usize> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_string(section, key)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    /// Byte size such as `4096`, `64KB` or `1.5MB`
    pub fn get_size(&self, section: &str, key: &str) -> Option<u64> {
        parse_size(&self.get_string(section, key)?)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(&section.to_ascii_lowercase())
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(['#', ';']) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse a byte size with an optional B/KB/MB/GB suffix (binary multiples)
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_uppercase();
    if let Ok(bytes) = value.parse::<u64>() {
        return Some(bytes);
    }

    let (number, multiplier) = [("GB", 1u64 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)]
        .iter()
        .find_map(|(suffix, multiplier)| {
            value.strip_suffix(suffix).map(|n| (n.trim(), *multiplier))
        })?;

    if let Ok(n) = number.parse::<u64>() {
        return n.checked_mul(multiplier);
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| (n * multiplier as f64) as u64)
}
