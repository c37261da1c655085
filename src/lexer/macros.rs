//! `.macro`/`.endm` template registration and splicing (spec.md §4.1).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
}

impl MacroTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: MacroDef) {
        self.macros.insert(def.name.to_ascii_lowercase(), def);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(&name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(&name.to_ascii_lowercase())
    }
}

/// Parse a `.macro name, a, b=default` header line (the part after the
/// `.macro` keyword has already been stripped by the caller).
#[must_use]
pub fn parse_macro_header(rest: &str) -> MacroDef {
    let mut parts = rest.splitn(2, [',', ' ', '\t']);
    let name = parts.next().unwrap_or("").trim().to_string();
    let tail = rest[name.len()..].trim_start_matches([',', ' ', '\t']);
    let params = if tail.is_empty() {
        Vec::new()
    } else {
        tail.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|p| match p.split_once('=') {
                Some((n, d)) => MacroParam { name: n.trim().to_string(), default: Some(d.trim().to_string()) },
                None => MacroParam { name: p.to_string(), default: None },
            })
            .collect()
    };
    MacroDef { name, params, body: Vec::new() }
}

/// Split a macro-invocation argument list the same way a call site would
/// write it: comma-separated, each argument trimmed.
#[must_use]
pub fn split_args(rest: &str) -> Vec<String> {
    if rest.trim().is_empty() {
        return Vec::new();
    }
    rest.split(',').map(|s| s.trim().to_string()).collect()
}

/// Bind positional (and `name=value`) call-site arguments against a
/// macro's declared parameters, falling back to declared defaults and
/// finally the empty string.
#[must_use]
pub fn bind_args(def: &MacroDef, args: &[String]) -> HashMap<String, String> {
    let mut bound: HashMap<String, String> = HashMap::new();
    for (i, param) in def.params.iter().enumerate() {
        let value = args
            .iter()
            .find_map(|a| a.split_once('=').filter(|(n, _)| *n == param.name).map(|(_, v)| v.to_string()))
            .or_else(|| args.get(i).filter(|a| !a.contains('=')).cloned())
            .or_else(|| param.default.clone())
            .unwrap_or_default();
        bound.insert(param.name.clone(), value);
    }
    bound
}

/// Splice one macro body line, substituting `\param` (default syntax) or
/// `&param&` (`.altmacro` syntax, spec.md §4.1) with its bound value.
/// Unknown parameter names are left untouched.
#[must_use]
pub fn substitute_line(line: &str, bound: &HashMap<String, String>, altmacro: bool) -> String {
    if altmacro {
        substitute_altmacro(line, bound)
    } else {
        substitute_backslash(line, bound)
    }
}

fn substitute_backslash(line: &str, bound: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some((name, len)) = longest_ident_match(&line[i + 1..], bound) {
                out.push_str(&bound[&name]);
                i += 1 + len;
                continue;
            }
        }
        let ch = line[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn substitute_altmacro(line: &str, bound: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('&') {
            let name = &after[..end];
            if let Some(value) = bound.get(name) {
                out.push_str(value);
                rest = &after[end + 1..];
                continue;
            }
        }
        out.push('&');
        rest = after;
    }
    out.push_str(rest);
    out
}

fn longest_ident_match(s: &str, bound: &HashMap<String, String>) -> Option<(String, usize)> {
    let end = s.find(|c: char| !c.is_alphanumeric() && c != '_').unwrap_or(s.len());
    (1..=end).rev().map(|n| &s[..n]).find(|cand| bound.contains_key(*cand)).map(|cand| (cand.to_string(), cand.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_with_default() {
        let def = parse_macro_header("name, a, b=default");
        assert_eq!(def.name, "name");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[1].default.as_deref(), Some("default"));
    }

    #[test]
    fn binds_positional_args_and_falls_back_to_default() {
        let def = parse_macro_header("name, a, b=7");
        let bound = bind_args(&def, &["3".to_string()]);
        assert_eq!(bound["a"], "3");
        assert_eq!(bound["b"], "7");
    }

    #[test]
    fn backslash_substitution_splices_bound_values() {
        let def = parse_macro_header("name, a, b");
        let bound = bind_args(&def, &["1".to_string(), "2".to_string()]);
        let out = substitute_line("vx0 = \\a + \\b", &bound, false);
        assert_eq!(out, "vx0 = 1 + 2");
    }

    #[test]
    fn altmacro_substitution_uses_ampersand_delimiters() {
        let def = parse_macro_header("name, a");
        let bound = bind_args(&def, &["5".to_string()]);
        let out = substitute_line("v&a& = &a&", &bound, true);
        assert_eq!(out, "v5 = 5");
    }
}
