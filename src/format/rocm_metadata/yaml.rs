//! Hand-written YAML subset parser/emitter for the legacy ROCm
//! metadata note (spec.md §4.9: "a bespoke parser handling mappings,
//! sequences, plain/quoted/block scalars, comments and a handful of
//! `!!`-tags — not a general YAML library").
//!
//! Grounded on the nested mapping/sequence shapes exercised by
//! `original_source/tests/amdbin/ROCmMetadata.cpp`'s fixture strings.

use std::fmt;

use super::{ArgMetadata, CodeProps, KernelAttrs, KernelMetadata, PrintfEntry, RocmMetadata, ValueKind, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub enum YamlError {
    UnexpectedIndent(usize),
    ExpectedMappingKey(String),
    MalformedScalar(String),
    MissingField(&'static str),
    BadValueKind(String),
    BadValueType(String),
}

impl fmt::Display for YamlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedIndent(n) => write!(f, "unexpected indentation at line offset {n}"),
            Self::ExpectedMappingKey(line) => write!(f, "expected 'key: value' but found {line:?}"),
            Self::MalformedScalar(s) => write!(f, "malformed scalar {s:?}"),
            Self::MissingField(name) => write!(f, "missing required field '{name}'"),
            Self::BadValueKind(s) => write!(f, "unknown ValueKind {s:?}"),
            Self::BadValueType(s) => write!(f, "unknown ValueType {s:?}"),
        }
    }
}

impl std::error::Error for YamlError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    #[must_use]
    pub fn get<'a>(&'a self, key: &str) -> Option<&'a Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            Value::Null => Some(&[]),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

struct Line<'a> {
    indent: usize,
    content: &'a str,
    raw: &'a str,
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

/// Strips a trailing `# comment` that isn't inside a quoted scalar.
fn strip_comment(s: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'#' if !in_single && !in_double && (i == 0 || bytes[i - 1] == b' ') => return s[..i].trim_end(),
            _ => {}
        }
    }
    s
}

fn preprocess(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let trimmed_end = raw.trim_end();
        let content = strip_comment(trimmed_end).trim_end();
        let body = content.trim_start();
        if body.is_empty() || body == "---" || body == "..." {
            continue;
        }
        lines.push(Line { indent: indent_of(content), content: body, raw: trimmed_end });
    }
    lines
}

fn is_seq_item(content: &str) -> bool {
    content == "-" || content.starts_with("- ")
}

/// Splits `key: value` (or bare `key:`) at the first unquoted,
/// unbracketed `": "` or trailing `:`.
fn split_key_value(content: &str) -> Result<(String, &str), YamlError> {
    let bytes = content.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut depth: i32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'[' | b'{' if !in_single && !in_double => depth += 1,
            b']' | b'}' if !in_single && !in_double => depth -= 1,
            b':' if !in_single && !in_double && depth == 0 => {
                let after = content.get(i + 1..).unwrap_or("");
                if after.is_empty() || after.starts_with(' ') {
                    let key = unquote(content[..i].trim());
                    let rest = after.trim_start_matches(' ');
                    return Ok((key, rest));
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(YamlError::ExpectedMappingKey(content.to_string()))
}

fn unquote(s: &str) -> String {
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        s[1..s.len() - 1].replace("''", "'")
    } else if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        unescape_double_quoted(&s[1..s.len() - 1])
    } else {
        s.to_string()
    }
}

fn unescape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_flow(s: &str) -> Value {
    let inner = s.trim();
    if let Some(body) = inner.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if body.trim().is_empty() {
            return Value::Seq(Vec::new());
        }
        return Value::Seq(split_flow_items(body).iter().map(|item| parse_scalar(item.trim())).collect());
    }
    parse_scalar(inner)
}

fn split_flow_items(s: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut in_single = false;
    let mut in_double = false;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '[' if !in_single && !in_double => depth += 1,
            ']' if !in_single && !in_double => depth -= 1,
            ',' if !in_single && !in_double && depth == 0 => {
                items.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&s[start..]);
    items
}

fn parse_scalar(raw: &str) -> Value {
    let s = raw.trim();
    if let Some(tagged) = s.strip_prefix("!!str ") {
        return Value::Str(unquote(tagged.trim()));
    }
    if let Some(tagged) = s.strip_prefix("!!int ") {
        return tagged.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null);
    }
    if let Some(tagged) = s.strip_prefix("!!bool ") {
        return tagged.trim().parse::<bool>().map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Some(tagged) = s.strip_prefix("!!float ") {
        return tagged.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null);
    }
    if let Some(tagged) = s.strip_prefix("!!seq ") {
        return parse_flow(tagged.trim());
    }
    if s.starts_with('[') {
        return parse_flow(s);
    }
    if s.starts_with('\'') || s.starts_with('"') {
        return Value::Str(unquote(s));
    }
    match s {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = s.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(s.to_string())
}

fn parse_block(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Value, YamlError> {
    if *pos >= lines.len() || lines[*pos].indent < indent {
        return Ok(Value::Null);
    }
    let indent = lines[*pos].indent;
    if is_seq_item(lines[*pos].content) {
        parse_sequence(lines, pos, indent)
    } else {
        parse_mapping(lines, pos, indent)
    }
}

fn parse_sequence(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Value, YamlError> {
    let mut items = Vec::new();
    while *pos < lines.len() && lines[*pos].indent == indent && is_seq_item(lines[*pos].content) {
        let content = lines[*pos].content;
        let rest = if content == "-" { "" } else { &content[2..] };
        if rest.trim().is_empty() {
            *pos += 1;
            if *pos < lines.len() && lines[*pos].indent > indent {
                items.push(parse_block(lines, pos, lines[*pos].indent)?);
            } else {
                items.push(Value::Null);
            }
        } else if split_key_value(rest).is_ok() {
            let map_indent = indent + (content.len() - content.trim_start_matches("- ").len());
            let (key, value_rest) = split_key_value(rest)?;
            *pos += 1;
            let mut pairs = Vec::new();
            let first_value = parse_entry_value(lines, pos, map_indent, value_rest)?;
            pairs.push((key, first_value));
            while *pos < lines.len() && lines[*pos].indent == map_indent && !is_seq_item(lines[*pos].content) {
                let (k, v) = parse_mapping_entry(lines, pos, map_indent)?;
                pairs.push((k, v));
            }
            items.push(Value::Map(pairs));
        } else {
            items.push(parse_scalar(rest.trim()));
            *pos += 1;
        }
    }
    Ok(Value::Seq(items))
}

fn parse_mapping(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Value, YamlError> {
    let mut pairs = Vec::new();
    while *pos < lines.len() && lines[*pos].indent == indent && !is_seq_item(lines[*pos].content) {
        let (key, value) = parse_mapping_entry(lines, pos, indent)?;
        pairs.push((key, value));
    }
    Ok(Value::Map(pairs))
}

fn parse_mapping_entry(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<(String, Value), YamlError> {
    let content = lines[*pos].content;
    let (key, rest) = split_key_value(content)?;
    *pos += 1;
    let value = parse_entry_value(lines, pos, indent, rest)?;
    Ok((key, value))
}

fn parse_entry_value(lines: &[Line<'_>], pos: &mut usize, indent: usize, rest: &str) -> Result<Value, YamlError> {
    let trimmed = rest.trim();
    if trimmed.is_empty() {
        if *pos < lines.len() && lines[*pos].indent > indent {
            return parse_block(lines, pos, lines[*pos].indent);
        }
        return Ok(Value::Null);
    }
    if trimmed == "|" || trimmed == ">" || trimmed.starts_with('|') || trimmed.starts_with('>') {
        let folded = trimmed.starts_with('>');
        if *pos >= lines.len() || lines[*pos].indent <= indent {
            return Ok(Value::Str(String::new()));
        }
        let block_indent = lines[*pos].indent;
        let mut buf = String::new();
        while *pos < lines.len() && lines[*pos].indent >= block_indent {
            let raw = lines[*pos].raw;
            let text = raw.get(block_indent.min(raw.len())..).unwrap_or("");
            buf.push_str(text);
            buf.push(if folded { ' ' } else { '\n' });
            *pos += 1;
        }
        return Ok(Value::Str(buf.trim_end().to_string()));
    }
    Ok(parse_scalar(trimmed))
}

/// Parses a full metadata document into the generic [`Value`] tree.
pub fn parse_value(text: &str) -> Result<Value, YamlError> {
    let lines = preprocess(text);
    let mut pos = 0;
    if lines.is_empty() {
        return Ok(Value::Map(Vec::new()));
    }
    parse_block(&lines, &mut pos, lines[0].indent)
}

fn value_kind_from_value(v: &Value) -> Result<ValueKind, YamlError> {
    let s = v.as_str().ok_or_else(|| YamlError::BadValueKind(format!("{v:?}")))?;
    ValueKind::from_str(s).ok_or_else(|| YamlError::BadValueKind(s.to_string()))
}

fn value_type_from_value(v: &Value) -> Result<ValueType, YamlError> {
    let s = v.as_str().ok_or_else(|| YamlError::BadValueType(format!("{v:?}")))?;
    ValueType::from_str(s).ok_or_else(|| YamlError::BadValueType(s.to_string()))
}

fn triple(v: &Value) -> Option<[u64; 3]> {
    let seq = v.as_seq()?;
    if seq.len() != 3 {
        return None;
    }
    Some([seq[0].as_u64()?, seq[1].as_u64()?, seq[2].as_u64()?])
}

fn pair_u32(v: &Value) -> Option<[u32; 2]> {
    let seq = v.as_seq()?;
    if seq.len() != 2 {
        return None;
    }
    Some([seq[0].as_u64()? as u32, seq[1].as_u64()? as u32])
}

fn arg_from_value(v: &Value) -> Result<ArgMetadata, YamlError> {
    Ok(ArgMetadata {
        name: v.get("Name").and_then(Value::as_str).map(str::to_string),
        type_name: v.get("TypeName").and_then(Value::as_str).map(str::to_string),
        size: v.get("Size").and_then(Value::as_u64).unwrap_or(0),
        align: v.get("Align").and_then(Value::as_u64).unwrap_or(0),
        pointee_align: v.get("PointeeAlign").and_then(Value::as_u64),
        value_kind: v.get("ValueKind").map(value_kind_from_value).transpose()?.ok_or(YamlError::MissingField("ValueKind"))?,
        value_type: v.get("ValueType").map(value_type_from_value).transpose()?.unwrap_or(ValueType::Structure),
        addr_space_qual: v.get("AddrSpaceQual").and_then(Value::as_str).map(str::to_string),
        acc_qual: v.get("AccQual").and_then(Value::as_str).map(str::to_string),
        actual_acc_qual: v.get("ActualAccQual").and_then(Value::as_str).map(str::to_string),
        is_const: v.get("IsConst").and_then(Value::as_bool).unwrap_or(false),
        is_restrict: v.get("IsRestrict").and_then(Value::as_bool).unwrap_or(false),
        is_volatile: v.get("IsVolatile").and_then(Value::as_bool).unwrap_or(false),
        is_pipe: v.get("IsPipe").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn code_props_from_value(v: Option<&Value>) -> CodeProps {
    let Some(v) = v else { return CodeProps::default() };
    CodeProps {
        kernarg_segment_size: v.get("KernargSegmentSize").and_then(Value::as_u64).unwrap_or(0),
        group_segment_fixed_size: v.get("GroupSegmentFixedSize").and_then(Value::as_u64).unwrap_or(0),
        private_segment_fixed_size: v.get("PrivateSegmentFixedSize").and_then(Value::as_u64).unwrap_or(0),
        kernarg_segment_align: v.get("KernargSegmentAlign").and_then(Value::as_u64).unwrap_or(0),
        wavefront_size: v.get("WavefrontSize").and_then(Value::as_u64).unwrap_or(0) as u32,
        num_sgprs: v.get("NumSGPRs").and_then(Value::as_u64).unwrap_or(0) as u32,
        num_vgprs: v.get("NumVGPRs").and_then(Value::as_u64).unwrap_or(0) as u32,
        max_flat_work_group_size: v.get("MaxFlatWorkGroupSize").and_then(Value::as_u64).unwrap_or(0),
        fixed_work_group_size: v.get("FixedWorkGroupSize").and_then(triple),
        num_spilled_sgprs: v.get("NumSpilledSGPRs").and_then(Value::as_u64).unwrap_or(0) as u32,
        num_spilled_vgprs: v.get("NumSpilledVGPRs").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

fn attrs_from_value(v: Option<&Value>) -> KernelAttrs {
    let Some(v) = v else { return KernelAttrs::default() };
    KernelAttrs {
        reqd_work_group_size: v.get("ReqdWorkGroupSize").and_then(triple),
        work_group_size_hint: v.get("WorkGroupSizeHint").and_then(triple),
        vec_type_hint: v.get("VecTypeHint").and_then(Value::as_str).map(str::to_string),
        runtime_handle: v.get("RuntimeHandle").and_then(Value::as_str).map(str::to_string),
    }
}

fn kernel_from_value(v: &Value) -> Result<KernelMetadata, YamlError> {
    let args = match v.get("Args").and_then(Value::as_seq) {
        Some(items) => items.iter().map(arg_from_value).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(KernelMetadata {
        name: v.get("Name").and_then(Value::as_str).ok_or(YamlError::MissingField("Name"))?.to_string(),
        symbol_name: v.get("SymbolName").and_then(Value::as_str).unwrap_or_default().to_string(),
        language: v.get("Language").and_then(Value::as_str).map(str::to_string),
        language_version: v.get("LanguageVersion").and_then(pair_u32),
        attrs: attrs_from_value(v.get("Attrs")),
        args,
        code_props: code_props_from_value(v.get("CodeProps")),
    })
}

/// Parses a complete ROCm metadata YAML document (spec.md §4.9).
pub fn parse_metadata(text: &str) -> Result<RocmMetadata, YamlError> {
    let root = parse_value(text)?;
    let version = root.get("Version").and_then(pair_u32).map(|p| [p[0], p[1]]).unwrap_or([1, 0]);
    let printf = match root.get("Printf").and_then(Value::as_seq) {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| super::parse_printf(s).ok_or_else(|| YamlError::MalformedScalar(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let kernels = match root.get("Kernels").and_then(Value::as_seq) {
        Some(items) => items.iter().map(kernel_from_value).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(RocmMetadata { version, printf, kernels })
}

fn emit_scalar(out: &mut String, s: &str) {
    if s.is_empty() || s.chars().any(|c| ":#'\"".contains(c) || c.is_whitespace()) {
        out.push('\'');
        out.push_str(&s.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(s);
    }
}

fn push_line(out: &mut String, indent: usize, text: &str) {
    for _ in 0..indent {
        out.push(' ');
    }
    out.push_str(text);
    out.push('\n');
}

fn emit_triple(out: &mut String, indent: usize, key: &str, v: [u64; 3]) {
    push_line(out, indent, &format!("{key}: [ {}, {}, {} ]", v[0], v[1], v[2]));
}

/// Emits `meta` as YAML text using the same field names [`parse_metadata`]
/// reads (spec.md §4.9 round-trip requirement).
#[must_use]
pub fn emit_metadata(meta: &RocmMetadata) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    push_line(&mut out, 0, &format!("Version:         [ {}, {} ]", meta.version[0], meta.version[1]));
    if meta.printf.is_empty() {
        push_line(&mut out, 0, "Printf:          []");
    } else {
        push_line(&mut out, 0, "Printf:");
        for entry in &meta.printf {
            let line = super::format_printf(entry);
            let mut quoted = String::from("  - '");
            quoted.push_str(&line.replace('\'', "''"));
            quoted.push('\'');
            push_line(&mut out, 0, &quoted);
        }
    }
    push_line(&mut out, 0, "Kernels:");
    for kernel in &meta.kernels {
        push_line(&mut out, 2, &format!("- Name:            {}", kernel.name));
        push_line(&mut out, 4, &format!("SymbolName:      '{}'", kernel.symbol_name));
        if let Some(lang) = &kernel.language {
            push_line(&mut out, 4, &format!("Language:        {lang}"));
        }
        if let Some(lv) = kernel.language_version {
            push_line(&mut out, 4, &format!("LanguageVersion: [ {}, {} ]", lv[0], lv[1]));
        }
        push_line(&mut out, 4, "Attrs:");
        if let Some(t) = kernel.attrs.reqd_work_group_size {
            emit_triple(&mut out, 6, "ReqdWorkGroupSize", t);
        }
        if let Some(t) = kernel.attrs.work_group_size_hint {
            emit_triple(&mut out, 6, "WorkGroupSizeHint", t);
        }
        if let Some(h) = &kernel.attrs.vec_type_hint {
            push_line(&mut out, 6, &format!("VecTypeHint:     {h}"));
        }
        push_line(&mut out, 4, "Args:");
        for arg in &kernel.args {
            let mut name_line = String::from("- Name:            ");
            emit_scalar(&mut name_line, arg.name.as_deref().unwrap_or(""));
            push_line(&mut out, 6, &name_line);
            if let Some(tn) = &arg.type_name {
                push_line(&mut out, 8, &format!("TypeName:        {tn}"));
            }
            push_line(&mut out, 8, &format!("Size:            {}", arg.size));
            push_line(&mut out, 8, &format!("Align:           {}", arg.align));
            push_line(&mut out, 8, &format!("ValueKind:       {}", arg.value_kind));
            push_line(&mut out, 8, &format!("ValueType:       {}", arg.value_type));
            if let Some(q) = &arg.acc_qual {
                push_line(&mut out, 8, &format!("AccQual:         {q}"));
            }
            if arg.is_const {
                push_line(&mut out, 8, "IsConst:         true");
            }
            if arg.is_restrict {
                push_line(&mut out, 8, "IsRestrict:      true");
            }
            if arg.is_volatile {
                push_line(&mut out, 8, "IsVolatile:      true");
            }
            if arg.is_pipe {
                push_line(&mut out, 8, "IsPipe:          true");
            }
        }
        push_line(&mut out, 4, "CodeProps:");
        let cp = &kernel.code_props;
        push_line(&mut out, 6, &format!("KernargSegmentSize: {}", cp.kernarg_segment_size));
        push_line(&mut out, 6, &format!("GroupSegmentFixedSize: {}", cp.group_segment_fixed_size));
        push_line(&mut out, 6, &format!("PrivateSegmentFixedSize: {}", cp.private_segment_fixed_size));
        push_line(&mut out, 6, &format!("KernargSegmentAlign: {}", cp.kernarg_segment_align));
        push_line(&mut out, 6, &format!("WavefrontSize: {}", cp.wavefront_size));
        push_line(&mut out, 6, &format!("NumSGPRs: {}", cp.num_sgprs));
        push_line(&mut out, 6, &format!("NumVGPRs: {}", cp.num_vgprs));
        push_line(&mut out, 6, &format!("MaxFlatWorkGroupSize: {}", cp.max_flat_work_group_size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"---
Version:         [ 1, 0 ]
Printf:
  - '1:1:4:index\72%d\n'
Kernels:
  - Name:            vectorAdd
    SymbolName:      'vectorAdd@kd'
    Language:        OpenCL C
    LanguageVersion: [ 1, 2 ]
    Args:
      - Name:            n
        TypeName:        uint
        Size:            4
        Align:           4
        ValueKind:       ByValue
        ValueType:       U32
        AccQual:         Default
    CodeProps:
      KernargSegmentSize: 48
      NumSGPRs: 8
      NumVGPRs: 3
"#;

    #[test]
    fn parses_kernel_args_and_printf() {
        let meta = parse_metadata(SAMPLE).unwrap();
        assert_eq!(meta.version, [1, 0]);
        assert_eq!(meta.printf.len(), 1);
        assert_eq!(meta.printf[0].format, "index:%d\n");
        assert_eq!(meta.kernels.len(), 1);
        let kernel = &meta.kernels[0];
        assert_eq!(kernel.name, "vectorAdd");
        assert_eq!(kernel.symbol_name, "vectorAdd@kd");
        assert_eq!(kernel.args.len(), 1);
        assert_eq!(kernel.args[0].value_kind, ValueKind::ByValue);
        assert_eq!(kernel.args[0].value_type, ValueType::UInt32);
        assert_eq!(kernel.code_props.num_sgprs, 8);
    }

    #[test]
    fn flow_sequence_scalar_parses_as_ints() {
        let v = parse_flow("[ 1, 2 ]");
        assert_eq!(v, Value::Seq(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn emitted_metadata_reparses_to_same_shape() {
        let meta = parse_metadata(SAMPLE).unwrap();
        let text = emit_metadata(&meta);
        let back = parse_metadata(&text).unwrap();
        assert_eq!(back.kernels[0].name, meta.kernels[0].name);
        assert_eq!(back.kernels[0].args[0].value_kind, meta.kernels[0].args[0].value_kind);
        assert_eq!(back.code_props_check(), meta.code_props_check());
    }
}

#[cfg(test)]
impl RocmMetadata {
    fn code_props_check(&self) -> (u64, u32, u32) {
        let cp = &self.kernels[0].code_props;
        (cp.kernarg_segment_size, cp.num_sgprs, cp.num_vgprs)
    }
}
