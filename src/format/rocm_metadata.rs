//! Shared ROCm kernel metadata model (spec.md §4.9, component C9).
//!
//! One in-memory `RocmMetadata` tree feeds two independent wire
//! serializations: a hand-written YAML-subset codec (the legacy
//! `.note` encoding) and a MsgPack codec built on `serde`/`rmp-serde`
//! (the "new binary format" encoding selected by driver version).
//! Grounded on `original_source/tests/amdbin/ROCmMetadata.cpp`'s test
//! fixtures for the field set and the `ValueKind`/`ValueType` variant
//! names; the MsgPack path is grounded on `Flakebi-geobacter`'s own use
//! of `rmp-serde` to decode AMD comgr MsgPack payloads (DESIGN.md).

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Kernel-argument value kind (24 variants incl. hidden ones, spec.md
/// §4.9). Encoded as a string in YAML, a small integer in MsgPack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    ByValue,
    GlobalBuffer,
    DynamicSharedPointer,
    Sampler,
    Image,
    Pipe,
    Queue,
    HiddenGlobalOffsetX,
    HiddenGlobalOffsetY,
    HiddenGlobalOffsetZ,
    HiddenNone,
    HiddenPrintfBuffer,
    HiddenDefaultQueue,
    HiddenCompletionAction,
    HiddenMultiGridSyncArg,
    HiddenBlockCountX,
    HiddenBlockCountY,
    HiddenBlockCountZ,
    HiddenGroupSizeX,
    HiddenGroupSizeY,
    HiddenGroupSizeZ,
    HiddenRemainderX,
    HiddenRemainderY,
    HiddenRemainderZ,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ByValue => "ByValue",
            Self::GlobalBuffer => "GlobalBuffer",
            Self::DynamicSharedPointer => "DynamicSharedPointer",
            Self::Sampler => "Sampler",
            Self::Image => "Image",
            Self::Pipe => "Pipe",
            Self::Queue => "Queue",
            Self::HiddenGlobalOffsetX => "HiddenGlobalOffsetX",
            Self::HiddenGlobalOffsetY => "HiddenGlobalOffsetY",
            Self::HiddenGlobalOffsetZ => "HiddenGlobalOffsetZ",
            Self::HiddenNone => "HiddenNone",
            Self::HiddenPrintfBuffer => "HiddenPrintfBuffer",
            Self::HiddenDefaultQueue => "HiddenDefaultQueue",
            Self::HiddenCompletionAction => "HiddenCompletionAction",
            Self::HiddenMultiGridSyncArg => "HiddenMultiGridSyncArg",
            Self::HiddenBlockCountX => "HiddenBlockCountX",
            Self::HiddenBlockCountY => "HiddenBlockCountY",
            Self::HiddenBlockCountZ => "HiddenBlockCountZ",
            Self::HiddenGroupSizeX => "HiddenGroupSizeX",
            Self::HiddenGroupSizeY => "HiddenGroupSizeY",
            Self::HiddenGroupSizeZ => "HiddenGroupSizeZ",
            Self::HiddenRemainderX => "HiddenRemainderX",
            Self::HiddenRemainderY => "HiddenRemainderY",
            Self::HiddenRemainderZ => "HiddenRemainderZ",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "ByValue" => Self::ByValue,
            "GlobalBuffer" => Self::GlobalBuffer,
            "DynamicSharedPointer" => Self::DynamicSharedPointer,
            "Sampler" => Self::Sampler,
            "Image" => Self::Image,
            "Pipe" => Self::Pipe,
            "Queue" => Self::Queue,
            "HiddenGlobalOffsetX" => Self::HiddenGlobalOffsetX,
            "HiddenGlobalOffsetY" => Self::HiddenGlobalOffsetY,
            "HiddenGlobalOffsetZ" => Self::HiddenGlobalOffsetZ,
            "HiddenNone" => Self::HiddenNone,
            "HiddenPrintfBuffer" => Self::HiddenPrintfBuffer,
            "HiddenDefaultQueue" => Self::HiddenDefaultQueue,
            "HiddenCompletionAction" => Self::HiddenCompletionAction,
            "HiddenMultiGridSyncArg" => Self::HiddenMultiGridSyncArg,
            "HiddenBlockCountX" => Self::HiddenBlockCountX,
            "HiddenBlockCountY" => Self::HiddenBlockCountY,
            "HiddenBlockCountZ" => Self::HiddenBlockCountZ,
            "HiddenGroupSizeX" => Self::HiddenGroupSizeX,
            "HiddenGroupSizeY" => Self::HiddenGroupSizeY,
            "HiddenGroupSizeZ" => Self::HiddenGroupSizeZ,
            "HiddenRemainderX" => Self::HiddenRemainderX,
            "HiddenRemainderY" => Self::HiddenRemainderY,
            "HiddenRemainderZ" => Self::HiddenRemainderZ,
            _ => return None,
        })
    }

    #[must_use]
    fn as_u32(self) -> u32 {
        self.as_str_index() as u32
    }

    fn as_str_index(self) -> usize {
        Self::ORDER.iter().position(|v| *v == self).expect("exhaustive ORDER table")
    }

    fn from_u32(n: u32) -> Option<Self> {
        Self::ORDER.get(n as usize).copied()
    }

    const ORDER: [ValueKind; 24] = [
        Self::ByValue,
        Self::GlobalBuffer,
        Self::DynamicSharedPointer,
        Self::Sampler,
        Self::Image,
        Self::Pipe,
        Self::Queue,
        Self::HiddenGlobalOffsetX,
        Self::HiddenGlobalOffsetY,
        Self::HiddenGlobalOffsetZ,
        Self::HiddenNone,
        Self::HiddenPrintfBuffer,
        Self::HiddenDefaultQueue,
        Self::HiddenCompletionAction,
        Self::HiddenMultiGridSyncArg,
        Self::HiddenBlockCountX,
        Self::HiddenBlockCountY,
        Self::HiddenBlockCountZ,
        Self::HiddenGroupSizeX,
        Self::HiddenGroupSizeY,
        Self::HiddenGroupSizeZ,
        Self::HiddenRemainderX,
        Self::HiddenRemainderY,
        Self::HiddenRemainderZ,
    ];
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel-argument value type (12 variants, spec.md §4.9). Encoded as
/// a short string code in YAML (`U32`, `F64`, ...), a small integer in
/// MsgPack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Structure,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "I8",
            Self::Int16 => "I16",
            Self::Int32 => "I32",
            Self::Int64 => "I64",
            Self::UInt8 => "U8",
            Self::UInt16 => "U16",
            Self::UInt32 => "U32",
            Self::UInt64 => "U64",
            Self::Float16 => "F16",
            Self::Float32 => "F32",
            Self::Float64 => "F64",
            Self::Structure => "Struct",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "I8" => Self::Int8,
            "I16" => Self::Int16,
            "I32" => Self::Int32,
            "I64" => Self::Int64,
            "U8" => Self::UInt8,
            "U16" => Self::UInt16,
            "U32" => Self::UInt32,
            "U64" => Self::UInt64,
            "F16" => Self::Float16,
            "F32" => Self::Float32,
            "F64" => Self::Float64,
            "Struct" => Self::Structure,
            _ => return None,
        })
    }

    const ORDER: [ValueType; 12] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float16,
        Self::Float32,
        Self::Float64,
        Self::Structure,
    ];

    fn as_u32(self) -> u32 {
        Self::ORDER.iter().position(|v| *v == self).expect("exhaustive ORDER table") as u32
    }

    fn from_u32(n: u32) -> Option<Self> {
        Self::ORDER.get(n as usize).copied()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! int_enum_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u32(self.as_u32())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct V;
                impl<'de> Visitor<'de> for V {
                    type Value = $ty;
                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "an integer {} code", stringify!($ty))
                    }
                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                        $ty::from_u32(v as u32).ok_or_else(|| E::custom(format!("out of range {} code {v}", stringify!($ty))))
                    }
                }
                deserializer.deserialize_u32(V)
            }
        }
    };
}

int_enum_serde!(ValueKind);
int_enum_serde!(ValueType);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgMetadata {
    pub name: Option<String>,
    pub type_name: Option<String>,
    pub size: u64,
    pub align: u64,
    pub pointee_align: Option<u64>,
    pub value_kind: ValueKind,
    pub value_type: ValueType,
    pub addr_space_qual: Option<String>,
    pub acc_qual: Option<String>,
    pub actual_acc_qual: Option<String>,
    pub is_const: bool,
    pub is_restrict: bool,
    pub is_volatile: bool,
    pub is_pipe: bool,
}

impl Default for ValueKind {
    fn default() -> Self {
        ValueKind::ByValue
    }
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Int32
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelAttrs {
    pub reqd_work_group_size: Option<[u64; 3]>,
    pub work_group_size_hint: Option<[u64; 3]>,
    pub vec_type_hint: Option<String>,
    pub runtime_handle: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeProps {
    pub kernarg_segment_size: u64,
    pub group_segment_fixed_size: u64,
    pub private_segment_fixed_size: u64,
    pub kernarg_segment_align: u64,
    pub wavefront_size: u32,
    pub num_sgprs: u32,
    pub num_vgprs: u32,
    pub max_flat_work_group_size: u64,
    pub fixed_work_group_size: Option<[u64; 3]>,
    pub num_spilled_sgprs: u32,
    pub num_spilled_vgprs: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub name: String,
    pub symbol_name: String,
    pub language: Option<String>,
    pub language_version: Option<[u32; 2]>,
    pub attrs: KernelAttrs,
    pub args: Vec<ArgMetadata>,
    pub code_props: CodeProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrintfEntry {
    pub id: u32,
    pub arg_sizes: Vec<u32>,
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RocmMetadata {
    pub version: [u32; 2],
    pub printf: Vec<PrintfEntry>,
    pub kernels: Vec<KernelMetadata>,
}

/// Parses one `Printf:` list entry (spec.md §4.9 scenario S4):
/// `"id:numArgs:size0[:size1...]:format"`, where octal escapes
/// (`\NNN`) inside `format` stand for a literal byte — this is how a
/// literal `:` can appear inside the format field without being
/// mistaken for a field separator.
#[must_use]
pub fn parse_printf(line: &str) -> Option<PrintfEntry> {
    let mut parts = line.splitn(3, ':');
    let id: u32 = parts.next()?.parse().ok()?;
    let count: usize = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let mut rest_parts = rest.splitn(count + 1, ':');
    let mut arg_sizes = Vec::with_capacity(count);
    for _ in 0..count {
        arg_sizes.push(rest_parts.next()?.parse().ok()?);
    }
    let format_raw = rest_parts.next().unwrap_or("");
    Some(PrintfEntry { id, arg_sizes, format: unescape_printf(format_raw) })
}

#[must_use]
pub fn format_printf(entry: &PrintfEntry) -> String {
    let mut out = format!("{}:{}", entry.id, entry.arg_sizes.len());
    for size in &entry.arg_sizes {
        out.push(':');
        out.push_str(&size.to_string());
    }
    out.push(':');
    out.push_str(&escape_printf(&entry.format));
    out
}

fn unescape_printf(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if next.is_ascii_digit() {
                let end = (i + 1..bytes.len()).take_while(|&j| j < i + 4 && bytes[j].is_ascii_digit()).count() + i + 1;
                if let Ok(text) = std::str::from_utf8(&bytes[i + 1..end]) {
                    if let Ok(value) = u8::from_str_radix(text, 8) {
                        out.push(value as char);
                        i = end;
                        continue;
                    }
                }
            } else {
                let escaped = match next {
                    b'n' => Some('\n'),
                    b't' => Some('\t'),
                    b'\\' => Some('\\'),
                    b':' => Some(':'),
                    _ => None,
                };
                if let Some(ch) = escaped {
                    out.push(ch);
                    i += 2;
                    continue;
                }
            }
        }
        let ch = s[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn escape_printf(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\072"),
            other => out.push(other),
        }
    }
    out
}

/// Encodes `meta` as MsgPack bytes via `rmp-serde`.
pub fn to_msgpack(meta: &RocmMetadata) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(meta)
}

/// Decodes MsgPack bytes produced by [`to_msgpack`] (or by an upstream
/// ROCm toolchain) back into a [`RocmMetadata`].
pub fn from_msgpack(bytes: &[u8]) -> Result<RocmMetadata, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

pub mod yaml;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printf_round_trips_with_octal_escaped_colon() {
        let entry = parse_printf("1:1:4:index\\72%d\\n").unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.arg_sizes, vec![4]);
        assert_eq!(entry.format, "index:%d\n");
    }

    #[test]
    fn printf_with_multiple_sizes_round_trips() {
        let entry = parse_printf("2:4:4:4:4:4:i=%d,a=%f,b=%f,c=%f\\n").unwrap();
        assert_eq!(entry.arg_sizes, vec![4, 4, 4, 4]);
        assert_eq!(entry.format, "i=%d,a=%f,b=%f,c=%f\n");
    }

    #[test]
    fn value_kind_and_type_string_codes_round_trip() {
        assert_eq!(ValueKind::from_str(ValueKind::HiddenGlobalOffsetX.as_str()), Some(ValueKind::HiddenGlobalOffsetX));
        assert_eq!(ValueType::from_str(ValueType::UInt32.as_str()), Some(ValueType::UInt32));
    }

    #[test]
    fn value_kind_and_type_msgpack_round_trip_as_small_integers() {
        let meta = RocmMetadata {
            version: [1, 0],
            printf: Vec::new(),
            kernels: vec![KernelMetadata {
                name: "vectorAdd".into(),
                symbol_name: "vectorAdd@kd".into(),
                args: vec![ArgMetadata { value_kind: ValueKind::GlobalBuffer, value_type: ValueType::Float32, ..Default::default() }],
                ..Default::default()
            }],
        };
        let bytes = to_msgpack(&meta).unwrap();
        let back = from_msgpack(&bytes).unwrap();
        assert_eq!(back.kernels[0].args[0].value_kind, ValueKind::GlobalBuffer);
        assert_eq!(back.kernels[0].args[0].value_type, ValueType::Float32);
    }
}
