//! Quirk data model and JSON loader.
//!
//! A quirk bundles a PCI device identity filter (vendor/device/subvendor/
//! subdevice, with `ffff` wildcards) with the config-space fields pciback
//! should expose when a device matches. Quirks load from a JSON array;
//! malformed entries are dropped individually and reported, never fatal.
//! Only an unparseable document or a non-array root aborts the load.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

/// Default identity filter value: matches any id in that position.
pub const DEFAULT_ID: &str = "ffff";
/// Default field mask: no bits writable.
pub const DEFAULT_MASK: &str = "00000000";

/// One position of a quirk's identity filter. `0xffff` is the wildcard
/// sentinel and matches every id, including a literal `0xffff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMatch(u16);

impl IdMatch {
    pub const ANY: IdMatch = IdMatch(0xffff);

    pub fn exact(id: u16) -> IdMatch {
        IdMatch(id)
    }

    pub fn matches(self, id: u16) -> bool {
        self == Self::ANY || self.0 == id
    }
}

/// Width of one config-space access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSize {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl FieldSize {
    fn from_json_str(raw: &str) -> Option<FieldSize> {
        match raw {
            "1" => Some(FieldSize::Byte),
            "2" => Some(FieldSize::Word),
            "4" => Some(FieldSize::Dword),
            _ => None,
        }
    }

    pub fn bytes(self) -> u8 {
        self as u8
    }
}

/// One config-space patch instruction. Only the loader constructs these, so
/// a `Field` is always already-valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub register: u32,
    pub size: FieldSize,
    pub mask: u32,
}

/// A device identity filter plus the fields to emit when it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quirk {
    pub name: String,
    pub vendor: IdMatch,
    pub device: IdMatch,
    pub subvendor: IdMatch,
    pub subdevice: IdMatch,
    /// Non-empty; a quirk whose fields all fail validation is never built.
    pub fields: Vec<Field>,
}

/// Loader output: surviving quirks in document order, plus one message per
/// dropped quirk or field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuirkLoadReport {
    pub quirks: Vec<Quirk>,
    pub skipped: Vec<String>,
}

/// Parse a fixed-width hex id such as `"10de"` or `"00000040"`.
pub fn parse_hex_id(raw: &str, expect_len: usize) -> Result<u32> {
    if raw.len() != expect_len {
        bail!("expected exactly {expect_len} hex digits, got {raw:?}");
    }
    // `from_str_radix` accepts a leading sign, which a fixed-width id must not.
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("expected hex digits, got {raw:?}");
    }
    u32::from_str_radix(raw, 16).with_context(|| format!("parse hex id {raw:?}"))
}

/// Load quirks from a JSON document whose root is an array of quirk objects.
///
/// Per-element failures (non-object entries, bad identity strings, bad or
/// missing fields) drop just that entry and record a diagnostic; the load as
/// a whole only fails when the document itself is unusable.
pub fn load_quirks(json_text: &str) -> Result<QuirkLoadReport> {
    let root: Value = serde_json::from_str(json_text).context("parse quirks document")?;
    let Value::Array(entries) = root else {
        bail!("quirks document root must be a JSON array");
    };

    let mut quirks = Vec::new();
    let mut skipped = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        let Value::Object(obj) = entry else {
            skipped.push(format!("quirk #{idx}: not a JSON object, skipping"));
            continue;
        };
        if let Some(quirk) = parse_quirk(obj, idx, &mut skipped) {
            quirks.push(quirk);
        }
    }

    Ok(QuirkLoadReport { quirks, skipped })
}

/// Extract a string member, falling back to `default` when the key is absent
/// or holds a non-string value.
fn string_member<'a>(obj: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    match obj.get(key) {
        Some(Value::String(s)) => s,
        _ => default,
    }
}

fn parse_quirk(obj: &Map<String, Value>, idx: usize, skipped: &mut Vec<String>) -> Option<Quirk> {
    let name = string_member(obj, "name", "");

    let mut ids = [IdMatch::ANY; 4];
    for (slot, key) in ids
        .iter_mut()
        .zip(["vendor", "device", "subvendor", "subdevice"])
    {
        let raw = string_member(obj, key, DEFAULT_ID);
        match parse_hex_id(raw, 4) {
            Ok(id) => *slot = IdMatch::exact(id as u16),
            Err(err) => {
                skipped.push(format!("quirk #{idx}: bad {key}: {err:#}"));
                return None;
            }
        }
    }
    let [vendor, device, subvendor, subdevice] = ids;

    let fields = match obj.get("config_space_fields") {
        Some(Value::Array(entries)) => parse_fields(entries, idx, skipped),
        _ => Vec::new(),
    };

    if fields.is_empty() {
        skipped.push(format!(
            "quirk #{idx} ({name:?}): no usable config space fields, dropping it"
        ));
        return None;
    }

    Some(Quirk {
        name: name.to_string(),
        vendor,
        device,
        subvendor,
        subdevice,
        fields,
    })
}

fn parse_fields(entries: &[Value], idx: usize, skipped: &mut Vec<String>) -> Vec<Field> {
    let mut fields = Vec::new();
    for (fidx, entry) in entries.iter().enumerate() {
        let Value::Object(obj) = entry else {
            skipped.push(format!(
                "quirk #{idx} field #{fidx}: not a JSON object, skipping"
            ));
            continue;
        };
        match parse_field(obj) {
            Ok(field) => fields.push(field),
            Err(err) => skipped.push(format!("quirk #{idx} field #{fidx}: {err:#}")),
        }
    }
    fields
}

fn parse_field(obj: &Map<String, Value>) -> Result<Field> {
    let register = match obj.get("register") {
        Some(Value::String(raw)) => parse_hex_id(raw, 8).context("bad register")?,
        _ => bail!("missing register"),
    };

    let size = match obj.get("size") {
        Some(Value::String(raw)) => FieldSize::from_json_str(raw)
            .with_context(|| format!("bad size {raw:?} (expected \"1\", \"2\" or \"4\")"))?,
        _ => bail!("missing size"),
    };

    let raw_mask = string_member(obj, "mask", DEFAULT_MASK);
    let mask = parse_hex_id(raw_mask, 8).context("bad mask")?;

    Ok(Field {
        register,
        size,
        mask,
    })
}
