//! Human-readable renderings of class and instance chunks for debugging.

use std::fmt::Write;

use crate::class::ScmoClass;
use crate::instance::ScmoInstance;
use crate::memory::layout::*;
use crate::memory::Chunk;
use crate::ordered_set::HashedSet;
use crate::value::CimValue;

fn chunk_header(out: &mut String, chunk: &Chunk) {
    let _ = writeln!(
        out,
        "magic {:#010x}  total {}  used {}  free {}  ext refs {}",
        chunk.magic(),
        chunk.total_size(),
        chunk.start_of_free(),
        chunk.free_bytes(),
        chunk.ext_ref_count()
    );
}

fn buckets(out: &mut String, label: &str, chunk: &Chunk, set: &HashedSet) {
    let table = set.buckets(chunk);
    let used = table.iter().filter(|b| **b != 0).count();
    let _ = write!(out, "{} hash table: {}/{} buckets used [", label, used, table.len());
    for (i, b) in table.iter().enumerate().filter(|(_, b)| **b != 0) {
        let _ = write!(out, " {}->{}", i, b - 1);
    }
    let _ = writeln!(out, " ]");
}

fn value_text(value: &CimValue) -> String {
    match value {
        CimValue::Null { is_array: true, .. } => "NULL[]".to_string(),
        CimValue::Null { .. } => "NULL".to_string(),
        CimValue::Scalar(s) => s.to_string(),
        CimValue::Array { elements, .. } => {
            let items: Vec<String> = elements.iter().map(ToString::to_string).collect();
            format!("{{{}}}", items.join(", "))
        }
    }
}

pub fn dump_class(class: &ScmoClass) -> String {
    let mut out = String::new();
    let chunk = class.chunk();
    let _ = writeln!(
        out,
        "class {}:{}{}",
        class.namespace(),
        class.class_name(),
        class
            .super_class_name()
            .map(|s| format!(" : {}", s))
            .unwrap_or_default()
    );
    chunk_header(&mut out, chunk);
    if class.is_empty() {
        let _ = writeln!(out, "empty class");
    }

    for q in class.qualifiers().unwrap_or_default() {
        let _ = writeln!(out, "  qualifier {} = {} (flavor {:#x})", q.name, value_text(&q.value), q.flavor);
    }

    buckets(&mut out, "property", chunk, &class.property_set());
    let mask = chunk.read_ptr(CLS_KEY_MASK);
    let words: Vec<String> = (0..mask.size as usize / 8)
        .map(|w| format!("{:016x}", chunk.read_u64(mask.start as usize + w * 8)))
        .collect();
    let _ = writeln!(out, "key mask [{}]", words.join(" "));

    for i in 0..class.property_count() {
        match class.property_at(i) {
            Ok(p) => {
                let _ = writeln!(
                    out,
                    "  [{}] {}{} {}{} origin={} default={}",
                    i,
                    p.cim_type,
                    if p.is_array { "[]" } else { "" },
                    p.name,
                    if p.is_key { " KEY" } else { "" },
                    p.class_origin.as_deref().unwrap_or("-"),
                    value_text(&p.default)
                );
            }
            Err(e) => {
                let _ = writeln!(out, "  [{}] <{}>", i, e);
            }
        }
    }

    buckets(&mut out, "key", chunk, &class.key_set());
    let _ = writeln!(
        out,
        "keys {:?} at properties {:?}",
        class.key_names(),
        class.key_index_list()
    );
    out
}

pub fn dump_instance(instance: &ScmoInstance) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "instance of {}:{}{}",
        instance.namespace(),
        instance.class_name(),
        instance
            .host_name()
            .map(|h| format!(" on {}", h))
            .unwrap_or_default()
    );
    chunk_header(&mut out, instance.chunk());

    let flags = [
        ("no_class", instance.no_class_for_instance()),
        ("compromised", instance.is_compromised()),
        ("include_qualifiers", instance.include_qualifiers()),
        ("include_class_origin", instance.include_class_origin()),
        ("class_only", instance.is_class_only()),
        ("export_set_only", instance.export_set_only()),
    ];
    let set: Vec<&str> = flags.iter().filter(|(_, on)| *on).map(|(n, _)| *n).collect();
    let _ = writeln!(out, "flags [{}]", set.join(" "));

    for i in 0..instance.key_binding_count() {
        match instance.key_binding_at(i) {
            Ok(k) => {
                let _ = writeln!(out, "  key {} {} = {}", k.cim_type, k.name, k.value);
            }
            Err(e) => {
                let _ = writeln!(out, "  key [{}] <{}>", i, e);
            }
        }
    }
    for i in 0..instance.property_count() {
        match instance.property_at(i) {
            Ok(p) => {
                let _ = writeln!(
                    out,
                    "  [{}] {} = {}{}",
                    i,
                    p.name,
                    value_text(&p.value),
                    if p.is_set { "" } else { " (default)" }
                );
            }
            Err(e) => {
                let _ = writeln!(out, "  [{}] <{}>", i, e);
            }
        }
    }
    let _ = writeln!(out, "path {}", instance.object_path());
    out
}

/// Classic 16 bytes per row hex dump with an ASCII column.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, line) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", row * 16);
        for i in 0..16 {
            match line.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
