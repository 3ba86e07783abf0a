// scmo_core/src/streamer.rs
//
// Flat byte stream of classes and instances.
//
//   magic u32 | version u32
//   class table     count u32, then per class: len u64, used chunk bytes
//   instance table  count u32, then per instance: class index u32
//                   (u32::MAX when the instance has no class)
//   ref table       count u32, then per entry: owner u32, slot u32, target u32
//   instance bytes  per instance: len u64, used chunk bytes
//
// Instances are ordered so every referenced instance precedes its owner.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::class::ScmoClass;
use crate::config::EngineConfig;
use crate::error::{Result, ScmoError};
use crate::instance::ScmoInstance;
use crate::memory::layout::*;
use crate::memory::Chunk;

pub const STREAM_MAGIC: u32 = 0x534D_4353;

const NO_CLASS: u32 = u32::MAX;

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        let mut w = Writer { out: Vec::new() };
        w.u32(STREAM_MAGIC);
        w.u32(FORMAT_VERSION);
        w
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn block(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.out.extend_from_slice(bytes);
    }
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Result<Self> {
        let mut r = Reader { input, pos: 0 };
        let magic = r.u32()?;
        if magic != STREAM_MAGIC {
            return Err(ScmoError::invalid_chunk(format!("bad stream magic {:#010x}", magic)));
        }
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(ScmoError::invalid_chunk(format!(
                "unsupported stream version {}",
                version
            )));
        }
        Ok(r)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.input.len());
        let Some(end) = end else {
            return Err(ScmoError::invalid_chunk(format!(
                "stream truncated at {} reading {} bytes",
                self.pos, len
            )));
        };
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn block(&mut self) -> Result<&'a [u8]> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        let len = usize::try_from(u64::from_le_bytes(raw))
            .map_err(|_| ScmoError::invalid_chunk("block length overflows"))?;
        self.take(len)
    }

    /// A table count, bounded by what the rest of the input could hold.
    fn count(&mut self, entry_size: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(entry_size) > self.input.len() - self.pos {
            return Err(ScmoError::invalid_chunk(format!(
                "table of {} entries exceeds the stream",
                n
            )));
        }
        Ok(n)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.input.len() {
            return Err(ScmoError::invalid_chunk(format!(
                "{} trailing bytes after stream",
                self.input.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn check_streamable(class: &ScmoClass) -> Result<()> {
    if class.chunk().ext_ref_count() > 0 {
        return Err(ScmoError::invalid_parameter(
            class.class_name(),
            "class defaults embed instances and cannot be streamed",
        ));
    }
    Ok(())
}

pub fn serialize_class(class: &ScmoClass) -> Result<Vec<u8>> {
    check_streamable(class)?;
    let mut w = Writer::new();
    w.block(class.as_bytes());
    trace!(class = %class.class_name(), bytes = w.out.len(), "serialized class");
    Ok(w.out)
}

pub fn deserialize_class(input: &[u8], config: &EngineConfig) -> Result<ScmoClass> {
    let mut r = Reader::new(input)?;
    let class = ScmoClass::from_bytes(r.block()?, config)?;
    r.finish()?;
    Ok(class)
}

/// Flattened instance graph: every distinct instance once, referenced
/// instances first.
#[derive(Default)]
struct Plan {
    classes: Vec<ScmoClass>,
    instances: Vec<(ScmoInstance, u32)>,
    refs: Vec<(u32, u32, u32)>,
    seen: HashMap<usize, u32>,
}

impl Plan {
    fn class_index(&mut self, class: &ScmoClass) -> Result<u32> {
        if class.is_empty() {
            return Ok(NO_CLASS);
        }
        if let Some(i) = self.classes.iter().position(|c| c.is_same(class)) {
            return Ok(i as u32);
        }
        check_streamable(class)?;
        self.classes.push(class.clone());
        Ok(self.classes.len() as u32 - 1)
    }

    fn visit(&mut self, instance: &ScmoInstance) -> Result<u32> {
        let identity = instance_identity(instance);
        if let Some(&index) = self.seen.get(&identity) {
            return Ok(index);
        }
        let mut children = Vec::new();
        for (slot, target) in instance.external_slots() {
            children.push((slot, self.visit(&target)?));
        }
        let class = self.class_index(instance.class())?;
        let index = self.instances.len() as u32;
        self.instances.push((instance.clone(), class));
        self.seen.insert(identity, index);
        self.refs
            .extend(children.into_iter().map(|(slot, target)| (index, slot, target)));
        Ok(index)
    }
}

fn instance_identity(instance: &ScmoInstance) -> usize {
    instance.chunk() as *const Chunk as usize
}

/// Writes `instances` and everything they embed.
pub fn serialize_instances(instances: &[ScmoInstance]) -> Result<Vec<u8>> {
    let mut plan = Plan::default();
    for instance in instances {
        plan.visit(instance)?;
    }

    let mut w = Writer::new();
    w.u32(plan.classes.len() as u32);
    for class in &plan.classes {
        w.block(class.as_bytes());
    }
    w.u32(plan.instances.len() as u32);
    for (_, class) in &plan.instances {
        w.u32(*class);
    }
    w.u32(plan.refs.len() as u32);
    for &(owner, slot, target) in &plan.refs {
        w.u32(owner);
        w.u32(slot);
        w.u32(target);
    }
    for (instance, _) in &plan.instances {
        w.block(instance.chunk().used_bytes());
    }

    debug!(
        roots = instances.len(),
        instances = plan.instances.len(),
        classes = plan.classes.len(),
        refs = plan.refs.len(),
        bytes = w.out.len(),
        "serialized instances"
    );
    Ok(w.out)
}

/// Reads a stream written by [`serialize_instances`]. Returns the
/// instances that no other instance in the stream references.
pub fn deserialize_instances(input: &[u8], config: &EngineConfig) -> Result<Vec<ScmoInstance>> {
    let config = config.normalized();
    let mut r = Reader::new(input)?;

    let class_count = r.count(8)?;
    let mut classes = Vec::with_capacity(class_count);
    for _ in 0..class_count {
        classes.push(ScmoClass::from_bytes(r.block()?, &config)?);
    }

    let instance_count = r.count(4)?;
    let mut class_of = Vec::with_capacity(instance_count);
    for _ in 0..instance_count {
        class_of.push(r.u32()?);
    }

    let ref_count = r.count(12)?;
    let mut refs: Vec<Vec<(usize, usize)>> = vec![Vec::new(); instance_count];
    let mut consumed = vec![false; instance_count];
    for _ in 0..ref_count {
        let owner = r.u32()? as usize;
        let slot = r.u32()? as usize;
        let target = r.u32()? as usize;
        if owner >= instance_count || target >= owner {
            return Err(ScmoError::invalid_chunk(format!(
                "reference from instance {} to {} is out of order",
                owner, target
            )));
        }
        refs[owner].push((slot, target));
        consumed[target] = true;
    }

    let mut instances: Vec<ScmoInstance> = Vec::with_capacity(instance_count);
    for (index, &class_index) in class_of.iter().enumerate() {
        let mut chunk = Chunk::from_bytes(
            r.block()?,
            INSTANCE_MAGIC,
            INSTANCE_MAIN_SIZE,
            config.stream_reserve,
            config.ext_ref_growth,
        )?;
        if let Err(e) = wire(&mut chunk, &refs[index], &instances) {
            chunk.forget_ext_refs();
            return Err(e);
        }
        let class = match class_index {
            NO_CLASS => ScmoClass::empty(
                chunk.str_field(INST_NAMESPACE).unwrap_or(""),
                chunk.str_field(INST_CLASS_NAME).unwrap_or(""),
            )?,
            i => classes.get(i as usize).cloned().ok_or_else(|| {
                ScmoError::invalid_chunk(format!("instance {} names missing class {}", index, i))
            })?,
        };
        trace!(index, class = %class.class_name(), bytes = chunk.start_of_free(), "read instance");
        instances.push(ScmoInstance::from_parts(class, chunk, &config)?);
    }
    r.finish()?;

    let roots: Vec<ScmoInstance> = instances
        .into_iter()
        .zip(consumed)
        .filter_map(|(instance, consumed)| (!consumed).then_some(instance))
        .collect();
    debug!(
        instances = instance_count,
        roots = roots.len(),
        classes = class_count,
        "deserialized instances"
    );
    Ok(roots)
}

fn wire(chunk: &mut Chunk, refs: &[(usize, usize)], done: &[ScmoInstance]) -> Result<()> {
    for &(slot, target) in refs {
        let instance = done
            .get(target)
            .ok_or_else(|| ScmoError::invalid_chunk(format!("unknown instance {}", target)))?;
        chunk.put_ext_ref(slot, instance.clone())?;
    }
    if !chunk.ext_refs_resolved() {
        return Err(ScmoError::invalid_chunk("unresolved external reference"));
    }
    Ok(())
}
