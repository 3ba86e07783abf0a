// scmo_core/src/memory/chunk.rs

use std::fmt;

use tracing::{debug, trace};

use crate::error::{Result, ScmoError};
use crate::instance::ScmoInstance;
use crate::memory::layout::*;

/// A self-relative pointer into a chunk. `start == 0` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DataPtr {
    pub start: u64,
    pub size: u32,
}

impl DataPtr {
    pub const NULL: DataPtr = DataPtr { start: 0, size: 0 };

    pub fn is_null(&self) -> bool {
        self.start == 0
    }
}

/// One contiguous, growable memory block holding a class or an instance.
///
/// Everything inside `bytes` is addressed by offset so the block can move
/// (grow, be copied, be streamed) without fixups. Embedded sub-instances
/// cannot live inside the block; they are kept in `ext_refs` and the cell
/// holding one records its slot there. The offsets of those cells are kept
/// in the ext-ref index array inside the block so the release pass can walk
/// them independently of drop order.
#[derive(Clone)]
pub struct Chunk {
    bytes: Vec<u8>,
    ext_refs: Vec<Option<ScmoInstance>>,
    ext_ref_growth: u32,
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("magic", &format_args!("{:#010x}", self.magic()))
            .field("total_size", &self.total_size())
            .field("start_of_free", &self.start_of_free())
            .field("number_ext_ref", &self.ext_ref_count())
            .finish()
    }
}

impl Chunk {
    /// Creates a zeroed chunk whose first `main_size` bytes are reserved for
    /// the main structure.
    pub fn new(magic: u32, main_size: usize, initial_size: usize, ext_ref_growth: u32) -> Self {
        let total = align_up(initial_size.max(main_size + ALIGN));
        let mut chunk = Chunk {
            bytes: vec![0; total],
            ext_refs: Vec::new(),
            ext_ref_growth: ext_ref_growth.max(1),
        };
        chunk.write_u32(HDR_MAGIC, magic);
        chunk.write_u64(HDR_TOTAL_SIZE, total as u64);
        chunk.write_u64(HDR_FREE_BYTES, (total - main_size) as u64);
        chunk.write_u64(HDR_START_OF_FREE, main_size as u64);
        chunk
    }

    /// Adopts the used region of a chunk produced by [`Chunk::used_bytes`].
    ///
    /// The magic and the header bookkeeping are validated before anything
    /// else is dereferenced. External reference slots come back empty and
    /// must be filled through [`Chunk::put_ext_ref`].
    pub fn from_bytes(
        bytes: &[u8],
        magic: u32,
        main_size: usize,
        reserve: usize,
        ext_ref_growth: u32,
    ) -> Result<Self> {
        if bytes.len() < main_size {
            return Err(ScmoError::invalid_chunk(format!(
                "{} bytes is smaller than the {} byte main structure",
                bytes.len(),
                main_size
            )));
        }
        let found = u32::from_le_bytes(read_array(bytes, HDR_MAGIC));
        if found != magic {
            return Err(ScmoError::invalid_chunk(format!(
                "bad magic {:#010x}, expected {:#010x}",
                found, magic
            )));
        }
        let used = u64::from_le_bytes(read_array(bytes, HDR_START_OF_FREE)) as usize;
        if used != bytes.len() {
            return Err(ScmoError::invalid_chunk(format!(
                "used size {} does not match {} supplied bytes",
                used,
                bytes.len()
            )));
        }

        let reserve = align_up(reserve);
        let total = used + reserve;
        let mut data = Vec::with_capacity(total);
        data.extend_from_slice(bytes);
        data.resize(total, 0);

        let mut chunk = Chunk {
            bytes: data,
            ext_refs: Vec::new(),
            ext_ref_growth: ext_ref_growth.max(1),
        };
        chunk.write_u64(HDR_TOTAL_SIZE, total as u64);
        chunk.write_u64(HDR_FREE_BYTES, reserve as u64);

        let slots = match chunk.ext_ref_slots(main_size, used) {
            Ok(slots) => slots,
            Err(e) => {
                chunk.forget_ext_refs();
                return Err(e);
            }
        };
        chunk.ext_refs = vec![None; slots];
        Ok(chunk)
    }

    /// Validates the external reference index of a chunk read from bytes
    /// and returns how many slots it uses.
    fn ext_ref_slots(&self, main_size: usize, used: usize) -> Result<usize> {
        let index = self.read_ptr(HDR_EXT_REF_INDEX);
        let count = self.ext_ref_count();
        let capacity = self.read_u32(HDR_SIZE_EXT_REF_INDEX) as usize;
        if count > capacity {
            return Err(ScmoError::invalid_chunk("external reference count exceeds index array"));
        }
        if capacity > 0 {
            self.check_ptr(index, capacity * 8)?;
        }
        let mut taken = vec![false; capacity];
        for i in 0..count {
            let cell = self.ext_ref_offset(i);
            if cell < main_size || cell.checked_add(UNION_SIZE).map_or(true, |end| end > used) {
                return Err(ScmoError::invalid_chunk(format!(
                    "external reference {} points outside the chunk",
                    i
                )));
            }
            let slot = self.read_u32(cell) as usize;
            match taken.get_mut(slot) {
                Some(seen) if !*seen => *seen = true,
                _ => {
                    return Err(ScmoError::invalid_chunk(format!(
                        "external reference {} has bad slot {}",
                        i, slot
                    )))
                }
            }
        }
        Ok(taken.iter().rposition(|&t| t).map_or(0, |last| last + 1))
    }

    // === Header ===

    pub fn magic(&self) -> u32 {
        self.read_u32(HDR_MAGIC)
    }

    pub fn total_size(&self) -> usize {
        self.read_u64(HDR_TOTAL_SIZE) as usize
    }

    pub fn free_bytes(&self) -> usize {
        self.read_u64(HDR_FREE_BYTES) as usize
    }

    pub fn start_of_free(&self) -> usize {
        self.read_u64(HDR_START_OF_FREE) as usize
    }

    /// The region holding data, which is what streaming writes out.
    pub fn used_bytes(&self) -> &[u8] {
        &self.bytes[..self.start_of_free()]
    }

    // === Allocation ===

    /// Reserves `size` zeroed bytes and returns a pointer to them.
    ///
    /// Growing the chunk moves its base, so no slice taken before this call
    /// may be used after it. Offsets stay valid.
    pub fn alloc(&mut self, size: usize) -> Result<DataPtr> {
        if size == 0 {
            return Ok(DataPtr::NULL);
        }
        if size > u32::MAX as usize {
            return Err(ScmoError::invalid_parameter(
                "size",
                format!("{} bytes exceeds a single allocation", size),
            ));
        }
        let needed = align_up(size);
        let start = self.start_of_free();
        if self.free_bytes() < needed {
            self.grow(start + needed);
        }
        self.bytes[start..start + needed].fill(0);
        self.write_u64(HDR_START_OF_FREE, (start + needed) as u64);
        let free = self.free_bytes() - needed;
        self.write_u64(HDR_FREE_BYTES, free as u64);
        debug_assert_eq!(self.start_of_free() + self.free_bytes(), self.total_size());
        Ok(DataPtr {
            start: start as u64,
            size: size as u32,
        })
    }

    fn grow(&mut self, min_total: usize) {
        let old_total = self.total_size();
        let mut total = old_total.max(ALIGN) * 2;
        while total < min_total {
            total *= 2;
        }
        debug!(old_total, new_total = total, "growing chunk");
        self.bytes.resize(total, 0);
        let free = total - self.start_of_free();
        self.write_u64(HDR_TOTAL_SIZE, total as u64);
        self.write_u64(HDR_FREE_BYTES, free as u64);
    }

    /// Appends a string plus a trailing NUL. The returned size excludes the
    /// NUL. An empty string still gets storage so it stays distinct from null.
    pub fn append_str(&mut self, s: &str) -> Result<DataPtr> {
        let ptr = self.alloc(s.len() + 1)?;
        let start = ptr.start as usize;
        self.bytes[start..start + s.len()].copy_from_slice(s.as_bytes());
        self.bytes[start + s.len()] = 0;
        Ok(DataPtr {
            start: ptr.start,
            size: s.len() as u32,
        })
    }

    /// Appends a string and stores the pointer at `at`.
    pub fn set_str(&mut self, at: usize, s: &str) -> Result<()> {
        let ptr = self.append_str(s)?;
        self.write_ptr(at, ptr);
        Ok(())
    }

    // === Resolution ===

    pub fn resolve(&self, ptr: DataPtr) -> Option<&[u8]> {
        if ptr.is_null() {
            return None;
        }
        let start = usize::try_from(ptr.start).ok()?;
        self.bytes.get(start..start.checked_add(ptr.size as usize)?)
    }

    pub fn str_at(&self, ptr: DataPtr) -> Option<&str> {
        self.resolve(ptr).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Reads the pointer stored at `at` and resolves it as a string.
    pub fn str_field(&self, at: usize) -> Option<&str> {
        self.str_at(self.read_ptr(at))
    }

    pub(crate) fn check_ptr(&self, ptr: DataPtr, len: usize) -> Result<()> {
        let end = usize::try_from(ptr.start)
            .ok()
            .and_then(|start| start.checked_add(len));
        match end {
            Some(end) if !ptr.is_null() && end <= self.start_of_free() => Ok(()),
            _ => Err(ScmoError::invalid_chunk(format!(
                "pointer {}+{} outside used region {}",
                ptr.start,
                len,
                self.start_of_free()
            ))),
        }
    }

    // === Primitive access ===

    pub fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(read_array(&self.bytes, at))
    }

    pub fn write_u32(&mut self, at: usize, v: u32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn read_u64(&self, at: usize) -> u64 {
        u64::from_le_bytes(read_array(&self.bytes, at))
    }

    pub fn write_u64(&mut self, at: usize, v: u64) {
        self.bytes[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn read_ptr(&self, at: usize) -> DataPtr {
        DataPtr {
            start: self.read_u64(at + PTR_START),
            size: self.read_u32(at + PTR_SIZE_FIELD),
        }
    }

    pub fn write_ptr(&mut self, at: usize, ptr: DataPtr) {
        self.write_u64(at + PTR_START, ptr.start);
        self.write_u32(at + PTR_SIZE_FIELD, ptr.size);
    }

    pub fn copy_within(&mut self, from: usize, to: usize, len: usize) {
        self.bytes.copy_within(from..from + len, to);
    }

    // === External references ===

    pub fn ext_ref_count(&self) -> usize {
        self.read_u32(HDR_NUMBER_EXT_REF) as usize
    }

    /// Offset of the value union holding the i-th external reference.
    pub fn ext_ref_offset(&self, i: usize) -> usize {
        let index = self.read_ptr(HDR_EXT_REF_INDEX);
        self.read_u64(index.start as usize + i * 8) as usize
    }

    /// The sub-instance referenced by the union at `union_at`.
    pub fn ext_ref_at(&self, union_at: usize) -> Option<&ScmoInstance> {
        let slot = self.read_u32(union_at) as usize;
        self.ext_refs.get(slot).and_then(|r| r.as_ref())
    }

    /// Stores `instance` in the first free slot, records the slot at
    /// `union_at` and registers `union_at` in the index array.
    pub fn add_ext_ref(&mut self, union_at: usize, instance: ScmoInstance) -> Result<()> {
        let slot = match self.ext_refs.iter().position(Option::is_none) {
            Some(free) => {
                self.ext_refs[free] = Some(instance);
                free
            }
            None => {
                self.ext_refs.push(Some(instance));
                self.ext_refs.len() - 1
            }
        };
        self.write_u32(union_at, slot as u32);

        let count = self.ext_ref_count();
        for i in 0..count {
            if self.ext_ref_offset(i) == union_at {
                return Ok(());
            }
        }
        let capacity = self.read_u32(HDR_SIZE_EXT_REF_INDEX) as usize;
        if count == capacity {
            let new_capacity = capacity + self.ext_ref_growth as usize;
            let fresh = self.alloc(new_capacity * 8)?;
            let old = self.read_ptr(HDR_EXT_REF_INDEX);
            if count > 0 {
                self.copy_within(old.start as usize, fresh.start as usize, count * 8);
            }
            self.write_ptr(HDR_EXT_REF_INDEX, fresh);
            self.write_u32(HDR_SIZE_EXT_REF_INDEX, new_capacity as u32);
            trace!(capacity = new_capacity, "grew external reference index");
        }
        let index = self.read_ptr(HDR_EXT_REF_INDEX);
        self.write_u64(index.start as usize + count * 8, union_at as u64);
        self.write_u32(HDR_NUMBER_EXT_REF, (count + 1) as u32);
        Ok(())
    }

    /// Releases the reference held by the union at `union_at`, if any, and
    /// unregisters it from the index array.
    pub fn remove_ext_ref(&mut self, union_at: usize) {
        let count = self.ext_ref_count();
        let Some(pos) = (0..count).find(|&i| self.ext_ref_offset(i) == union_at) else {
            return;
        };
        let slot = self.read_u32(union_at) as usize;
        if let Some(entry) = self.ext_refs.get_mut(slot) {
            entry.take();
        }
        let index = self.read_ptr(HDR_EXT_REF_INDEX).start as usize;
        if pos + 1 < count {
            self.copy_within(index + (pos + 1) * 8, index + pos * 8, (count - pos - 1) * 8);
        }
        self.write_u32(HDR_NUMBER_EXT_REF, (count - 1) as u32);
    }

    /// Fills a slot of a chunk read back with [`Chunk::from_bytes`].
    pub fn put_ext_ref(&mut self, slot: usize, instance: ScmoInstance) -> Result<()> {
        match self.ext_refs.get_mut(slot) {
            Some(entry) => {
                *entry = Some(instance);
                Ok(())
            }
            None => Err(ScmoError::invalid_chunk(format!(
                "external reference slot {} is not used by this chunk",
                slot
            ))),
        }
    }

    /// True when every registered reference has its sub-instance attached.
    pub fn ext_refs_resolved(&self) -> bool {
        (0..self.ext_ref_count()).all(|i| self.ext_ref_at(self.ext_ref_offset(i)).is_some())
    }

    /// Forgets the registered references without touching the slots. Used
    /// when a chunk read back from a stream is abandoned half wired.
    pub(crate) fn forget_ext_refs(&mut self) {
        self.write_u32(HDR_NUMBER_EXT_REF, 0);
    }

    /// Walks the index array and releases every referenced sub-instance
    /// exactly once. Running it again is a no-op.
    pub fn release_ext_refs(&mut self) {
        let count = self.ext_ref_count();
        if count == 0 {
            return;
        }
        for i in 0..count {
            let slot = self.read_u32(self.ext_ref_offset(i)) as usize;
            let released = self.ext_refs.get_mut(slot).and_then(|r| r.take());
            debug_assert!(
                released.is_some(),
                "external reference slot {} released twice",
                slot
            );
        }
        self.write_u32(HDR_NUMBER_EXT_REF, 0);
        trace!(count, "released external references");
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        self.release_ext_refs();
    }
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk::new(INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 256, 8)
    }

    #[test]
    fn header_tracks_free_space() {
        let mut c = chunk();
        assert_eq!(c.magic(), INSTANCE_MAGIC);
        assert_eq!(c.start_of_free(), INSTANCE_MAIN_SIZE);
        assert_eq!(c.start_of_free() + c.free_bytes(), c.total_size());

        let p = c.alloc(13).unwrap();
        assert_eq!(p.start as usize, INSTANCE_MAIN_SIZE);
        assert_eq!(p.size, 13);
        assert_eq!(c.start_of_free(), INSTANCE_MAIN_SIZE + 16);
        assert_eq!(c.start_of_free() + c.free_bytes(), c.total_size());
        assert!(c.alloc(0).unwrap().is_null());
    }

    #[test]
    fn strings_keep_terminator_and_empty_is_not_null() {
        let mut c = chunk();
        let p = c.append_str("abc").unwrap();
        assert_eq!(p.size, 3);
        assert_eq!(c.str_at(p), Some("abc"));
        assert_eq!(c.bytes[p.start as usize + 3], 0);

        let e = c.append_str("").unwrap();
        assert!(!e.is_null());
        assert_eq!(c.str_at(e), Some(""));
        assert_eq!(c.str_at(DataPtr::NULL), None);
    }

    #[test]
    fn pointers_survive_growth() {
        let mut c = chunk();
        let names: Vec<String> = (0..8).map(|i| format!("value-{}", i)).collect();
        let ptrs: Vec<DataPtr> = names.iter().map(|n| c.append_str(n).unwrap()).collect();
        let before = c.total_size();

        c.alloc(before * 3).unwrap();

        assert!(c.total_size() > before);
        assert_eq!(c.start_of_free() + c.free_bytes(), c.total_size());
        for (name, ptr) in names.iter().zip(&ptrs) {
            assert_eq!(c.str_at(*ptr), Some(name.as_str()));
        }
    }

    #[test]
    fn used_bytes_round_trip() {
        let mut c = chunk();
        c.set_str(INST_HOST_NAME, "host").unwrap();
        let bytes = c.used_bytes().to_vec();

        let back = Chunk::from_bytes(&bytes, INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 64, 8).unwrap();
        assert_eq!(back.str_field(INST_HOST_NAME), Some("host"));
        assert_eq!(back.free_bytes(), 64);
        assert_eq!(back.start_of_free() + back.free_bytes(), back.total_size());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let c = chunk();
        let bytes = c.used_bytes().to_vec();
        let err = Chunk::from_bytes(&bytes, CLASS_MAGIC, INSTANCE_MAIN_SIZE, 0, 8).unwrap_err();
        assert!(matches!(err, ScmoError::InvalidChunk { .. }));

        let err = Chunk::from_bytes(&bytes[..10], INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 0, 8)
            .unwrap_err();
        assert!(matches!(err, ScmoError::InvalidChunk { .. }));
    }

    fn sub() -> ScmoInstance {
        let class = crate::class::ScmoClass::empty("root/test", "Sub").unwrap();
        ScmoInstance::new(&class).unwrap()
    }

    fn unions(c: &mut Chunk, n: usize) -> Vec<usize> {
        let run = c.alloc(n * UNION_SIZE).unwrap();
        (0..n).map(|i| run.start as usize + i * UNION_SIZE).collect()
    }

    #[test]
    fn ext_ref_index_grows_and_shrinks() {
        let mut c = Chunk::new(INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 256, 2);
        let s = sub();
        let at = unions(&mut c, 5);
        for u in &at {
            c.add_ext_ref(*u, s.clone()).unwrap();
        }
        assert_eq!(c.ext_ref_count(), 5);
        assert_eq!(c.read_u32(HDR_SIZE_EXT_REF_INDEX), 6);
        assert_eq!(s.ref_count(), 6);

        c.remove_ext_ref(at[1]);
        c.remove_ext_ref(at[1]);
        assert_eq!(c.ext_ref_count(), 4);
        assert_eq!(s.ref_count(), 5);
        let offsets: Vec<usize> = (0..4).map(|i| c.ext_ref_offset(i)).collect();
        assert_eq!(offsets, vec![at[0], at[2], at[3], at[4]]);

        c.release_ext_refs();
        c.release_ext_refs();
        assert_eq!(s.ref_count(), 1);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut c = chunk();
        let at = unions(&mut c, 2);
        for _ in 0..4 {
            c.add_ext_ref(at[0], sub()).unwrap();
            c.remove_ext_ref(at[0]);
        }
        c.add_ext_ref(at[0], sub()).unwrap();
        c.add_ext_ref(at[1], sub()).unwrap();
        assert_eq!(c.ext_refs.len(), 2);
        assert_eq!(c.read_u32(at[0]), 0);
        assert_eq!(c.read_u32(at[1]), 1);
    }

    #[test]
    fn pointer_checks_do_not_overflow() {
        let c = chunk();
        let huge = DataPtr {
            start: u64::MAX,
            size: 8,
        };
        assert!(c.check_ptr(huge, 8).is_err());
        let near_end = DataPtr {
            start: 8,
            size: 8,
        };
        assert!(c.check_ptr(near_end, usize::MAX).is_err());
        assert!(c.check_ptr(near_end, 8).is_ok());
        assert!(c.check_ptr(DataPtr::NULL, 0).is_err());
    }

    #[test]
    fn clone_takes_a_reference_per_slot() {
        let mut c = chunk();
        let s = sub();
        let at = unions(&mut c, 1);
        c.add_ext_ref(at[0], s.clone()).unwrap();
        let copy = c.clone();
        assert_eq!(s.ref_count(), 3);
        drop(c);
        assert_eq!(s.ref_count(), 2);
        assert!(copy.ext_ref_at(at[0]).unwrap().is_same(&s));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released twice")]
    fn underflow_is_caught() {
        let mut c = std::mem::ManuallyDrop::new(chunk());
        let at = unions(&mut c, 1);
        c.add_ext_ref(at[0], sub()).unwrap();
        c.ext_refs[0].take();
        c.release_ext_refs();
    }

    #[test]
    fn corrupt_ext_ref_index_is_rejected() {
        let mut c = chunk();
        let at = unions(&mut c, 1);
        c.add_ext_ref(at[0], sub()).unwrap();
        let mut bytes = c.used_bytes().to_vec();
        let index = c.read_ptr(HDR_EXT_REF_INDEX).start as usize;
        bytes[index..index + 8].copy_from_slice(&8u64.to_le_bytes());

        let err = Chunk::from_bytes(&bytes, INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 0, 8).unwrap_err();
        assert!(matches!(err, ScmoError::InvalidChunk { .. }));

        let good = c.used_bytes().to_vec();
        let mut back = Chunk::from_bytes(&good, INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 0, 8).unwrap();
        assert!(!back.ext_refs_resolved());
        back.put_ext_ref(0, sub()).unwrap();
        assert!(back.ext_refs_resolved());
        assert!(back.put_ext_ref(1, sub()).is_err());

        let mut two = chunk();
        let at = unions(&mut two, 2);
        two.add_ext_ref(at[0], sub()).unwrap();
        two.add_ext_ref(at[1], sub()).unwrap();
        let mut bytes = two.used_bytes().to_vec();
        bytes[at[1]..at[1] + 4].copy_from_slice(&0u32.to_le_bytes());
        let err = Chunk::from_bytes(&bytes, INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 0, 8).unwrap_err();
        assert!(matches!(err, ScmoError::InvalidChunk { .. }));
        bytes[at[1]..at[1] + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Chunk::from_bytes(&bytes, INSTANCE_MAGIC, INSTANCE_MAIN_SIZE, 0, 8).unwrap_err();
        assert!(matches!(err, ScmoError::InvalidChunk { .. }));
    }
}
