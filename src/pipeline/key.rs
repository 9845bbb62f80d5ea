//! Packed 128-bit description of all fixed function state that takes part in graphics pipeline identity.
//!
//! The key is stored as two 64-bit words. Every field is addressed by a bit offset and a bit width. Offsets with
//! [`KEY_WORD1_BIT`] set address the second word. Render targets 0 to 3 live in the first word, render targets
//! 4 to 7 in the second one.
//!
//! | Word | Bits | Field |
//! |------|------|-------|
//! | 0 | `12 * i + 0..4` | blend state id of render target `i` |
//! | 0 | `12 * i + 4..8` | format id of render target `i` |
//! | 0 | `12 * i + 8..10` | load op of render target `i` |
//! | 0 | `12 * i + 10..12` | store op of render target `i` |
//! | 0 | `48..50` | cull mode |
//! | 0 | `50` | polygon fill mode |
//! | 0 | `51..54` | primitive topology |
//! | 0 | `54` | depth bias enabled |
//! | 0 | `55` | depth test enabled |
//! | 0 | `56` | depth write enabled |
//! | 0 | `57..60` | depth compare op |
//! | 1 | `12 * (i - 4) + ..` | render targets 4 to 7, same layout as above |
//! | 1 | `48..52` | front stencil op id |
//! | 1 | `52..56` | back stencil op id |
//! | 1 | `56` | stencil test enabled |
//! | 1 | `57` | MSAA enabled |

use anyhow::Result;

use crate::Error;

/// Maximum number of color render targets bound at the same time.
pub const MAX_SIMULTANEOUS_RENDER_TARGETS: usize = 8;

/// Offsets with this bit set select the second key word.
pub const KEY_WORD1_BIT: u32 = 0x8000;

pub const BLEND_BIT_WIDTH: u32 = 4;
pub const FORMAT_BIT_WIDTH: u32 = 4;
pub const LOAD_OP_BIT_WIDTH: u32 = 2;
pub const STORE_OP_BIT_WIDTH: u32 = 2;
pub const CULL_MODE_BIT_WIDTH: u32 = 2;
pub const POLYGON_FILL_BIT_WIDTH: u32 = 1;
pub const TOPOLOGY_BIT_WIDTH: u32 = 3;
pub const DEPTH_BIAS_BIT_WIDTH: u32 = 1;
pub const DEPTH_TEST_BIT_WIDTH: u32 = 1;
pub const DEPTH_WRITE_BIT_WIDTH: u32 = 1;
pub const DEPTH_OP_BIT_WIDTH: u32 = 3;
pub const STENCIL_OP_BIT_WIDTH: u32 = 4;
pub const STENCIL_TEST_BIT_WIDTH: u32 = 1;
pub const MSAA_BIT_WIDTH: u32 = 1;

const RT_BIT_WIDTH: u32 = BLEND_BIT_WIDTH + FORMAT_BIT_WIDTH + LOAD_OP_BIT_WIDTH + STORE_OP_BIT_WIDTH;
const RT_PER_WORD: u32 = 4;

const fn rt_offsets(field: u32) -> [u32; MAX_SIMULTANEOUS_RENDER_TARGETS] {
    let mut offsets = [0; MAX_SIMULTANEOUS_RENDER_TARGETS];
    let mut i = 0;
    while i < MAX_SIMULTANEOUS_RENDER_TARGETS {
        let slot = i as u32 % RT_PER_WORD;
        let word = if i as u32 >= RT_PER_WORD { KEY_WORD1_BIT } else { 0 };
        offsets[i] = word | (slot * RT_BIT_WIDTH + field);
        i += 1;
    }
    offsets
}

pub const RT_BLEND_BIT_OFFSETS: [u32; MAX_SIMULTANEOUS_RENDER_TARGETS] = rt_offsets(0);
pub const RT_FORMAT_BIT_OFFSETS: [u32; MAX_SIMULTANEOUS_RENDER_TARGETS] = rt_offsets(BLEND_BIT_WIDTH);
pub const RT_LOAD_BIT_OFFSETS: [u32; MAX_SIMULTANEOUS_RENDER_TARGETS] = rt_offsets(BLEND_BIT_WIDTH + FORMAT_BIT_WIDTH);
pub const RT_STORE_BIT_OFFSETS: [u32; MAX_SIMULTANEOUS_RENDER_TARGETS] =
    rt_offsets(BLEND_BIT_WIDTH + FORMAT_BIT_WIDTH + LOAD_OP_BIT_WIDTH);

const RT_END: u32 = RT_PER_WORD * RT_BIT_WIDTH;

pub const CULL_MODE_BIT_OFFSET: u32 = RT_END;
pub const POLYGON_FILL_BIT_OFFSET: u32 = CULL_MODE_BIT_OFFSET + CULL_MODE_BIT_WIDTH;
pub const TOPOLOGY_BIT_OFFSET: u32 = POLYGON_FILL_BIT_OFFSET + POLYGON_FILL_BIT_WIDTH;
pub const DEPTH_BIAS_BIT_OFFSET: u32 = TOPOLOGY_BIT_OFFSET + TOPOLOGY_BIT_WIDTH;
pub const DEPTH_TEST_BIT_OFFSET: u32 = DEPTH_BIAS_BIT_OFFSET + DEPTH_BIAS_BIT_WIDTH;
pub const DEPTH_WRITE_BIT_OFFSET: u32 = DEPTH_TEST_BIT_OFFSET + DEPTH_TEST_BIT_WIDTH;
pub const DEPTH_OP_BIT_OFFSET: u32 = DEPTH_WRITE_BIT_OFFSET + DEPTH_WRITE_BIT_WIDTH;

pub const FRONT_STENCIL_OP_BIT_OFFSET: u32 = KEY_WORD1_BIT | RT_END;
pub const BACK_STENCIL_OP_BIT_OFFSET: u32 = FRONT_STENCIL_OP_BIT_OFFSET + STENCIL_OP_BIT_WIDTH;
pub const STENCIL_TEST_BIT_OFFSET: u32 = BACK_STENCIL_OP_BIT_OFFSET + STENCIL_OP_BIT_WIDTH;
pub const MSAA_BIT_OFFSET: u32 = STENCIL_TEST_BIT_OFFSET + STENCIL_TEST_BIT_WIDTH;

const WORD0_BITS: u32 = RT_END
    + CULL_MODE_BIT_WIDTH
    + POLYGON_FILL_BIT_WIDTH
    + TOPOLOGY_BIT_WIDTH
    + DEPTH_BIAS_BIT_WIDTH
    + DEPTH_TEST_BIT_WIDTH
    + DEPTH_WRITE_BIT_WIDTH
    + DEPTH_OP_BIT_WIDTH;
const WORD1_BITS: u32 = RT_END + 2 * STENCIL_OP_BIT_WIDTH + STENCIL_TEST_BIT_WIDTH + MSAA_BIT_WIDTH;

const_assert!(WORD0_BITS <= 64);
const_assert!(WORD1_BITS <= 64);
const_assert_eq!(DEPTH_OP_BIT_OFFSET + DEPTH_OP_BIT_WIDTH, WORD0_BITS);
const_assert_eq!((MSAA_BIT_OFFSET & !KEY_WORD1_BIT) + MSAA_BIT_WIDTH, WORD1_BITS);

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn locate(offset: u32) -> (usize, u32) {
    if offset & KEY_WORD1_BIT != 0 {
        (1, offset & !KEY_WORD1_BIT)
    } else {
        (0, offset)
    }
}

/// Overwrite `width` bits at `offset` with `value`. Bits of `value` above `width` are discarded, and no other bit
/// of the key is touched.
pub fn set_key_bits(key: &mut [u64; 2], offset: u32, width: u32, value: u64) {
    let (word, bit) = locate(offset);
    debug_assert!(bit + width <= 64, "key field at {offset:#x} with width {width} crosses a word boundary");
    let mask = mask(width) << bit;
    key[word] = (key[word] & !mask) | ((value << bit) & mask);
}

/// Read `width` bits at `offset`.
pub fn get_key_bits(key: &[u64; 2], offset: u32, width: u32) -> u64 {
    let (word, bit) = locate(offset);
    (key[word] >> bit) & mask(width)
}

/// The packed pipeline state key. Equal keys are assumed to describe equal pipeline state.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineStateKey {
    words: [u64; 2],
}

impl PipelineStateKey {
    pub const fn from_words(words: [u64; 2]) -> Self {
        Self {
            words,
        }
    }

    pub fn words(&self) -> [u64; 2] {
        self.words
    }

    pub fn set_bits(&mut self, offset: u32, width: u32, value: u64) {
        set_key_bits(&mut self.words, offset, width, value);
    }

    pub fn get_bits(&self, offset: u32, width: u32) -> u64 {
        get_key_bits(&self.words, offset, width)
    }

    pub fn set_bool(&mut self, offset: u32, value: bool) {
        self.set_bits(offset, 1, value as u64);
    }

    /// Zero both words.
    pub fn clear(&mut self) {
        self.words = [0; 2];
    }

    /// Check that the offset tables agree with the sequential [`KeyFields`] layout, for a set of field patterns
    /// that makes any misplaced or overlapping field visible.
    pub fn verify_layout() -> Result<()> {
        let patterns = [KeyFields::max(), KeyFields::alternating(false), KeyFields::alternating(true), KeyFields::counting()];
        for fields in patterns {
            let mut key = PipelineStateKey::default();
            fields.apply(&mut key);
            if key.words != fields.pack() || KeyFields::read(&key) != fields {
                error!("Pipeline key layout mismatch for {fields:?}: tables give {:x?}, named layout gives {:x?}", key.words, fields.pack());
                return Err(Error::Uncategorized("pipeline key offset tables disagree with the named field layout").into());
            }
        }
        Ok(())
    }
}

/// Key fields of a single render target.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RenderTargetKeyFields {
    pub blend: u8,
    pub format: u8,
    pub load: u8,
    pub store: u8,
}

/// Named-field view of a [`PipelineStateKey`]. [`KeyFields::pack()`] lays the fields out sequentially in
/// declaration order without looking at the offset tables, which makes it a reference for the tables.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KeyFields {
    pub render_targets: [RenderTargetKeyFields; MAX_SIMULTANEOUS_RENDER_TARGETS],
    pub cull_mode: u8,
    pub polygon_fill: u8,
    pub topology: u8,
    pub depth_bias: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_op: u8,
    pub front_stencil_op: u8,
    pub back_stencil_op: u8,
    pub stencil_test: bool,
    pub msaa: bool,
}

#[derive(Default)]
struct BitPacker {
    words: [u64; 2],
    word: usize,
    bit: u32,
}

impl BitPacker {
    fn push(&mut self, value: u64, width: u32) {
        self.words[self.word] |= (value & mask(width)) << self.bit;
        self.bit += width;
    }

    fn next_word(&mut self) {
        self.word += 1;
        self.bit = 0;
    }
}

impl KeyFields {
    /// Every field at its maximum value.
    pub fn max() -> Self {
        let rt = RenderTargetKeyFields {
            blend: mask(BLEND_BIT_WIDTH) as u8,
            format: mask(FORMAT_BIT_WIDTH) as u8,
            load: mask(LOAD_OP_BIT_WIDTH) as u8,
            store: mask(STORE_OP_BIT_WIDTH) as u8,
        };
        Self {
            render_targets: [rt; MAX_SIMULTANEOUS_RENDER_TARGETS],
            cull_mode: mask(CULL_MODE_BIT_WIDTH) as u8,
            polygon_fill: mask(POLYGON_FILL_BIT_WIDTH) as u8,
            topology: mask(TOPOLOGY_BIT_WIDTH) as u8,
            depth_bias: true,
            depth_test: true,
            depth_write: true,
            depth_op: mask(DEPTH_OP_BIT_WIDTH) as u8,
            front_stencil_op: mask(STENCIL_OP_BIT_WIDTH) as u8,
            back_stencil_op: mask(STENCIL_OP_BIT_WIDTH) as u8,
            stencil_test: true,
            msaa: true,
        }
    }

    /// Every other field at its maximum value, the rest zero.
    fn alternating(odd: bool) -> Self {
        let max = Self::max();
        let pick = |index: usize| (index % 2 == 1) == odd;
        let mut fields = Self::default();
        for (i, rt) in fields.render_targets.iter_mut().enumerate() {
            let full = &max.render_targets[i];
            let base = i * 4;
            rt.blend = if pick(base) { full.blend } else { 0 };
            rt.format = if pick(base + 1) { full.format } else { 0 };
            rt.load = if pick(base + 2) { full.load } else { 0 };
            rt.store = if pick(base + 3) { full.store } else { 0 };
        }
        fields.cull_mode = if pick(0) { max.cull_mode } else { 0 };
        fields.polygon_fill = if pick(1) { max.polygon_fill } else { 0 };
        fields.topology = if pick(0) { max.topology } else { 0 };
        fields.depth_bias = pick(1);
        fields.depth_test = pick(0);
        fields.depth_write = pick(1);
        fields.depth_op = if pick(0) { max.depth_op } else { 0 };
        fields.front_stencil_op = if pick(1) { max.front_stencil_op } else { 0 };
        fields.back_stencil_op = if pick(0) { max.back_stencil_op } else { 0 };
        fields.stencil_test = pick(1);
        fields.msaa = pick(0);
        fields
    }

    /// Distinct small values in every multi-bit field.
    fn counting() -> Self {
        let mut fields = Self::default();
        for (i, rt) in fields.render_targets.iter_mut().enumerate() {
            rt.blend = (i as u8 + 1) & mask(BLEND_BIT_WIDTH) as u8;
            rt.format = (15 - i as u8) & mask(FORMAT_BIT_WIDTH) as u8;
            rt.load = (i as u8) & mask(LOAD_OP_BIT_WIDTH) as u8;
            rt.store = (i as u8 + 1) & mask(STORE_OP_BIT_WIDTH) as u8;
        }
        fields.cull_mode = 2;
        fields.polygon_fill = 1;
        fields.topology = 5;
        fields.depth_op = 6;
        fields.front_stencil_op = 9;
        fields.back_stencil_op = 6;
        fields.msaa = true;
        fields
    }

    /// Lay out all fields sequentially, render targets 0 to 3 and the depth state in the first word, the remaining
    /// render targets and the stencil state in the second one.
    pub fn pack(&self) -> [u64; 2] {
        let mut packer = BitPacker::default();
        let push_rt = |packer: &mut BitPacker, rt: &RenderTargetKeyFields| {
            packer.push(rt.blend as u64, BLEND_BIT_WIDTH);
            packer.push(rt.format as u64, FORMAT_BIT_WIDTH);
            packer.push(rt.load as u64, LOAD_OP_BIT_WIDTH);
            packer.push(rt.store as u64, STORE_OP_BIT_WIDTH);
        };
        for rt in &self.render_targets[..RT_PER_WORD as usize] {
            push_rt(&mut packer, rt);
        }
        packer.push(self.cull_mode as u64, CULL_MODE_BIT_WIDTH);
        packer.push(self.polygon_fill as u64, POLYGON_FILL_BIT_WIDTH);
        packer.push(self.topology as u64, TOPOLOGY_BIT_WIDTH);
        packer.push(self.depth_bias as u64, DEPTH_BIAS_BIT_WIDTH);
        packer.push(self.depth_test as u64, DEPTH_TEST_BIT_WIDTH);
        packer.push(self.depth_write as u64, DEPTH_WRITE_BIT_WIDTH);
        packer.push(self.depth_op as u64, DEPTH_OP_BIT_WIDTH);
        packer.next_word();
        for rt in &self.render_targets[RT_PER_WORD as usize..] {
            push_rt(&mut packer, rt);
        }
        packer.push(self.front_stencil_op as u64, STENCIL_OP_BIT_WIDTH);
        packer.push(self.back_stencil_op as u64, STENCIL_OP_BIT_WIDTH);
        packer.push(self.stencil_test as u64, STENCIL_TEST_BIT_WIDTH);
        packer.push(self.msaa as u64, MSAA_BIT_WIDTH);
        packer.words
    }

    /// Write every field into `key` through the offset tables.
    pub fn apply(&self, key: &mut PipelineStateKey) {
        for (i, rt) in self.render_targets.iter().enumerate() {
            key.set_bits(RT_BLEND_BIT_OFFSETS[i], BLEND_BIT_WIDTH, rt.blend as u64);
            key.set_bits(RT_FORMAT_BIT_OFFSETS[i], FORMAT_BIT_WIDTH, rt.format as u64);
            key.set_bits(RT_LOAD_BIT_OFFSETS[i], LOAD_OP_BIT_WIDTH, rt.load as u64);
            key.set_bits(RT_STORE_BIT_OFFSETS[i], STORE_OP_BIT_WIDTH, rt.store as u64);
        }
        key.set_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, self.cull_mode as u64);
        key.set_bits(POLYGON_FILL_BIT_OFFSET, POLYGON_FILL_BIT_WIDTH, self.polygon_fill as u64);
        key.set_bits(TOPOLOGY_BIT_OFFSET, TOPOLOGY_BIT_WIDTH, self.topology as u64);
        key.set_bool(DEPTH_BIAS_BIT_OFFSET, self.depth_bias);
        key.set_bool(DEPTH_TEST_BIT_OFFSET, self.depth_test);
        key.set_bool(DEPTH_WRITE_BIT_OFFSET, self.depth_write);
        key.set_bits(DEPTH_OP_BIT_OFFSET, DEPTH_OP_BIT_WIDTH, self.depth_op as u64);
        key.set_bits(FRONT_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH, self.front_stencil_op as u64);
        key.set_bits(BACK_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH, self.back_stencil_op as u64);
        key.set_bool(STENCIL_TEST_BIT_OFFSET, self.stencil_test);
        key.set_bool(MSAA_BIT_OFFSET, self.msaa);
    }

    /// Read every field from `key` through the offset tables.
    pub fn read(key: &PipelineStateKey) -> Self {
        let mut fields = Self::default();
        for (i, rt) in fields.render_targets.iter_mut().enumerate() {
            rt.blend = key.get_bits(RT_BLEND_BIT_OFFSETS[i], BLEND_BIT_WIDTH) as u8;
            rt.format = key.get_bits(RT_FORMAT_BIT_OFFSETS[i], FORMAT_BIT_WIDTH) as u8;
            rt.load = key.get_bits(RT_LOAD_BIT_OFFSETS[i], LOAD_OP_BIT_WIDTH) as u8;
            rt.store = key.get_bits(RT_STORE_BIT_OFFSETS[i], STORE_OP_BIT_WIDTH) as u8;
        }
        fields.cull_mode = key.get_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH) as u8;
        fields.polygon_fill = key.get_bits(POLYGON_FILL_BIT_OFFSET, POLYGON_FILL_BIT_WIDTH) as u8;
        fields.topology = key.get_bits(TOPOLOGY_BIT_OFFSET, TOPOLOGY_BIT_WIDTH) as u8;
        fields.depth_bias = key.get_bits(DEPTH_BIAS_BIT_OFFSET, DEPTH_BIAS_BIT_WIDTH) != 0;
        fields.depth_test = key.get_bits(DEPTH_TEST_BIT_OFFSET, DEPTH_TEST_BIT_WIDTH) != 0;
        fields.depth_write = key.get_bits(DEPTH_WRITE_BIT_OFFSET, DEPTH_WRITE_BIT_WIDTH) != 0;
        fields.depth_op = key.get_bits(DEPTH_OP_BIT_OFFSET, DEPTH_OP_BIT_WIDTH) as u8;
        fields.front_stencil_op = key.get_bits(FRONT_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH) as u8;
        fields.back_stencil_op = key.get_bits(BACK_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH) as u8;
        fields.stencil_test = key.get_bits(STENCIL_TEST_BIT_OFFSET, STENCIL_TEST_BIT_WIDTH) != 0;
        fields.msaa = key.get_bits(MSAA_BIT_OFFSET, MSAA_BIT_WIDTH) != 0;
        fields
    }
}

/// Every field of the key as `(name, offset, width)`, in the order [`KeyFields::pack()`] lays them out.
pub fn key_field_table() -> Vec<(String, u32, u32)> {
    let mut table = Vec::new();
    let push_rt = |table: &mut Vec<(String, u32, u32)>, i: usize| {
        table.push((format!("rt{i}.blend"), RT_BLEND_BIT_OFFSETS[i], BLEND_BIT_WIDTH));
        table.push((format!("rt{i}.format"), RT_FORMAT_BIT_OFFSETS[i], FORMAT_BIT_WIDTH));
        table.push((format!("rt{i}.load"), RT_LOAD_BIT_OFFSETS[i], LOAD_OP_BIT_WIDTH));
        table.push((format!("rt{i}.store"), RT_STORE_BIT_OFFSETS[i], STORE_OP_BIT_WIDTH));
    };
    for i in 0..RT_PER_WORD as usize {
        push_rt(&mut table, i);
    }
    table.extend([
        ("cull_mode".to_string(), CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH),
        ("polygon_fill".to_string(), POLYGON_FILL_BIT_OFFSET, POLYGON_FILL_BIT_WIDTH),
        ("topology".to_string(), TOPOLOGY_BIT_OFFSET, TOPOLOGY_BIT_WIDTH),
        ("depth_bias".to_string(), DEPTH_BIAS_BIT_OFFSET, DEPTH_BIAS_BIT_WIDTH),
        ("depth_test".to_string(), DEPTH_TEST_BIT_OFFSET, DEPTH_TEST_BIT_WIDTH),
        ("depth_write".to_string(), DEPTH_WRITE_BIT_OFFSET, DEPTH_WRITE_BIT_WIDTH),
        ("depth_op".to_string(), DEPTH_OP_BIT_OFFSET, DEPTH_OP_BIT_WIDTH),
    ]);
    for i in RT_PER_WORD as usize..MAX_SIMULTANEOUS_RENDER_TARGETS {
        push_rt(&mut table, i);
    }
    table.extend([
        ("front_stencil_op".to_string(), FRONT_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH),
        ("back_stencil_op".to_string(), BACK_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH),
        ("stencil_test".to_string(), STENCIL_TEST_BIT_OFFSET, STENCIL_TEST_BIT_WIDTH),
        ("msaa".to_string(), MSAA_BIT_OFFSET, MSAA_BIT_WIDTH),
    ]);
    table
}
