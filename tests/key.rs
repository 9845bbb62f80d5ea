use anyhow::Result;
use rand::Rng;

use vulkan_rhi::{
    get_key_bits, key_field_table, set_key_bits, KeyFields, PipelineStateKey, RenderTargetKeyFields, KEY_WORD1_BIT,
    MAX_SIMULTANEOUS_RENDER_TARGETS,
};

fn mask(width: u32) -> u64 {
    (1u64 << width) - 1
}

#[test]
pub fn layout_self_check_passes() -> Result<()> {
    PipelineStateKey::verify_layout()
}

#[test]
pub fn fields_do_not_overlap() {
    let mut used = [0u64; 2];
    for (name, offset, width) in key_field_table() {
        let word = if offset & KEY_WORD1_BIT != 0 { 1 } else { 0 };
        let bit = offset & !KEY_WORD1_BIT;
        assert!(bit + width <= 64, "Field {name} crosses a word boundary.");
        let bits = mask(width) << bit;
        assert_eq!(used[word] & bits, 0, "Field {name} overlaps another field.");
        used[word] |= bits;
    }
}

#[test]
pub fn set_key_bits_reads_back_and_is_isolated() {
    let table = key_field_table();
    let mut rng = rand::thread_rng();
    for _ in 0..10_000 {
        let (name, offset, width) = &table[rng.gen_range(0..table.len())];
        let before = [rng.gen::<u64>(), rng.gen::<u64>()];
        let value = rng.gen::<u64>();

        let mut key = before;
        set_key_bits(&mut key, *offset, *width, value);
        assert_eq!(get_key_bits(&key, *offset, *width), value & mask(*width), "Field {name} did not read back.");

        // Everything outside the field is untouched.
        let mut expected = before;
        set_key_bits(&mut expected, *offset, *width, 0);
        let mut actual = key;
        set_key_bits(&mut actual, *offset, *width, 0);
        assert_eq!(expected, actual, "Writing {name} changed bits outside of it.");
    }
}

fn random_fields(rng: &mut impl Rng) -> KeyFields {
    let max = KeyFields::max();
    let mut pick = |max: u8| rng.gen_range(0..=max);
    let mut render_targets = [RenderTargetKeyFields::default(); MAX_SIMULTANEOUS_RENDER_TARGETS];
    for (rt, max_rt) in render_targets.iter_mut().zip(max.render_targets.iter()) {
        rt.blend = pick(max_rt.blend);
        rt.format = pick(max_rt.format);
        rt.load = pick(max_rt.load);
        rt.store = pick(max_rt.store);
    }
    KeyFields {
        render_targets,
        cull_mode: pick(max.cull_mode),
        polygon_fill: pick(max.polygon_fill),
        topology: pick(max.topology),
        depth_bias: pick(1) == 1,
        depth_test: pick(1) == 1,
        depth_write: pick(1) == 1,
        depth_op: pick(max.depth_op),
        front_stencil_op: pick(max.front_stencil_op),
        back_stencil_op: pick(max.back_stencil_op),
        stencil_test: pick(1) == 1,
        msaa: pick(1) == 1,
    }
}

#[test]
pub fn named_fields_agree_with_offset_tables() {
    let mut rng = rand::thread_rng();
    for _ in 0..1_000 {
        let fields = random_fields(&mut rng);
        let mut key = PipelineStateKey::default();
        fields.apply(&mut key);
        assert_eq!(key.words(), fields.pack());
        assert_eq!(KeyFields::read(&key), fields);
        assert_eq!(PipelineStateKey::from_words(fields.pack()), key);
    }
}

#[test]
pub fn clear_zeroes_both_words() {
    let mut key = PipelineStateKey::from_words([u64::MAX, u64::MAX]);
    key.clear();
    assert_eq!(key, PipelineStateKey::default());
    assert_eq!(key.words(), [0, 0]);
}
