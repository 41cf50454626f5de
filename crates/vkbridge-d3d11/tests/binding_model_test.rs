//! Integration test: descriptor binding model
//!
//! Drives descriptor sets through the null backend and checks the native
//! slots, offsets and unbinds that replay produces.
//!
//! Run with: cargo test --test binding_model_test -- --nocapture

use std::sync::Arc;

use ash::vk;
use vkbridge_core::{BridgeConfig, FeatureLevel};
use vkbridge_d3d11::command::{BindDescriptorSet, Replay};
use vkbridge_d3d11::descriptor::{DescriptorBuckets, DescriptorResource, DescriptorWrite, DynamicBufferBinding};
use vkbridge_d3d11::layout::{ClassSlots, ResourceClass, SetLayoutBinding};
use vkbridge_d3d11::native::null::{BoundConstantBuffer, BoundState, NullDevice};
use vkbridge_d3d11::native::NativeStage;
use vkbridge_d3d11::{
    Buffer, CommandBuffer, Context, DescriptorSet, DescriptorSetLayout, Device, PipelineLayout, ReplayError,
};

fn setup(level: FeatureLevel) -> (Arc<NullDevice>, Arc<Device>) {
    let null = NullDevice::new(level);
    let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
    (null, device)
}

fn set_layout(bindings: &[(u32, vk::DescriptorType, u32)]) -> Arc<DescriptorSetLayout> {
    let bindings: Vec<SetLayoutBinding> = bindings
        .iter()
        .map(|&(binding, descriptor_type, count)| SetLayoutBinding {
            binding,
            descriptor_type,
            count,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            immutable_samplers: Vec::new(),
        })
        .collect();
    Arc::new(DescriptorSetLayout::new(&bindings).unwrap())
}

fn uniform(device: &Device, size: u64) -> Arc<Buffer> {
    Buffer::new(device, size, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap()
}

fn buffer_write(binding: u32, element: u32, ty: vk::DescriptorType, buffers: &[(Arc<Buffer>, u64, u64)]) -> DescriptorWrite {
    DescriptorWrite {
        dst_binding: binding,
        dst_array_element: element,
        descriptor_type: ty,
        resources: buffers
            .iter()
            .map(|(buffer, offset, range)| DescriptorResource::Buffer {
                buffer: buffer.clone(),
                offset: *offset,
                range: *range,
            })
            .collect(),
    }
}

fn bind_command(set: &DescriptorSet, base: ClassSlots, dynamic_offsets: Vec<u32>) -> BindDescriptorSet {
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        set: 0,
        base,
        buckets: set.buckets(),
        dynamic_offsets,
    }
}

fn pixel_constant_buffers(state: &BoundState) -> Vec<(u32, BoundConstantBuffer)> {
    state
        .stage(NativeStage::Pixel)
        .constant_buffers
        .iter()
        .map(|(slot, cb)| (*slot, *cb))
        .collect()
}

#[test]
fn test_identical_layouts_assign_identical_slots() {
    let make = || {
        let layouts = vec![
            set_layout(&[
                (0, vk::DescriptorType::UNIFORM_BUFFER, 1),
                (1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
            ]),
            set_layout(&[
                (0, vk::DescriptorType::UNIFORM_BUFFER, 1),
                (2, vk::DescriptorType::SAMPLED_IMAGE, 1),
            ]),
        ];
        PipelineLayout::new(layouts, Vec::new(), FeatureLevel::L11_0).unwrap()
    };
    let a = make();
    let b = make();
    assert_eq!(a.get_shader_bindings(), b.get_shader_bindings());

    let bindings = a.get_shader_bindings();
    let first = bindings.resolve(0, 0).unwrap();
    let second = bindings.resolve(1, 0).unwrap();
    assert_eq!(first.slot(ResourceClass::ConstantBuffer), Some(0));
    assert_eq!(second.slot(ResourceClass::ConstantBuffer), Some(1));

    // Set 1 starts its textures after the two combined samplers of set 0.
    let texture = bindings.resolve(1, 2).unwrap();
    assert_eq!(texture.slot(ResourceClass::ShaderResource), Some(2));
    assert!(bindings.resolve(1, 1).is_none());
}

#[test]
fn test_remove_restores_bound_state() {
    let (null, device) = setup(FeatureLevel::L11_1);
    let layout = set_layout(&[
        (0, vk::DescriptorType::UNIFORM_BUFFER, 1),
        (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
    ]);
    let set = DescriptorSet::new(layout);
    let a = uniform(&device, 256);
    let b = uniform(&device, 1024);
    set.update(&[
        buffer_write(0, 0, vk::DescriptorType::UNIFORM_BUFFER, &[(a, 0, vk::WHOLE_SIZE)]),
        buffer_write(1, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &[(b, 0, 256)]),
    ])
    .unwrap();

    let before = null.bound();
    let cmd = bind_command(&set, ClassSlots::default(), vec![512]);
    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    cmd.apply(&mut ctx).unwrap();
    assert_ne!(null.bound(), before);
    cmd.remove(&mut ctx).unwrap();
    assert_eq!(null.bound(), before);
}

#[test]
fn test_dynamic_offsets_follow_binding_order() {
    let (null, device) = setup(FeatureLevel::L11_1);
    let layout = set_layout(&[
        (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
        (3, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
        (5, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
    ]);
    let set = DescriptorSet::new(layout);
    let buffers: Vec<_> = (0..3).map(|_| uniform(&device, 1024)).collect();
    // Written out of binding order.
    set.update(&[
        buffer_write(5, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &[(buffers[2].clone(), 0, 256)]),
        buffer_write(1, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &[(buffers[0].clone(), 0, 256)]),
        buffer_write(3, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &[(buffers[1].clone(), 0, 256)]),
    ])
    .unwrap();
    let order: Vec<u32> = set.buckets().dynamic_buffers.iter().map(|d| d.binding).collect();
    assert_eq!(order, vec![1, 3, 5]);

    let cmd = bind_command(&set, ClassSlots::default(), vec![0, 256, 512]);
    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    cmd.apply(&mut ctx).unwrap();

    let bound = pixel_constant_buffers(&null.bound());
    assert_eq!(bound.len(), 3);
    for (i, (slot, cb)) in bound.iter().enumerate() {
        assert_eq!(*slot, i as u32);
        assert_eq!(cb.buffer, buffers[i].get_buffer());
        assert_eq!(cb.first_constant, 16 * i as u32);
        assert_eq!(cb.num_constants, Some(16));
    }
}

#[test]
fn test_unwritten_dynamic_binding_keeps_offset_positions() {
    let (null, device) = setup(FeatureLevel::L11_1);
    let layout = set_layout(&[
        (0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
        (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
    ]);
    let set = DescriptorSet::new(layout);
    let buffer = uniform(&device, 2048);
    // Binding 0 is never written; its offset still occupies index 0.
    set.update(&[buffer_write(1, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &[(buffer.clone(), 0, 256)])])
        .unwrap();

    let cmd = bind_command(&set, ClassSlots::default(), vec![256, 1024]);
    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    cmd.apply(&mut ctx).unwrap();

    let bound: Vec<(u32, u32)> = pixel_constant_buffers(&null.bound())
        .iter()
        .map(|(slot, cb)| (*slot, cb.first_constant))
        .collect();
    assert_eq!(bound, vec![(1, 64)]);
}

#[test]
fn test_array_write_fills_contiguous_slots() {
    let (null, device) = setup(FeatureLevel::L11_0);
    let layout = set_layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 4)]);
    let set = DescriptorSet::new(layout);
    let buffers: Vec<_> = (0..3).map(|_| uniform(&device, 64)).collect();
    let resources: Vec<_> = buffers.iter().map(|b| (b.clone(), 0, vk::WHOLE_SIZE)).collect();
    set.update(&[buffer_write(0, 1, vk::DescriptorType::UNIFORM_BUFFER, &resources)])
        .unwrap();

    let cmd = bind_command(&set, ClassSlots::default(), Vec::new());
    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    cmd.apply(&mut ctx).unwrap();

    let bound = pixel_constant_buffers(&null.bound());
    let slots: Vec<u32> = bound.iter().map(|(slot, _)| *slot).collect();
    assert_eq!(slots, vec![1, 2, 3]);
    for ((_, cb), buffer) in bound.iter().zip(&buffers) {
        assert_eq!(cb.buffer, buffer.get_buffer());
        assert_eq!(cb.num_constants, None);
    }
}

#[test]
fn test_constant_buffer_range_truncates_to_constants() {
    let (null, device) = setup(FeatureLevel::L11_1);
    let layout = set_layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 1)]);
    let set = DescriptorSet::new(layout);
    let buffer = uniform(&device, 256);
    set.update(&[buffer_write(0, 0, vk::DescriptorType::UNIFORM_BUFFER, &[(buffer.clone(), 40, 70)])])
        .unwrap();

    let cmd = bind_command(&set, ClassSlots::default(), Vec::new());
    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    cmd.apply(&mut ctx).unwrap();

    let bound = pixel_constant_buffers(&null.bound());
    assert_eq!(
        bound,
        vec![(
            0,
            BoundConstantBuffer {
                buffer: buffer.get_buffer(),
                first_constant: 2,
                num_constants: Some(4),
            }
        )]
    );
}

#[test]
fn test_reset_buffer_replays_nothing() {
    let (null, device) = setup(FeatureLevel::L11_0);
    let layout = set_layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 1)]);
    let pipeline_layout = PipelineLayout::new(vec![layout.clone()], Vec::new(), FeatureLevel::L11_0).unwrap();
    let set = DescriptorSet::new(layout);
    set.update(&[buffer_write(
        0,
        0,
        vk::DescriptorType::UNIFORM_BUFFER,
        &[(uniform(&device, 64), 0, vk::WHOLE_SIZE)],
    )])
    .unwrap();

    let cmd = CommandBuffer::new(vk::CommandBufferLevel::PRIMARY);
    cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
    cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, &pipeline_layout, 0, &[set], &[])
        .unwrap();
    cmd.end().unwrap();
    assert_eq!(cmd.command_count(), 1);

    cmd.reset();
    assert_eq!(cmd.command_count(), 0);
    cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
    cmd.end().unwrap();

    null.take_calls();
    let mut lock = device.lock_context();
    cmd.submit(&device, &mut *lock).unwrap();
    assert!(null.calls().is_empty());
}

#[test]
fn test_unsupported_dynamic_type_fails_replay() {
    let (_null, device) = setup(FeatureLevel::L11_1);
    let buffer = uniform(&device, 256);
    let mut buckets = DescriptorBuckets::default();
    buckets.dynamic_buffers.push(DynamicBufferBinding {
        binding: 0,
        element: 0,
        offset_index: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        stages: vk::ShaderStageFlags::FRAGMENT,
        slot: 0,
        buffer: buffer.get_buffer(),
        offset: 0,
        range: 256,
    });
    let cmd = BindDescriptorSet {
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        set: 0,
        base: ClassSlots::default(),
        buckets: Arc::new(buckets),
        dynamic_offsets: vec![0],
    };

    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    let err = cmd.apply(&mut ctx).unwrap_err();
    assert!(matches!(
        err,
        ReplayError::UnsupportedDynamicDescriptorType(vk::DescriptorType::UNIFORM_BUFFER)
    ));
    assert_eq!(err.to_vk_result(), vk::Result::ERROR_DEVICE_LOST);
}
