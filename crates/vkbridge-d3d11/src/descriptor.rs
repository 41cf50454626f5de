//! Descriptor sets and the descriptor translator.
//!
//! A set stores one [`WriteDescriptorSetBinding`] per written array element.
//! Every update re-derives the set's [`DescriptorBuckets`]: per-category
//! lists of native views with their stage masks and set-local slots, ready
//! for `BindDescriptorSet` to bind. Command buffers capture the buckets by
//! `Arc` at record time, so later updates do not affect recorded commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::LayoutError;
use crate::layout::{BindingCategory, DescriptorSetLayout, ResourceClass};
use crate::native::{NativeBuffer, SamplerState, ShaderResourceView, UnorderedAccessView};
use crate::resource::{Buffer, BufferView, ImageView, Sampler};

/// The resource written into one descriptor.
#[derive(Clone)]
pub enum DescriptorResource {
    Sampler(Arc<Sampler>),
    /// `sampler` is `None` when the binding uses immutable samplers.
    CombinedImageSampler {
        view: Arc<ImageView>,
        sampler: Option<Arc<Sampler>>,
    },
    Image(Arc<ImageView>),
    TexelBuffer(Arc<BufferView>),
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        range: u64,
    },
}

/// One `VkWriteDescriptorSet`.
#[derive(Clone)]
pub struct DescriptorWrite {
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resources: Vec<DescriptorResource>,
}

/// One `VkCopyDescriptorSet`, minus the set handles.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorCopy {
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub count: u32,
}

/// A written descriptor paired with the layout binding it lands in.
#[derive(Clone)]
pub struct WriteDescriptorSetBinding {
    pub binding: u32,
    pub element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub category: BindingCategory,
    pub stages: vk::ShaderStageFlags,
    /// Set-local base slots of the binding.
    pub local: crate::layout::ClassSlots,
    pub dynamic_base: Option<u32>,
    pub resource: DescriptorResource,
}

impl WriteDescriptorSetBinding {
    /// Set-local slot of this element in `class`.
    pub fn slot(&self, class: ResourceClass) -> u32 {
        self.local.get(class) + self.element
    }
}

// ── Buckets ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewBinding<T> {
    pub stages: vk::ShaderStageFlags,
    pub slot: u32,
    /// `None` when the native view could not be created.
    pub view: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedBinding {
    pub stages: vk::ShaderStageFlags,
    pub texture_slot: u32,
    pub sampler_slot: u32,
    pub view: Option<ShaderResourceView>,
    pub sampler: Option<SamplerState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBufferBinding {
    pub stages: vk::ShaderStageFlags,
    pub slot: u32,
    pub buffer: NativeBuffer,
    /// Offset in 16-byte constants.
    pub first_constant: u32,
    /// Range in 16-byte constants.
    pub num_constants: u32,
    /// The binding covers the whole buffer from offset zero.
    pub whole: bool,
    /// Bound through the dynamic pass with a per-bind offset.
    pub dynamic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBufferBinding {
    pub stages: vk::ShaderStageFlags,
    pub slot: u32,
    pub view: Option<UnorderedAccessView>,
    pub dynamic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicBufferBinding {
    pub binding: u32,
    pub element: u32,
    /// Position of this descriptor's offset in the bind-time offset array.
    pub offset_index: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
    pub slot: u32,
    pub buffer: NativeBuffer,
    pub offset: u64,
    pub range: u64,
}

/// Per-category binding lists of one descriptor set.
#[derive(Clone, Default)]
pub struct DescriptorBuckets {
    pub combined: Vec<CombinedBinding>,
    pub samplers: Vec<ViewBinding<SamplerState>>,
    pub sampled_textures: Vec<ViewBinding<ShaderResourceView>>,
    pub uniform_buffers: Vec<UniformBufferBinding>,
    pub texel_buffers: Vec<ViewBinding<ShaderResourceView>>,
    pub storage_buffers: Vec<StorageBufferBinding>,
    pub storage_textures: Vec<ViewBinding<UnorderedAccessView>>,
    /// Sorted by (binding, element): the order dynamic offsets are supplied in.
    pub dynamic_buffers: Vec<DynamicBufferBinding>,
    /// Keeps the native objects referenced above alive.
    resources: Vec<DescriptorResource>,
}

impl DescriptorBuckets {
    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
            && self.samplers.is_empty()
            && self.sampled_textures.is_empty()
            && self.uniform_buffers.is_empty()
            && self.texel_buffers.is_empty()
            && self.storage_buffers.is_empty()
            && self.storage_textures.is_empty()
            && self.dynamic_buffers.is_empty()
    }

    fn classify(&mut self, entry: &WriteDescriptorSetBinding) {
        let stages = entry.stages;
        match (&entry.resource, entry.category) {
            (DescriptorResource::Sampler(sampler), BindingCategory::Sampler) => {
                self.samplers.push(ViewBinding {
                    stages,
                    slot: entry.slot(ResourceClass::Sampler),
                    view: Some(sampler.get_native_handle()),
                });
            }
            (DescriptorResource::CombinedImageSampler { view, sampler }, BindingCategory::CombinedImageSampler) => {
                self.combined.push(CombinedBinding {
                    stages,
                    texture_slot: entry.slot(ResourceClass::ShaderResource),
                    sampler_slot: entry.slot(ResourceClass::Sampler),
                    view: view.get_shader_view(),
                    sampler: sampler.as_ref().map(|s| s.get_native_handle()),
                });
            }
            (DescriptorResource::Image(view), BindingCategory::SampledImage) => {
                self.sampled_textures.push(ViewBinding {
                    stages,
                    slot: entry.slot(ResourceClass::ShaderResource),
                    view: view.get_shader_view(),
                });
            }
            (DescriptorResource::Image(view), BindingCategory::StorageImage) => {
                self.storage_textures.push(ViewBinding {
                    stages,
                    slot: entry.slot(ResourceClass::UnorderedAccess),
                    view: view.get_unordered_access_view(),
                });
            }
            (
                DescriptorResource::TexelBuffer(view),
                BindingCategory::UniformTexelBuffer | BindingCategory::StorageTexelBuffer,
            ) => {
                if entry.category == BindingCategory::StorageTexelBuffer {
                    trace!("binding {}: storage texel buffer bound read-only", entry.binding);
                }
                self.texel_buffers.push(ViewBinding {
                    stages,
                    slot: entry.slot(ResourceClass::ShaderResource),
                    view: view.get_view(),
                });
            }
            (
                DescriptorResource::Buffer { buffer, offset, range },
                BindingCategory::UniformBuffer | BindingCategory::UniformBufferDynamic,
            ) => {
                let dynamic = entry.category.is_dynamic();
                let range = effective_range(buffer, *offset, *range);
                self.uniform_buffers.push(UniformBufferBinding {
                    stages,
                    slot: entry.slot(ResourceClass::ConstantBuffer),
                    buffer: buffer.get_buffer(),
                    first_constant: (*offset / 16) as u32,
                    num_constants: (range / 16) as u32,
                    whole: *offset == 0 && range >= buffer.size(),
                    dynamic,
                });
                if dynamic {
                    self.push_dynamic(entry, buffer, *offset, range, ResourceClass::ConstantBuffer);
                }
            }
            (
                DescriptorResource::Buffer { buffer, offset, range },
                BindingCategory::StorageBuffer | BindingCategory::StorageBufferDynamic,
            ) => {
                let dynamic = entry.category.is_dynamic();
                let range = effective_range(buffer, *offset, *range);
                self.storage_buffers.push(StorageBufferBinding {
                    stages,
                    slot: entry.slot(ResourceClass::UnorderedAccess),
                    view: buffer.get_unordered_access_view(),
                    dynamic,
                });
                if dynamic {
                    self.push_dynamic(entry, buffer, *offset, range, ResourceClass::UnorderedAccess);
                }
            }
            (_, BindingCategory::InputAttachment) => {
                debug!("binding {}: input attachment descriptors are not supported", entry.binding);
            }
            (_, category) => {
                debug!(
                    "binding {}: resource does not match {:?}, skipped",
                    entry.binding, category
                );
            }
        }
        self.resources.push(entry.resource.clone());
    }

    fn push_dynamic(
        &mut self,
        entry: &WriteDescriptorSetBinding,
        buffer: &Buffer,
        offset: u64,
        range: u64,
        class: ResourceClass,
    ) {
        self.dynamic_buffers.push(DynamicBufferBinding {
            binding: entry.binding,
            element: entry.element,
            offset_index: entry.dynamic_base.unwrap_or(0) + entry.element,
            descriptor_type: entry.descriptor_type,
            stages: entry.stages,
            slot: entry.slot(class),
            buffer: buffer.get_buffer(),
            offset,
            range,
        });
    }
}

fn effective_range(buffer: &Buffer, offset: u64, range: u64) -> u64 {
    if range == vk::WHOLE_SIZE {
        buffer.size().saturating_sub(offset)
    } else {
        range
    }
}

// ── Descriptor set ──────────────────────────────────────────

pub struct DescriptorSet {
    layout: Arc<DescriptorSetLayout>,
    entries: Mutex<BTreeMap<(u32, u32), WriteDescriptorSetBinding>>,
    buckets: Mutex<Arc<DescriptorBuckets>>,
}

impl DescriptorSet {
    pub fn new(layout: Arc<DescriptorSetLayout>) -> Arc<Self> {
        let mut entries = BTreeMap::new();
        for b in layout.bindings() {
            if b.category != BindingCategory::Sampler {
                continue;
            }
            for (element, sampler) in b.immutable_samplers.iter().enumerate() {
                entries.insert(
                    (b.binding, element as u32),
                    WriteDescriptorSetBinding {
                        binding: b.binding,
                        element: element as u32,
                        descriptor_type: vk::DescriptorType::SAMPLER,
                        category: BindingCategory::Sampler,
                        stages: b.stages,
                        local: b.local,
                        dynamic_base: None,
                        resource: DescriptorResource::Sampler(sampler.clone()),
                    },
                );
            }
        }
        let set = Self {
            layout,
            entries: Mutex::new(entries),
            buckets: Mutex::new(Arc::new(DescriptorBuckets::default())),
        };
        set.rebuild();
        Arc::new(set)
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn dynamic_count(&self) -> u32 {
        self.layout.dynamic_count()
    }

    /// Current buckets. Callers keep the snapshot they were handed.
    pub fn buckets(&self) -> Arc<DescriptorBuckets> {
        self.buckets.lock().clone()
    }

    pub fn entry(&self, binding: u32, element: u32) -> Option<WriteDescriptorSetBinding> {
        self.entries.lock().get(&(binding, element)).cloned()
    }

    /// `vkUpdateDescriptorSets` writes into this set.
    pub fn update(&self, writes: &[DescriptorWrite]) -> Result<(), LayoutError> {
        {
            let mut entries = self.entries.lock();
            for write in writes {
                let targets = self.walk(write.dst_binding, write.dst_array_element, write.resources.len() as u32)?;
                for ((binding, element), resource) in targets.into_iter().zip(&write.resources) {
                    let entry = self.make_entry(binding, element, write.descriptor_type, resource.clone())?;
                    entries.insert((binding, element), entry);
                }
            }
        }
        self.rebuild();
        Ok(())
    }

    /// `VkCopyDescriptorSet` from `src` into this set.
    pub fn copy_from(&self, src: &DescriptorSet, copy: &DescriptorCopy) -> Result<(), LayoutError> {
        let from = src.walk(copy.src_binding, copy.src_array_element, copy.count)?;
        let to = self.walk(copy.dst_binding, copy.dst_array_element, copy.count)?;
        let copied: Vec<Option<WriteDescriptorSetBinding>> = {
            let src_entries = src.entries.lock();
            from.iter().map(|key| src_entries.get(key).cloned()).collect()
        };
        {
            let mut entries = self.entries.lock();
            for ((binding, element), source) in to.into_iter().zip(copied) {
                match source {
                    Some(source) => {
                        let entry = self.make_entry(binding, element, source.descriptor_type, source.resource)?;
                        entries.insert((binding, element), entry);
                    }
                    None => {
                        entries.remove(&(binding, element));
                    }
                }
            }
        }
        self.rebuild();
        Ok(())
    }

    /// `(binding, element)` pairs covered by `count` consecutive descriptors
    /// starting at `(binding, element)`, rolling over into following
    /// bindings.
    fn walk(&self, binding: u32, element: u32, count: u32) -> Result<Vec<(u32, u32)>, LayoutError> {
        let numbers: Vec<u32> = self.layout.binding_numbers().collect();
        let mut index = numbers
            .iter()
            .position(|&b| b == binding)
            .ok_or(LayoutError::UnknownBinding(binding))?;
        let mut element = element;
        let mut out = Vec::with_capacity(count as usize);
        while (out.len() as u32) < count {
            let current = numbers[index];
            let declared = self.layout.binding(current).map(|b| b.count).unwrap_or(0);
            if element < declared {
                out.push((current, element));
                element += 1;
                continue;
            }
            element -= declared;
            index += 1;
            if index >= numbers.len() {
                return Err(LayoutError::WriteOverflow {
                    binding,
                    overflow: count - out.len() as u32,
                });
            }
        }
        Ok(out)
    }

    fn make_entry(
        &self,
        binding: u32,
        element: u32,
        descriptor_type: vk::DescriptorType,
        resource: DescriptorResource,
    ) -> Result<WriteDescriptorSetBinding, LayoutError> {
        let layout_binding = self.layout.binding(binding).ok_or(LayoutError::UnknownBinding(binding))?;
        if layout_binding.category.descriptor_type() != descriptor_type {
            return Err(LayoutError::TypeMismatch {
                binding,
                declared: layout_binding.category.descriptor_type(),
                written: descriptor_type,
            });
        }
        let immutable = layout_binding.immutable_samplers.get(element as usize).cloned();
        let resource = match resource {
            DescriptorResource::CombinedImageSampler { view, sampler } => DescriptorResource::CombinedImageSampler {
                view,
                sampler: immutable.or(sampler),
            },
            DescriptorResource::Sampler(sampler) => DescriptorResource::Sampler(immutable.unwrap_or(sampler)),
            other => other,
        };
        Ok(WriteDescriptorSetBinding {
            binding,
            element,
            descriptor_type,
            category: layout_binding.category,
            stages: layout_binding.stages,
            local: layout_binding.local,
            dynamic_base: layout_binding.dynamic_base,
            resource,
        })
    }

    fn rebuild(&self) {
        let entries = self.entries.lock();
        let mut buckets = DescriptorBuckets::default();
        for entry in entries.values() {
            buckets.classify(entry);
        }
        buckets.dynamic_buffers.sort_by_key(|d| (d.binding, d.element));
        *self.buckets.lock() = Arc::new(buckets);
    }
}

// ── Descriptor pool ─────────────────────────────────────────

#[derive(Default)]
pub struct DescriptorPool {
    sets: Mutex<Vec<Arc<DescriptorSet>>>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, layout: Arc<DescriptorSetLayout>) -> Arc<DescriptorSet> {
        let set = DescriptorSet::new(layout);
        self.sets.lock().push(set.clone());
        set
    }

    pub fn free(&self, set: &Arc<DescriptorSet>) {
        self.sets.lock().retain(|s| !Arc::ptr_eq(s, set));
    }

    /// Return every set to the pool; the released sets are handed back so
    /// their handles can be retired.
    pub fn reset(&self) -> Vec<Arc<DescriptorSet>> {
        std::mem::take(&mut *self.sets.lock())
    }

    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::layout::SetLayoutBinding;
    use crate::native::null::NullDevice;
    use vkbridge_core::{BridgeConfig, FeatureLevel};

    fn setup() -> Arc<Device> {
        Device::new(NullDevice::new(FeatureLevel::L11_1), BridgeConfig::default()).unwrap()
    }

    fn layout(bindings: &[(u32, vk::DescriptorType, u32)]) -> Arc<DescriptorSetLayout> {
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

    #[test]
    fn array_write_rolls_into_next_binding() {
        let device = setup();
        let set = DescriptorSet::new(layout(&[
            (0, vk::DescriptorType::UNIFORM_BUFFER, 2),
            (1, vk::DescriptorType::UNIFORM_BUFFER, 2),
        ]));
        let buffers: Vec<_> = (0..3).map(|_| uniform(&device, 64)).collect();
        set.update(&[DescriptorWrite {
            dst_binding: 0,
            dst_array_element: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resources: buffers
                .iter()
                .map(|b| DescriptorResource::Buffer {
                    buffer: b.clone(),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                })
                .collect(),
        }])
        .unwrap();
        assert!(set.entry(0, 0).is_none());
        assert!(set.entry(0, 1).is_some());
        assert!(set.entry(1, 0).is_some());
        assert!(set.entry(1, 1).is_some());
        let slots: Vec<u32> = set.buckets().uniform_buffers.iter().map(|u| u.slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);
    }

    #[test]
    fn overflowing_write_is_rejected() {
        let device = setup();
        let set = DescriptorSet::new(layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 1)]));
        let buffer = uniform(&device, 64);
        let resource = DescriptorResource::Buffer {
            buffer,
            offset: 0,
            range: 64,
        };
        let err = set
            .update(&[DescriptorWrite {
                dst_binding: 0,
                dst_array_element: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                resources: vec![resource.clone(), resource],
            }])
            .unwrap_err();
        assert_eq!(err, LayoutError::WriteOverflow { binding: 0, overflow: 1 });
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let device = setup();
        let set = DescriptorSet::new(layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 1)]));
        let err = set
            .update(&[DescriptorWrite {
                dst_binding: 0,
                dst_array_element: 0,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                resources: vec![DescriptorResource::Buffer {
                    buffer: uniform(&device, 64),
                    offset: 0,
                    range: 64,
                }],
            }])
            .unwrap_err();
        assert!(matches!(err, LayoutError::TypeMismatch { binding: 0, .. }));
    }

    #[test]
    fn update_replaces_buckets_without_touching_snapshots() {
        let device = setup();
        let set = DescriptorSet::new(layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 1)]));
        let before = set.buckets();
        set.update(&[DescriptorWrite {
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resources: vec![DescriptorResource::Buffer {
                buffer: uniform(&device, 64),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }],
        }])
        .unwrap();
        assert!(before.is_empty());
        let after = set.buckets();
        assert_eq!(after.uniform_buffers.len(), 1);
        assert!(after.uniform_buffers[0].whole);
        assert_eq!(after.uniform_buffers[0].num_constants, 4);
    }

    #[test]
    fn copy_moves_entries_between_sets() {
        let device = setup();
        let shared = layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER, 2)]);
        let src = DescriptorSet::new(shared.clone());
        let dst = DescriptorSet::new(shared);
        let buffer = uniform(&device, 64);
        src.update(&[DescriptorWrite {
            dst_binding: 0,
            dst_array_element: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resources: vec![DescriptorResource::Buffer {
                buffer: buffer.clone(),
                offset: 0,
                range: 64,
            }],
        }])
        .unwrap();
        dst.copy_from(
            &src,
            &DescriptorCopy {
                src_binding: 0,
                src_array_element: 1,
                dst_binding: 0,
                dst_array_element: 0,
                count: 1,
            },
        )
        .unwrap();
        let buckets = dst.buckets();
        assert_eq!(buckets.uniform_buffers.len(), 1);
        assert_eq!(buckets.uniform_buffers[0].slot, 0);
        assert_eq!(buckets.uniform_buffers[0].buffer, buffer.get_buffer());
    }

    #[test]
    fn pool_reset_releases_all_sets() {
        let pool = DescriptorPool::new();
        let l = layout(&[(0, vk::DescriptorType::SAMPLER, 1)]);
        let a = pool.allocate(l.clone());
        let _b = pool.allocate(l);
        pool.free(&a);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.reset().len(), 1);
        assert!(pool.is_empty());
    }
}
