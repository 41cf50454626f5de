//! Descriptor-set layouts and the pipeline-layout binding map.
//!
//! Vulkan addresses resources by `{set, binding, array element}`; the native
//! backend has four fixed per-stage slot spaces (samplers, shader resources,
//! constant buffers, unordered access). A pipeline layout flattens the former
//! into the latter:
//!
//! - each set layout assigns, in declared binding order, consecutive
//!   set-local slots per resource class (an arrayed binding takes `count`);
//! - the pipeline layout stacks set layouts in set order, so each set starts
//!   where the previous one ended in every class.
//!
//! The resulting [`ShaderBindings`] is consulted by both the shader adapter
//! and descriptor binding, and is immutable once built.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::debug;
use vkbridge_core::FeatureLevel;

use crate::error::LayoutError;
use crate::resource::Sampler;

/// Constant-buffer slot reserved for push constants, outside the
/// descriptor-derived slot space.
pub const PUSH_CONSTANT_SLOT: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Sampler,
    ShaderResource,
    ConstantBuffer,
    UnorderedAccess,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Sampler,
        ResourceClass::ShaderResource,
        ResourceClass::ConstantBuffer,
        ResourceClass::UnorderedAccess,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// HLSL register letter.
    pub fn register_letter(self) -> char {
        match self {
            ResourceClass::Sampler => 's',
            ResourceClass::ShaderResource => 't',
            ResourceClass::ConstantBuffer => 'b',
            ResourceClass::UnorderedAccess => 'u',
        }
    }

    /// Slots available to descriptors at a feature level.
    pub fn limit(self, feature_level: FeatureLevel) -> u32 {
        match self {
            ResourceClass::Sampler => 16,
            ResourceClass::ShaderResource => 128,
            ResourceClass::ConstantBuffer => PUSH_CONSTANT_SLOT,
            ResourceClass::UnorderedAccess => feature_level.uav_slot_count(),
        }
    }
}

/// Per-class slot counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClassSlots(pub [u32; 4]);

impl ClassSlots {
    pub fn get(&self, class: ResourceClass) -> u32 {
        self.0[class.index()]
    }

    fn add(&mut self, class: ResourceClass, n: u32) {
        self.0[class.index()] += n;
    }

    fn plus(&self, other: &ClassSlots) -> ClassSlots {
        let mut out = *self;
        for class in ResourceClass::ALL {
            out.add(class, other.get(class));
        }
        out
    }
}

/// What a descriptor binding is, derived once from its descriptor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingCategory {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
}

impl BindingCategory {
    pub fn from_descriptor_type(ty: vk::DescriptorType) -> Result<Self, LayoutError> {
        Ok(match ty {
            vk::DescriptorType::SAMPLER => BindingCategory::Sampler,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => BindingCategory::CombinedImageSampler,
            vk::DescriptorType::SAMPLED_IMAGE => BindingCategory::SampledImage,
            vk::DescriptorType::STORAGE_IMAGE => BindingCategory::StorageImage,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => BindingCategory::UniformTexelBuffer,
            vk::DescriptorType::STORAGE_TEXEL_BUFFER => BindingCategory::StorageTexelBuffer,
            vk::DescriptorType::UNIFORM_BUFFER => BindingCategory::UniformBuffer,
            vk::DescriptorType::STORAGE_BUFFER => BindingCategory::StorageBuffer,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => BindingCategory::UniformBufferDynamic,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => BindingCategory::StorageBufferDynamic,
            vk::DescriptorType::INPUT_ATTACHMENT => BindingCategory::InputAttachment,
            other => return Err(LayoutError::UnsupportedDescriptorType(other)),
        })
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindingCategory::Sampler => vk::DescriptorType::SAMPLER,
            BindingCategory::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingCategory::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            BindingCategory::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingCategory::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            BindingCategory::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            BindingCategory::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingCategory::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingCategory::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindingCategory::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            BindingCategory::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }

    /// Native resource classes a descriptor of this category occupies.
    /// Combined image-samplers take one shader-resource and one sampler slot.
    pub fn classes(self) -> &'static [ResourceClass] {
        match self {
            BindingCategory::Sampler => &[ResourceClass::Sampler],
            BindingCategory::CombinedImageSampler => &[ResourceClass::ShaderResource, ResourceClass::Sampler],
            BindingCategory::SampledImage
            | BindingCategory::UniformTexelBuffer
            | BindingCategory::StorageTexelBuffer => &[ResourceClass::ShaderResource],
            BindingCategory::UniformBuffer | BindingCategory::UniformBufferDynamic => {
                &[ResourceClass::ConstantBuffer]
            }
            BindingCategory::StorageBuffer
            | BindingCategory::StorageBufferDynamic
            | BindingCategory::StorageImage => &[ResourceClass::UnorderedAccess],
            BindingCategory::InputAttachment => &[],
        }
    }

    /// The class a shader resource variable of this category is bound to.
    pub fn primary_class(self) -> Option<ResourceClass> {
        self.classes().first().copied()
    }

    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            BindingCategory::UniformBufferDynamic | BindingCategory::StorageBufferDynamic
        )
    }
}

/// One binding of a descriptor-set layout as supplied by the caller.
#[derive(Clone)]
pub struct SetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub immutable_samplers: Vec<Arc<Sampler>>,
}

/// A resolved binding: category, stages and set-local base slot per class.
#[derive(Clone)]
pub struct LayoutBinding {
    pub binding: u32,
    pub category: BindingCategory,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub local: ClassSlots,
    /// Index of element 0 in the set's dynamic-offset array: dynamic
    /// descriptors counted in ascending binding order.
    pub dynamic_base: Option<u32>,
    pub immutable_samplers: Vec<Arc<Sampler>>,
}

impl LayoutBinding {
    /// Set-local slot of `element` in `class`.
    pub fn local_slot(&self, class: ResourceClass, element: u32) -> u32 {
        self.local.get(class) + element
    }
}

pub struct DescriptorSetLayout {
    bindings: Vec<LayoutBinding>,
    by_binding: BTreeMap<u32, usize>,
    totals: ClassSlots,
    dynamic_count: u32,
}

impl DescriptorSetLayout {
    pub fn new(bindings: &[SetLayoutBinding]) -> Result<Self, LayoutError> {
        let mut resolved = Vec::with_capacity(bindings.len());
        let mut by_binding = BTreeMap::new();
        let mut totals = ClassSlots::default();
        let mut dynamic_count = 0;

        for b in bindings {
            let category = BindingCategory::from_descriptor_type(b.descriptor_type)?;
            if category == BindingCategory::InputAttachment {
                debug!("binding {}: input attachments are not supported, left unbound", b.binding);
            }
            if by_binding.insert(b.binding, resolved.len()).is_some() {
                return Err(LayoutError::DuplicateBinding(b.binding));
            }
            let local = totals;
            for &class in category.classes() {
                totals.add(class, b.count);
            }
            if category.is_dynamic() {
                dynamic_count += b.count;
            }
            resolved.push(LayoutBinding {
                binding: b.binding,
                category,
                count: b.count,
                stages: b.stages,
                local,
                dynamic_base: None,
                immutable_samplers: b.immutable_samplers.clone(),
            });
        }

        let mut dynamic_base = 0;
        for &index in by_binding.values() {
            let binding = &mut resolved[index];
            if binding.category.is_dynamic() {
                binding.dynamic_base = Some(dynamic_base);
                dynamic_base += binding.count;
            }
        }

        Ok(Self {
            bindings: resolved,
            by_binding,
            totals,
            dynamic_count,
        })
    }

    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.by_binding.get(&binding).map(|&i| &self.bindings[i])
    }

    /// Bindings in declared order.
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Binding numbers in ascending order.
    pub fn binding_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_binding.keys().copied()
    }

    /// Slots this set consumes in each class.
    pub fn totals(&self) -> ClassSlots {
        self.totals
    }

    /// Number of dynamic descriptors (array elements included).
    pub fn dynamic_count(&self) -> u32 {
        self.dynamic_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Native slots of one `(set, binding)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlots {
    pub category: BindingCategory,
    pub stages: vk::ShaderStageFlags,
    pub count: u32,
    /// First slot per class; meaningful only for the category's classes.
    pub base: ClassSlots,
}

impl BindingSlots {
    /// Native slot of element 0 in `class`, if the binding occupies it.
    pub fn slot(&self, class: ResourceClass) -> Option<u32> {
        self.category
            .classes()
            .contains(&class)
            .then(|| self.base.get(class))
    }
}

/// The `(set, binding) → native slot` table of a pipeline layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBindings {
    map: BTreeMap<(u32, u32), BindingSlots>,
}

impl ShaderBindings {
    pub fn resolve(&self, set: u32, binding: u32) -> Option<&BindingSlots> {
        self.map.get(&(set, binding))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &BindingSlots)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub struct PipelineLayout {
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    set_bases: Vec<ClassSlots>,
    push_constant_ranges: Vec<PushConstantRange>,
    bindings: ShaderBindings,
}

impl PipelineLayout {
    pub fn new(
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constant_ranges: Vec<PushConstantRange>,
        feature_level: FeatureLevel,
    ) -> Result<Self, LayoutError> {
        let mut set_bases = Vec::with_capacity(set_layouts.len());
        let mut map = BTreeMap::new();
        let mut next = ClassSlots::default();

        for (set, layout) in set_layouts.iter().enumerate() {
            let set = set as u32;
            let base = next;
            for b in layout.bindings() {
                for &class in b.category.classes() {
                    let end = base.get(class) + b.local.get(class) + b.count;
                    let limit = class.limit(feature_level);
                    if end > limit {
                        return Err(LayoutError::SlotExhausted {
                            class,
                            set,
                            binding: b.binding,
                            limit,
                        });
                    }
                }
                map.insert(
                    (set, b.binding),
                    BindingSlots {
                        category: b.category,
                        stages: b.stages,
                        count: b.count,
                        base: base.plus(&b.local),
                    },
                );
            }
            set_bases.push(base);
            next = base.plus(&layout.totals());
        }

        Ok(Self {
            set_layouts,
            set_bases,
            push_constant_ranges,
            bindings: ShaderBindings { map },
        })
    }

    pub fn get_shader_bindings(&self) -> &ShaderBindings {
        &self.bindings
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    /// First slot per class of descriptor set `set`.
    pub fn set_base(&self, set: u32) -> Option<ClassSlots> {
        self.set_bases.get(set as usize).copied()
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Stages any push-constant range is visible to.
    pub fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.push_constant_ranges
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |acc, r| acc | r.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(binding: u32, ty: vk::DescriptorType, count: u32) -> SetLayoutBinding {
        SetLayoutBinding {
            binding,
            descriptor_type: ty,
            count,
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
            immutable_samplers: Vec::new(),
        }
    }

    #[test]
    fn set_local_slots_follow_declared_order() {
        let layout = DescriptorSetLayout::new(&[
            binding(3, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
            binding(1, vk::DescriptorType::SAMPLED_IMAGE, 1),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER, 1),
        ])
        .unwrap();
        assert_eq!(layout.binding(3).unwrap().local.get(ResourceClass::ConstantBuffer), 0);
        assert_eq!(layout.binding(2).unwrap().local.get(ResourceClass::ConstantBuffer), 1);
        assert_eq!(layout.binding(0).unwrap().local.get(ResourceClass::ShaderResource), 0);
        assert_eq!(layout.binding(0).unwrap().local.get(ResourceClass::Sampler), 0);
        assert_eq!(layout.binding(1).unwrap().local.get(ResourceClass::ShaderResource), 2);
        assert_eq!(layout.totals(), ClassSlots([2, 3, 2, 0]));
    }

    #[test]
    fn sets_stack_per_class() {
        let set0 = Arc::new(
            DescriptorSetLayout::new(&[
                binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1),
                binding(1, vk::DescriptorType::SAMPLED_IMAGE, 4),
            ])
            .unwrap(),
        );
        let set1 = Arc::new(
            DescriptorSetLayout::new(&[
                binding(0, vk::DescriptorType::SAMPLED_IMAGE, 1),
                binding(1, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ])
            .unwrap(),
        );
        let layout = PipelineLayout::new(vec![set0, set1], Vec::new(), FeatureLevel::L11_0).unwrap();
        let bindings = layout.get_shader_bindings();
        assert_eq!(bindings.resolve(1, 0).unwrap().slot(ResourceClass::ShaderResource), Some(4));
        assert_eq!(bindings.resolve(1, 1).unwrap().slot(ResourceClass::ConstantBuffer), Some(1));
        assert_eq!(bindings.resolve(1, 1).unwrap().slot(ResourceClass::Sampler), None);
        assert!(bindings.resolve(2, 0).is_none());
    }

    #[test]
    fn dynamic_count_includes_array_elements() {
        let layout = DescriptorSetLayout::new(&[
            binding(0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 2),
            binding(1, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER, 1),
        ])
        .unwrap();
        assert_eq!(layout.dynamic_count(), 3);
    }

    #[test]
    fn dynamic_base_follows_binding_numbers() {
        let layout = DescriptorSetLayout::new(&[
            binding(4, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1),
            binding(1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 2),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER, 1),
        ])
        .unwrap();
        assert_eq!(layout.binding(1).unwrap().dynamic_base, Some(0));
        assert_eq!(layout.binding(2).unwrap().dynamic_base, None);
        assert_eq!(layout.binding(4).unwrap().dynamic_base, Some(2));
    }

    #[test]
    fn uav_slots_exhaust_at_11_0() {
        let set = Arc::new(
            DescriptorSetLayout::new(&[binding(0, vk::DescriptorType::STORAGE_BUFFER, 9)]).unwrap(),
        );
        let err = PipelineLayout::new(vec![set.clone()], Vec::new(), FeatureLevel::L11_0)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LayoutError::SlotExhausted {
                class: ResourceClass::UnorderedAccess,
                limit: 8,
                ..
            }
        ));
        assert!(PipelineLayout::new(vec![set], Vec::new(), FeatureLevel::L11_1).is_ok());
    }

    #[test]
    fn constant_buffers_stop_below_push_constant_slot() {
        let set = Arc::new(
            DescriptorSetLayout::new(&[binding(0, vk::DescriptorType::UNIFORM_BUFFER, 14)]).unwrap(),
        );
        assert!(PipelineLayout::new(vec![set], Vec::new(), FeatureLevel::L11_1).is_err());
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let result = DescriptorSetLayout::new(&[
            binding(0, vk::DescriptorType::SAMPLER, 1),
            binding(0, vk::DescriptorType::SAMPLER, 1),
        ]);
        assert!(matches!(result, Err(LayoutError::DuplicateBinding(0))));
    }
}
