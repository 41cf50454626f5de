//! TOML description of a pipeline layout for `vkbridge translate`.
//!
//! ```toml
//! [[sets]]
//! bindings = [
//!     { binding = 0, type = "uniform_buffer" },
//!     { binding = 1, type = "combined_image_sampler", count = 2 },
//! ]
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ash::vk;
use serde::Deserialize;
use vkbridge_core::FeatureLevel;
use vkbridge_d3d11::layout::{ResourceClass, SetLayoutBinding};
use vkbridge_d3d11::{DescriptorSetLayout, PipelineLayout, ShaderBindings};

#[derive(Debug, Default, Deserialize)]
pub struct LayoutFile {
    #[serde(default)]
    pub sets: Vec<SetDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetDescription {
    #[serde(default)]
    pub bindings: Vec<BindingDescription>,
}

#[derive(Debug, Deserialize)]
pub struct BindingDescription {
    pub binding: u32,
    #[serde(rename = "type")]
    pub descriptor_type: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

pub fn descriptor_type(name: &str) -> Result<vk::DescriptorType> {
    Ok(match name {
        "sampler" => vk::DescriptorType::SAMPLER,
        "combined_image_sampler" => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        "sampled_image" => vk::DescriptorType::SAMPLED_IMAGE,
        "storage_image" => vk::DescriptorType::STORAGE_IMAGE,
        "uniform_texel_buffer" => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        "storage_texel_buffer" => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        "uniform_buffer" => vk::DescriptorType::UNIFORM_BUFFER,
        "storage_buffer" => vk::DescriptorType::STORAGE_BUFFER,
        "uniform_buffer_dynamic" => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        "storage_buffer_dynamic" => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        "input_attachment" => vk::DescriptorType::INPUT_ATTACHMENT,
        other => bail!("unknown descriptor type '{}'", other),
    })
}

impl LayoutFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid layout description")
    }

    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        Self::parse(&content)
    }

    /// Build the pipeline layout; every binding is visible to all stages.
    pub fn build(&self, feature_level: FeatureLevel) -> Result<PipelineLayout> {
        let set_layouts = self
            .sets
            .iter()
            .enumerate()
            .map(|(index, set)| {
                let bindings = set
                    .bindings
                    .iter()
                    .map(|b| {
                        Ok(SetLayoutBinding {
                            binding: b.binding,
                            descriptor_type: descriptor_type(&b.descriptor_type)?,
                            count: b.count,
                            stages: vk::ShaderStageFlags::ALL,
                            immutable_samplers: Vec::new(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let layout = DescriptorSetLayout::new(&bindings).with_context(|| format!("set {}", index))?;
                Ok(Arc::new(layout))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PipelineLayout::new(set_layouts, Vec::new(), feature_level)?)
    }
}

/// One row per `(set, binding)`: category and the native registers it
/// occupies, e.g. `s3 t3`.
pub fn binding_table(bindings: &ShaderBindings) -> Vec<String> {
    bindings
        .iter()
        .map(|(&(set, binding), slots)| {
            let registers: Vec<String> = ResourceClass::ALL
                .iter()
                .filter_map(|&class| slots.slot(class).map(|slot| format!("{}{}", class.register_letter(), slot)))
                .collect();
            let registers = if registers.is_empty() {
                "-".to_string()
            } else {
                registers.join(" ")
            };
            format!(
                "set {} binding {:<3} {:<22} x{:<3} {}",
                set,
                binding,
                format!("{:?}", slots.category),
                slots.count,
                registers
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SETS: &str = r#"
        [[sets]]
        bindings = [
            { binding = 0, type = "uniform_buffer" },
            { binding = 1, type = "combined_image_sampler", count = 2 },
        ]

        [[sets]]
        bindings = [
            { binding = 0, type = "sampled_image" },
            { binding = 1, type = "uniform_buffer" },
        ]
    "#;

    #[test]
    fn sets_stack_their_registers() {
        let layout = LayoutFile::parse(TWO_SETS).unwrap().build(FeatureLevel::L11_0).unwrap();
        let bindings = layout.get_shader_bindings();
        assert_eq!(bindings.resolve(1, 0).unwrap().slot(ResourceClass::ShaderResource), Some(2));
        assert_eq!(bindings.resolve(1, 1).unwrap().slot(ResourceClass::ConstantBuffer), Some(1));

        let table = binding_table(bindings);
        assert_eq!(table.len(), 4);
        assert!(table[1].ends_with("s0 t0"), "{}", table[1]);
    }

    #[test]
    fn unknown_descriptor_type_is_an_error() {
        let file = LayoutFile::parse("[[sets]]\nbindings = [{ binding = 0, type = \"acceleration_structure\" }]").unwrap();
        let err = file.build(FeatureLevel::L11_0).err().unwrap();
        assert!(err.to_string().contains("acceleration_structure"));
    }

    #[test]
    fn empty_description_is_an_empty_layout() {
        let layout = LayoutFile::parse("").unwrap().build(FeatureLevel::L11_0).unwrap();
        assert!(layout.get_shader_bindings().is_empty());
    }
}
