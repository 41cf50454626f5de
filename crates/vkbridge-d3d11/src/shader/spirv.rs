//! Word-level SPIR-V editing.
//!
//! Only what the binding rewrite needs: decorations, resource variables,
//! entry points, specialization constants and the push-constant block. The
//! module is kept as a flat instruction list and re-serialized unchanged
//! apart from the edits made here.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::ShaderError;
use crate::layout::{ResourceClass, ShaderBindings, PUSH_CONSTANT_SLOT};
use crate::native::NativeStage;

pub const MAGIC: u32 = 0x0723_0203;

mod op {
    pub const NAME: u16 = 5;
    pub const ENTRY_POINT: u16 = 15;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_POINTER: u16 = 32;
    pub const CONSTANT_TRUE: u16 = 41;
    pub const CONSTANT_FALSE: u16 = 42;
    pub const CONSTANT: u16 = 43;
    pub const CONSTANT_COMPOSITE: u16 = 44;
    pub const SPEC_CONSTANT_TRUE: u16 = 48;
    pub const SPEC_CONSTANT_FALSE: u16 = 49;
    pub const SPEC_CONSTANT: u16 = 50;
    pub const SPEC_CONSTANT_COMPOSITE: u16 = 51;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_CALL: u16 = 57;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const IN_BOUNDS_ACCESS_CHAIN: u16 = 66;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const SAMPLED_IMAGE: u16 = 86;
}

mod decoration {
    pub const SPEC_ID: u32 = 1;
    pub const NON_WRITABLE: u32 = 24;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
}

mod storage {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Instruction {
    opcode: u16,
    operands: Vec<u32>,
}

impl Instruction {
    fn new(opcode: u16, operands: Vec<u32>) -> Self {
        Self { opcode, operands }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: u32,
    pub id: u32,
    pub name: String,
}

impl EntryPoint {
    pub fn stage(&self) -> Option<NativeStage> {
        match self.execution_model {
            0 => Some(NativeStage::Vertex),
            1 => Some(NativeStage::Hull),
            2 => Some(NativeStage::Domain),
            3 => Some(NativeStage::Geometry),
            4 => Some(NativeStage::Pixel),
            5 => Some(NativeStage::Compute),
            _ => None,
        }
    }
}

/// A resource variable declared with a descriptor set and binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceVariable {
    pub id: u32,
    pub set: u32,
    pub binding: u32,
    pub storage_class: u32,
}

/// Decoration set given to variables left unbound in tolerant mode. Bound
/// variables use their resource class index (0..=3) as the set.
pub const UNBOUND_GROUP: u32 = 4;

/// Where a rewritten resource variable ended up: the (set, binding)
/// decoration pair it now carries and the native register it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterBinding {
    pub group: u32,
    pub binding: u32,
    pub register: u32,
}

impl RegisterBinding {
    pub fn of(class: ResourceClass, register: u32) -> Self {
        Self {
            group: class.index() as u32,
            binding: register,
            register,
        }
    }
}

/// The reserved constant buffer lowered push-constant blocks are bound to.
pub fn push_constant_binding() -> RegisterBinding {
    RegisterBinding::of(ResourceClass::ConstantBuffer, PUSH_CONSTANT_SLOT)
}

#[derive(Debug, Clone)]
pub struct SpirvModule {
    header: [u32; 5],
    instructions: Vec<Instruction>,
    /// Register class forced on variables produced by splitting combined
    /// image samplers.
    forced: HashMap<u32, ResourceClass>,
}

pub fn is_spirv(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == MAGIC
}

fn decode_string(words: &[u32]) -> (String, usize) {
    let mut bytes = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for b in word.to_le_bytes() {
            if b == 0 {
                return (String::from_utf8_lossy(&bytes).into_owned(), i + 1);
            }
            bytes.push(b);
        }
    }
    (String::from_utf8_lossy(&bytes).into_owned(), words.len())
}

fn encode_string(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl SpirvModule {
    pub fn parse(bytes: &[u8]) -> Result<Self, ShaderError> {
        if bytes.len() % 4 != 0 {
            return Err(ShaderError::InvalidSpirv(format!("length {} is not a multiple of 4", bytes.len())));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if words.len() < 5 {
            return Err(ShaderError::InvalidSpirv("truncated header".into()));
        }
        if words[0] != MAGIC {
            return Err(ShaderError::InvalidSpirv(format!("bad magic {:#010x}", words[0])));
        }

        let mut instructions = Vec::new();
        let mut pos = 5;
        while pos < words.len() {
            let word_count = (words[pos] >> 16) as usize;
            let opcode = (words[pos] & 0xffff) as u16;
            if word_count == 0 || pos + word_count > words.len() {
                return Err(ShaderError::InvalidSpirv(format!(
                    "instruction at word {} overruns the module",
                    pos
                )));
            }
            instructions.push(Instruction::new(opcode, words[pos + 1..pos + word_count].to_vec()));
            pos += word_count;
        }

        let mut header = [0u32; 5];
        header.copy_from_slice(&words[..5]);
        Ok(Self {
            header,
            instructions,
            forced: HashMap::new(),
        })
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut words = self.header.to_vec();
        for inst in &self.instructions {
            words.push(((inst.operands.len() as u32 + 1) << 16) | inst.opcode as u32);
            words.extend_from_slice(&inst.operands);
        }
        words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.to_words()).to_vec()
    }

    /// (major, minor)
    pub fn version(&self) -> (u8, u8) {
        (((self.header[1] >> 16) & 0xff) as u8, ((self.header[1] >> 8) & 0xff) as u8)
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.header[3];
        self.header[3] += 1;
        id
    }

    // ── Entry points ─────────────────────────────────────────

    pub fn entry_points(&self) -> Vec<EntryPoint> {
        self.instructions
            .iter()
            .filter(|i| i.opcode == op::ENTRY_POINT && i.operands.len() >= 3)
            .map(|i| EntryPoint {
                execution_model: i.operands[0],
                id: i.operands[1],
                name: decode_string(&i.operands[2..]).0,
            })
            .collect()
    }

    pub fn find_entry_point(&self, stage: NativeStage, name: &str) -> Result<EntryPoint, ShaderError> {
        self.entry_points()
            .into_iter()
            .find(|e| e.name == name && e.stage() == Some(stage))
            .ok_or_else(|| ShaderError::EntryPointNotFound {
                name: name.to_string(),
                stage: stage.vk_flag(),
            })
    }

    // ── Decorations ──────────────────────────────────────────

    fn decoration(&self, target: u32, kind: u32) -> Option<u32> {
        self.instructions
            .iter()
            .find(|i| i.opcode == op::DECORATE && i.operands.len() >= 3 && i.operands[0] == target && i.operands[1] == kind)
            .map(|i| i.operands[2])
    }

    fn set_decoration(&mut self, target: u32, kind: u32, value: u32) {
        if let Some(inst) = self
            .instructions
            .iter_mut()
            .find(|i| i.opcode == op::DECORATE && i.operands.len() >= 3 && i.operands[0] == target && i.operands[1] == kind)
        {
            inst.operands[2] = value;
            return;
        }
        let at = self
            .instructions
            .iter()
            .rposition(|i| i.opcode == op::DECORATE || i.opcode == op::MEMBER_DECORATE)
            .map(|p| p + 1)
            .unwrap_or_else(|| self.first_type_index());
        self.instructions
            .insert(at, Instruction::new(op::DECORATE, vec![target, kind, value]));
    }

    fn first_type_index(&self) -> usize {
        self.instructions
            .iter()
            .position(|i| (op::TYPE_VOID..=op::TYPE_POINTER).contains(&i.opcode))
            .unwrap_or(self.instructions.len())
    }

    fn first_function_index(&self) -> usize {
        self.instructions
            .iter()
            .position(|i| i.opcode == op::FUNCTION)
            .unwrap_or(self.instructions.len())
    }

    fn find_def(&self, id: u32) -> Option<&Instruction> {
        self.instructions.iter().find(|i| match i.opcode {
            op::TYPE_IMAGE..=op::TYPE_POINTER => i.operands.first() == Some(&id),
            op::VARIABLE => i.operands.get(1) == Some(&id),
            _ => false,
        })
    }

    fn pointee(&self, pointer_type: u32) -> Option<u32> {
        self.find_def(pointer_type)
            .filter(|i| i.opcode == op::TYPE_POINTER)
            .and_then(|i| i.operands.get(2).copied())
    }

    /// Strip `NonWritable` from a variable and from the members of the
    /// block it points at, so the resource is emitted as writable.
    fn strip_non_writable(&mut self, var: u32, pointer_type: u32) {
        let mut block = self.pointee(pointer_type);
        while let Some(def) = block.and_then(|b| self.find_def(b)) {
            match def.opcode {
                op::TYPE_ARRAY | op::TYPE_RUNTIME_ARRAY => block = def.operands.get(1).copied(),
                _ => break,
            }
        }
        self.instructions.retain(|i| {
            let on_var = i.opcode == op::DECORATE
                && i.operands.len() >= 2
                && i.operands[0] == var
                && i.operands[1] == decoration::NON_WRITABLE;
            let on_member = i.opcode == op::MEMBER_DECORATE
                && i.operands.len() >= 3
                && Some(i.operands[0]) == block
                && i.operands[2] == decoration::NON_WRITABLE;
            !(on_var || on_member)
        });
    }

    // ── Resource variables ───────────────────────────────────

    pub fn resource_variables(&self) -> Vec<ResourceVariable> {
        self.instructions
            .iter()
            .filter(|i| i.opcode == op::VARIABLE && i.operands.len() >= 3)
            .filter_map(|i| {
                let id = i.operands[1];
                Some(ResourceVariable {
                    id,
                    set: self.decoration(id, decoration::DESCRIPTOR_SET)?,
                    binding: self.decoration(id, decoration::BINDING)?,
                    storage_class: i.operands[2],
                })
            })
            .collect()
    }

    fn variable_type(&self, var: u32) -> Option<u32> {
        self.instructions
            .iter()
            .find(|i| i.opcode == op::VARIABLE && i.operands.get(1) == Some(&var))
            .map(|i| i.operands[0])
    }

    // ── Specialization ───────────────────────────────────────

    /// Patch specialization constant values and freeze every specialization
    /// constant into a regular constant.
    pub fn specialize(&mut self, values: &HashMap<u32, Vec<u8>>) {
        let spec_ids: HashMap<u32, u32> = self
            .instructions
            .iter()
            .filter(|i| i.opcode == op::DECORATE && i.operands.len() >= 3 && i.operands[1] == decoration::SPEC_ID)
            .map(|i| (i.operands[0], i.operands[2]))
            .collect();

        for inst in &mut self.instructions {
            let Some(&result) = inst.operands.get(1) else {
                continue;
            };
            let value = spec_ids.get(&result).and_then(|id| values.get(id));
            match inst.opcode {
                op::SPEC_CONSTANT_TRUE | op::SPEC_CONSTANT_FALSE => {
                    let default = inst.opcode == op::SPEC_CONSTANT_TRUE;
                    let truth = value.map(|v| v.iter().any(|b| *b != 0)).unwrap_or(default);
                    inst.opcode = if truth { op::CONSTANT_TRUE } else { op::CONSTANT_FALSE };
                }
                op::SPEC_CONSTANT => {
                    if let Some(data) = value {
                        let word_count = inst.operands.len() - 2;
                        for (i, slot) in inst.operands[2..].iter_mut().enumerate().take(word_count) {
                            let mut word = [0u8; 4];
                            for (j, b) in word.iter_mut().enumerate() {
                                *b = data.get(i * 4 + j).copied().unwrap_or(0);
                            }
                            *slot = u32::from_le_bytes(word);
                        }
                    }
                    inst.opcode = op::CONSTANT;
                }
                op::SPEC_CONSTANT_COMPOSITE => inst.opcode = op::CONSTANT_COMPOSITE,
                _ => {}
            }
        }
        self.instructions
            .retain(|i| !(i.opcode == op::DECORATE && i.operands.get(1) == Some(&decoration::SPEC_ID)));
        trace!("froze {} specialization constants", spec_ids.len());
    }

    // ── Combined image samplers ──────────────────────────────

    fn find_type(&self, opcode: u16, operands: &[u32]) -> Option<u32> {
        self.instructions
            .iter()
            .find(|i| i.opcode == opcode && i.operands.len() == operands.len() + 1 && i.operands[1..] == *operands)
            .map(|i| i.operands[0])
    }

    /// Split every combined image-sampler variable into an image variable
    /// and a sampler variable, so each can take its own register.
    pub fn split_combined_samplers(&mut self) -> Result<usize, ShaderError> {
        let combined: Vec<(u32, u32)> = self
            .instructions
            .iter()
            .filter(|i| i.opcode == op::VARIABLE && i.operands.len() >= 3 && i.operands[2] == storage::UNIFORM_CONSTANT)
            .filter_map(|i| {
                let pointee = self.pointee(i.operands[0])?;
                let def = self.find_def(pointee)?;
                match def.opcode {
                    op::TYPE_SAMPLED_IMAGE => Some((i.operands[1], def.operands[1])),
                    op::TYPE_ARRAY | op::TYPE_RUNTIME_ARRAY => {
                        let element = def.operands.get(1).and_then(|e| self.find_def(*e))?;
                        (element.opcode == op::TYPE_SAMPLED_IMAGE).then_some((i.operands[1], 0))
                    }
                    _ => None,
                }
            })
            .collect();

        for &(var, image_type) in &combined {
            if image_type == 0 {
                return Err(ShaderError::Unsupported(format!(
                    "array of combined image samplers (%{})",
                    var
                )));
            }
            self.split_one(var, image_type)?;
        }
        if !combined.is_empty() {
            debug!("split {} combined image samplers", combined.len());
        }
        Ok(combined.len())
    }

    fn split_one(&mut self, var: u32, image_type: u32) -> Result<(), ShaderError> {
        let escapes = self.instructions.iter().any(|i| match i.opcode {
            op::ACCESS_CHAIN | op::IN_BOUNDS_ACCESS_CHAIN => i.operands.get(2) == Some(&var),
            op::FUNCTION_CALL => i.operands.get(3..).is_some_and(|args| args.contains(&var)),
            _ => false,
        });
        if escapes {
            return Err(ShaderError::Unsupported(format!(
                "combined image sampler %{} passed by pointer",
                var
            )));
        }

        let mut globals = Vec::new();
        let sampler_type = match self.find_type(op::TYPE_SAMPLER, &[]) {
            Some(id) => id,
            None => {
                let id = self.alloc_id();
                globals.push(Instruction::new(op::TYPE_SAMPLER, vec![id]));
                id
            }
        };
        let pointer_to = |module: &mut Self, pointee: u32, globals: &mut Vec<Instruction>| {
            match module.find_type(op::TYPE_POINTER, &[storage::UNIFORM_CONSTANT, pointee]) {
                Some(id) => id,
                None => {
                    let id = module.alloc_id();
                    globals.push(Instruction::new(
                        op::TYPE_POINTER,
                        vec![id, storage::UNIFORM_CONSTANT, pointee],
                    ));
                    id
                }
            }
        };
        let image_pointer = pointer_to(self, image_type, &mut globals);
        let sampler_pointer = pointer_to(self, sampler_type, &mut globals);
        let image_var = self.alloc_id();
        let sampler_var = self.alloc_id();
        globals.push(Instruction::new(
            op::VARIABLE,
            vec![image_pointer, image_var, storage::UNIFORM_CONSTANT],
        ));
        globals.push(Instruction::new(
            op::VARIABLE,
            vec![sampler_pointer, sampler_var, storage::UNIFORM_CONSTANT],
        ));

        let set = self.decoration(var, decoration::DESCRIPTOR_SET);
        let binding = self.decoration(var, decoration::BINDING);

        let mut rewritten = Vec::with_capacity(self.instructions.len() + globals.len());
        let mut pending_globals = Some(globals);
        let mut next_id = self.header[3];
        for inst in std::mem::take(&mut self.instructions) {
            if inst.opcode == op::FUNCTION {
                if let Some(globals) = pending_globals.take() {
                    rewritten.extend(globals);
                }
            }
            match inst.opcode {
                op::VARIABLE if inst.operands.get(1) == Some(&var) => {}
                op::DECORATE if inst.operands.first() == Some(&var) => {}
                op::NAME if inst.operands.first() == Some(&var) => {
                    let (name, _) = decode_string(&inst.operands[1..]);
                    let mut image_name = vec![image_var];
                    image_name.extend(encode_string(&name));
                    let mut sampler_name = vec![sampler_var];
                    sampler_name.extend(encode_string(&format!("{}_sampler", name)));
                    rewritten.push(Instruction::new(op::NAME, image_name));
                    rewritten.push(Instruction::new(op::NAME, sampler_name));
                }
                op::ENTRY_POINT if inst.operands.contains(&var) => {
                    let (_, name_words) = decode_string(&inst.operands[2..]);
                    let mut operands = inst.operands[..2 + name_words].to_vec();
                    for &id in &inst.operands[2 + name_words..] {
                        if id == var {
                            operands.push(image_var);
                            operands.push(sampler_var);
                        } else {
                            operands.push(id);
                        }
                    }
                    rewritten.push(Instruction::new(op::ENTRY_POINT, operands));
                }
                op::LOAD if inst.operands.get(2) == Some(&var) => {
                    let loaded_image = next_id;
                    let loaded_sampler = next_id + 1;
                    next_id += 2;
                    rewritten.push(Instruction::new(op::LOAD, vec![image_type, loaded_image, image_var]));
                    rewritten.push(Instruction::new(op::LOAD, vec![sampler_type, loaded_sampler, sampler_var]));
                    rewritten.push(Instruction::new(
                        op::SAMPLED_IMAGE,
                        vec![inst.operands[0], inst.operands[1], loaded_image, loaded_sampler],
                    ));
                }
                _ => rewritten.push(inst),
            }
        }
        if let Some(globals) = pending_globals {
            rewritten.extend(globals);
        }
        self.instructions = rewritten;
        self.header[3] = next_id;

        for target in [image_var, sampler_var] {
            if let Some(set) = set {
                self.set_decoration(target, decoration::DESCRIPTOR_SET, set);
            }
            if let Some(binding) = binding {
                self.set_decoration(target, decoration::BINDING, binding);
            }
        }
        self.forced.insert(image_var, ResourceClass::ShaderResource);
        self.forced.insert(sampler_var, ResourceClass::Sampler);
        Ok(())
    }

    // ── Binding rewrite ──────────────────────────────────────

    /// Rewrite every resource's (set, binding) to (class group, flat
    /// register) and return the register each rewritten pair lands in.
    ///
    /// Unresolved bindings are moved to [`UNBOUND_GROUP`] when `tolerant` is
    /// set, on registers above every assigned one, and are an error
    /// otherwise. Fragment-stage UAV registers are shifted up by
    /// `uav_offset` to sit above the render targets.
    pub fn remap_bindings(
        &mut self,
        bindings: &ShaderBindings,
        stage: NativeStage,
        uav_offset: u32,
        tolerant: bool,
    ) -> Result<Vec<RegisterBinding>, ShaderError> {
        let mut assigned = Vec::new();
        let mut unbound = Vec::new();
        for var in self.resource_variables() {
            if !matches!(
                var.storage_class,
                storage::UNIFORM_CONSTANT | storage::UNIFORM | storage::STORAGE_BUFFER
            ) {
                continue;
            }
            let Some(slots) = bindings.resolve(var.set, var.binding) else {
                if tolerant {
                    debug!("set {} binding {} left unbound", var.set, var.binding);
                    unbound.push(var.id);
                    continue;
                }
                return Err(ShaderError::UnresolvedBinding {
                    set: var.set,
                    binding: var.binding,
                });
            };
            let class = match self.forced.get(&var.id) {
                Some(class) => *class,
                None => slots.category.primary_class().ok_or_else(|| {
                    ShaderError::Unsupported(format!("{:?} at set {} binding {}", slots.category, var.set, var.binding))
                })?,
            };
            let Some(mut register) = slots.slot(class) else {
                return Err(ShaderError::Unsupported(format!(
                    "{:?} binding {} used as {:?}",
                    slots.category, var.binding, class
                )));
            };
            if class == ResourceClass::UnorderedAccess {
                if stage == NativeStage::Pixel {
                    register += uav_offset;
                }
                if let Some(pointer_type) = self.variable_type(var.id) {
                    self.strip_non_writable(var.id, pointer_type);
                }
            }
            trace!(
                "set {} binding {} -> {}{}",
                var.set,
                var.binding,
                class.register_letter(),
                register
            );
            let target = RegisterBinding::of(class, register);
            self.set_decoration(var.id, decoration::DESCRIPTOR_SET, target.group);
            self.set_decoration(var.id, decoration::BINDING, target.binding);
            assigned.push(target);
        }

        let spare = assigned.iter().map(|t| t.register + 1).max().unwrap_or(0);
        for (n, id) in unbound.into_iter().enumerate() {
            let target = RegisterBinding {
                group: UNBOUND_GROUP,
                binding: n as u32,
                register: spare + n as u32,
            };
            self.set_decoration(id, decoration::DESCRIPTOR_SET, target.group);
            self.set_decoration(id, decoration::BINDING, target.binding);
            assigned.push(target);
        }
        Ok(assigned)
    }

    /// Turn push-constant blocks into uniform blocks at the reserved
    /// constant-buffer slot. Returns whether the module had any.
    pub fn lower_push_constants(&mut self) -> bool {
        let vars: Vec<u32> = self
            .instructions
            .iter_mut()
            .filter(|i| i.opcode == op::VARIABLE && i.operands.get(2) == Some(&storage::PUSH_CONSTANT))
            .map(|i| {
                i.operands[2] = storage::UNIFORM;
                i.operands[1]
            })
            .collect();
        if vars.is_empty() {
            return false;
        }
        for inst in &mut self.instructions {
            if inst.opcode == op::TYPE_POINTER && inst.operands.get(1) == Some(&storage::PUSH_CONSTANT) {
                inst.operands[1] = storage::UNIFORM;
            }
        }
        let target = push_constant_binding();
        for var in vars {
            self.set_decoration(var, decoration::DESCRIPTOR_SET, target.group);
            self.set_decoration(var, decoration::BINDING, target.binding);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembled fragment module:
    /// `uniform sampler2D tex` at set 1 binding 3, loaded once in `main`,
    /// plus a spec constant with SpecId 7.
    fn combined_module() -> Vec<u8> {
        let mut words = vec![MAGIC, 0x0001_0000, 0, 100, 0];
        let mut push = |opcode: u16, operands: &[u32]| {
            words.push(((operands.len() as u32 + 1) << 16) | opcode as u32);
            words.extend_from_slice(operands);
        };
        let mut entry = vec![4, 1];
        entry.extend(encode_string("main"));
        push(op::ENTRY_POINT, &entry);
        let mut name = vec![10];
        name.extend(encode_string("tex"));
        push(op::NAME, &name);
        push(op::DECORATE, &[10, decoration::DESCRIPTOR_SET, 1]);
        push(op::DECORATE, &[10, decoration::BINDING, 3]);
        push(op::DECORATE, &[20, decoration::SPEC_ID, 7]);
        push(22, &[2, 32]); // OpTypeFloat
        push(op::TYPE_IMAGE, &[3, 2, 1, 0, 0, 0, 1, 0]);
        push(op::TYPE_SAMPLED_IMAGE, &[4, 3]);
        push(op::TYPE_POINTER, &[5, storage::UNIFORM_CONSTANT, 4]);
        push(21, &[6, 32, 0]); // OpTypeInt
        push(op::SPEC_CONSTANT, &[6, 20, 1]);
        push(op::VARIABLE, &[5, 10, storage::UNIFORM_CONSTANT]);
        push(19, &[7]); // OpTypeVoid
        push(op::FUNCTION, &[7, 1, 0, 8]);
        push(248, &[11]); // OpLabel
        push(op::LOAD, &[4, 12, 10]);
        push(253, &[]); // OpReturn
        push(56, &[]); // OpFunctionEnd
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn rejects_bad_magic() {
        let err = SpirvModule::parse(&[0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ShaderError::InvalidSpirv(_)));
    }

    #[test]
    fn serialization_is_lossless() {
        let bytes = combined_module();
        let module = SpirvModule::parse(&bytes).unwrap();
        assert_eq!(module.to_bytes(), bytes);
        assert_eq!(module.version(), (1, 0));
    }

    #[test]
    fn finds_entry_point_by_stage_and_name() {
        let module = SpirvModule::parse(&combined_module()).unwrap();
        assert_eq!(module.find_entry_point(NativeStage::Pixel, "main").unwrap().id, 1);
        assert!(matches!(
            module.find_entry_point(NativeStage::Vertex, "main"),
            Err(ShaderError::EntryPointNotFound { .. })
        ));
    }

    #[test]
    fn specialization_patches_and_freezes() {
        let mut module = SpirvModule::parse(&combined_module()).unwrap();
        let values = HashMap::from([(7, 42u32.to_le_bytes().to_vec())]);
        module.specialize(&values);
        let constant = module.instructions.iter().find(|i| i.operands.get(1) == Some(&20)).unwrap();
        assert_eq!(constant.opcode, op::CONSTANT);
        assert_eq!(constant.operands[2], 42);
        assert!(module.decoration(20, decoration::SPEC_ID).is_none());
    }

    #[test]
    fn combined_sampler_splits_into_two_variables() {
        let mut module = SpirvModule::parse(&combined_module()).unwrap();
        assert_eq!(module.split_combined_samplers().unwrap(), 1);
        let vars = module.resource_variables();
        assert_eq!(vars.len(), 2);
        assert!(vars.iter().all(|v| v.set == 1 && v.binding == 3));
        assert!(module.instructions.iter().any(|i| i.opcode == op::SAMPLED_IMAGE && i.operands[1] == 12));
        assert!(module.instructions.iter().all(|i| !(i.opcode == op::VARIABLE && i.operands[1] == 10)));
        // The re-serialized module still parses.
        SpirvModule::parse(&module.to_bytes()).unwrap();
    }

    #[test]
    fn remapped_classes_keep_distinct_bindings() {
        use std::sync::Arc;

        use ash::vk;
        use vkbridge_core::FeatureLevel;

        use crate::layout::{DescriptorSetLayout, PipelineLayout, SetLayoutBinding};

        let set1 = DescriptorSetLayout::new(&[SetLayoutBinding {
            binding: 3,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            immutable_samplers: Vec::new(),
        }])
        .unwrap();
        let layout = PipelineLayout::new(
            vec![Arc::new(DescriptorSetLayout::new(&[]).unwrap()), Arc::new(set1)],
            Vec::new(),
            FeatureLevel::L11_0,
        )
        .unwrap();

        let mut module = SpirvModule::parse(&combined_module()).unwrap();
        module.split_combined_samplers().unwrap();
        let mut targets = module
            .remap_bindings(layout.get_shader_bindings(), NativeStage::Pixel, 0, false)
            .unwrap();
        targets.sort();
        assert_eq!(
            targets,
            vec![
                RegisterBinding::of(ResourceClass::Sampler, 0),
                RegisterBinding::of(ResourceClass::ShaderResource, 0),
            ]
        );
        // Both halves sit on register 0 without sharing a (set, binding).
        let mut pairs: Vec<(u32, u32)> = module.resource_variables().iter().map(|v| (v.set, v.binding)).collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn tolerant_unbound_variables_get_spare_registers() {
        let layout = crate::layout::PipelineLayout::new(Vec::new(), Vec::new(), vkbridge_core::FeatureLevel::L11_0).unwrap();
        let mut module = SpirvModule::parse(&combined_module()).unwrap();
        let targets = module
            .remap_bindings(layout.get_shader_bindings(), NativeStage::Pixel, 0, true)
            .unwrap();
        assert_eq!(
            targets,
            vec![RegisterBinding {
                group: UNBOUND_GROUP,
                binding: 0,
                register: 0,
            }]
        );
    }
}
