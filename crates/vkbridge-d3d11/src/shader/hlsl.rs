//! Fix-ups applied to naga's HLSL before native compilation.
//!
//! naga reaches samplers through a sampler heap indexed by a per-group
//! `StructuredBuffer<uint>`. Shader Model 5.0 has neither, so each sampler is
//! declared directly on the register its heap index names.

use crate::error::ShaderError;

const SAMPLER_HEAP: &str = "nagaSamplerHeap";
const COMPARISON_SAMPLER_HEAP: &str = "nagaComparisonSamplerHeap";

pub fn bind_samplers_directly(source: &str) -> Result<String, ShaderError> {
    if !source.contains(SAMPLER_HEAP) && !source.contains(COMPARISON_SAMPLER_HEAP) {
        return Ok(source.to_string());
    }
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if is_heap_declaration(trimmed) {
            continue;
        }
        match direct_sampler(trimmed) {
            Some(declaration) => out.push_str(&declaration),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    // Sampler arrays index the heap at run time.
    if out.contains(SAMPLER_HEAP) || out.contains(COMPARISON_SAMPLER_HEAP) {
        return Err(ShaderError::Unsupported("arrays of samplers".into()));
    }
    Ok(out)
}

fn is_heap_declaration(line: &str) -> bool {
    line.starts_with(&format!("SamplerState {}[", SAMPLER_HEAP))
        || line.starts_with(&format!("SamplerComparisonState {}[", COMPARISON_SAMPLER_HEAP))
        || (line.starts_with("StructuredBuffer<uint> nagaGroup") && line.contains("SamplerIndexArray"))
}

/// `static const SamplerState s = nagaSamplerHeap[index[3]];` becomes
/// `SamplerState s : register(s3);`.
fn direct_sampler(line: &str) -> Option<String> {
    let rest = line.strip_prefix("static const ")?;
    let (ty, rest) = rest.split_once(' ')?;
    if ty != "SamplerState" && ty != "SamplerComparisonState" {
        return None;
    }
    let (name, value) = rest.split_once(" = ")?;
    let (heap, index) = value.strip_suffix("];")?.split_once('[')?;
    if heap != SAMPLER_HEAP && heap != COMPARISON_SAMPLER_HEAP {
        return None;
    }
    let register: u32 = index.rsplit_once('[')?.1.strip_suffix(']')?.parse().ok()?;
    Some(format!("{} {} : register(s{});", ty, name, register))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAP_SOURCE: &str = "\
SamplerState nagaSamplerHeap[2048]: register(s0, space0);
SamplerComparisonState nagaComparisonSamplerHeap[2048]: register(s0, space1);
StructuredBuffer<uint> nagaGroup0SamplerIndexArray : register(t0, space255);
static const SamplerState linear_clamp = nagaSamplerHeap[nagaGroup0SamplerIndexArray[2]];
static const SamplerComparisonState shadow = nagaComparisonSamplerHeap[nagaGroup0SamplerIndexArray[5]];
Texture2D<float4> albedo : register(t1);
";

    #[test]
    fn heap_samplers_become_registers() {
        let out = bind_samplers_directly(HEAP_SOURCE).unwrap();
        assert!(out.contains("SamplerState linear_clamp : register(s2);"));
        assert!(out.contains("SamplerComparisonState shadow : register(s5);"));
        assert!(out.contains("Texture2D<float4> albedo : register(t1);"));
        assert!(!out.contains("space"));
        assert!(!out.contains("SamplerIndexArray"));
    }

    #[test]
    fn sampler_arrays_are_unsupported() {
        let source = "\
SamplerState nagaSamplerHeap[2048]: register(s0, space0);
StructuredBuffer<uint> nagaGroup0SamplerIndexArray : register(t0, space255);
static const uint samplers = 0;
float4 f(uint i) { return t.Sample(nagaSamplerHeap[nagaGroup0SamplerIndexArray[samplers + i]], 0.5); }
";
        assert!(matches!(bind_samplers_directly(source), Err(ShaderError::Unsupported(_))));
    }

    #[test]
    fn source_without_samplers_is_unchanged() {
        let source = "cbuffer tint : register(b0) { float4 color; }\n";
        assert_eq!(bind_samplers_directly(source).unwrap(), source);
    }
}
