//! Headless recording backend.
//!
//! `NullDevice` creates no GPU objects. Every context call is appended to a
//! [`NativeCall`] log and applied to a [`BoundState`] slot table so callers
//! can inspect exactly what the translation layer asked of the backend.
//! Buffers keep their contents in host memory, so writes and buffer copies
//! can be read back.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use vkbridge_core::FeatureLevel;

use super::*;

/// One recorded context call.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    SetShader {
        stage: NativeStage,
        shader: Option<NativeShader>,
    },
    SetShaderResources {
        stage: NativeStage,
        start_slot: u32,
        views: Vec<Option<ShaderResourceView>>,
    },
    SetSamplers {
        stage: NativeStage,
        start_slot: u32,
        samplers: Vec<Option<SamplerState>>,
    },
    SetConstantBuffers {
        stage: NativeStage,
        start_slot: u32,
        buffers: Vec<Option<NativeBuffer>>,
    },
    SetConstantBuffers1 {
        stage: NativeStage,
        start_slot: u32,
        buffers: Vec<Option<NativeBuffer>>,
        first_constant: Vec<u32>,
        num_constants: Vec<u32>,
    },
    CsSetUnorderedAccessViews {
        start_slot: u32,
        views: Vec<Option<UnorderedAccessView>>,
    },
    OmSetRenderTargets {
        targets: Vec<Option<RenderTargetView>>,
        depth_stencil: Option<DepthStencilView>,
    },
    OmSetUnorderedAccessViews {
        uav_start: u32,
        views: Vec<Option<UnorderedAccessView>>,
    },
    OmSetBlendState {
        state: Option<BlendState>,
        factor: [f32; 4],
        sample_mask: u32,
    },
    OmSetDepthStencilState {
        state: Option<DepthStencilState>,
        stencil_ref: u32,
    },
    IaSetInputLayout(Option<InputLayout>),
    IaSetPrimitiveTopology(PrimitiveTopology),
    IaSetVertexBuffers {
        start_slot: u32,
        buffers: Vec<Option<NativeBuffer>>,
        strides: Vec<u32>,
        offsets: Vec<u32>,
    },
    IaSetIndexBuffer {
        buffer: Option<NativeBuffer>,
        format: IndexFormat,
        offset: u32,
    },
    RsSetState(Option<RasterizerState>),
    RsSetViewports(Vec<Viewport>),
    RsSetScissorRects(Vec<Rect>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        args: NativeBuffer,
        offset: u32,
    },
    DrawIndexedIndirect {
        args: NativeBuffer,
        offset: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        args: NativeBuffer,
        offset: u32,
    },
    CopyResource {
        dst: NativeResource,
        src: NativeResource,
    },
    CopySubresourceRegion {
        dst: NativeResource,
        dst_subresource: u32,
        dst_origin: [u32; 3],
        src: NativeResource,
        src_subresource: u32,
        src_box: Option<NativeBox>,
    },
    CopyBufferToTexture {
        dst: NativeTexture,
        dst_subresource: u32,
        dst_box: NativeBox,
        src: NativeBuffer,
        footprint: BufferFootprint,
    },
    CopyTextureToBuffer {
        dst: NativeBuffer,
        footprint: BufferFootprint,
        src: NativeTexture,
        src_subresource: u32,
        src_box: NativeBox,
    },
    UpdateSubresource {
        dst: NativeResource,
        subresource: u32,
        dst_box: Option<NativeBox>,
        data: Vec<u8>,
    },
    ResolveSubresource {
        dst: NativeTexture,
        dst_subresource: u32,
        src: NativeTexture,
        src_subresource: u32,
        format: DxgiFormat,
    },
    ClearRenderTargetView {
        view: RenderTargetView,
        color: [f32; 4],
    },
    ClearDepthStencilView {
        view: DepthStencilView,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    ClearUnorderedAccessViewUint {
        view: UnorderedAccessView,
        values: [u32; 4],
    },
    ClearUnorderedAccessViewFloat {
        view: UnorderedAccessView,
        values: [f32; 4],
    },
    ClearView {
        view: RenderTargetView,
        color: [f32; 4],
        rects: Vec<Rect>,
    },
    GenerateMips(ShaderResourceView),
    WriteDiscard {
        buffer: NativeBuffer,
        offset: u32,
        data: Vec<u8>,
    },
    BeginQuery(NativeQuery),
    EndQuery(NativeQuery),
    Flush,
}

impl NativeCall {
    /// Whether the call binds pipeline state rather than doing work.
    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            NativeCall::SetShader { .. }
                | NativeCall::SetShaderResources { .. }
                | NativeCall::SetSamplers { .. }
                | NativeCall::SetConstantBuffers { .. }
                | NativeCall::SetConstantBuffers1 { .. }
                | NativeCall::CsSetUnorderedAccessViews { .. }
                | NativeCall::OmSetRenderTargets { .. }
                | NativeCall::OmSetUnorderedAccessViews { .. }
                | NativeCall::OmSetBlendState { .. }
                | NativeCall::OmSetDepthStencilState { .. }
                | NativeCall::IaSetInputLayout(_)
                | NativeCall::IaSetPrimitiveTopology(_)
                | NativeCall::IaSetVertexBuffers { .. }
                | NativeCall::IaSetIndexBuffer { .. }
                | NativeCall::RsSetState(_)
                | NativeCall::RsSetViewports(_)
                | NativeCall::RsSetScissorRects(_)
        )
    }
}

/// A constant buffer bound to a slot. `num_constants == None` binds the whole
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundConstantBuffer {
    pub buffer: NativeBuffer,
    pub first_constant: u32,
    pub num_constants: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageBindings {
    pub shader: Option<NativeShader>,
    pub shader_resources: BTreeMap<u32, ShaderResourceView>,
    pub samplers: BTreeMap<u32, SamplerState>,
    pub constant_buffers: BTreeMap<u32, BoundConstantBuffer>,
}

impl StageBindings {
    pub fn is_empty(&self) -> bool {
        self.shader.is_none()
            && self.shader_resources.is_empty()
            && self.samplers.is_empty()
            && self.constant_buffers.is_empty()
    }
}

/// Current binding state of the recording context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundState {
    pub stages: [StageBindings; 6],
    pub compute_uavs: BTreeMap<u32, UnorderedAccessView>,
    /// Pixel-stage UAVs keyed by absolute slot (uav_start + index).
    pub pixel_uavs: BTreeMap<u32, UnorderedAccessView>,
    pub uav_start: u32,
    pub render_targets: Vec<Option<RenderTargetView>>,
    pub depth_stencil: Option<DepthStencilView>,
    pub vertex_buffers: BTreeMap<u32, (NativeBuffer, u32, u32)>,
    pub index_buffer: Option<(NativeBuffer, IndexFormat, u32)>,
    pub input_layout: Option<InputLayout>,
    pub topology: Option<PrimitiveTopology>,
    pub rasterizer: Option<RasterizerState>,
    pub blend: Option<(BlendState, [f32; 4])>,
    pub depth_stencil_state: Option<(DepthStencilState, u32)>,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Rect>,
}

impl BoundState {
    pub fn stage(&self, stage: NativeStage) -> &StageBindings {
        &self.stages[stage.index()]
    }
}

fn assign<T: Copy>(table: &mut BTreeMap<u32, T>, start: u32, items: &[Option<T>]) {
    for (i, item) in items.iter().enumerate() {
        let slot = start + i as u32;
        match item {
            Some(v) => {
                table.insert(slot, *v);
            }
            None => {
                table.remove(&slot);
            }
        }
    }
}

/// A native object known to the null device.
#[derive(Debug, Clone, PartialEq)]
pub enum NullObject {
    Buffer { desc: BufferDesc, contents: Vec<u8> },
    Texture(TextureDesc),
    ShaderResourceView { resource: NativeResource, desc: ViewDesc },
    UnorderedAccessView { resource: NativeResource, desc: ViewDesc },
    RenderTargetView { texture: NativeTexture, desc: ViewDesc },
    DepthStencilView { texture: NativeTexture, desc: ViewDesc },
    Sampler(SamplerDesc),
    Shader { stage: NativeStage, bytecode: Vec<u8> },
    InputLayout(Vec<InputElement>),
    Rasterizer(RasterizerDesc),
    Blend(BlendDesc),
    DepthStencil(DepthStencilDesc),
    Query(QueryKind),
}

#[derive(Debug, Default)]
struct QueryRecord {
    ended: bool,
    polls: u32,
    value: u64,
}

struct NullState {
    feature_level: FeatureLevel,
    next_id: AtomicU64,
    objects: Mutex<HashMap<u64, NullObject>>,
    calls: Mutex<Vec<NativeCall>>,
    bound: Mutex<BoundState>,
    queries: Mutex<HashMap<u64, QueryRecord>>,
    query_latency: AtomicU32,
    fail_views: AtomicBool,
    clock: AtomicU64,
    compiler: PassthroughCompiler,
}

impl NullState {
    fn insert(&self, object: NullObject) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects.lock().insert(id, object);
        id
    }

    fn record(&self, call: NativeCall) {
        trace!("native call: {:?}", call);
        self.calls.lock().push(call);
    }
}

/// Headless device.
#[derive(Clone)]
pub struct NullDevice {
    state: Arc<NullState>,
}

impl NullDevice {
    pub fn new(feature_level: FeatureLevel) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(NullState {
                feature_level,
                next_id: AtomicU64::new(0x100),
                objects: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                bound: Mutex::new(BoundState::default()),
                queries: Mutex::new(HashMap::new()),
                query_latency: AtomicU32::new(0),
                fail_views: AtomicBool::new(false),
                clock: AtomicU64::new(1),
                compiler: PassthroughCompiler,
            }),
        })
    }

    /// Snapshot of every context call recorded so far.
    pub fn calls(&self) -> Vec<NativeCall> {
        self.state.calls.lock().clone()
    }

    /// Return and clear the call log.
    pub fn take_calls(&self) -> Vec<NativeCall> {
        std::mem::take(&mut *self.state.calls.lock())
    }

    pub fn bound(&self) -> BoundState {
        self.state.bound.lock().clone()
    }

    pub fn object(&self, raw: u64) -> Option<NullObject> {
        self.state.objects.lock().get(&raw).cloned()
    }

    /// Number of native objects not yet released.
    pub fn live_objects(&self) -> usize {
        self.state.objects.lock().len()
    }

    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<Vec<u8>> {
        match self.state.objects.lock().get(&buffer.0) {
            Some(NullObject::Buffer { contents, .. }) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Number of polls a query stays unavailable after it ends.
    /// `u32::MAX` keeps queries pending forever.
    pub fn set_query_latency(&self, polls: u32) {
        self.state.query_latency.store(polls, Ordering::Relaxed);
    }

    /// Make every subsequent view creation fail.
    pub fn fail_view_creation(&self, fail: bool) {
        self.state.fail_views.store(fail, Ordering::Relaxed);
    }

    fn create_view(&self, kind: &'static str, object: NullObject) -> Result<u64, NativeError> {
        if self.state.fail_views.load(Ordering::Relaxed) {
            return Err(NativeError::CreationFailed {
                kind,
                reason: "view creation disabled".to_string(),
            });
        }
        Ok(self.state.insert(object))
    }

    fn require_resource(&self, raw: u64, kind: &'static str) -> Result<(), NativeError> {
        if self.state.objects.lock().contains_key(&raw) {
            Ok(())
        } else {
            Err(NativeError::CreationFailed {
                kind,
                reason: format!("unknown resource {:#x}", raw),
            })
        }
    }
}

impl NativeDevice for NullDevice {
    fn feature_level(&self) -> FeatureLevel {
        self.state.feature_level
    }

    fn create_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>) -> Result<NativeBuffer, NativeError> {
        if desc.size == 0 {
            return Err(NativeError::CreationFailed {
                kind: NativeBuffer::KIND,
                reason: "zero-sized buffer".to_string(),
            });
        }
        if desc.bind.contains(BindFlags::UNORDERED_ACCESS) && !self.state.feature_level.supports_uav() {
            return Err(NativeError::FeatureLevel {
                what: "unordered access",
                required: FeatureLevel::L11_0,
                actual: self.state.feature_level,
            });
        }
        let mut contents = vec![0u8; desc.size as usize];
        if let Some(data) = initial {
            let n = data.len().min(contents.len());
            contents[..n].copy_from_slice(&data[..n]);
        }
        let id = self.state.insert(NullObject::Buffer {
            desc: desc.clone(),
            contents,
        });
        Ok(NativeBuffer(id))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<NativeTexture, NativeError> {
        if desc.format.is_unknown() {
            return Err(NativeError::CreationFailed {
                kind: NativeTexture::KIND,
                reason: "unknown format".to_string(),
            });
        }
        Ok(NativeTexture(self.state.insert(NullObject::Texture(desc.clone()))))
    }

    fn create_shader_resource_view(
        &self,
        resource: NativeResource,
        desc: &ViewDesc,
    ) -> Result<ShaderResourceView, NativeError> {
        self.require_resource(resource.raw(), ShaderResourceView::KIND)?;
        let id = self.create_view(
            ShaderResourceView::KIND,
            NullObject::ShaderResourceView {
                resource,
                desc: desc.clone(),
            },
        )?;
        Ok(ShaderResourceView(id))
    }

    fn create_unordered_access_view(
        &self,
        resource: NativeResource,
        desc: &ViewDesc,
    ) -> Result<UnorderedAccessView, NativeError> {
        if !self.state.feature_level.supports_uav() {
            return Err(NativeError::FeatureLevel {
                what: "unordered access views",
                required: FeatureLevel::L11_0,
                actual: self.state.feature_level,
            });
        }
        self.require_resource(resource.raw(), UnorderedAccessView::KIND)?;
        let id = self.create_view(
            UnorderedAccessView::KIND,
            NullObject::UnorderedAccessView {
                resource,
                desc: desc.clone(),
            },
        )?;
        Ok(UnorderedAccessView(id))
    }

    fn create_render_target_view(
        &self,
        texture: NativeTexture,
        desc: &ViewDesc,
    ) -> Result<RenderTargetView, NativeError> {
        self.require_resource(texture.0, RenderTargetView::KIND)?;
        let id = self.create_view(
            RenderTargetView::KIND,
            NullObject::RenderTargetView {
                texture,
                desc: desc.clone(),
            },
        )?;
        Ok(RenderTargetView(id))
    }

    fn create_depth_stencil_view(
        &self,
        texture: NativeTexture,
        desc: &ViewDesc,
    ) -> Result<DepthStencilView, NativeError> {
        self.require_resource(texture.0, DepthStencilView::KIND)?;
        let id = self.create_view(
            DepthStencilView::KIND,
            NullObject::DepthStencilView {
                texture,
                desc: desc.clone(),
            },
        )?;
        Ok(DepthStencilView(id))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerState, NativeError> {
        Ok(SamplerState(self.state.insert(NullObject::Sampler(desc.clone()))))
    }

    fn create_shader(&self, stage: NativeStage, bytecode: &[u8]) -> Result<NativeShader, NativeError> {
        Ok(NativeShader(self.state.insert(NullObject::Shader {
            stage,
            bytecode: bytecode.to_vec(),
        })))
    }

    fn create_input_layout(&self, elements: &[InputElement], _vertex_bytecode: &[u8]) -> Result<InputLayout, NativeError> {
        Ok(InputLayout(self.state.insert(NullObject::InputLayout(elements.to_vec()))))
    }

    fn create_rasterizer_state(&self, desc: &RasterizerDesc) -> Result<RasterizerState, NativeError> {
        Ok(RasterizerState(self.state.insert(NullObject::Rasterizer(desc.clone()))))
    }

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<BlendState, NativeError> {
        Ok(BlendState(self.state.insert(NullObject::Blend(desc.clone()))))
    }

    fn create_depth_stencil_state(&self, desc: &DepthStencilDesc) -> Result<DepthStencilState, NativeError> {
        Ok(DepthStencilState(self.state.insert(NullObject::DepthStencil(desc.clone()))))
    }

    fn create_query(&self, kind: QueryKind) -> Result<NativeQuery, NativeError> {
        let id = self.state.insert(NullObject::Query(kind));
        self.state.queries.lock().insert(id, QueryRecord::default());
        Ok(NativeQuery(id))
    }

    fn release(&self, raw: u64) {
        self.state.objects.lock().remove(&raw);
        self.state.queries.lock().remove(&raw);
    }

    fn immediate_context(&self) -> Box<dyn DeviceContext> {
        Box::new(RecordingContext {
            state: self.state.clone(),
        })
    }

    fn shader_compiler(&self) -> &dyn ShaderCompiler {
        &self.state.compiler
    }
}

/// Immediate context of a [`NullDevice`]. Provides the extended interface at
/// feature level 11_1.
pub struct RecordingContext {
    state: Arc<NullState>,
}

impl RecordingContext {
    fn bound(&self) -> parking_lot::MutexGuard<'_, BoundState> {
        self.state.bound.lock()
    }

    fn copy_buffer_bytes(&self, dst: u64, dst_offset: usize, src: u64, range: Option<(usize, usize)>) {
        let mut objects = self.state.objects.lock();
        let data = match objects.get(&src) {
            Some(NullObject::Buffer { contents, .. }) => match range {
                Some((start, end)) => contents.get(start..end.min(contents.len())).map(<[u8]>::to_vec),
                None => Some(contents.clone()),
            },
            _ => None,
        };
        if let (Some(data), Some(NullObject::Buffer { contents, .. })) = (data, objects.get_mut(&dst)) {
            let end = (dst_offset + data.len()).min(contents.len());
            if dst_offset < end {
                contents[dst_offset..end].copy_from_slice(&data[..end - dst_offset]);
            }
        }
    }
}

impl DeviceContext for RecordingContext {
    fn set_shader(&mut self, stage: NativeStage, shader: Option<NativeShader>) {
        self.bound().stages[stage.index()].shader = shader;
        self.state.record(NativeCall::SetShader { stage, shader });
    }

    fn set_shader_resources(&mut self, stage: NativeStage, start_slot: u32, views: &[Option<ShaderResourceView>]) {
        assign(&mut self.bound().stages[stage.index()].shader_resources, start_slot, views);
        self.state.record(NativeCall::SetShaderResources {
            stage,
            start_slot,
            views: views.to_vec(),
        });
    }

    fn set_samplers(&mut self, stage: NativeStage, start_slot: u32, samplers: &[Option<SamplerState>]) {
        assign(&mut self.bound().stages[stage.index()].samplers, start_slot, samplers);
        self.state.record(NativeCall::SetSamplers {
            stage,
            start_slot,
            samplers: samplers.to_vec(),
        });
    }

    fn set_constant_buffers(&mut self, stage: NativeStage, start_slot: u32, buffers: &[Option<NativeBuffer>]) {
        let entries: Vec<Option<BoundConstantBuffer>> = buffers
            .iter()
            .map(|b| {
                b.map(|buffer| BoundConstantBuffer {
                    buffer,
                    first_constant: 0,
                    num_constants: None,
                })
            })
            .collect();
        assign(&mut self.bound().stages[stage.index()].constant_buffers, start_slot, &entries);
        self.state.record(NativeCall::SetConstantBuffers {
            stage,
            start_slot,
            buffers: buffers.to_vec(),
        });
    }

    fn cs_set_unordered_access_views(&mut self, start_slot: u32, views: &[Option<UnorderedAccessView>]) {
        assign(&mut self.bound().compute_uavs, start_slot, views);
        self.state.record(NativeCall::CsSetUnorderedAccessViews {
            start_slot,
            views: views.to_vec(),
        });
    }

    fn om_set_render_targets(&mut self, targets: &[Option<RenderTargetView>], depth_stencil: Option<DepthStencilView>) {
        {
            let mut bound = self.bound();
            bound.render_targets = targets.to_vec();
            bound.depth_stencil = depth_stencil;
        }
        self.state.record(NativeCall::OmSetRenderTargets {
            targets: targets.to_vec(),
            depth_stencil,
        });
    }

    fn om_set_unordered_access_views(&mut self, uav_start: u32, views: &[Option<UnorderedAccessView>]) {
        {
            let mut bound = self.bound();
            // The pixel-stage UAV range is replaced as a whole
            bound.pixel_uavs.clear();
            bound.uav_start = uav_start;
            assign(&mut bound.pixel_uavs, uav_start, views);
        }
        self.state.record(NativeCall::OmSetUnorderedAccessViews {
            uav_start,
            views: views.to_vec(),
        });
    }

    fn om_set_blend_state(&mut self, state: Option<BlendState>, factor: [f32; 4], sample_mask: u32) {
        self.bound().blend = state.map(|s| (s, factor));
        self.state.record(NativeCall::OmSetBlendState {
            state,
            factor,
            sample_mask,
        });
    }

    fn om_set_depth_stencil_state(&mut self, state: Option<DepthStencilState>, stencil_ref: u32) {
        self.bound().depth_stencil_state = state.map(|s| (s, stencil_ref));
        self.state.record(NativeCall::OmSetDepthStencilState { state, stencil_ref });
    }

    fn ia_set_input_layout(&mut self, layout: Option<InputLayout>) {
        self.bound().input_layout = layout;
        self.state.record(NativeCall::IaSetInputLayout(layout));
    }

    fn ia_set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bound().topology = Some(topology);
        self.state.record(NativeCall::IaSetPrimitiveTopology(topology));
    }

    fn ia_set_vertex_buffers(&mut self, start_slot: u32, buffers: &[Option<NativeBuffer>], strides: &[u32], offsets: &[u32]) {
        {
            let mut bound = self.bound();
            for (i, buffer) in buffers.iter().enumerate() {
                let slot = start_slot + i as u32;
                match buffer {
                    Some(b) => {
                        let stride = strides.get(i).copied().unwrap_or(0);
                        let offset = offsets.get(i).copied().unwrap_or(0);
                        bound.vertex_buffers.insert(slot, (*b, stride, offset));
                    }
                    None => {
                        bound.vertex_buffers.remove(&slot);
                    }
                }
            }
        }
        self.state.record(NativeCall::IaSetVertexBuffers {
            start_slot,
            buffers: buffers.to_vec(),
            strides: strides.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn ia_set_index_buffer(&mut self, buffer: Option<NativeBuffer>, format: IndexFormat, offset: u32) {
        self.bound().index_buffer = buffer.map(|b| (b, format, offset));
        self.state.record(NativeCall::IaSetIndexBuffer { buffer, format, offset });
    }

    fn rs_set_state(&mut self, state: Option<RasterizerState>) {
        self.bound().rasterizer = state;
        self.state.record(NativeCall::RsSetState(state));
    }

    fn rs_set_viewports(&mut self, viewports: &[Viewport]) {
        self.bound().viewports = viewports.to_vec();
        self.state.record(NativeCall::RsSetViewports(viewports.to_vec()));
    }

    fn rs_set_scissor_rects(&mut self, rects: &[Rect]) {
        self.bound().scissors = rects.to_vec();
        self.state.record(NativeCall::RsSetScissorRects(rects.to_vec()));
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.state.record(NativeCall::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.state.record(NativeCall::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn draw_instanced_indirect(&mut self, args: NativeBuffer, offset: u32) {
        self.state.record(NativeCall::DrawIndirect { args, offset });
    }

    fn draw_indexed_instanced_indirect(&mut self, args: NativeBuffer, offset: u32) {
        self.state.record(NativeCall::DrawIndexedIndirect { args, offset });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.state.record(NativeCall::Dispatch { x, y, z });
    }

    fn dispatch_indirect(&mut self, args: NativeBuffer, offset: u32) {
        self.state.record(NativeCall::DispatchIndirect { args, offset });
    }

    fn copy_resource(&mut self, dst: NativeResource, src: NativeResource) {
        if let (NativeResource::Buffer(d), NativeResource::Buffer(s)) = (dst, src) {
            self.copy_buffer_bytes(d.0, 0, s.0, None);
        }
        self.state.record(NativeCall::CopyResource { dst, src });
    }

    fn copy_subresource_region(
        &mut self,
        dst: NativeResource,
        dst_subresource: u32,
        dst_origin: [u32; 3],
        src: NativeResource,
        src_subresource: u32,
        src_box: Option<NativeBox>,
    ) {
        if let (NativeResource::Buffer(d), NativeResource::Buffer(s)) = (dst, src) {
            let range = src_box.map(|b| (b.left as usize, b.right as usize));
            self.copy_buffer_bytes(d.0, dst_origin[0] as usize, s.0, range);
        }
        self.state.record(NativeCall::CopySubresourceRegion {
            dst,
            dst_subresource,
            dst_origin,
            src,
            src_subresource,
            src_box,
        });
    }

    fn copy_buffer_to_texture(
        &mut self,
        dst: NativeTexture,
        dst_subresource: u32,
        dst_box: NativeBox,
        src: NativeBuffer,
        footprint: BufferFootprint,
    ) {
        self.state.record(NativeCall::CopyBufferToTexture {
            dst,
            dst_subresource,
            dst_box,
            src,
            footprint,
        });
    }

    fn copy_texture_to_buffer(
        &mut self,
        dst: NativeBuffer,
        footprint: BufferFootprint,
        src: NativeTexture,
        src_subresource: u32,
        src_box: NativeBox,
    ) {
        self.state.record(NativeCall::CopyTextureToBuffer {
            dst,
            footprint,
            src,
            src_subresource,
            src_box,
        });
    }

    fn update_subresource(
        &mut self,
        dst: NativeResource,
        subresource: u32,
        dst_box: Option<NativeBox>,
        data: &[u8],
        _row_pitch: u32,
        _depth_pitch: u32,
    ) {
        if let NativeResource::Buffer(b) = dst {
            if let Some(NullObject::Buffer { contents, .. }) = self.state.objects.lock().get_mut(&b.0) {
                let start = dst_box.map(|b| b.left as usize).unwrap_or(0);
                let end = (start + data.len()).min(contents.len());
                if start < end {
                    contents[start..end].copy_from_slice(&data[..end - start]);
                }
            }
        }
        self.state.record(NativeCall::UpdateSubresource {
            dst,
            subresource,
            dst_box,
            data: data.to_vec(),
        });
    }

    fn resolve_subresource(
        &mut self,
        dst: NativeTexture,
        dst_subresource: u32,
        src: NativeTexture,
        src_subresource: u32,
        format: DxgiFormat,
    ) {
        self.state.record(NativeCall::ResolveSubresource {
            dst,
            dst_subresource,
            src,
            src_subresource,
            format,
        });
    }

    fn clear_render_target_view(&mut self, view: RenderTargetView, color: [f32; 4]) {
        self.state.record(NativeCall::ClearRenderTargetView { view, color });
    }

    fn clear_depth_stencil_view(&mut self, view: DepthStencilView, flags: ClearFlags, depth: f32, stencil: u8) {
        self.state.record(NativeCall::ClearDepthStencilView {
            view,
            flags,
            depth,
            stencil,
        });
    }

    fn clear_unordered_access_view_uint(&mut self, view: UnorderedAccessView, values: [u32; 4]) {
        self.state.record(NativeCall::ClearUnorderedAccessViewUint { view, values });
    }

    fn clear_unordered_access_view_float(&mut self, view: UnorderedAccessView, values: [f32; 4]) {
        self.state.record(NativeCall::ClearUnorderedAccessViewFloat { view, values });
    }

    fn generate_mips(&mut self, view: ShaderResourceView) {
        self.state.record(NativeCall::GenerateMips(view));
    }

    fn write_discard(&mut self, buffer: NativeBuffer, offset: u32, data: &[u8]) -> Result<(), NativeError> {
        {
            let mut objects = self.state.objects.lock();
            match objects.get_mut(&buffer.0) {
                Some(NullObject::Buffer { desc, contents }) if desc.dynamic => {
                    let start = offset as usize;
                    let end = start + data.len();
                    if end > contents.len() {
                        return Err(NativeError::MapFailed(buffer.0));
                    }
                    contents[start..end].copy_from_slice(data);
                }
                _ => return Err(NativeError::MapFailed(buffer.0)),
            }
        }
        self.state.record(NativeCall::WriteDiscard {
            buffer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn begin_query(&mut self, query: NativeQuery) {
        if let Some(record) = self.state.queries.lock().get_mut(&query.0) {
            *record = QueryRecord::default();
        }
        self.state.record(NativeCall::BeginQuery(query));
    }

    fn end_query(&mut self, query: NativeQuery) {
        let kind = match self.state.objects.lock().get(&query.0) {
            Some(NullObject::Query(kind)) => Some(*kind),
            _ => None,
        };
        if let Some(record) = self.state.queries.lock().get_mut(&query.0) {
            record.ended = true;
            record.polls = 0;
            record.value = match kind {
                Some(QueryKind::Timestamp) => self.state.clock.fetch_add(1, Ordering::Relaxed),
                Some(QueryKind::Event) => 1,
                _ => 0,
            };
        }
        self.state.record(NativeCall::EndQuery(query));
    }

    fn query_data(&mut self, query: NativeQuery) -> Option<u64> {
        let latency = self.state.query_latency.load(Ordering::Relaxed);
        let mut queries = self.state.queries.lock();
        let record = queries.get_mut(&query.0)?;
        if !record.ended || latency == u32::MAX {
            return None;
        }
        if record.polls < latency {
            record.polls += 1;
            return None;
        }
        Some(record.value)
    }

    fn flush(&mut self) {
        self.state.record(NativeCall::Flush);
    }

    fn extended(&mut self) -> Option<&mut dyn DeviceContext1> {
        if self.state.feature_level >= FeatureLevel::L11_1 {
            Some(self)
        } else {
            None
        }
    }
}

impl DeviceContext1 for RecordingContext {
    fn set_constant_buffers1(
        &mut self,
        stage: NativeStage,
        start_slot: u32,
        buffers: &[Option<NativeBuffer>],
        first_constant: &[u32],
        num_constants: &[u32],
    ) {
        let entries: Vec<Option<BoundConstantBuffer>> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| {
                b.map(|buffer| BoundConstantBuffer {
                    buffer,
                    first_constant: first_constant.get(i).copied().unwrap_or(0),
                    num_constants: num_constants.get(i).copied(),
                })
            })
            .collect();
        assign(&mut self.bound().stages[stage.index()].constant_buffers, start_slot, &entries);
        self.state.record(NativeCall::SetConstantBuffers1 {
            stage,
            start_slot,
            buffers: buffers.to_vec(),
            first_constant: first_constant.to_vec(),
            num_constants: num_constants.to_vec(),
        });
    }

    fn clear_view(&mut self, view: RenderTargetView, color: [f32; 4], rects: &[Rect]) {
        self.state.record(NativeCall::ClearView {
            view,
            color,
            rects: rects.to_vec(),
        });
    }
}

// ── Passthrough compiler ────────────────────────────────────

/// Stand-in for the native HLSL compiler. The "bytecode" is the source text
/// behind a `// <profile> <entry>` header line. `#error` lines fail the
/// compile and `#pragma message` lines are reported as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCompiler;

impl ShaderCompiler for PassthroughCompiler {
    fn compile(&self, source: &str, entry_point: &str, profile: &str) -> Result<CompileOutput, CompileFailure> {
        let errors: Vec<&str> = source
            .lines()
            .filter(|l| l.trim_start().starts_with("#error"))
            .collect();
        if !errors.is_empty() {
            return Err(CompileFailure {
                messages: errors.join("\n"),
            });
        }
        let messages = source
            .lines()
            .filter(|l| l.trim_start().starts_with("#pragma message"))
            .collect::<Vec<_>>()
            .join("\n");
        let bytecode = format!("// {} {}\n{}", profile, entry_point, source).into_bytes();
        Ok(CompileOutput { bytecode, messages })
    }

    fn reflect(&self, bytecode: &[u8]) -> Result<ShaderReflection, NativeError> {
        let text = std::str::from_utf8(bytecode).map_err(|e| NativeError::CreationFailed {
            kind: "shader reflection",
            reason: e.to_string(),
        })?;
        let entry = text
            .lines()
            .next()
            .and_then(|header| header.strip_prefix("// "))
            .and_then(|header| header.split_whitespace().nth(1))
            .unwrap_or("main");
        Ok(ShaderReflection {
            inputs: reflect_inputs(text, entry),
            constant_buffers: reflect_constant_buffers(text),
        })
    }
}

fn type_components(ty: &str) -> u32 {
    let digits: String = ty.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => 1,
    }
}

fn type_size(ty: &str) -> u32 {
    let ty = ty.trim_start_matches("row_major ").trim_start_matches("column_major ");
    match ty.split_once('x') {
        Some((base, cols)) if cols.chars().all(|c| c.is_ascii_digit()) && !cols.is_empty() => {
            let rows = type_components(base);
            let cols: u32 = cols.parse().unwrap_or(1);
            rows * cols * 4
        }
        _ => type_components(ty) * 4,
    }
}

/// Parameters with semantics in the entry's input struct or parameter list.
fn reflect_inputs(text: &str, entry: &str) -> Vec<SignatureParameter> {
    let struct_header = format!("struct VertexInput_{}", entry);
    let region = if let Some(start) = text.find(&struct_header) {
        let body = &text[start..];
        body.find('{')
            .and_then(|open| body[open + 1..].find('}').map(|close| &body[open + 1..open + 1 + close]))
    } else {
        let call = format!(" {}(", entry);
        text.find(&call).and_then(|start| {
            let body = &text[start + call.len()..];
            body.find(')').map(|close| &body[..close])
        })
    };
    let Some(region) = region else {
        return Vec::new();
    };

    let mut inputs = Vec::new();
    for decl in region.split([';', ',']) {
        let Some((lhs, semantic)) = decl.split_once(':') else {
            continue;
        };
        let semantic = semantic.trim();
        if semantic.is_empty() || semantic.starts_with("SV_") {
            continue;
        }
        let ty = lhs.split_whitespace().rev().nth(1).unwrap_or("float4");
        let name_len = semantic.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (name, index) = semantic.split_at(name_len);
        inputs.push(SignatureParameter {
            semantic: name.to_string(),
            semantic_index: index.parse().unwrap_or(0),
            register: inputs.len() as u32,
            components: type_components(ty),
        });
    }
    inputs
}

/// `cbuffer <name> : register(b<N>) { ... }` declarations.
fn reflect_constant_buffers(text: &str) -> Vec<ConstantBufferDesc> {
    let mut buffers = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("cbuffer ") {
        rest = &rest[pos + "cbuffer ".len()..];
        let name = rest
            .split(|c: char| c.is_whitespace() || c == ':' || c == '{')
            .next()
            .unwrap_or_default()
            .to_string();
        let header_end = rest.find('{').unwrap_or(rest.len());
        let header = &rest[..header_end];
        let bind_point = header
            .find("register(b")
            .and_then(|p| {
                let digits: String = header[p + "register(b".len()..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse().ok()
            })
            .unwrap_or(buffers.len() as u32);
        let body_end = rest[header_end..].find('}').map(|e| header_end + e).unwrap_or(rest.len());
        let body = rest.get(header_end + 1..body_end).unwrap_or_default();
        let bytes: u32 = body
            .split(';')
            .filter_map(|member| {
                let mut words = member.split_whitespace().filter(|w| *w != "row_major" && *w != "column_major");
                let ty = words.next()?;
                words.next()?;
                Some(type_size(ty))
            })
            .sum();
        buffers.push(ConstantBufferDesc {
            name,
            bind_point,
            size: bytes.div_ceil(16) * 16,
        });
        rest = &rest[body_end.min(rest.len())..];
    }
    buffers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_objects_are_forgotten() {
        let device = NullDevice::new(FeatureLevel::L11_0);
        let sampler = device
            .create_sampler(&SamplerDesc {
                min: FilterMode::Linear,
                mag: FilterMode::Linear,
                mip: FilterMode::Point,
                anisotropic: false,
                address: [AddressMode::Wrap; 3],
                mip_lod_bias: 0.0,
                max_anisotropy: 1,
                comparison: None,
                border_color: [0.0; 4],
                min_lod: 0.0,
                max_lod: f32::MAX,
            })
            .unwrap();
        assert_eq!(device.live_objects(), 1);
        device.release(sampler.0);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn extended_interface_requires_11_1() {
        let old = NullDevice::new(FeatureLevel::L11_0);
        assert!(old.immediate_context().extended().is_none());
        let new = NullDevice::new(FeatureLevel::L11_1);
        assert!(new.immediate_context().extended().is_some());
    }

    #[test]
    fn uavs_unavailable_below_11_0() {
        let device = NullDevice::new(FeatureLevel::L10_1);
        let buffer = device
            .create_buffer(
                &BufferDesc {
                    size: 64,
                    bind: BindFlags::SHADER_RESOURCE,
                    misc: MiscFlags::empty(),
                    dynamic: false,
                },
                None,
            )
            .unwrap();
        let desc = ViewDesc {
            format: DxgiFormat::R32_TYPELESS,
            dimension: ViewDimension::RawBuffer,
            first: 0,
            count: 16,
            first_layer: 0,
            layer_count: 1,
        };
        assert!(matches!(
            device.create_unordered_access_view(NativeResource::Buffer(buffer), &desc),
            Err(NativeError::FeatureLevel { .. })
        ));
    }

    #[test]
    fn query_latency_delays_results() {
        let device = NullDevice::new(FeatureLevel::L11_0);
        device.set_query_latency(2);
        let query = device.create_query(QueryKind::Event).unwrap();
        let mut ctx = device.immediate_context();
        assert_eq!(ctx.query_data(query), None);
        ctx.end_query(query);
        assert_eq!(ctx.query_data(query), None);
        assert_eq!(ctx.query_data(query), None);
        assert_eq!(ctx.query_data(query), Some(1));
    }

    #[test]
    fn write_discard_requires_dynamic_buffer() {
        let device = NullDevice::new(FeatureLevel::L11_0);
        let static_buffer = device
            .create_buffer(
                &BufferDesc {
                    size: 16,
                    bind: BindFlags::CONSTANT_BUFFER,
                    misc: MiscFlags::empty(),
                    dynamic: false,
                },
                None,
            )
            .unwrap();
        let mut ctx = device.immediate_context();
        assert_eq!(
            ctx.write_discard(static_buffer, 0, &[1, 2, 3, 4]),
            Err(NativeError::MapFailed(static_buffer.0))
        );
    }

    #[test]
    fn passthrough_reflects_cbuffers_and_inputs() {
        let source = r#"
cbuffer PushConstants : register(b13) {
    float4x4 transform;
    float4 tint;
}

struct VertexInput_main {
    float3 position : LOC0;
    float2 uv : LOC1;
    uint vid : SV_VertexID;
};
"#;
        let compiler = PassthroughCompiler;
        let output = compiler.compile(source, "main", "vs_5_0").unwrap();
        let reflection = compiler.reflect(&output.bytecode).unwrap();
        assert_eq!(reflection.constant_buffers.len(), 1);
        assert_eq!(reflection.constant_buffers[0].bind_point, 13);
        assert_eq!(reflection.constant_buffers[0].size, 80);
        assert_eq!(reflection.inputs.len(), 2);
        assert_eq!(reflection.inputs[1].semantic, "LOC");
        assert_eq!(reflection.inputs[1].semantic_index, 1);
        assert_eq!(reflection.inputs[1].components, 2);
    }

    #[test]
    fn error_directive_fails_compile() {
        let failure = PassthroughCompiler
            .compile("#error missing feature\nfloat4 main() : SV_Target { return 0; }", "main", "ps_5_0")
            .unwrap_err();
        assert!(failure.messages.contains("missing feature"));
    }
}
